//! One connected client, from registration to teardown.
//!
//! The actor is generic over the socket halves so it can be driven by an
//! axum `WebSocket` in production and by in-memory channels in tests.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, Utf8Bytes};
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::{counter, gauge, histogram};
use thump_core::protocol::{self, Frame, FrameKind};
use thump_core::{ClientId, RawFrame, Result, ThumpError};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::mailbox::mailbox;
use crate::bus::BusHandle;
use crate::metrics::{
    FRAMES_REJECTED_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL, WS_WRITE_FAILURES_TOTAL,
};

/// Everything a session needs besides its socket.
#[derive(Clone, Debug)]
pub struct SessionContext {
    /// Id assigned at accept time.
    pub client_id: ClientId,
    /// Event bus.
    pub bus: BusHandle,
    /// Mailbox size.
    pub mailbox_capacity: usize,
    /// Consecutive write errors tolerated before closing.
    pub max_write_failures: u32,
    /// Server-wide shutdown.
    pub shutdown: CancellationToken,
}

type SharedSink<S> = Arc<Mutex<S>>;

/// Run a session to completion.
///
/// Registers with the bus, sends the connect-time frames, then reads until
/// the client leaves, the write side gives up, or the server shuts down.
/// The session is always removed from the bus on the way out.
#[instrument(skip_all, fields(client_id = %ctx.client_id))]
pub async fn run_session<S, R, E>(sink: S, mut stream: R, ctx: SessionContext)
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
    R: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: Display,
{
    let client_id = ctx.client_id;
    let started = Instant::now();
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    info!("client connected");

    let sink: SharedSink<S> = Arc::new(Mutex::new(sink));
    let (mailbox, inbox) = mailbox(client_id, ctx.mailbox_capacity);
    let drops = mailbox.clone();

    if let Err(e) = ctx.bus.add_session(client_id, Some(mailbox)).await {
        warn!(error = %e, "could not register session");
        close_sink(&sink).await;
        record_disconnect(started);
        return;
    }

    let close = CancellationToken::new();
    let write_failed = CancellationToken::new();

    match send_greeting(&sink, &ctx).await {
        Ok(()) => {
            let writer = tokio::spawn(write_loop(
                Arc::clone(&sink),
                inbox,
                client_id,
                ctx.max_write_failures,
                close.clone(),
                write_failed.clone(),
            ));
            read_loop(&mut stream, &sink, &ctx, &write_failed).await;
            close.cancel();
            if let Err(e) = writer.await {
                warn!(error = %e, "write loop panicked");
            }
        }
        Err(e) => warn!(error = %e, "failed to send connect-time frames"),
    }

    if let Err(e) = ctx.bus.remove_session(client_id).await {
        debug!(error = %e, "could not unregister session");
    }
    close_sink(&sink).await;
    record_disconnect(started);
    info!(dropped = drops.drop_count(), "client disconnected");
}

/// `clock/origin`, `client/id` and the current tempo, in that order.
async fn send_greeting<S>(sink: &SharedSink<S>, ctx: &SessionContext) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let clock = ctx.bus.clock();
    let frames = [
        protocol::clock_origin_frame(clock.origin_ms())?,
        protocol::client_id_frame(ctx.client_id)?,
        protocol::clock_update_frame(clock.bpm())?,
    ];
    let mut sink = sink.lock().await;
    for frame in frames {
        sink.send(Message::Text(frame.into()))
            .await
            .map_err(|e| ThumpError::TransportWrite(e.to_string()))?;
    }
    Ok(())
}

async fn read_loop<S, R, E>(
    stream: &mut R,
    sink: &SharedSink<S>,
    ctx: &SessionContext,
    write_failed: &CancellationToken,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
    R: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let message = tokio::select! {
            biased;
            () = ctx.shutdown.cancelled() => {
                debug!("server shutting down");
                break;
            }
            () = write_failed.cancelled() => {
                info!("closing after repeated write failures");
                break;
            }
            next = stream.next() => next,
        };

        let text = match message {
            None => break,
            Some(Err(e)) => {
                debug!(error = %ThumpError::TransportRead(e.to_string()), "read failed");
                break;
            }
            Some(Ok(Message::Close(_))) => {
                debug!("client sent close frame");
                break;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => text.to_owned(),
                Err(_) => {
                    warn!(len = data.len(), "dropping non-UTF-8 binary frame");
                    continue;
                }
            },
        };

        if let Err(e) = dispatch(&text, sink, ctx).await {
            if matches!(e, ThumpError::BusClosed) {
                debug!("event bus closed");
                break;
            }
            if e.is_transport() {
                info!(error = %e, "closing after transport error");
                break;
            }
            warn!(error_kind = e.error_kind(), error = %e, "dropping frame");
        }
    }
}

/// Route one inbound frame by kind.
async fn dispatch<S>(text: &str, sink: &SharedSink<S>, ctx: &SessionContext) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let frame = Frame::decode(text);
    match frame.frame_kind() {
        FrameKind::ClockNow => {
            let reply = protocol::clock_now_frame(ctx.bus.clock().now_ms())?;
            sink.lock()
                .await
                .send(Message::Text(reply.into()))
                .await
                .map_err(|e| ThumpError::TransportWrite(e.to_string()))
        }
        FrameKind::ClockUpdate => {
            let opts = protocol::parse_clock_update(frame.payload).inspect_err(|_| {
                counter!(FRAMES_REJECTED_TOTAL, "kind" => protocol::CLOCK_UPDATE).increment(1);
            })?;
            ctx.bus.clock_update(opts.bpm, ctx.client_id).await
        }
        FrameKind::UserUpdate => {
            let profile = protocol::parse_user_update(frame.payload).inspect_err(|_| {
                counter!(FRAMES_REJECTED_TOTAL, "kind" => protocol::USER_UPDATE).increment(1);
            })?;
            ctx.bus.profile_update(ctx.client_id, profile).await
        }
        _ => {
            let raw: RawFrame = Arc::from(text);
            ctx.bus.relay(raw, ctx.client_id, true).await
        }
    }
}

async fn write_loop<S>(
    sink: SharedSink<S>,
    mut inbox: mpsc::Receiver<RawFrame>,
    client_id: ClientId,
    max_failures: u32,
    close: CancellationToken,
    write_failed: CancellationToken,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut failures: u32 = 0;
    loop {
        let frame = tokio::select! {
            biased;
            () = close.cancelled() => break,
            frame = inbox.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let sent = sink
            .lock()
            .await
            .send(Message::Text(Utf8Bytes::from(&*frame)))
            .await;
        match sent {
            Ok(()) => failures = 0,
            Err(e) => {
                failures += 1;
                counter!(WS_WRITE_FAILURES_TOTAL).increment(1);
                warn!(%client_id, failures, error = %e, "write failed");
                if failures > max_failures {
                    write_failed.cancel();
                    break;
                }
            }
        }
    }
}

async fn close_sink<S>(sink: &SharedSink<S>)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    if let Err(e) = sink.lock().await.close().await {
        debug!(error = %e, "socket close failed");
    }
}

fn record_disconnect(started: Instant) {
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}
