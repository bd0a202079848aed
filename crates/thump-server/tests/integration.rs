//! End-to-end tests against a real listener and WebSocket clients.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use thump_core::PresenceProfile;
use thump_core::protocol::Frame;
use thump_server::{ServerConfig, ThumpServer};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    server: Arc<ThumpServer>,
    addr: std::net::SocketAddr,
}

impl TestServer {
    async fn boot() -> Self {
        Self::boot_with(|_| {}).await
    }

    async fn boot_with(tweak: impl FnOnce(&mut ServerConfig)) -> Self {
        let mut config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        };
        tweak(&mut config);
        let server = Arc::new(ThumpServer::new(config, None));
        let (addr, _handle) = server.listen().await.unwrap();
        Self { server, addr }
    }

    fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{path}", self.addr)
    }

    fn http_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Connect and consume the three connect-time frames.
    async fn join(&self) -> (WsStream, u64) {
        let (mut ws, _) = connect_async(self.ws_url("/api")).await.unwrap();
        let greeting = recv_n(&mut ws, 3).await;
        let id = payload(&greeting[1])["clientId"].as_u64().unwrap();
        (ws, id)
    }

    async fn wait_for_connections(&self, n: usize) {
        timeout(TIMEOUT, async {
            while self.server.bus().stats().addressable() != n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn stop(self) {
        self.server.stop(Some(Duration::from_secs(2))).await;
    }
}

async fn recv_text(ws: &mut WsStream) -> String {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("read error");
        if let Message::Text(text) = msg {
            return text.as_str().to_owned();
        }
    }
}

async fn recv_n(ws: &mut WsStream, n: usize) -> Vec<String> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(recv_text(ws).await);
    }
    out
}

async fn send(ws: &mut WsStream, text: &str) {
    ws.send(Message::Text(text.into())).await.unwrap();
}

fn kind(frame: &str) -> &str {
    Frame::decode(frame).kind
}

fn payload(frame: &str) -> Value {
    serde_json::from_str(Frame::decode(frame).payload).unwrap()
}

// ── connect ─────────────────────────────────────────────────────────

#[tokio::test]
async fn connect_receives_origin_id_and_tempo() {
    let server = TestServer::boot().await;
    let (mut ws, _) = connect_async(server.ws_url("/api")).await.unwrap();

    let frames = recv_n(&mut ws, 3).await;
    assert_eq!(kind(&frames[0]), "clock/origin");
    assert!(payload(&frames[0])["originMs"].as_f64().unwrap() > 0.0);
    assert_eq!(frames[1], r#"client/id#{"clientId":0}"#);
    assert_eq!(frames[2], r#"clock/update#{"bpm":95}"#);

    server.stop().await;
}

#[tokio::test]
async fn ids_increase_per_connection() {
    let server = TestServer::boot().await;
    let (_a, id_a) = server.join().await;
    let (_b, id_b) = server.join().await;
    let (_c, id_c) = server.join().await;
    assert_eq!((id_a, id_b, id_c), (0, 1, 2));
    server.stop().await;
}

#[tokio::test]
async fn both_default_paths_accept_websockets() {
    let server = TestServer::boot().await;
    let (mut ws, _) = connect_async(server.ws_url("/api/ws")).await.unwrap();
    let frames = recv_n(&mut ws, 3).await;
    assert_eq!(kind(&frames[1]), "client/id");
    server.stop().await;
}

#[tokio::test]
async fn other_paths_are_rejected() {
    let server = TestServer::boot().await;
    assert!(connect_async(server.ws_url("/nope")).await.is_err());

    let resp = reqwest::get(server.http_url("/nope")).await.unwrap();
    assert_eq!(resp.status(), 404);

    let resp = reqwest::get(server.http_url("/api")).await.unwrap();
    assert!(resp.status().is_client_error());
    assert_eq!(server.server.bus().stats().sessions(), 0);

    server.stop().await;
}

// ── clock ───────────────────────────────────────────────────────────

#[tokio::test]
async fn clock_now_reports_elapsed_time() {
    let server = TestServer::boot().await;
    let (mut a, _) = server.join().await;

    let before = server.server.bus().clock().now_ms();
    send(&mut a, "clock/now#").await;
    let reply = recv_text(&mut a).await;
    let after = server.server.bus().clock().now_ms();

    assert_eq!(kind(&reply), "clock/now");
    let now_ms = payload(&reply)["nowMs"].as_f64().unwrap();
    assert!(now_ms >= before && now_ms <= after, "{before} <= {now_ms} <= {after}");

    server.stop().await;
}

#[tokio::test]
async fn tempo_change_reaches_others_and_new_joiners() {
    let server = TestServer::boot().await;
    let (mut a, _) = server.join().await;
    let (mut b, _) = server.join().await;

    send(&mut a, r#"clock/update#{"bpm":120}"#).await;
    assert_eq!(recv_text(&mut b).await, r#"clock/update#{"bpm":120}"#);

    // the sender is not echoed; its next frame is the clock/now reply
    send(&mut a, "clock/now#").await;
    assert_eq!(kind(&recv_text(&mut a).await), "clock/now");

    let (mut c, _) = connect_async(server.ws_url("/api")).await.unwrap();
    let greeting = recv_n(&mut c, 3).await;
    assert_eq!(greeting[2], r#"clock/update#{"bpm":120}"#);

    server.stop().await;
}

#[tokio::test]
async fn malformed_tempo_is_ignored() {
    let server = TestServer::boot().await;
    let (mut a, _) = server.join().await;
    let (mut b, _) = server.join().await;

    for bad in [
        r#"clock/update#{"bpm":"fast"}"#,
        r#"clock/update#{"bpm":1e-20}"#,
        r#"clock/update#{"bpm":1e-320}"#,
    ] {
        send(&mut a, bad).await;
    }
    send(&mut a, "custom/after#1").await;
    assert_eq!(recv_text(&mut b).await, "custom/after#1");
    assert_eq!(server.server.bus().clock().bpm(), 95.0);

    server.stop().await;
}

// ── presence ────────────────────────────────────────────────────────

#[tokio::test]
async fn profile_update_broadcasts_presence() {
    let server = TestServer::boot().await;
    let (mut a, id_a) = server.join().await;
    let (mut b, _) = server.join().await;

    send(
        &mut a,
        r#"user/update#{"clientId":0,"name":"alice","instrument":"piano","inputDevice":"keyboard","offset":2,"posX":0.1,"posY":0.2}"#,
    )
    .await;

    for ws in [&mut a, &mut b] {
        let frame = recv_text(ws).await;
        assert_eq!(kind(&frame), "user/all");
        let all: Vec<PresenceProfile> =
            serde_json::from_str(Frame::decode(&frame).payload).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].client_id.0, id_a);
        assert_eq!(all[0].name, "alice");
        assert_eq!(all[0].instrument, "piano");
    }

    server.stop().await;
}

#[tokio::test]
async fn leaving_with_profile_broadcasts_presence() {
    let server = TestServer::boot().await;
    let (mut a, _) = server.join().await;
    let (mut b, _) = server.join().await;

    send(&mut b, r#"user/update#{"name":"bob"}"#).await;
    let _ = recv_text(&mut a).await;
    let _ = recv_text(&mut b).await;

    b.close(None).await.unwrap();
    let frame = recv_text(&mut a).await;
    assert_eq!(frame, "user/all#[]");
    server.wait_for_connections(1).await;

    server.stop().await;
}

// ── relay ───────────────────────────────────────────────────────────

#[tokio::test]
async fn relay_excludes_sender() {
    let server = TestServer::boot().await;
    let (mut a, _) = server.join().await;
    let (mut b, _) = server.join().await;

    send(&mut a, "custom/ping#hello").await;
    assert_eq!(recv_text(&mut b).await, "custom/ping#hello");

    // if A had been sent its own ping it would arrive before this marker
    send(&mut b, "custom/marker#").await;
    assert_eq!(recv_text(&mut a).await, "custom/marker#");

    server.stop().await;
}

#[tokio::test]
async fn user_events_relay_verbatim() {
    let server = TestServer::boot().await;
    let (mut a, _) = server.join().await;
    let (mut b, _) = server.join().await;
    let (mut c, _) = server.join().await;

    let event = r#"user/event#{"clientId":0,"midiEvent":{"kind":"noteon","note":60},"timestamp":12.5}"#;
    send(&mut a, event).await;
    assert_eq!(recv_text(&mut b).await, event);
    assert_eq!(recv_text(&mut c).await, event);

    server.stop().await;
}

#[tokio::test]
async fn binary_frames_relay_as_text() {
    let server = TestServer::boot().await;
    let (mut a, _) = server.join().await;
    let (mut b, _) = server.join().await;

    a.send(Message::Binary(b"custom/bin#ok".to_vec().into()))
        .await
        .unwrap();
    assert_eq!(recv_text(&mut b).await, "custom/bin#ok");

    server.stop().await;
}

// ── auxiliary ───────────────────────────────────────────────────────

#[tokio::test]
async fn health_counts_connections() {
    let server = TestServer::boot().await;
    let (_a, _) = server.join().await;
    let (_b, _) = server.join().await;
    server.wait_for_connections(2).await;

    let body: Value = reqwest::get(server.http_url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 2);
    assert_eq!(body["bpm"], 95.0);

    server.stop().await;
}

#[tokio::test]
async fn robo_participant_plays_for_clients() {
    let server = TestServer::boot_with(|config| {
        config.robo.enabled = true;
        config.default_bpm = 600.0;
    })
    .await;
    let (mut ws, id) = server.join().await;
    assert_eq!(id, 1, "the simulated participant takes id 0");

    let mut saw_event = false;
    for _ in 0..32 {
        let frame = recv_text(&mut ws).await;
        if kind(&frame) == "user/event" {
            let event = payload(&frame);
            assert_eq!(event["clientId"], 0);
            assert_eq!(event["instrument"], "eightOhEight");
            saw_event = true;
            break;
        }
    }
    assert!(saw_event);

    server.stop().await;
}

#[tokio::test]
async fn shutdown_closes_clients() {
    let server = TestServer::boot().await;
    let (mut a, _) = server.join().await;
    server.wait_for_connections(1).await;

    server.server.stop(Some(Duration::from_secs(2))).await;
    let end = timeout(TIMEOUT, async {
        loop {
            match a.next().await {
                None | Some(Err(_) | Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(end.is_ok());
}
