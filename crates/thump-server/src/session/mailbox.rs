//! Per-session outbound queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thump_core::{ClientId, RawFrame, Result, ThumpError};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Sending half of a session's bounded mailbox, held by the event bus.
#[derive(Clone, Debug)]
pub struct Mailbox {
    client_id: ClientId,
    tx: mpsc::Sender<RawFrame>,
    dropped: Arc<AtomicU64>,
}

/// Create a mailbox holding at most `capacity` undelivered frames.
pub fn mailbox(client_id: ClientId, capacity: usize) -> (Mailbox, mpsc::Receiver<RawFrame>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let mailbox = Mailbox {
        client_id,
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (mailbox, rx)
}

impl Mailbox {
    /// Enqueue without waiting.
    ///
    /// A full mailbox drops `frame` and bumps the drop counter; frames
    /// already queued are kept.
    pub fn deliver(&self, frame: RawFrame) -> Result<()> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(ThumpError::MailboxFull(self.client_id))
            }
            Err(TrySendError::Closed(_)) => Err(ThumpError::MailboxClosed(self.client_id)),
        }
    }

    /// Frames dropped because the mailbox was full, across all clones.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
