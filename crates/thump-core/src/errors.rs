//! Error taxonomy shared by the relay components.
//!
//! Only the transport variants end a session. Everything else is logged
//! where it happens and the offending frame or command is dropped.

use crate::ids::ClientId;

/// Errors raised by the codec, the event bus and the session actors.
#[derive(Debug, thiserror::Error)]
pub enum ThumpError {
    /// A payload could not be parsed into its typed shape.
    #[error("malformed {kind} payload: {reason}")]
    MalformedPayload {
        /// Frame kind whose payload failed to parse.
        kind: String,
        /// Parser message.
        reason: String,
    },
    /// A server-synthesized payload failed to serialize.
    #[error("failed to encode {kind} payload: {reason}")]
    Encode {
        /// Frame kind being encoded.
        kind: String,
        /// Serializer message.
        reason: String,
    },
    /// A mutating command referenced a client id absent from the table.
    #[error("unknown session {0}")]
    UnknownSession(ClientId),
    /// The recipient's mailbox is at capacity; the frame was dropped.
    #[error("mailbox full for client {0}")]
    MailboxFull(ClientId),
    /// The recipient's mailbox receiver is gone (session tearing down).
    #[error("mailbox closed for client {0}")]
    MailboxClosed(ClientId),
    /// Reading from the client socket failed.
    #[error("transport read failed: {0}")]
    TransportRead(String),
    /// Writing to the client socket failed.
    #[error("transport write failed: {0}")]
    TransportWrite(String),
    /// The event bus is no longer accepting commands.
    #[error("event bus closed")]
    BusClosed,
}

impl ThumpError {
    /// Build a [`ThumpError::MalformedPayload`] for `kind`.
    pub fn malformed(kind: &str, reason: impl ToString) -> Self {
        Self::MalformedPayload {
            kind: kind.to_owned(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error ends the session that observed it.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::TransportRead(_) | Self::TransportWrite(_))
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MalformedPayload { .. } => "malformed_payload",
            Self::Encode { .. } => "encode",
            Self::UnknownSession(_) => "unknown_session",
            Self::MailboxFull(_) => "mailbox_full",
            Self::MailboxClosed(_) => "mailbox_closed",
            Self::TransportRead(_) => "transport_read",
            Self::TransportWrite(_) => "transport_write",
            Self::BusClosed => "bus_closed",
        }
    }
}

/// Result alias used across the thump crates.
pub type Result<T> = std::result::Result<T, ThumpError>;
