//! Client sessions: the per-connection actor and its mailbox.

pub mod actor;
pub mod mailbox;

pub use actor::{SessionContext, run_session};
pub use mailbox::{Mailbox, mailbox};
