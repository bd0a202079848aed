//! Event bus: the one task that owns session state.
//!
//! Sessions and the simulated participant talk to the bus through a
//! [`BusHandle`]. The bus applies commands one at a time in arrival order and
//! does all fan-out with non-blocking mailbox sends, so a slow recipient only
//! ever loses its own frames.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::counter;
use thump_core::presence::{self, PresenceProfile};
use thump_core::protocol;
use thump_core::{ClientId, ClockAuthority, ClockReader, RawFrame, Result, ThumpError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{
    BUS_COMMANDS_TOTAL, FRAMES_DELIVERED_TOTAL, FRAMES_DROPPED_TOTAL, TEMPO_CHANGES_TOTAL,
};
use crate::session::Mailbox;

/// A request to the bus.
#[derive(Debug)]
pub enum Command {
    /// Register a session. `mailbox` is `None` for participants that never
    /// receive frames.
    AddSession {
        /// Session id.
        client_id: ClientId,
        /// Outbound queue, if the session is addressable.
        mailbox: Option<Mailbox>,
    },
    /// Unregister a session.
    RemoveSession(ClientId),
    /// Replace the tempo and tell everyone else.
    ClockUpdate {
        /// New tempo.
        bpm: f64,
        /// Session that asked for the change.
        from: ClientId,
    },
    /// Replace a session's presence profile.
    ProfileUpdate {
        /// Session whose profile changes.
        client_id: ClientId,
        /// The new profile.
        profile: PresenceProfile,
    },
    /// Forward an encoded frame unchanged.
    Relay {
        /// Frame text.
        raw: RawFrame,
        /// Session that sent it.
        from: ClientId,
        /// Leave the sender out of the delivery.
        skip_source: bool,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::AddSession { .. } => "add_session",
            Self::RemoveSession(_) => "remove_session",
            Self::ClockUpdate { .. } => "clock_update",
            Self::ProfileUpdate { .. } => "profile_update",
            Self::Relay { .. } => "relay",
        }
    }
}

/// Counters the bus publishes for readers outside its task.
#[derive(Debug, Default)]
pub struct BusStats {
    sessions: AtomicUsize,
    addressable: AtomicUsize,
}

impl BusStats {
    /// Registered sessions, including non-addressable ones.
    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::Relaxed)
    }

    /// Registered sessions that have a mailbox.
    pub fn addressable(&self) -> usize {
        self.addressable.load(Ordering::Relaxed)
    }
}

/// Cloneable sender side of the bus.
#[derive(Clone, Debug)]
pub struct BusHandle {
    tx: mpsc::Sender<Command>,
    stats: Arc<BusStats>,
    clock: ClockReader,
}

impl BusHandle {
    /// Queue a command, waiting while the queue is full.
    pub async fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).await.map_err(|_| ThumpError::BusClosed)
    }

    /// Register a session.
    pub async fn add_session(&self, client_id: ClientId, mailbox: Option<Mailbox>) -> Result<()> {
        self.send(Command::AddSession { client_id, mailbox }).await
    }

    /// Unregister a session.
    pub async fn remove_session(&self, client_id: ClientId) -> Result<()> {
        self.send(Command::RemoveSession(client_id)).await
    }

    /// Request a tempo change.
    pub async fn clock_update(&self, bpm: f64, from: ClientId) -> Result<()> {
        self.send(Command::ClockUpdate { bpm, from }).await
    }

    /// Publish a presence profile for `client_id`.
    pub async fn profile_update(
        &self,
        client_id: ClientId,
        profile: PresenceProfile,
    ) -> Result<()> {
        self.send(Command::ProfileUpdate { client_id, profile }).await
    }

    /// Relay a frame to the other sessions (or to all, if `skip_source` is
    /// false).
    pub async fn relay(&self, raw: RawFrame, from: ClientId, skip_source: bool) -> Result<()> {
        self.send(Command::Relay {
            raw,
            from,
            skip_source,
        })
        .await
    }

    /// Read-only view of the shared clock.
    pub fn clock(&self) -> &ClockReader {
        &self.clock
    }

    /// Published counters.
    pub fn stats(&self) -> &BusStats {
        &self.stats
    }
}

struct SessionEntry {
    mailbox: Option<Mailbox>,
    profile: Option<PresenceProfile>,
}

/// The bus itself. Run it with [`EventBus::run`].
pub struct EventBus {
    sessions: HashMap<ClientId, SessionEntry>,
    clock: ClockAuthority,
    rx: mpsc::Receiver<Command>,
    stats: Arc<BusStats>,
}

impl EventBus {
    /// Create a bus owning `clock`, with a command queue of `capacity`.
    pub fn new(clock: ClockAuthority, capacity: usize) -> (Self, BusHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(BusStats::default());
        let handle = BusHandle {
            tx,
            stats: Arc::clone(&stats),
            clock: clock.reader(),
        };
        let bus = Self {
            sessions: HashMap::new(),
            clock,
            rx,
            stats,
        };
        (bus, handle)
    }

    /// Apply commands until every handle is dropped or `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(bpm = self.clock.bpm(), "event bus started");
        loop {
            let command = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            let name = command.name();
            if let Err(e) = self.apply(command) {
                warn!(command = name, error_kind = e.error_kind(), error = %e, "command failed");
            }
        }
        info!(sessions = self.sessions.len(), "event bus stopped");
    }

    /// Apply a single command.
    pub fn apply(&mut self, command: Command) -> Result<()> {
        counter!(BUS_COMMANDS_TOTAL).increment(1);
        match command {
            Command::AddSession { client_id, mailbox } => {
                self.add_session(client_id, mailbox);
                Ok(())
            }
            Command::RemoveSession(client_id) => self.remove_session(client_id),
            Command::ClockUpdate { bpm, from } => self.update_clock(bpm, from),
            Command::ProfileUpdate { client_id, profile } => {
                self.update_profile(client_id, profile)
            }
            Command::Relay {
                raw,
                from,
                skip_source,
            } => {
                let except = skip_source.then_some(from);
                self.deliver(&raw, except);
                Ok(())
            }
        }
    }

    fn add_session(&mut self, client_id: ClientId, mailbox: Option<Mailbox>) {
        let addressable = mailbox.is_some();
        let entry = SessionEntry {
            mailbox,
            profile: None,
        };
        if self.sessions.insert(client_id, entry).is_some() {
            warn!(%client_id, "session re-registered, replacing");
        }
        self.publish_stats();
        info!(%client_id, addressable, "added session");
    }

    fn remove_session(&mut self, client_id: ClientId) -> Result<()> {
        let entry = self
            .sessions
            .remove(&client_id)
            .ok_or(ThumpError::UnknownSession(client_id))?;
        self.publish_stats();
        info!(%client_id, "removed session");
        if entry.profile.is_some() {
            self.broadcast_presence()?;
        }
        Ok(())
    }

    fn update_clock(&mut self, bpm: f64, from: ClientId) -> Result<()> {
        protocol::check_bpm(bpm)?;
        let previous = self.clock.set_bpm(bpm);
        counter!(TEMPO_CHANGES_TOTAL).increment(1);
        info!(from = %from, previous, bpm, "tempo changed");
        let frame: RawFrame = protocol::clock_update_frame(bpm)?.into();
        self.deliver(&frame, Some(from));
        Ok(())
    }

    fn update_profile(&mut self, client_id: ClientId, mut profile: PresenceProfile) -> Result<()> {
        let entry = self
            .sessions
            .get_mut(&client_id)
            .ok_or(ThumpError::UnknownSession(client_id))?;
        profile.client_id = client_id;
        debug!(%client_id, name = %profile.name, "profile updated");
        entry.profile = Some(profile);
        self.broadcast_presence()
    }

    /// Profiles of every session that has published one, ordered by id.
    pub fn presence(&self) -> Vec<PresenceProfile> {
        presence::snapshot(self.sessions.values().filter_map(|s| s.profile.as_ref()))
    }

    fn broadcast_presence(&self) -> Result<()> {
        let snapshot = self.presence();
        let frame: RawFrame = presence::users_all_frame(&snapshot)?.into();
        self.deliver(&frame, None);
        debug!(profiles = snapshot.len(), "sent presence snapshot");
        Ok(())
    }

    /// Hand `frame` to every addressable session except `except`.
    fn deliver(&self, frame: &RawFrame, except: Option<ClientId>) {
        let kind = protocol::Frame::decode(frame).kind;
        for (&client_id, entry) in &self.sessions {
            if except == Some(client_id) {
                continue;
            }
            let Some(mailbox) = &entry.mailbox else {
                continue;
            };
            match mailbox.deliver(Arc::clone(frame)) {
                Ok(()) => counter!(FRAMES_DELIVERED_TOTAL, "kind" => kind.to_owned()).increment(1),
                Err(e @ ThumpError::MailboxFull(_)) => {
                    warn!(%client_id, kind, "mailbox full, dropping frame");
                    counter!(FRAMES_DROPPED_TOTAL, "error_kind" => e.error_kind()).increment(1);
                }
                Err(e) => {
                    debug!(%client_id, kind, error = %e, "mailbox closed, dropping frame");
                    counter!(FRAMES_DROPPED_TOTAL, "error_kind" => e.error_kind()).increment(1);
                }
            }
        }
    }

    fn publish_stats(&self) {
        let addressable = self
            .sessions
            .values()
            .filter(|s| s.mailbox.is_some())
            .count();
        self.stats
            .sessions
            .store(self.sessions.len(), Ordering::Relaxed);
        self.stats.addressable.store(addressable, Ordering::Relaxed);
    }
}
