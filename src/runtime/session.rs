//! Per-connection session state.
//!
//! A `Session` is created when a connection is accepted and dropped when the
//! connection task ends. It is owned by that task; handlers only ever see a
//! shared reference.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;

/// Opaque identifier, unique per connection for the lifetime of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which direction has been idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdleStatus {
    /// No data read.
    Reader,
    /// No data written.
    Writer,
    /// Neither read nor written.
    Both,
}

impl IdleStatus {
    pub const ALL: [IdleStatus; 3] = [IdleStatus::Reader, IdleStatus::Writer, IdleStatus::Both];

    fn index(self) -> usize {
        match self {
            IdleStatus::Reader => 0,
            IdleStatus::Writer => 1,
            IdleStatus::Both => 2,
        }
    }
}

impl fmt::Display for IdleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IdleStatus::Reader => "reader idle",
            IdleStatus::Writer => "writer idle",
            IdleStatus::Both => "both idle",
        };
        f.write_str(name)
    }
}

/// Idle thresholds per direction. `None` disables that notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleConfig {
    pub reader: Option<Duration>,
    pub writer: Option<Duration>,
    pub both: Option<Duration>,
}

impl IdleConfig {
    pub fn threshold(&self, status: IdleStatus) -> Option<Duration> {
        match status {
            IdleStatus::Reader => self.reader,
            IdleStatus::Writer => self.writer,
            IdleStatus::Both => self.both,
        }
    }
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            reader: None,
            writer: None,
            both: Some(Duration::from_secs(10)),
        }
    }
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the next line.
    AwaitingInput,
    /// A line is being handled.
    Processing,
    /// Close requested, output being flushed.
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, Default)]
struct IdleTracker {
    /// Consecutive notifications since the last relevant activity.
    count: u32,
    last_fired: Option<Instant>,
}

/// One accepted connection.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer: Option<SocketAddr>,
    created_at: Instant,
    last_read: Instant,
    last_write: Instant,
    idle: [IdleTracker; 3],
    state: SessionState,
}

impl Session {
    pub fn new(id: SessionId, peer: Option<SocketAddr>) -> Self {
        let now = Instant::now();
        Self {
            id,
            peer,
            created_at: now,
            last_read: now,
            last_write: now,
            idle: [IdleTracker::default(); 3],
            state: SessionState::AwaitingInput,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True until a close has been requested or the connection is gone.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            SessionState::AwaitingInput | SessionState::Processing
        )
    }

    /// Number of consecutive idle notifications raised for `status`.
    pub fn idle_count(&self, status: IdleStatus) -> u32 {
        self.idle[status.index()].count
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub(crate) fn record_read(&mut self, now: Instant) {
        self.last_read = now;
        self.reset_idle(IdleStatus::Reader);
        self.reset_idle(IdleStatus::Both);
    }

    pub(crate) fn record_write(&mut self, now: Instant) {
        self.last_write = now;
        self.reset_idle(IdleStatus::Writer);
        self.reset_idle(IdleStatus::Both);
    }

    /// The earliest pending idle notification, if any kind is enabled.
    ///
    /// A threshold too large to represent as an instant never fires.
    pub(crate) fn next_idle(&self, config: &IdleConfig) -> Option<(IdleStatus, Instant)> {
        IdleStatus::ALL
            .iter()
            .filter_map(|&status| {
                let threshold = config.threshold(status)?;
                let tracker = &self.idle[status.index()];
                let since = match tracker.last_fired {
                    Some(fired) => fired.max(self.last_activity(status)),
                    None => self.last_activity(status),
                };
                since.checked_add(threshold).map(|deadline| (status, deadline))
            })
            .min_by_key(|&(_, deadline)| deadline)
    }

    /// Record that an idle notification for `status` fired at `now`.
    pub(crate) fn mark_idle(&mut self, status: IdleStatus, now: Instant) {
        let tracker = &mut self.idle[status.index()];
        tracker.count += 1;
        tracker.last_fired = Some(now);
    }

    fn last_activity(&self, status: IdleStatus) -> Instant {
        match status {
            IdleStatus::Reader => self.last_read,
            IdleStatus::Writer => self.last_write,
            IdleStatus::Both => self.last_read.max(self.last_write),
        }
    }

    fn reset_idle(&mut self, status: IdleStatus) {
        self.idle[status.index()] = IdleTracker::default();
    }
}
