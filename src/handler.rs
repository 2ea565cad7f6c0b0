//! Session event handling.
//!
//! The transport owns sockets and sessions; it calls into a
//! [`SessionHandler`] for every event and carries out the returned
//! [`Action`]. Handlers are shared by all session tasks and must be safe to
//! call concurrently.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::error::SessionError;
use crate::history::History;
use crate::protocol::{self, Command};
use crate::runtime::{IdleStatus, Session};

/// What the transport should do after a line has been handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write this line back on the same session.
    Reply(String),
    /// Close the session without writing anything.
    Close,
}

/// Callbacks invoked by the transport for each session.
pub trait SessionHandler: Send + Sync + 'static {
    fn on_open(&self, session: &Session) {
        debug!(session = %session.id(), peer = ?session.peer(), "Session opened");
    }

    /// Handle one decoded line.
    fn on_message(&self, session: &Session, line: &str) -> Action;

    /// The session has been idle for the configured threshold.
    fn on_idle(&self, _session: &Session, _status: IdleStatus) {}

    /// A transport failure on this session.
    ///
    /// The transport decides whether the session survives; handlers only
    /// observe.
    fn on_error(&self, _session: &Session, _error: &SessionError) {}

    fn on_close(&self, session: &Session) {
        debug!(session = %session.id(), "Session closed");
    }
}

/// Source of the current instant for replies.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Records each message into the shared history and answers with the time.
pub struct TimeHandler<C = SystemClock> {
    history: Arc<History>,
    clock: C,
}

impl TimeHandler<SystemClock> {
    pub fn new(history: Arc<History>) -> Self {
        Self::with_clock(history, SystemClock)
    }
}

impl<C: Clock> TimeHandler<C> {
    pub fn with_clock(history: Arc<History>, clock: C) -> Self {
        Self { history, clock }
    }

    /// Copy of the shared history, oldest first.
    pub fn recent_messages(&self) -> Vec<String> {
        self.history.snapshot()
    }
}

impl<C: Clock> SessionHandler for TimeHandler<C> {
    fn on_message(&self, session: &Session, line: &str) -> Action {
        let id = session.id();
        info!(session = %id, "Session received a message");

        match protocol::parse(line) {
            Command::Quit => {
                info!(session = %id, "quit received");
                Action::Close
            }
            Command::Message(text) => {
                info!(session = %id, message = %text, "You said");
                self.history.add(text);
                // Read the clock only once the line has been classified.
                Action::Reply(protocol::time_reply(self.clock.now()))
            }
        }
    }

    fn on_idle(&self, session: &Session, status: IdleStatus) {
        info!(
            session = %session.id(),
            status = %status,
            idle_count = session.idle_count(status),
            "Session is idle"
        );
    }

    fn on_error(&self, session: &Session, error: &SessionError) {
        error!(
            session = %session.id(),
            kind = error.kind(),
            error = %error,
            "Session caught an error"
        );
    }
}
