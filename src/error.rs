//! Error types for the server, its sessions and the test harness.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use crate::testkit::PortSearch;

/// Lifecycle errors surfaced by [`TimeServer`](crate::server::TimeServer).
#[derive(Debug, Error)]
pub enum ServerError {
    /// `create_and_start` was called on a running server.
    #[error("Already started")]
    AlreadyStarted,

    /// The listening socket could not be bound.
    #[error("I/O error binding to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The async runtime backing the server could not be created.
    #[error("failed to build server runtime: {0}")]
    Runtime(#[source] io::Error),
}

/// A failure on a single session, reported through
/// [`SessionHandler::on_error`](crate::handler::SessionHandler::on_error).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An incoming line exceeded the configured maximum length and was dropped.
    #[error("line exceeds maximum length of {max} bytes")]
    LineTooLong { max: usize },

    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}

impl SessionError {
    /// Whether the transport must tear the session down after reporting.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::LineTooLong { .. })
    }

    /// Short label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Io(_) => "io",
            SessionError::LineTooLong { .. } => "line_too_long",
            SessionError::InvalidUtf8 => "invalid_utf8",
        }
    }
}

/// Test harness setup failures.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("no open port found searching {strategy:?} starting at {start}")]
    PortSearchExhausted { strategy: PortSearch, start: u16 },

    #[error(
        "did not connect to localhost:{port} within {timeout:?} \
         (was the server started before connecting?)"
    )]
    ConnectionTimeout { port: u16, timeout: Duration },

    #[error(
        "is not connected to localhost:{port} \
         (was the server started before connecting?): {source}"
    )]
    ConnectionFailed {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("invalid harness configuration: {0}")]
    InvalidConfig(String),
}

/// Helper for building a [`ServerError::Bind`] from a socket address.
pub(crate) fn bind_error(addr: SocketAddr, source: io::Error) -> ServerError {
    ServerError::Bind {
        addr: addr.to_string(),
        source,
    }
}
