//! Transport runtime for line-oriented sessions.
//!
//! Built on tokio:
//! - `listener`: socket setup and the accept loop
//! - `connection`: one task per accepted connection
//! - `codec`: newline framing with a maximum line length
//! - `session`: per-connection state and idle tracking

mod codec;
mod connection;
mod listener;
mod session;

pub use codec::{Frame, SessionCodec};
pub use connection::{serve, SessionConfig, DEFAULT_MAX_LINE_LENGTH, DEFAULT_READ_BUFFER_SIZE};
pub use session::{IdleConfig, IdleStatus, Session, SessionId, SessionState};

pub(crate) use listener::{accept_loop, create_listener, SessionIds};
