//! time-server: a line-oriented TCP time server
//!
//! Every line a client sends is recorded in a bounded, shared history and
//! answered with `The time is now <timestamp>`. The line `quit` (any case,
//! surrounding whitespace ignored) closes the session without a reply.
//!
//! Features:
//! - One task per session on a tokio runtime owned by the server
//! - Idle notifications per session (observational, never disconnect)
//! - Fixed-capacity history with oldest-first eviction
//! - Test harness for port discovery and client sessions
//! - Configuration via CLI arguments or TOML file

pub mod config;
pub mod error;
pub mod handler;
pub mod history;
pub mod protocol;
pub mod runtime;
pub mod server;
pub mod testkit;

pub use config::Config;
pub use error::{HarnessError, ServerError, SessionError};
pub use handler::{Action, Clock, SessionHandler, SystemClock, TimeHandler};
pub use history::History;
pub use server::TimeServer;
