//! Helpers for integration-testing line servers.
//!
//! A test typically:
//! 1. creates a [`Harness`], which picks a free port,
//! 2. starts its server on [`Harness::port`],
//! 3. opens a client with [`Harness::connect`] and sends lines,
//! 4. stops the server when done.

mod client;
mod port;

pub use client::{SessionClient, DEFAULT_CLOSE_TIMEOUT};
pub use port::{find_open_port, find_port_matching, is_port_free, PortSearch};

use std::thread;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::error::HarnessError;

/// Default time to wait for the server under test to accept.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default port the search starts from.
pub const DEFAULT_START_PORT: u16 = 16_384;

/// How a [`Harness`] finds its port and connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarnessConfig {
    connect_timeout: Duration,
    port_search: PortSearch,
    start_port: u16,
}

impl HarnessConfig {
    pub fn new(
        connect_timeout: Duration,
        port_search: PortSearch,
        start_port: u16,
    ) -> Result<Self, HarnessError> {
        if connect_timeout.is_zero() {
            return Err(HarnessError::InvalidConfig(
                "connect timeout must be positive".into(),
            ));
        }
        if start_port == 0 {
            return Err(HarnessError::InvalidConfig(
                "start port must be a valid non-zero port between 1 and 65535".into(),
            ));
        }
        Ok(Self {
            connect_timeout,
            port_search,
            start_port,
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn port_search(&self) -> PortSearch {
        self.port_search
    }

    pub fn start_port(&self) -> u16 {
        self.start_port
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            port_search: PortSearch::default(),
            start_port: DEFAULT_START_PORT,
        }
    }
}

/// Port reservation plus client factory for one test.
#[derive(Debug)]
pub struct Harness {
    config: HarnessConfig,
    port: u16,
}

impl Harness {
    /// Find a free port according to `config`.
    pub fn new(config: HarnessConfig) -> Result<Self, HarnessError> {
        let port = find_open_port(config.port_search, config.start_port)?;
        trace!(port, "Found open port");
        Ok(Self { config, port })
    }

    /// The port the server under test should be started on.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Open a client session to the server under test.
    ///
    /// The server must already be listening on [`Harness::port`].
    pub fn connect(&self) -> Result<SessionClient, HarnessError> {
        SessionClient::connect(self.port, self.config.connect_timeout)
    }
}

/// Poll `condition` every 10 ms until it holds or `timeout` elapses.
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}
