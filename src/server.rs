//! TCP time server lifecycle.
//!
//! `TimeServer` binds the listening socket, wires the time handler into the
//! transport and keeps the shared message history. It owns its own tokio
//! runtime, so every method here is blocking and must be called from
//! synchronous code.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{bind_error, ServerError};
use crate::handler::TimeHandler;
use crate::history::History;
use crate::runtime::{accept_loop, create_listener, SessionConfig, SessionIds};

/// A bound, accepting listener.
struct Acceptor {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct Inner {
    runtime: Option<Runtime>,
    acceptor: Option<Acceptor>,
}

/// Line-oriented TCP server that answers every message with the time.
pub struct TimeServer {
    config: Config,
    history: Arc<History>,
    handler: Arc<TimeHandler>,
    session_config: Arc<SessionConfig>,
    ids: Arc<SessionIds>,
    inner: Mutex<Inner>,
}

impl TimeServer {
    /// Create a server that is not yet listening.
    pub fn new(config: Config) -> Self {
        let history = Arc::new(History::new(config.history_capacity));
        let handler = Arc::new(TimeHandler::new(Arc::clone(&history)));
        let session_config = Arc::new(config.session.clone());

        Self {
            config,
            history,
            handler,
            session_config,
            ids: Arc::new(SessionIds::new()),
            inner: Mutex::new(Inner {
                runtime: None,
                acceptor: None,
            }),
        }
    }

    /// Bind `port` on the configured host and start accepting sessions.
    ///
    /// Fails with [`ServerError::AlreadyStarted`] if this server is running
    /// (the running listener is left untouched), or [`ServerError::Bind`]
    /// if the address cannot be bound, in which case nothing is left bound.
    pub fn create_and_start(&self, port: u16) -> Result<(), ServerError> {
        let mut inner = self.lock();
        if inner.acceptor.is_some() {
            return Err(ServerError::AlreadyStarted);
        }

        let addr = self.resolve(port)?;
        info!(addr = %addr, "Binding to port {}", port);
        let std_listener = create_listener(addr).map_err(|e| bind_error(addr, e))?;
        let local_addr = std_listener.local_addr().map_err(|e| bind_error(addr, e))?;

        let runtime = self.ensure_runtime(&mut inner.runtime)?;
        let listener = {
            let _guard = runtime.enter();
            TcpListener::from_std(std_listener).map_err(|e| bind_error(addr, e))?
        };

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = runtime.spawn(accept_loop(
            listener,
            Arc::clone(&self.handler),
            Arc::clone(&self.session_config),
            Arc::clone(&self.ids),
            shutdown_rx,
        ));

        info!(
            addr = %local_addr,
            history_capacity = self.history.capacity(),
            idle_both = ?self.session_config.idle.both,
            read_buffer_size = self.session_config.read_buffer_size,
            "Server listening"
        );

        inner.acceptor = Some(Acceptor {
            local_addr,
            shutdown,
            task,
        });
        Ok(())
    }

    /// Unbind the listener and stop accepting. Open sessions keep running.
    ///
    /// Does nothing if the server is not running. Returns once the listening
    /// socket has been closed.
    pub fn stop_now(&self) {
        let mut inner = self.lock();
        let Some(acceptor) = inner.acceptor.take() else {
            return;
        };

        info!(addr = %acceptor.local_addr, "Stopping...");
        // The receiver may already be gone if the accept loop ended early.
        let _ = acceptor.shutdown.send(());

        if let Some(runtime) = inner.runtime.as_ref() {
            if let Err(e) = runtime.block_on(acceptor.task) {
                warn!(error = %e, "Acceptor task ended abnormally");
            }
        }
    }

    /// Snapshot of the most recent messages, oldest first.
    pub fn recent_messages(&self) -> Vec<String> {
        self.handler.recent_messages()
    }

    pub fn is_running(&self) -> bool {
        self.lock().acceptor.is_some()
    }

    /// Address actually bound while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().acceptor.as_ref().map(|a| a.local_addr)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Block until Ctrl-C, then stop accepting.
    pub fn run_until_interrupted(&self) -> Result<(), ServerError> {
        let signal = {
            let mut inner = self.lock();
            self.ensure_runtime(&mut inner.runtime)?
                .spawn(tokio::signal::ctrl_c())
        };

        // Wait without holding the lock so other callers can still stop us.
        match futures::executor::block_on(signal) {
            Ok(Ok(())) => info!("Interrupt received"),
            Ok(Err(e)) => return Err(ServerError::Runtime(e)),
            Err(e) => warn!(error = %e, "Signal task ended abnormally"),
        }

        self.stop_now();
        Ok(())
    }

    fn resolve(&self, port: u16) -> Result<SocketAddr, ServerError> {
        let target = (self.config.host.as_str(), port);
        let mut addrs = target.to_socket_addrs().map_err(|e| ServerError::Bind {
            addr: format!("{}:{}", self.config.host, port),
            source: e,
        })?;
        addrs.next().ok_or_else(|| ServerError::Bind {
            addr: format!("{}:{}", self.config.host, port),
            source: std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "host resolved to no addresses",
            ),
        })
    }

    fn ensure_runtime<'a>(&self, slot: &'a mut Option<Runtime>) -> Result<&'a Runtime, ServerError> {
        let runtime = match slot.take() {
            Some(runtime) => runtime,
            None => self.build_runtime()?,
        };
        Ok(&*slot.insert(runtime))
    }

    fn build_runtime(&self) -> Result<Runtime, ServerError> {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all().thread_name("time-server-worker");
        if let Some(workers) = self.config.workers {
            builder.worker_threads(workers);
        }
        debug!(workers = ?self.config.workers, "Building server runtime");
        builder.build().map_err(ServerError::Runtime)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TimeServer {
    fn drop(&mut self) {
        self.stop_now();
        if let Some(runtime) = self.lock().runtime.take() {
            // Closes any sessions still open.
            runtime.shutdown_background();
        }
    }
}
