//! Listening socket and accept loop.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time;
use tracing::{debug, error, info};

use crate::handler::SessionHandler;
use crate::runtime::connection::{serve_connection, SessionConfig};
use crate::runtime::session::SessionId;

/// Create a non-blocking TCP listener.
///
/// `SO_REUSEADDR` lets a restarted server rebind past `TIME_WAIT`, but
/// `SO_REUSEPORT` is left off so a port held by another listener fails to
/// bind.
pub(crate) fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}

/// Pause after a failed accept so persistent errors (e.g. `EMFILE`) don't spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Source of session identifiers, shared across restarts of one server.
#[derive(Debug)]
pub(crate) struct SessionIds(AtomicU64);

impl SessionIds {
    pub(crate) fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub(crate) fn next(&self) -> SessionId {
        SessionId::new(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Accept connections until `shutdown` fires or its sender is dropped.
///
/// Dropping out of this loop closes the listener. Sessions already spawned
/// keep running.
pub(crate) async fn accept_loop<H: SessionHandler>(
    listener: TcpListener,
    handler: Arc<H>,
    config: Arc<SessionConfig>,
    ids: Arc<SessionIds>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Acceptor stopping");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let id = ids.next();
                    debug!(session = %id, peer = %peer, "New connection");

                    let handler = Arc::clone(&handler);
                    let config = Arc::clone(&config);
                    tokio::spawn(serve_connection(stream, peer, id, handler, config));
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    accept_backoff().await;
                }
            }
        }
    }
}

async fn accept_backoff() {
    time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_accept_error_backs_off() {
        let start = time::Instant::now();
        accept_backoff().await;
        assert!(start.elapsed() >= ACCEPT_ERROR_BACKOFF);
    }

    #[test]
    fn test_session_ids_are_sequential() {
        let ids = SessionIds::new();
        assert_eq!(ids.next().get(), 1);
        assert_eq!(ids.next().get(), 2);
        assert_eq!(ids.next().get(), 3);
    }

    #[test]
    fn test_listener_rejects_port_in_use() {
        let first = create_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();

        let err = create_listener(addr).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
    }

    #[test]
    fn test_listener_is_nonblocking() {
        let listener = create_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let err = listener.accept().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
