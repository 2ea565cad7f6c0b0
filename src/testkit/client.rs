//! Blocking line client for driving a server under test.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

use crate::error::HarnessError;

/// How long [`SessionClient::close_waiting`] waits by default.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// One client connection to `localhost:<port>`.
#[derive(Debug)]
pub struct SessionClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    port: u16,
}

impl SessionClient {
    /// Connect to `localhost:<port>`, giving up after `timeout`.
    ///
    /// Every address `localhost` resolves to is tried until one accepts.
    pub fn connect(port: u16, timeout: Duration) -> Result<Self, HarnessError> {
        trace!(port, "Connecting to localhost");
        let addrs: Vec<SocketAddr> = ("localhost", port)
            .to_socket_addrs()
            .map_err(|source| HarnessError::ConnectionFailed { port, source })?
            .collect();

        let deadline = Instant::now() + timeout;
        let mut last_error = None;

        for addr in addrs {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(HarnessError::ConnectionTimeout { port, timeout });
            }
            match TcpStream::connect_timeout(&addr, remaining) {
                Ok(stream) => return Self::from_stream(stream, port),
                Err(e) => {
                    trace!(addr = %addr, error = %e, "Connection attempt failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if e.kind() == io::ErrorKind::TimedOut => {
                Err(HarnessError::ConnectionTimeout { port, timeout })
            }
            Some(source) => Err(HarnessError::ConnectionFailed { port, source }),
            None => Err(HarnessError::ConnectionFailed {
                port,
                source: io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    "localhost resolved to no addresses",
                ),
            }),
        }
    }

    fn from_stream(stream: TcpStream, port: u16) -> Result<Self, HarnessError> {
        let failed = |source| HarnessError::ConnectionFailed { port, source };
        stream.set_nodelay(true).map_err(failed)?;
        let writer = stream.try_clone().map_err(failed)?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            port,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.writer.local_addr()
    }

    /// Send `line` followed by a newline.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    /// Send raw bytes as-is, for exercising malformed input.
    pub fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()
    }

    /// Read the next line, without its terminator.
    ///
    /// Returns `Ok(None)` if the server closed the connection, and a
    /// `WouldBlock`/`TimedOut` error if nothing arrived within `timeout`.
    pub fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        self.reader.get_ref().set_read_timeout(Some(timeout))?;
        let mut line = String::new();
        let n = self.reader.read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }

    /// Wait up to `timeout` for the server to close the connection.
    ///
    /// Any lines arriving in the meantime are discarded.
    pub fn wait_for_close(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.read_line(remaining) {
                Ok(None) => return true,
                Ok(Some(line)) => trace!(line = %line, "Discarding line while waiting for close"),
                Err(e) if is_timeout(&e) => return false,
                // A reset also means the peer is gone.
                Err(_) => return true,
            }
        }
    }

    /// Close our side and wait up to `timeout` for the server to follow.
    pub fn close_waiting(mut self, timeout: Duration) -> bool {
        trace!(port = self.port, "Closing session");
        if let Err(e) = self.writer.shutdown(Shutdown::Write) {
            trace!(error = %e, "Shutdown of write side failed");
        }
        let closed = self.wait_for_close(timeout);
        if !closed {
            warn!(port = self.port, "Session did not close before timeout");
        }
        closed
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_connect_refused_is_reported() {
        // Bind then drop so the port is very likely closed.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = SessionClient::connect(port, Duration::from_millis(500)).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::ConnectionFailed { .. } | HarnessError::ConnectionTimeout { .. }
        ));
        assert!(err.to_string().contains("server started"));
    }

    #[test]
    fn test_write_and_read_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            writer.write_all(format!("echo {line}").as_bytes()).unwrap();
        });

        let mut client = SessionClient::connect(port, Duration::from_secs(2)).unwrap();
        client.write_line("hello").unwrap();
        let reply = client.read_line(Duration::from_secs(2)).unwrap();
        assert_eq!(reply.as_deref(), Some("echo hello"));

        server.join().unwrap();
        assert!(client.wait_for_close(Duration::from_secs(2)));
    }

    #[test]
    fn test_read_times_out_when_silent() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut client = SessionClient::connect(port, Duration::from_secs(2)).unwrap();
        let (_held, _) = listener.accept().unwrap();

        let err = client.read_line(Duration::from_millis(50)).unwrap_err();
        assert!(is_timeout(&err));
        assert!(!client.wait_for_close(Duration::from_millis(50)));
    }
}
