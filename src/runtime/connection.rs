//! Per-connection task.
//!
//! Each accepted connection runs `serve` on its own task: decode a line,
//! hand it to the handler, carry out the returned action, repeat. Idle
//! timers race the next read so notifications fire while a peer is silent.

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace};

use crate::error::SessionError;
use crate::handler::{Action, SessionHandler};
use crate::runtime::codec::{Frame, SessionCodec};
use crate::runtime::session::{IdleConfig, Session, SessionId, SessionState};

/// Read buffer size used when none is configured.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 2048;

/// Longest accepted line when none is configured.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024;

/// Transport settings applied to every session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub idle: IdleConfig,
    pub read_buffer_size: usize,
    pub max_line_length: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle: IdleConfig::default(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

/// Serve one accepted TCP connection until it closes.
pub(crate) async fn serve_connection<H: SessionHandler>(
    stream: TcpStream,
    peer: SocketAddr,
    id: SessionId,
    handler: Arc<H>,
    config: Arc<SessionConfig>,
) {
    let (reader, writer) = stream.into_split();
    let session = Session::new(id, Some(peer));
    serve(reader, writer, session, &*handler, &config).await;
}

/// Run the session protocol over an arbitrary byte stream pair.
pub async fn serve<R, W, H>(
    reader: R,
    writer: W,
    mut session: Session,
    handler: &H,
    config: &SessionConfig,
) -> Session
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    H: SessionHandler + ?Sized,
{
    let codec = SessionCodec::new(config.max_line_length);
    let mut lines = FramedRead::with_capacity(reader, codec.clone(), config.read_buffer_size);
    let mut out = FramedWrite::new(writer, codec);
    let id = session.id();
    let mut write_failed = false;

    handler.on_open(&session);

    loop {
        let idle = session.next_idle(&config.idle);
        let deadline = idle
            .map(|(_, at)| at)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));

        tokio::select! {
            frame = lines.next() => match frame {
                Some(Ok(Frame::Line(line))) => {
                    session.record_read(Instant::now());
                    session.set_state(SessionState::Processing);
                    trace!(session = %id, line = %line, "Line received");

                    match handler.on_message(&session, &line) {
                        Action::Reply(reply) => {
                            if let Err(e) = out.send(reply.as_str()).await {
                                handler.on_error(&session, &e);
                                write_failed = true;
                                break;
                            }
                            session.record_write(Instant::now());
                            session.set_state(SessionState::AwaitingInput);
                            trace!(session = %id, line = %reply, "Line sent");
                        }
                        Action::Close => {
                            debug!(session = %id, "Closing session on request");
                            break;
                        }
                    }
                }
                Some(Ok(Frame::Overflow)) => {
                    session.record_read(Instant::now());
                    let error = SessionError::LineTooLong {
                        max: lines.decoder().max_line_length(),
                    };
                    handler.on_error(&session, &error);
                }
                Some(Err(e)) => {
                    handler.on_error(&session, &e);
                    if e.is_fatal() {
                        break;
                    }
                }
                None => {
                    trace!(session = %id, "Connection closed by peer");
                    break;
                }
            },
            _ = time::sleep_until(deadline), if idle.is_some() => {
                if let Some((status, _)) = idle {
                    session.mark_idle(status, Instant::now());
                    trace!(session = %id, status = %status, "Session idle");
                    handler.on_idle(&session, status);
                }
            }
        }
    }

    session.set_state(SessionState::Closing);
    if write_failed {
        // Closing would flush the failed reply again.
        drop(out);
    } else if let Err(e) = SinkExt::<&str>::close(&mut out).await {
        debug!(session = %id, error = %e, "Error shutting down session output");
    }
    session.set_state(SessionState::Closed);
    handler.on_close(&session);
    session
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Clock, TimeHandler};
    use crate::history::History;
    use crate::runtime::IdleStatus;
    use chrono::{DateTime, TimeZone, Utc};
    use std::num::NonZeroUsize;
    use std::sync::Mutex;
    use tokio_test::io::Builder;

    const NOON_REPLY: &[u8] = b"The time is now 2026-10-18T12:00:00.000000000Z\n";

    struct FixedClock;

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
        }
    }

    #[derive(Debug, PartialEq)]
    enum Event {
        Open,
        Message(String),
        Idle(IdleStatus, u32),
        Error(&'static str),
        Close,
    }

    /// Wraps a time handler and records every callback.
    struct Recorder {
        inner: TimeHandler<FixedClock>,
        events: Mutex<Vec<Event>>,
    }

    impl Recorder {
        fn new(capacity: usize) -> Self {
            let history = Arc::new(History::new(NonZeroUsize::new(capacity).unwrap()));
            Self {
                inner: TimeHandler::with_clock(history, FixedClock),
                events: Mutex::new(Vec::new()),
            }
        }

        fn push(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<Event> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    impl SessionHandler for Recorder {
        fn on_open(&self, _session: &Session) {
            self.push(Event::Open);
        }

        fn on_message(&self, session: &Session, line: &str) -> Action {
            self.push(Event::Message(line.to_string()));
            self.inner.on_message(session, line)
        }

        fn on_idle(&self, session: &Session, status: IdleStatus) {
            self.push(Event::Idle(status, session.idle_count(status)));
        }

        fn on_error(&self, _session: &Session, error: &SessionError) {
            self.push(Event::Error(error.kind()));
        }

        fn on_close(&self, _session: &Session) {
            self.push(Event::Close);
        }
    }

    async fn run(mock: tokio_test::io::Mock, handler: &Recorder, config: &SessionConfig) -> Session {
        let (reader, writer) = tokio::io::split(mock);
        let session = Session::new(SessionId::new(1), None);
        serve(reader, writer, session, handler, config).await
    }

    #[tokio::test]
    async fn test_replies_to_each_message() {
        let mock = Builder::new()
            .read(b"Hello\n")
            .write(NOON_REPLY)
            .read(b"How are you?\n")
            .write(NOON_REPLY)
            .build();
        let handler = Recorder::new(10);

        let session = run(mock, &handler, &SessionConfig::default()).await;

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            handler.inner.recent_messages(),
            vec!["Hello", "How are you?"]
        );
        assert_eq!(
            handler.events(),
            vec![
                Event::Open,
                Event::Message("Hello".into()),
                Event::Message("How are you?".into()),
                Event::Close,
            ]
        );
    }

    #[tokio::test]
    async fn test_quit_closes_without_reply() {
        // Nothing may be written and the trailing read must never happen.
        let mock = Builder::new().read(b"  QUIT \r\n").build();
        let handler = Recorder::new(10);

        let session = run(mock, &handler, &SessionConfig::default()).await;

        assert!(!session.is_active());
        assert!(handler.inner.recent_messages().is_empty());
        assert_eq!(
            handler.events(),
            vec![Event::Open, Event::Message("  QUIT ".into()), Event::Close]
        );
    }

    #[tokio::test]
    async fn test_lines_in_one_read_are_processed_in_order() {
        let mock = Builder::new()
            .read(b"a\nb\nc\nd\nquit\n")
            .write(NOON_REPLY)
            .write(NOON_REPLY)
            .write(NOON_REPLY)
            .write(NOON_REPLY)
            .build();
        let handler = Recorder::new(3);

        run(mock, &handler, &SessionConfig::default()).await;

        assert_eq!(handler.inner.recent_messages(), vec!["b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_oversized_line_is_reported_and_session_continues() {
        let config = SessionConfig {
            max_line_length: 8,
            ..SessionConfig::default()
        };
        let mock = Builder::new()
            .read(b"this line is far too long\nshort\n")
            .write(NOON_REPLY)
            .build();
        let handler = Recorder::new(10);

        run(mock, &handler, &config).await;

        assert_eq!(handler.inner.recent_messages(), vec!["short"]);
        assert_eq!(
            handler.events(),
            vec![
                Event::Open,
                Event::Error("line_too_long"),
                Event::Message("short".into()),
                Event::Close,
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_closes_session() {
        let mock = Builder::new().read(b"\xff\xfe\n").build();
        let handler = Recorder::new(10);

        run(mock, &handler, &SessionConfig::default()).await;

        assert_eq!(
            handler.events(),
            vec![Event::Open, Event::Error("invalid_utf8"), Event::Close]
        );
    }

    #[tokio::test]
    async fn test_read_error_is_reported() {
        let mock = Builder::new()
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset by peer",
            ))
            .build();
        let handler = Recorder::new(10);

        run(mock, &handler, &SessionConfig::default()).await;

        assert_eq!(
            handler.events(),
            vec![Event::Open, Event::Error("io"), Event::Close]
        );
        assert!(handler.inner.recent_messages().is_empty());
    }

    #[tokio::test]
    async fn test_write_error_is_reported_and_not_retried() {
        // A single failing write: any second attempt would hit an unexpected write.
        let mock = Builder::new()
            .read(b"hi\n")
            .write_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "broken pipe",
            ))
            .build();
        let handler = Recorder::new(10);

        let session = run(mock, &handler, &SessionConfig::default()).await;

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            handler.events(),
            vec![
                Event::Open,
                Event::Message("hi".into()),
                Event::Error("io"),
                Event::Close,
            ]
        );
        assert_eq!(handler.inner.recent_messages(), vec!["hi"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_notifies_without_closing() {
        let mock = Builder::new()
            .read(b"ping\n")
            .write(NOON_REPLY)
            .wait(Duration::from_secs(25))
            .read(b"still here\n")
            .write(NOON_REPLY)
            .build();
        let handler = Recorder::new(10);

        run(mock, &handler, &SessionConfig::default()).await;

        assert_eq!(
            handler.events(),
            vec![
                Event::Open,
                Event::Message("ping".into()),
                Event::Idle(IdleStatus::Both, 1),
                Event::Idle(IdleStatus::Both, 2),
                Event::Message("still here".into()),
                Event::Close,
            ]
        );
        assert_eq!(
            handler.inner.recent_messages(),
            vec!["ping", "still here"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_disabled_stays_quiet() {
        let config = SessionConfig {
            idle: IdleConfig {
                reader: None,
                writer: None,
                both: None,
            },
            ..SessionConfig::default()
        };
        let mock = Builder::new()
            .wait(Duration::from_secs(60))
            .read(b"late\n")
            .write(NOON_REPLY)
            .build();
        let handler = Recorder::new(10);

        run(mock, &handler, &config).await;

        assert_eq!(
            handler.events(),
            vec![Event::Open, Event::Message("late".into()), Event::Close]
        );
    }
}
