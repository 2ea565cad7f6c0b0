//! Line protocol: command classification and reply formatting.
//!
//! Every decoded line is either the control command `quit` (matched
//! case-insensitively after trimming surrounding whitespace) or an ordinary
//! message. There is no other command and no multi-line assembly.
//!
//! ```text
//! client: Hello\n
//! server: The time is now 2026-10-18T12:00:00.123456789Z\n
//! client: QUIT\n
//! (connection closed, no reply)
//! ```

use chrono::{DateTime, SecondsFormat, Utc};

/// The only recognized control token.
pub const QUIT: &str = "quit";

/// Prefix of every reply to an ordinary message.
pub const REPLY_PREFIX: &str = "The time is now ";

/// A classified line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// Close the session without replying.
    Quit,
    /// Anything else, trimmed. May be empty.
    Message(&'a str),
}

/// Classify a decoded line.
///
/// `quit` is matched case-insensitively over ASCII only; non-ASCII look-alikes
/// such as `quıt` are ordinary messages.
pub fn parse(line: &str) -> Command<'_> {
    let trimmed = line.trim();
    if trimmed.eq_ignore_ascii_case(QUIT) {
        Command::Quit
    } else {
        Command::Message(trimmed)
    }
}

/// Format the reply for `now`.
///
/// Timestamps are RFC 3339 in UTC with nanosecond precision, e.g.
/// `The time is now 2026-10-18T12:00:00.000000000Z`.
pub fn time_reply(now: DateTime<Utc>) -> String {
    let mut reply = String::with_capacity(REPLY_PREFIX.len() + 30);
    reply.push_str(REPLY_PREFIX);
    reply.push_str(&now.to_rfc3339_opts(SecondsFormat::Nanos, true));
    reply
}

/// Extract the timestamp from a reply produced by [`time_reply`].
pub fn parse_time_reply(reply: &str) -> Option<DateTime<Utc>> {
    let stamp = reply.trim_end().strip_prefix(REPLY_PREFIX)?;
    DateTime::parse_from_rfc3339(stamp)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
