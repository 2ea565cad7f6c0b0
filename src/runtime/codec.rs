//! Line framing for sessions.
//!
//! Wraps [`LinesCodec`] so that an oversized line becomes a regular frame
//! instead of a stream error. `FramedRead` stops yielding after a decoder
//! error, but an oversized line only costs the sender that one line.

use bytes::BytesMut;
use std::io;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::error::SessionError;

/// A decoded unit of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line, without its terminator.
    Line(String),
    /// A line longer than the configured maximum. Its bytes are discarded up
    /// to and including the next newline.
    Overflow,
}

/// UTF-8, newline-delimited framing with a maximum line length.
#[derive(Debug, Clone)]
pub struct SessionCodec {
    inner: LinesCodec,
    max_line_length: usize,
}

impl SessionCodec {
    pub fn new(max_line_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_line_length),
            max_line_length,
        }
    }

    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    fn lift(
        result: Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<Frame>, SessionError> {
        match result {
            Ok(line) => Ok(line.map(Frame::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::Overflow)),
            Err(LinesCodecError::Io(e)) => Err(io_error(e)),
        }
    }
}

fn io_error(e: io::Error) -> SessionError {
    if e.kind() == io::ErrorKind::InvalidData {
        SessionError::InvalidUtf8
    } else {
        SessionError::Io(e)
    }
}

impl Decoder for SessionCodec {
    type Item = Frame;
    type Error = SessionError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, SessionError> {
        Self::lift(self.inner.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, SessionError> {
        Self::lift(self.inner.decode_eof(src))
    }
}

impl<T: AsRef<str>> Encoder<T> for SessionCodec {
    type Error = SessionError;

    fn encode(&mut self, line: T, dst: &mut BytesMut) -> Result<(), SessionError> {
        self.inner.encode(line, dst).map_err(|e| match e {
            LinesCodecError::Io(e) => io_error(e),
            LinesCodecError::MaxLineLengthExceeded => SessionError::LineTooLong {
                max: self.max_line_length,
            },
        })
    }
}
