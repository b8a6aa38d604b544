//! Line codec for the controller's serial protocol.
//!
//! Splits inbound bytes on newlines with a length cap and trims trailing
//! whitespace from decoded lines; outbound lines go through LinesCodec.
//! Works over any AsyncRead/AsyncWrite (serial ports, in-memory pipes, sockets).

use std::borrow::Cow;
use std::fmt;
use std::io;

use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};
use tracing::warn;

/// One line received from the controller, without its line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialLine(String);

impl SerialLine {
    pub fn new(line: impl Into<String>) -> Self {
        let mut line = line.into();
        let trimmed_len = line.trim_end().len();
        line.truncate(trimmed_len);
        Self(line)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SerialLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SerialLine {
    fn from(line: &str) -> Self {
        Self::new(line)
    }
}

/// Longest line kept from the controller; anything longer is discarded up to
/// its newline.
pub const MAX_LINE_LENGTH: usize = 1024;

/// Newline-delimited codec producing [`SerialLine`] values.
///
/// Decoding never fails on content: invalid UTF-8 is replaced and overlong
/// lines are dropped, so only real I/O errors end a `FramedRead`.
#[derive(Debug)]
pub struct LineCodec {
    outbound: LinesCodec,
    max_length: usize,
    /// Where the next newline search starts.
    next_index: usize,
    /// Skipping the remainder of an overlong line.
    discarding: bool,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LineCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            outbound: LinesCodec::new(),
            max_length,
            next_index: 0,
            discarding: false,
        }
    }
}

fn into_io_error(err: LinesCodecError) -> io::Error {
    match err {
        LinesCodecError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

fn to_line(raw: &[u8]) -> SerialLine {
    let text = String::from_utf8_lossy(raw);
    if let Cow::Owned(_) = text {
        warn!(bytes = raw.len(), "Controller sent invalid UTF-8, replaced");
    }
    SerialLine::new(text)
}

impl Decoder for LineCodec {
    type Item = SerialLine;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let read_to = src.len().min(self.max_length.saturating_add(1));
            let newline = src[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    src.advance(self.next_index + offset + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    src.advance(read_to);
                    self.next_index = 0;
                    if src.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let raw = src.split_to(end + 1);
                    return Ok(Some(to_line(&raw[..end])));
                }
                (false, None) if src.len() > self.max_length => {
                    warn!(max = self.max_length, "Controller line too long, discarding");
                    self.discarding = true;
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if self.discarding || src.is_empty() {
            src.clear();
            self.discarding = false;
            return Ok(None);
        }
        let raw = src.split();
        Ok(Some(to_line(&raw)))
    }
}

impl<T: AsRef<str>> Encoder<T> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, line: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        tracing::trace!(line = line.as_ref(), "Encoding serial line");
        self.outbound.encode(line, dst).map_err(into_io_error)
    }
}
