//! Line-delimited JSON codec for the controller ↔ agent stream.
//!
//! Wraps [`AnyDelimiterCodec`] with `\n` as the only delimiter and a maximum
//! chunk length, so an agent never buffers an unterminated line without
//! bound. Framing is byte-oriented: UTF-8 and JSON validity are checked per
//! line after the terminator is found, which lets a malformed record be
//! dropped without disturbing the lines around it.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use lab_relay::protocol::codec::CommandCodec;
//!
//! let mut commands = FramedRead::new(read_half, CommandCodec::new(64 * 1024));
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, Encoder};
use tracing::{debug, warn};

use crate::protocol::command::Command;
use crate::{AppError, Result};

/// Record terminator on the wire.
pub const TERMINATOR: u8 = b'\n';

/// Serialize `command` into one terminated line.
///
/// The controller calls this once per broadcast and writes the same bytes to
/// every agent.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if serialization fails or the encoded
/// record would contain a raw terminator byte.
pub fn encode_line(command: &Command) -> Result<Bytes> {
    let mut dst = BytesMut::new();
    write_line(command, &mut dst)?;
    Ok(dst.freeze())
}

fn write_line(command: &Command, dst: &mut BytesMut) -> Result<()> {
    let record = serde_json::to_vec(command)?;
    if record.contains(&TERMINATOR) {
        return Err(AppError::Protocol(
            "encoded record contains a line terminator".into(),
        ));
    }
    dst.reserve(record.len() + 1);
    dst.put_slice(&record);
    dst.put_u8(TERMINATOR);
    Ok(())
}

/// Outcome of parsing one terminated line.
#[derive(Debug)]
pub enum Line {
    /// Whitespace-only line.
    Blank,
    /// A well-formed command.
    Command(Command),
}

/// Parse the content of a single line (terminator already stripped).
///
/// # Errors
///
/// Returns [`AppError::Protocol`] when the line is not UTF-8 JSON carrying an
/// `action` string.
pub fn parse_line(raw: &[u8]) -> Result<Line> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| AppError::Protocol(format!("line is not valid utf-8: {e}")))?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(Line::Blank);
    }
    Ok(Line::Command(serde_json::from_str(text)?))
}

/// Codec producing [`Command`]s from a byte stream and writing them back out.
///
/// # Decoder
///
/// Complete lines are consumed from the front of the buffer in order; any
/// trailing fragment stays buffered. Blank lines are skipped silently and
/// malformed lines are skipped with a warning, so `decode` only ever yields
/// well-formed commands. A line longer than `max_line_bytes` returns
/// [`AppError::Protocol`]`("line too long: …")`.
///
/// # Encoder
///
/// Commands are encoded as compact JSON followed by `\n`.
#[derive(Debug)]
pub struct CommandCodec {
    lines: AnyDelimiterCodec,
    max_line_bytes: usize,
}

impl CommandCodec {
    /// Create a codec rejecting lines longer than `max_line_bytes`.
    #[must_use]
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            lines: AnyDelimiterCodec::new_with_max_length(
                vec![TERMINATOR],
                vec![TERMINATOR],
                max_line_bytes,
            ),
            max_line_bytes,
        }
    }

    /// Configured line limit.
    #[must_use]
    pub fn max_line_bytes(&self) -> usize {
        self.max_line_bytes
    }

    fn map_error(&self, err: AnyDelimiterCodecError) -> AppError {
        match err {
            AnyDelimiterCodecError::MaxChunkLengthExceeded => AppError::Protocol(format!(
                "line too long: exceeded {} bytes",
                self.max_line_bytes
            )),
            AnyDelimiterCodecError::Io(err) => AppError::Transport(err.to_string()),
        }
    }
}

impl Decoder for CommandCodec {
    type Item = Command;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Command>> {
        loop {
            let chunk = match self.lines.decode(src) {
                Ok(Some(chunk)) => chunk,
                Ok(None) => return Ok(None),
                Err(err) => return Err(self.map_error(err)),
            };

            match parse_line(&chunk) {
                Ok(Line::Command(command)) => return Ok(Some(command)),
                Ok(Line::Blank) => {}
                Err(err) => {
                    warn!(
                        error = %err,
                        raw_line = %String::from_utf8_lossy(&chunk),
                        "dropping malformed record"
                    );
                }
            }
        }
    }

    /// An unterminated fragment at end-of-stream is incomplete and dropped.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Command>> {
        if let Some(command) = self.decode(src)? {
            return Ok(Some(command));
        }
        if !src.is_empty() {
            debug!(bytes = src.len(), "discarding unterminated fragment at eof");
            src.clear();
        }
        Ok(None)
    }
}

impl Encoder<&Command> for CommandCodec {
    type Error = AppError;

    fn encode(&mut self, item: &Command, dst: &mut BytesMut) -> Result<()> {
        write_line(item, dst)
    }
}
