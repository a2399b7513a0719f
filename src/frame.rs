//! Wire frame grammar and stream codec
//!
//! A frame is a single ASCII line:
//!
//! ```text
//! [ <actionTypeInt> <targetId> ( <data> ) ]
//! ```
//!
//! `[`/`]` delimit the frame, `(`/`)` bound the payload. The payload may
//! contain spaces and the `|` field separator; it must not contain the
//! `) ]` closing sequence or the `]` delimiter itself. Encoding and
//! decoding are exact inverses for every valid frame.
//!
//! `FrameCodec` adapts the grammar to a byte stream: it extracts exactly
//! one frame at a time even when several frames (or a partial one) share
//! the read buffer, and it skips garbage between frames instead of
//! wedging the connection.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::error::{AppError, ProtocolError};

/// Frame start delimiter
pub const DELIMITER_START: char = '[';
/// Frame end delimiter
pub const DELIMITER_END: char = ']';
/// Payload start delimiter
pub const DATA_START: char = '(';
/// Payload end delimiter
pub const DATA_END: char = ')';

/// One complete wire message, untyped.
///
/// `action` is the raw numeric action type; range validation against the
/// request/response enums happens in the typed layer (`message`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Numeric value of the request or response action-type enum
    pub action: u32,
    /// Target connection id (0 when sent client to server)
    pub target: u64,
    /// Payload text between the data delimiters
    pub data: String,
}

impl Frame {
    pub fn new(action: u32, target: u64, data: impl Into<String>) -> Self {
        Self {
            action,
            target,
            data: data.into(),
        }
    }

    /// Serialize to the literal wire grammar.
    pub fn encode(&self) -> String {
        format!(
            "{} {} {} {} {} {} {}",
            DELIMITER_START, self.action, self.target, DATA_START, self.data, DATA_END, DELIMITER_END
        )
    }

    /// Parse one complete frame.
    ///
    /// Pure inverse of [`Frame::encode`]: no side effects, and every
    /// violation of the grammar yields a typed error instead of a panic.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let rest = text.trim_start();
        let rest = rest
            .strip_prefix(DELIMITER_START)
            .ok_or(ProtocolError::MissingStart)?;

        let (head, tail) = rest.split_once(DATA_START).ok_or(ProtocolError::MissingData)?;

        let mut tokens = head.split_whitespace();
        let action = tokens
            .next()
            .ok_or_else(|| ProtocolError::BadHeader(head.trim().to_string()))?
            .parse::<u32>()
            .map_err(|_| ProtocolError::BadHeader(head.trim().to_string()))?;
        let target = tokens
            .next()
            .ok_or_else(|| ProtocolError::BadHeader(head.trim().to_string()))?
            .parse::<u64>()
            .map_err(|_| ProtocolError::BadHeader(head.trim().to_string()))?;
        if tokens.next().is_some() {
            return Err(ProtocolError::BadHeader(head.trim().to_string()));
        }

        let tail = tail
            .trim_end()
            .strip_suffix(DELIMITER_END)
            .ok_or(ProtocolError::MissingData)?;
        let tail = tail
            .trim_end()
            .strip_suffix(DATA_END)
            .ok_or(ProtocolError::MissingData)?;

        // The packing scheme pads the payload with exactly one space on
        // each side; strip those without touching interior whitespace.
        let data = tail.strip_prefix(' ').unwrap_or(tail);
        let data = data.strip_suffix(' ').unwrap_or(data);

        Ok(Self {
            action,
            target,
            data: data.to_string(),
        })
    }
}

/// Stream codec extracting delimited frames from a TCP byte stream.
///
/// Incomplete frames stay buffered (a short read is not a disconnect);
/// malformed complete frames are logged and skipped so one bad peer
/// message cannot kill the connection.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, AppError> {
        loop {
            // Discard anything before the next frame start.
            match src.iter().position(|&b| b == DELIMITER_START as u8) {
                None => {
                    src.clear();
                    return Ok(None);
                }
                Some(start) if start > 0 => src.advance(start),
                Some(_) => {}
            }

            // Wait for the frame to complete.
            let Some(end) = src.iter().position(|&b| b == DELIMITER_END as u8) else {
                return Ok(None);
            };

            let raw = src.split_to(end + 1);
            let text = String::from_utf8_lossy(&raw);
            match Frame::decode(&text) {
                Ok(frame) => return Ok(Some(frame)),
                Err(err) => {
                    warn!("discarding malformed frame: {}", err);
                    continue;
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, AppError> {
        let frame = self.decode(src)?;
        if frame.is_none() && !src.is_empty() {
            // Peer closed mid-frame; the remainder can never complete.
            warn!("discarding {} trailing bytes at EOF", src.len());
            src.clear();
        }
        Ok(frame)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), AppError> {
        dst.extend_from_slice(frame.encode().as_bytes());
        Ok(())
    }
}
