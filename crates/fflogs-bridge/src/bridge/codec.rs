//! Line codecs for worker communication.
//!
//! Outbound: one [`Command`] per line, formatted by [`WireFormatter`](super::wire::WireFormatter).
//! Inbound: lines prefixed with [`SENTINEL`] carry an [`Event`]; everything else
//! the worker prints is diagnostic noise and is skipped.

use std::io;

use tokio_util::bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::protocol::{Command, Event};
use super::wire;

/// Prefix marking a worker output line as protocol traffic.
pub const SENTINEL: &str = "__IPC__:";

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed protocol payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Encode a command as a single line, without the terminator.
pub fn encode(command: &Command) -> Result<String, serde_json::Error> {
    wire::to_line(command)
}

/// Decode one worker output line.
///
/// Returns `None` for non-protocol lines and for malformed protocol payloads;
/// the latter are logged and dropped.
pub fn decode(line: &str) -> Option<Event> {
    match try_decode(line) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Dropping malformed protocol line");
            None
        }
    }
}

/// Like [`decode`], but surfaces malformed payloads.
pub fn try_decode(line: &str) -> Result<Option<Event>, DecodeError> {
    let Some(payload) = line.strip_prefix(SENTINEL) else {
        return Ok(None);
    };
    let event = serde_json::from_str(payload.trim())?;
    Ok(Some(event))
}

fn decode_raw(raw: &[u8]) -> Option<Event> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw);
    if !line.starts_with(SENTINEL) {
        tracing::trace!(line = %line, "Worker output");
        return None;
    }
    decode(&line)
}

/// Decoder yielding only protocol events from a newline-delimited byte stream.
///
/// Invalid UTF-8 is replaced rather than treated as a stream error, so a single
/// odd byte from the worker never ends the session.
#[derive(Debug, Default)]
pub struct EventCodec {
    // Bytes of the buffer already searched for a newline.
    next_index: usize,
}

impl EventCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for EventCodec {
    type Item = Event;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') else {
                self.next_index = src.len();
                return Ok(None);
            };
            let line = src.split_to(self.next_index + offset + 1);
            self.next_index = 0;
            if let Some(event) = decode_raw(&line) {
                return Ok(Some(event));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(event) = self.decode(src)? {
            return Ok(Some(event));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // Final line without a terminator.
        let line = src.split_to(src.len());
        self.next_index = 0;
        Ok(decode_raw(&line))
    }
}

/// Encoder writing one command per line.
#[derive(Debug, Default)]
pub struct CommandCodec;

impl CommandCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Encoder<Command> for CommandCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = encode(&item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let line_len = line.len();
        tracing::trace!(kind = item.kind(), id = %item.id, line_size_bytes = line_len, "Encoding command");
        if line_len > 100_000 {
            tracing::info!(
                kind = item.kind(),
                line_size_bytes = line_len,
                line_size_kb = line_len / 1024,
                "Large command being encoded"
            );
        }
        dst.reserve(line_len + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
