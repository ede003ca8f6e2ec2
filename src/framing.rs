//! Incremental parsing of the provider's event stream.
//!
//! The pipeline is split into small pieces so each stage can be driven and
//! tested on its own: [`Utf8Carry`] turns arbitrary byte reads into text,
//! [`LineBuffer`] cuts that text into complete lines, and [`classify_line`]
//! turns one `data: ` line into a text delta.

use crate::constants::{DATA_PREFIX, DONE_SENTINEL};
use crate::specs::gemini::StreamChunk;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("invalid UTF-8 in upstream stream at byte {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("upstream line exceeded {limit} bytes without a newline")]
    LineTooLong { limit: usize },
}

/// Decodes UTF-8 across read boundaries.
///
/// A multi-byte sequence cut by a read is held back until the next call
/// completes it. Invalid sequences are an error, not replaced.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
    consumed: usize,
}

impl Utf8Carry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> Result<String, FramingError> {
        self.pending.extend_from_slice(bytes);

        let valid = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => {
                return Err(FramingError::InvalidUtf8 {
                    offset: self.consumed + e.valid_up_to(),
                })
            }
        };

        let text = String::from_utf8_lossy(&self.pending[..valid]).into_owned();
        self.pending.drain(..valid);
        self.consumed += valid;
        Ok(text)
    }

    /// Bytes of an unfinished sequence still waiting for the next read.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Accumulates decoded text and yields complete lines.
#[derive(Debug)]
pub struct LineBuffer {
    buf: String,
    max_pending: usize,
}

impl LineBuffer {
    pub fn new(max_pending: usize) -> Self {
        Self {
            buf: String::new(),
            max_pending,
        }
    }

    pub fn push(&mut self, text: &str) -> Result<(), FramingError> {
        self.buf.push_str(text);

        let unterminated = match self.buf.rfind('\n') {
            Some(idx) => self.buf.len() - idx - 1,
            None => self.buf.len(),
        };
        if unterminated > self.max_pending {
            return Err(FramingError::LineTooLong {
                limit: self.max_pending,
            });
        }
        Ok(())
    }

    /// Next `\n`-terminated line without its terminator (a trailing `\r` is
    /// dropped too).
    pub fn next_line(&mut self) -> Option<String> {
        let idx = self.buf.find('\n')?;
        let mut line: String = self.buf.drain(..=idx).collect();
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }

    /// Whatever is left after the last newline, used once the upstream ends.
    pub fn take_remainder(&mut self) -> Option<String> {
        let mut rest = std::mem::take(&mut self.buf);
        if rest.ends_with('\r') {
            rest.pop();
        }
        if rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }
}

#[derive(Debug)]
pub enum ProviderLine {
    /// Text of `candidates[0].content.parts[0].text`, empty when any level is missing.
    Delta {
        text: String,
        finish_reason: Option<String>,
    },
    /// `data: [DONE]`
    Sentinel,
    /// Not a `data: ` line.
    Ignored,
    Malformed(serde_json::Error),
}

pub fn classify_line(line: &str) -> ProviderLine {
    let payload = match line.strip_prefix(DATA_PREFIX) {
        Some(p) => p,
        None => return ProviderLine::Ignored,
    };

    if payload == DONE_SENTINEL {
        return ProviderLine::Sentinel;
    }

    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => ProviderLine::Delta {
            text: chunk.first_text().unwrap_or_default().to_string(),
            finish_reason: chunk.finish_reason().map(str::to_string),
        },
        Err(e) => ProviderLine::Malformed(e),
    }
}
