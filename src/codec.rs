//! Wire framing
//!
//! The classic protocol has no delimiter: one socket read is one frame and
//! outbound messages are written as-is, so a long message can arrive in
//! pieces and quick successive messages can arrive glued together.
//! `Framing::Line` is the opt-in alternative that terminates every message
//! with `\n` and reassembles inbound lines across reads.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ChatError;

/// Partial lines are flushed once they grow past this many read buffers
const MAX_LINE_BUFFERS: usize = 8;

/// Server-wide framing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// No delimiter; buffer-sized reads (wire compatible)
    #[default]
    Raw,
    /// Newline-terminated messages
    Line,
}

impl Framing {
    /// Encode one outbound message
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Framing::Raw => text.as_bytes().to_vec(),
            Framing::Line => {
                let mut bytes = Vec::with_capacity(text.len() + 1);
                bytes.extend_from_slice(text.as_bytes());
                bytes.push(b'\n');
                bytes
            }
        }
    }
}

impl FromStr for Framing {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(Framing::Raw),
            "line" => Ok(Framing::Line),
            other => Err(ChatError::Config(format!(
                "unknown framing '{}' (expected 'raw' or 'line')",
                other
            ))),
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::Raw => f.write_str("raw"),
            Framing::Line => f.write_str("line"),
        }
    }
}

/// Turns inbound read chunks into text frames
#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    pending: Vec<u8>,
    max_line: usize,
}

impl FrameDecoder {
    /// Decoder for `framing`; line mode caps a partial line at `read_buffer_size * 8`
    pub fn new(framing: Framing, read_buffer_size: usize) -> Self {
        Self {
            framing,
            pending: Vec::new(),
            max_line: read_buffer_size.saturating_mul(MAX_LINE_BUFFERS),
        }
    }

    /// Feed one read chunk, returning every frame it completes
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<String> {
        match self.framing {
            Framing::Raw => vec![String::from_utf8_lossy(chunk).into_owned()],
            Framing::Line => {
                self.pending.extend_from_slice(chunk);
                let mut frames = Vec::new();

                while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = self.pending.drain(..=pos).collect();
                    let text = String::from_utf8_lossy(&line[..pos]);
                    frames.push(text.trim_end_matches('\r').to_string());
                }

                if self.pending.len() > self.max_line {
                    let overflow = std::mem::take(&mut self.pending);
                    frames.push(String::from_utf8_lossy(&overflow).into_owned());
                }

                frames
            }
        }
    }
}
