use bytes::BytesMut;

use crate::error::ChatErr;
use crate::error::Result;

/// Longest line kept in memory. Anything longer is dropped up to its newline
/// and reported once as malformed.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

const PREVIEW_BYTES: usize = 64;

/// Splits a streamed body into newline-delimited lines. Bytes are buffered
/// until a `\n` arrives, so lines (and multi-byte characters) may be split
/// across any number of transport chunks.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: BytesMut,
    /// Prefix of `buf` already known to contain no newline.
    scanned: usize,
    /// Skipping the rest of an oversized line.
    discarding: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk and return every line it completed, trimmed,
    /// with blank lines dropped. Lines that are not UTF-8 or exceed
    /// [`MAX_LINE_BYTES`] come back as `MalformedChunk`.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<String>> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let line = self.buf.split_to(self.scanned + offset + 1);
            self.scanned = 0;
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if let Some(decoded) = decode_line(&line) {
                lines.push(decoded);
            }
        }
        self.scanned = self.buf.len();

        if self.discarding || self.buf.len() > MAX_LINE_BYTES {
            if !self.discarding {
                self.discarding = true;
                lines.push(Err(ChatErr::MalformedChunk {
                    line: preview(&self.buf),
                    reason: format!("line exceeds {MAX_LINE_BYTES} bytes"),
                }));
            }
            self.buf.clear();
            self.scanned = 0;
        }
        lines
    }

    /// Flush a trailing line that was not newline terminated.
    pub fn finish(&mut self) -> Option<Result<String>> {
        let rest = self.buf.split();
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        decode_line(&rest)
    }
}

fn decode_line(raw: &[u8]) -> Option<Result<String>> {
    match std::str::from_utf8(raw) {
        Ok(text) => {
            let text = text.trim();
            if text.is_empty() {
                None
            } else {
                Some(Ok(text.to_string()))
            }
        }
        Err(e) => Some(Err(ChatErr::MalformedChunk {
            line: preview(raw),
            reason: e.to_string(),
        })),
    }
}

fn preview(raw: &[u8]) -> String {
    let end = raw.len().min(PREVIEW_BYTES);
    String::from_utf8_lossy(&raw[..end]).trim().to_string()
}
