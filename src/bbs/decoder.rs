//! Incremental byte-stream to line reassembler for connected-mode packet data.
//!
//! Packet terminals disagree on line endings (`\r` is traditional, `\n` and `\r\n`
//! show up from PC clients), and AX.25 `I` frames split text at arbitrary points.
//! [`LineDecoder`] accepts chunks as they arrive and yields trimmed, non-empty lines.
//!
//! Bytes are decoded as ISO-8859-1 so every value maps to a character; ASCII
//! control characters other than tab are dropped as line noise.
//!
//! A line whose content grows past [`MAX_LINE_BYTES`] is not stored. Its bytes are
//! counted and skipped up to the next terminator, which yields a single
//! [`LineEvent::Overflow`]. The outcome does not depend on how the input was chunked.
use bytes::BytesMut;

/// Longest line content accepted, terminator excluded.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// A complete, trimmed, non-empty line.
    Line(String),
    /// A line longer than [`MAX_LINE_BYTES`] ended and was dropped.
    Overflow { discarded: usize },
}

#[derive(Debug)]
pub struct LineDecoder {
    buf: BytesMut,
    /// Byte count of the current line once it has passed the cap.
    discarding: Option<usize>,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
            discarding: None,
        }
    }

    /// Bytes held while waiting for a line terminator. Zero while an oversized line is skipped.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Append a chunk and return every line it completed, in order.
    pub fn feed(&mut self, data: &[u8]) -> Vec<LineEvent> {
        let mut events = Vec::new();
        let mut rest = data;

        while !rest.is_empty() {
            match rest.iter().position(|b| *b == b'\r' || *b == b'\n') {
                Some(pos) => {
                    self.push_content(&rest[..pos]);
                    let terminator_len = if rest[pos] == b'\r' && rest.get(pos + 1) == Some(&b'\n') {
                        2
                    } else {
                        1
                    };
                    rest = &rest[pos + terminator_len..];
                    self.finish_line(&mut events);
                }
                None => {
                    self.push_content(rest);
                    rest = &[];
                }
            }
        }
        events
    }

    fn push_content(&mut self, bytes: &[u8]) {
        if let Some(count) = self.discarding.as_mut() {
            *count += bytes.len();
        } else if self.buf.len() + bytes.len() > MAX_LINE_BYTES {
            self.discarding = Some(self.buf.len() + bytes.len());
            self.buf.clear();
        } else {
            self.buf.extend_from_slice(bytes);
        }
    }

    fn finish_line(&mut self, events: &mut Vec<LineEvent>) {
        if let Some(discarded) = self.discarding.take() {
            events.push(LineEvent::Overflow { discarded });
            return;
        }
        // A \r\n split across chunks ends here as an empty line, which decodes to nothing.
        if let Some(line) = decode_line(&self.buf) {
            events.push(LineEvent::Line(line));
        }
        self.buf.clear();
    }
}

/// Latin-1 decode and trim one line. Control characters other than tab are dropped,
/// so BEL, ESC and NUL never reach the history. Returns `None` for blank lines.
fn decode_line(raw: &[u8]) -> Option<String> {
    let text: String = raw
        .iter()
        .map(|b| *b as char)
        .filter(|c| *c == '\t' || !c.is_ascii_control())
        .collect();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Encode outgoing text as ISO-8859-1, replacing characters outside that range with `?`.
pub fn encode_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| {
            let code = c as u32;
            if code <= 0xFF {
                code as u8
            } else {
                b'?'
            }
        })
        .collect()
}
