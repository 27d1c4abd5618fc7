//! AGWPE TCP frame codec.
//!
//! Every AGWPE message is a fixed 36-byte little-endian header followed by
//! `data_len` payload bytes:
//!
//! ```text
//! 0      port        u8
//! 1..4   reserved
//! 4      kind        u8 (ASCII letter: 'R', 'X', 'C', 'D', 'd', ...)
//! 5      reserved
//! 6      pid         u8
//! 7      reserved
//! 8..18  call_from   10 bytes, NUL padded
//! 18..28 call_to     10 bytes, NUL padded
//! 28..32 data_len    u32 LE
//! 32..36 user        u32 LE (unused)
//! ```
//!
//! [`FrameDecoder`] is fed arbitrary socket reads and yields whole frames.
use bytes::{Buf, BufMut, BytesMut};

pub const HEADER_LEN: usize = 36;
const CALL_FIELD_LEN: usize = 10;

/// Declared payloads above this are treated as a desynchronised stream.
pub const MAX_PAYLOAD: usize = 64 * 1024;

/// PID for AX.25 "no layer 3" text payloads.
pub const PID_NO_L3: u8 = 0xF0;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame truncated: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("declared payload of {0} bytes exceeds limit")]
    Oversize(usize),

    #[error("callsign '{0}' does not fit the 9-character field")]
    CallsignTooLong(String),
}

/// Frame kinds this client sends or reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Version,
    Register,
    Unregister,
    Connected,
    ConnectedData,
    Disconnect,
    PortInfo,
    Other(u8),
}

impl FrameKind {
    pub fn from_byte(b: u8) -> Self {
        match b {
            b'R' => FrameKind::Version,
            b'X' => FrameKind::Register,
            b'x' => FrameKind::Unregister,
            b'C' => FrameKind::Connected,
            b'D' => FrameKind::ConnectedData,
            b'd' => FrameKind::Disconnect,
            b'G' => FrameKind::PortInfo,
            other => FrameKind::Other(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            FrameKind::Version => b'R',
            FrameKind::Register => b'X',
            FrameKind::Unregister => b'x',
            FrameKind::Connected => b'C',
            FrameKind::ConnectedData => b'D',
            FrameKind::Disconnect => b'd',
            FrameKind::PortInfo => b'G',
            FrameKind::Other(b) => b,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgwpeFrame {
    pub port: u8,
    pub kind: FrameKind,
    pub pid: u8,
    pub call_from: String,
    pub call_to: String,
    pub data: Vec<u8>,
}

impl AgwpeFrame {
    pub fn new(kind: FrameKind) -> Self {
        Self {
            port: 0,
            kind,
            pid: 0,
            call_from: String::new(),
            call_to: String::new(),
            data: Vec::new(),
        }
    }

    /// `R`: ask the engine for its version. The reply doubles as a readiness signal.
    pub fn version_request() -> Self {
        Self::new(FrameKind::Version)
    }

    pub fn register(callsign: &str) -> Self {
        Self {
            call_from: callsign.to_string(),
            ..Self::new(FrameKind::Register)
        }
    }

    pub fn unregister(callsign: &str) -> Self {
        Self {
            call_from: callsign.to_string(),
            ..Self::new(FrameKind::Unregister)
        }
    }

    pub fn data(port: u8, local: &str, remote: &str, payload: &[u8]) -> Self {
        Self {
            port,
            kind: FrameKind::ConnectedData,
            pid: PID_NO_L3,
            call_from: local.to_string(),
            call_to: remote.to_string(),
            data: payload.to_vec(),
        }
    }

    pub fn disconnect(port: u8, local: &str, remote: &str) -> Self {
        Self {
            port,
            call_from: local.to_string(),
            call_to: remote.to_string(),
            ..Self::new(FrameKind::Disconnect)
        }
    }

    /// Payload as text, dropping trailing NULs.
    pub fn data_text(&self) -> String {
        self.data
            .iter()
            .take_while(|b| **b != 0)
            .map(|b| *b as char)
            .collect()
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        if self.data.len() > MAX_PAYLOAD {
            return Err(FrameError::Oversize(self.data.len()));
        }
        let mut out = BytesMut::with_capacity(HEADER_LEN + self.data.len());
        out.put_u8(self.port);
        out.put_bytes(0, 3);
        out.put_u8(self.kind.as_byte());
        out.put_u8(0);
        out.put_u8(self.pid);
        out.put_u8(0);
        put_call(&mut out, &self.call_from)?;
        put_call(&mut out, &self.call_to)?;
        out.put_u32_le(self.data.len() as u32);
        out.put_u32_le(0);
        out.extend_from_slice(&self.data);
        Ok(out.to_vec())
    }

    /// Decode one complete frame from the front of `buf`.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), FrameError> {
        if buf.len() < HEADER_LEN {
            return Err(FrameError::Truncated {
                needed: HEADER_LEN,
                have: buf.len(),
            });
        }
        let data_len = declared_len(buf);
        if data_len > MAX_PAYLOAD {
            return Err(FrameError::Oversize(data_len));
        }
        let total = HEADER_LEN + data_len;
        if buf.len() < total {
            return Err(FrameError::Truncated {
                needed: total,
                have: buf.len(),
            });
        }
        let frame = AgwpeFrame {
            port: buf[0],
            kind: FrameKind::from_byte(buf[4]),
            pid: buf[6],
            call_from: get_call(&buf[8..18]),
            call_to: get_call(&buf[18..28]),
            data: buf[HEADER_LEN..total].to_vec(),
        };
        Ok((frame, total))
    }
}

fn declared_len(header: &[u8]) -> usize {
    u32::from_le_bytes([header[28], header[29], header[30], header[31]]) as usize
}

fn put_call(out: &mut BytesMut, call: &str) -> Result<(), FrameError> {
    let bytes = call.as_bytes();
    if bytes.len() >= CALL_FIELD_LEN {
        return Err(FrameError::CallsignTooLong(call.to_string()));
    }
    out.extend_from_slice(bytes);
    out.put_bytes(0, CALL_FIELD_LEN - bytes.len());
    Ok(())
}

fn get_call(field: &[u8]) -> String {
    field
        .iter()
        .take_while(|b| **b != 0)
        .map(|b| *b as char)
        .collect::<String>()
        .trim()
        .to_ascii_uppercase()
}

/// Incremental AGWPE framer: push socket reads in, pull whole frames out.
pub struct FrameDecoder {
    buf: BytesMut,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete frame, if one is buffered.
    ///
    /// A header declaring an oversize payload means the stream is out of step; the
    /// buffer is dropped and `Err(Oversize)` returned so the caller can count the resync.
    pub fn next_frame(&mut self) -> Result<Option<AgwpeFrame>, FrameError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let data_len = declared_len(&self.buf);
        if data_len > MAX_PAYLOAD {
            self.buf.clear();
            return Err(FrameError::Oversize(data_len));
        }
        if self.buf.len() < HEADER_LEN + data_len {
            return Ok(None);
        }
        let (frame, used) = AgwpeFrame::decode(&self.buf)?;
        self.buf.advance(used);
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_matches_wire_format() {
        let frame = AgwpeFrame::data(1, "W1BBS-10", "K6TU", b"hi");
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 2);
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[4], b'D');
        assert_eq!(bytes[6], 0xF0);
        assert_eq!(&bytes[8..16], b"W1BBS-10");
        assert_eq!(&bytes[16..18], &[0, 0]);
        assert_eq!(&bytes[18..22], b"K6TU");
        assert_eq!(&bytes[28..32], &2u32.to_le_bytes());
        assert_eq!(&bytes[36..], b"hi");
    }

    #[test]
    fn decoder_handles_split_and_coalesced_reads() {
        let a = AgwpeFrame::register("W1BBS").encode().unwrap();
        let b = AgwpeFrame::data(0, "W1BBS", "K6TU", b"payload").encode().unwrap();
        let mut stream = a.clone();
        stream.extend_from_slice(&b);

        let mut dec = FrameDecoder::new();
        dec.push(&stream[..10]);
        assert_eq!(dec.next_frame().unwrap(), None);
        dec.push(&stream[10..50]);
        let first = dec.next_frame().unwrap().unwrap();
        assert_eq!(first.kind, FrameKind::Register);
        assert_eq!(first.call_from, "W1BBS");
        assert_eq!(dec.next_frame().unwrap(), None);
        dec.push(&stream[50..]);
        let second = dec.next_frame().unwrap().unwrap();
        assert_eq!(second.kind, FrameKind::ConnectedData);
        assert_eq!(second.data, b"payload");
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn oversize_header_triggers_resync() {
        let mut header = vec![0u8; HEADER_LEN];
        header[4] = b'D';
        header[28..32].copy_from_slice(&((MAX_PAYLOAD as u32) + 1).to_le_bytes());
        let mut dec = FrameDecoder::new();
        dec.push(&header);
        assert!(matches!(dec.next_frame(), Err(FrameError::Oversize(_))));
        assert_eq!(dec.buffered(), 0);

        dec.push(&AgwpeFrame::version_request().encode().unwrap());
        assert_eq!(dec.next_frame().unwrap().unwrap().kind, FrameKind::Version);
    }

    #[test]
    fn long_callsign_is_rejected() {
        let frame = AgwpeFrame::register("TOOLONGCALL");
        assert!(matches!(frame.encode(), Err(FrameError::CallsignTooLong(_))));
    }

    #[test]
    fn unknown_kind_survives_decode() {
        let mut frame = AgwpeFrame::new(FrameKind::Other(b'y'));
        frame.data = b"\x01\x00\x00\x00".to_vec();
        let bytes = frame.encode().unwrap();
        let (back, used) = AgwpeFrame::decode(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(back.kind, FrameKind::Other(b'y'));
    }

    #[test]
    fn data_text_stops_at_nul() {
        let mut frame = AgwpeFrame::new(FrameKind::Connected);
        frame.data = b"*** CONNECTED With Station K6TU\r\0\0".to_vec();
        assert_eq!(frame.data_text(), "*** CONNECTED With Station K6TU\r");
    }
}
