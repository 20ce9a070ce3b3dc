//! Byte-level packet I/O: a bounds-checked read cursor over one received
//! payload and the reply assembly buffer.
//!
//! All multi-byte integers on the Synergy wire are big-endian.

use std::io::Write;

use tracing::warn;

use crate::{ProtoError, handler::Tag};

/// Reply buffer capacity. Sized well past the largest message this client
/// ever emits (`DINF`, under 32 bytes); overflowing it is a programming
/// error, not a runtime condition.
const RESP_CAPACITY: usize = 512;

/// Leading bytes reserved for the big-endian payload-length prefix.
const LEN_PREFIX: usize = 4;

/// Read cursor over one packet payload.
///
/// Short reads do not fail eagerly: they latch a sticky flag and yield zero,
/// so a handler can decode all fields straight-line and then settle validity
/// once with [`finish`](Self::finish). No value read past the end is ever
/// acted upon, because `finish` refuses the whole packet.
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
    short: bool,
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0, short: false }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            self.short = true;
            return None;
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    pub fn read_u8(&mut self) -> u8 {
        self.take(1).map_or(0, |b| b[0])
    }

    pub fn read_u16(&mut self) -> u16 {
        self.take(2).map_or(0, |b| u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_i16(&mut self) -> i16 {
        self.read_u16() as i16
    }

    pub fn read_u32(&mut self) -> u32 {
        self.take(4).map_or(0, |b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Consume `n` bytes without decoding them.
    pub fn skip(&mut self, n: usize) {
        self.take(n);
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn short(&self) -> bool {
        self.short
    }

    /// The end-of-packet contract: every field was present and nothing is
    /// left over. Any violation condemns the packet.
    pub fn finish(self, tag: Tag) -> Result<(), ProtoError> {
        if self.short || self.remaining() != 0 {
            return Err(ProtoError::Malformed { tag });
        }
        Ok(())
    }
}

/// Reply assembly buffer.
///
/// Bytes accumulate after a reserved 4-byte slot; [`flush`](Self::flush)
/// patches the slot with the payload length and hands the whole frame to the
/// transport in one write.
pub struct ResponseWriter {
    buf: Vec<u8>,
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseWriter {
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(RESP_CAPACITY);
        buf.resize(LEN_PREFIX, 0);
        Self { buf }
    }

    fn push(&mut self, bytes: &[u8]) {
        assert!(self.buf.len() + bytes.len() <= RESP_CAPACITY, "response buffer overflow");
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.push(&[v]);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.push(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.push(&v.to_be_bytes());
    }

    /// Append bytes verbatim: 4-byte tags and the greeting magic.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.push(bytes);
    }

    /// Append a length-prefixed string.
    pub fn write_str(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.push(s.as_bytes());
    }

    fn is_empty(&self) -> bool {
        self.buf.len() == LEN_PREFIX
    }

    /// Abandon whatever was staged.
    pub fn clear(&mut self) {
        self.buf.truncate(LEN_PREFIX);
    }

    /// Stamp the length prefix and send the frame. A failed or short write
    /// is logged and otherwise ignored; Synergy has no per-message ack that
    /// could go missing. The buffer resets either way.
    pub fn flush<W: Write>(&mut self, out: &mut W) {
        if self.is_empty() {
            return;
        }
        let payload_len = (self.buf.len() - LEN_PREFIX) as u32;
        self.buf[..LEN_PREFIX].copy_from_slice(&payload_len.to_be_bytes());

        if let Err(err) = out.write_all(&self.buf) {
            warn!(?err, payload_len, "dropped outgoing packet");
        }
        self.clear();
    }
}
