//! Handshake message framing.
//!
//! ```text
//! struct {
//!     HandshakeType msg_type;    /* handshake type */
//!     uint24 length;             /* remaining bytes in message */
//!     select (Handshake.msg_type) { ... };
//! } Handshake;
//! ```
//!
//! A handshake message may be larger than one record. When sending, only the
//! first fragment carries the 4-byte header; later fragments are bare body
//! bytes. When receiving, body bytes are gathered in a [`PendingMessage`] and
//! released only once the declared length has been reached.

use crate::error::{Error, Result};
use crate::protocol::{ContentType, HandshakeType, ProtocolVersion, HANDSHAKE_HEADER_LEN};
use bytes::{Buf, BufMut, BytesMut};
use std::collections::VecDeque;

/// Largest value a uint24 length can carry.
pub const MAX_U24: usize = 0x00FF_FFFF;

/// Checked big-endian reader over a byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    /// Read from `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes left.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Whether everything has been consumed.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.len() < n {
            return Err(Error::Decode(format!("truncated {}", what)));
        }
        Ok(())
    }

    /// Read one byte.
    pub fn u8(&mut self, what: &str) -> Result<u8> {
        self.need(1, what)?;
        Ok(self.buf.get_u8())
    }

    /// Read a big-endian u16.
    pub fn u16(&mut self, what: &str) -> Result<u16> {
        self.need(2, what)?;
        Ok(self.buf.get_u16())
    }

    /// Read a big-endian uint24.
    pub fn u24(&mut self, what: &str) -> Result<usize> {
        self.need(3, what)?;
        Ok(self.buf.get_uint(3) as usize)
    }

    /// Read a big-endian u32.
    pub fn u32(&mut self, what: &str) -> Result<u32> {
        self.need(4, what)?;
        Ok(self.buf.get_u32())
    }

    /// Read a big-endian u64.
    pub fn u64(&mut self, what: &str) -> Result<u64> {
        self.need(8, what)?;
        Ok(self.buf.get_u64())
    }

    /// Take exactly `n` bytes.
    pub fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        self.need(n, what)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Read a fixed-size array.
    pub fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    /// Read an `opaque<0..2^8-1>` vector.
    pub fn vec_u8(&mut self, what: &str) -> Result<&'a [u8]> {
        let len = self.u8(what)? as usize;
        self.take(len, what)
    }

    /// Read an `opaque<0..2^16-1>` vector.
    pub fn vec_u16(&mut self, what: &str) -> Result<&'a [u8]> {
        let len = self.u16(what)? as usize;
        self.take(len, what)
    }

    /// Read an `opaque<0..2^24-1>` vector.
    pub fn vec_u24(&mut self, what: &str) -> Result<&'a [u8]> {
        let len = self.u24(what)?;
        self.take(len, what)
    }

    /// Everything left.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = self.buf;
        self.buf = &[];
        rest
    }

    /// Fail if bytes remain.
    pub fn finish(&self, what: &str) -> Result<()> {
        if !self.buf.is_empty() {
            return Err(Error::Decode(format!(
                "{} trailing bytes after {}",
                self.buf.len(),
                what
            )));
        }
        Ok(())
    }
}

/// Append a uint24.
pub fn put_u24(buf: &mut BytesMut, value: usize) -> Result<()> {
    if value > MAX_U24 {
        return Err(Error::InternalError("uint24 overflow".into()));
    }
    buf.put_uint(value as u64, 3);
    Ok(())
}

/// Append an `opaque<0..2^8-1>` vector.
pub fn put_vec_u8(buf: &mut BytesMut, data: &[u8]) -> Result<()> {
    let len = u8::try_from(data.len())
        .map_err(|_| Error::InternalError("vector too long for u8 length".into()))?;
    buf.put_u8(len);
    buf.put_slice(data);
    Ok(())
}

/// Append an `opaque<0..2^16-1>` vector.
pub fn put_vec_u16(buf: &mut BytesMut, data: &[u8]) -> Result<()> {
    let len = u16::try_from(data.len())
        .map_err(|_| Error::InternalError("vector too long for u16 length".into()))?;
    buf.put_u16(len);
    buf.put_slice(data);
    Ok(())
}

/// Append an `opaque<0..2^24-1>` vector.
pub fn put_vec_u24(buf: &mut BytesMut, data: &[u8]) -> Result<()> {
    put_u24(buf, data.len())?;
    buf.put_slice(data);
    Ok(())
}

/// Write a 5-byte record header.
pub fn write_record_header(
    buf: &mut BytesMut,
    content_type: ContentType,
    version: ProtocolVersion,
    len: usize,
) -> Result<()> {
    let len = u16::try_from(len).map_err(|_| Error::RecordOverflow(len))?;
    buf.put_u8(content_type.to_u8());
    buf.put_u16(version.to_u16());
    buf.put_u16(len);
    Ok(())
}

/// Write a 4-byte handshake header.
pub fn write_handshake_header(buf: &mut BytesMut, msg_type: HandshakeType, len: usize) -> Result<()> {
    buf.put_u8(msg_type.to_u8());
    put_u24(buf, len)
}

/// Write the header for the `frag_len`-byte slice of a `total_len`-byte
/// message body that starts at `offset`. Only the first fragment carries the
/// handshake header; returns how many header bytes were written.
pub fn write_fragment_header(
    buf: &mut BytesMut,
    msg_type: HandshakeType,
    offset: usize,
    frag_len: usize,
    total_len: usize,
) -> Result<usize> {
    match offset.checked_add(frag_len) {
        Some(end) if end <= total_len => {},
        _ => return Err(Error::InternalError("fragment runs past message".into())),
    }
    if offset == 0 {
        write_handshake_header(buf, msg_type, total_len)?;
        return Ok(HANDSHAKE_HEADER_LEN);
    }
    Ok(0)
}

/// Parse a handshake header into (raw type, declared body length).
pub fn parse_handshake_header(data: &[u8]) -> Result<(u8, usize)> {
    let mut reader = Reader::new(data);
    let msg_type = reader.u8("handshake type")?;
    let len = reader.u24("handshake length")?;
    Ok((msg_type, len))
}

/// Header plus body.
pub fn encode_handshake(msg_type: HandshakeType, body: &[u8]) -> Result<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(HANDSHAKE_HEADER_LEN + body.len());
    write_handshake_header(&mut buf, msg_type, body.len())?;
    buf.put_slice(body);
    Ok(buf.to_vec())
}

/// Split a handshake message into record-sized fragments of at most
/// `max_fragment` bytes each.
pub fn fragment_message(
    msg_type: HandshakeType,
    body: &[u8],
    max_fragment: usize,
) -> Result<Vec<Vec<u8>>> {
    if max_fragment <= HANDSHAKE_HEADER_LEN {
        return Err(Error::InternalError("fragment length too small".into()));
    }
    let total = body.len();
    let mut fragments = Vec::with_capacity(total / max_fragment + 1);
    let mut offset = 0;
    loop {
        let mut frag = BytesMut::with_capacity(max_fragment);
        let room = if offset == 0 {
            max_fragment - HANDSHAKE_HEADER_LEN
        } else {
            max_fragment
        };
        let take = room.min(total - offset);
        write_fragment_header(&mut frag, msg_type, offset, take, total)?;
        frag.put_slice(&body[offset..offset + take]);
        offset += take;
        fragments.push(frag.to_vec());
        if offset == total {
            break;
        }
    }
    Ok(fragments)
}

/// A handshake message whose body has not fully arrived.
#[derive(Debug)]
pub struct PendingMessage {
    msg_type: u8,
    declared: usize,
    data: Vec<u8>,
}

impl PendingMessage {
    /// Start accumulating a message of `declared` body bytes.
    pub fn new(msg_type: u8, declared: usize, max_size: usize) -> Result<Self> {
        if declared > max_size {
            return Err(Error::HandshakeSizeError {
                declared,
                max: max_size,
            });
        }
        let mut data = Vec::with_capacity(HANDSHAKE_HEADER_LEN + declared);
        data.push(msg_type);
        data.extend_from_slice(&(declared as u32).to_be_bytes()[1..]);
        Ok(Self {
            msg_type,
            declared,
            data,
        })
    }

    /// Raw message type.
    pub fn msg_type(&self) -> u8 {
        self.msg_type
    }

    /// Body bytes gathered so far.
    pub fn received(&self) -> usize {
        self.data.len() - HANDSHAKE_HEADER_LEN
    }

    /// Body bytes still missing.
    pub fn remaining(&self) -> usize {
        self.declared - self.received()
    }

    /// Add body bytes. Going past the declared length is fatal.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.remaining() {
            return Err(Error::BufferError(format!(
                "{} bytes appended to message with {} remaining",
                bytes.len(),
                self.remaining()
            )));
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Whether the declared length has been reached.
    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    /// Release the full encoded message (header included).
    pub fn complete(self) -> Result<HandshakeMessage> {
        if !self.is_complete() {
            return Err(Error::BufferError(format!(
                "message completed with {} of {} bytes",
                self.received(),
                self.declared
            )));
        }
        Ok(HandshakeMessage {
            msg_type: self.msg_type,
            encoded: self.data,
        })
    }
}

/// A complete handshake message as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    /// Raw message type
    pub msg_type: u8,
    /// Header and body, exactly as they go into the transcript
    pub encoded: Vec<u8>,
}

impl HandshakeMessage {
    /// Message body.
    pub fn body(&self) -> &[u8] {
        &self.encoded[HANDSHAKE_HEADER_LEN..]
    }

    /// Known message type, if any.
    pub fn handshake_type(&self) -> Option<HandshakeType> {
        HandshakeType::from_u8(self.msg_type)
    }
}

/// Turns a stream of handshake record payloads into whole messages.
#[derive(Debug)]
pub struct HandshakeReassembler {
    max_message_size: usize,
    header: Vec<u8>,
    pending: Option<PendingMessage>,
    ready: VecDeque<HandshakeMessage>,
}

impl HandshakeReassembler {
    /// Create with the given maximum body size.
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            header: Vec::with_capacity(HANDSHAKE_HEADER_LEN),
            pending: None,
            ready: VecDeque::new(),
        }
    }

    /// Begin a new message. Fails if one is already pending.
    pub fn start_message(&mut self, msg_type: u8, declared: usize) -> Result<()> {
        if self.pending.is_some() {
            return Err(Error::BufferError(
                "new handshake message while another is pending".into(),
            ));
        }
        let message = PendingMessage::new(msg_type, declared, self.max_message_size)?;
        if message.is_complete() {
            self.ready.push_back(message.complete()?);
        } else {
            self.pending = Some(message);
        }
        Ok(())
    }

    /// Feed the payload of one handshake record.
    pub fn feed(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            if let Some(pending) = self.pending.as_mut() {
                let take = pending.remaining().min(data.len());
                pending.append(&data[..take])?;
                data = &data[take..];
                if pending.is_complete() {
                    if let Some(done) = self.pending.take() {
                        self.ready.push_back(done.complete()?);
                    }
                }
                continue;
            }

            let take = (HANDSHAKE_HEADER_LEN - self.header.len()).min(data.len());
            self.header.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.header.len() == HANDSHAKE_HEADER_LEN {
                let (msg_type, declared) = parse_handshake_header(&self.header)?;
                self.header.clear();
                self.start_message(msg_type, declared)?;
            }
        }
        Ok(())
    }

    /// Next complete message, in arrival order.
    pub fn next_message(&mut self) -> Option<HandshakeMessage> {
        self.ready.pop_front()
    }

    /// Types of the complete messages not yet taken, in arrival order.
    pub fn ready_types(&self) -> impl Iterator<Item = u8> + '_ {
        self.ready.iter().map(|m| m.msg_type)
    }

    /// Whether a message is partially received.
    pub fn has_partial(&self) -> bool {
        self.pending.is_some() || !self.header.is_empty()
    }

    /// Whether nothing is buffered at all.
    pub fn is_empty(&self) -> bool {
        !self.has_partial() && self.ready.is_empty()
    }

    /// Handshake messages must not straddle a change of read keys.
    pub fn check_key_boundary(&self) -> Result<()> {
        if !self.is_empty() {
            return Err(Error::BufferError(
                "handshake data buffered across a key change".into(),
            ));
        }
        Ok(())
    }

    /// Drop all buffered data.
    pub fn abort(&mut self) {
        self.header.clear();
        self.pending = None;
        self.ready.clear();
    }
}
