//! Blocking and non-blocking I/O glue for hosts.
//!
//! The connections themselves never touch a socket. [`pump`] moves bytes
//! between a [`Transport`] and a connection until the transport would block,
//! the connection reports pending crypto, or the connection closes.

use crate::error::Error;
use crate::handshake::{ClientConnection, Progress, ServerConnection};
use std::collections::VecDeque;
use std::io;

const READ_CHUNK: usize = 16 * 1024 + 256;

/// A byte stream a connection can be pumped over.
pub trait Transport {
    /// Write all of `data`.
    fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read into `buf`. `Ok(0)` means end of stream; `WouldBlock` means
    /// nothing is available right now.
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// The connection operations [`pump`] drives.
pub trait Pumpable {
    /// Feed received bytes.
    fn read_tls(&mut self, data: &[u8]) -> crate::Result<()>;
    /// Advance the state machine.
    fn process(&mut self) -> crate::Result<Progress>;
    /// Bytes waiting to be sent.
    fn take_output(&mut self) -> Vec<u8>;
    /// Whether the connection has terminated.
    fn is_closed(&self) -> bool;
}

macro_rules! impl_pumpable {
    ($ty:ty) => {
        impl Pumpable for $ty {
            fn read_tls(&mut self, data: &[u8]) -> crate::Result<()> {
                <$ty>::read_tls(self, data)
            }

            fn process(&mut self) -> crate::Result<Progress> {
                <$ty>::process(self)
            }

            fn take_output(&mut self) -> Vec<u8> {
                <$ty>::take_output(self)
            }

            fn is_closed(&self) -> bool {
                <$ty>::is_closed(self)
            }
        }
    };
}

impl_pumpable!(ClientConnection);
impl_pumpable!(ServerConnection);

fn tls_error(err: Error) -> io::Error {
    let kind = match err {
        Error::ConnectionClosed => io::ErrorKind::ConnectionAborted,
        _ => io::ErrorKind::InvalidData,
    };
    io::Error::new(kind, err)
}

fn send_output<C: Pumpable + ?Sized, T: Transport + ?Sized>(conn: &mut C, transport: &mut T) -> io::Result<()> {
    let output = conn.take_output();
    if !output.is_empty() {
        tracing::trace!(len = output.len(), "sending");
        transport.send(&output)?;
    }
    Ok(())
}

/// Exchange bytes until the transport would block or the connection needs
/// the host (pending crypto, closed).
///
/// Output queued by a failed connection (its fatal alert) is sent before the
/// error is returned.
pub fn pump<C, T>(conn: &mut C, transport: &mut T) -> io::Result<Progress>
where
    C: Pumpable + ?Sized,
    T: Transport + ?Sized,
{
    send_output(conn, transport)?;
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        if conn.is_closed() {
            return Ok(Progress::NeedInput);
        }
        let n = match transport.receive(&mut buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed the transport",
                ));
            },
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Progress::NeedInput),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        conn.read_tls(&buf[..n]).map_err(tls_error)?;
        let progress = conn.process();
        send_output(conn, transport)?;
        match progress.map_err(tls_error)? {
            Progress::Pending => return Ok(Progress::Pending),
            Progress::NeedInput => {},
        }
    }
}

/// In-memory duplex pipe, one end per side. Reads with nothing buffered
/// return `WouldBlock`.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    inbound: VecDeque<u8>,
    outbound: VecDeque<u8>,
}

impl MemoryTransport {
    /// Empty pipe end.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move everything this end sent to `peer`'s receive side.
    pub fn deliver_to(&mut self, peer: &mut MemoryTransport) -> usize {
        let n = self.outbound.len();
        peer.inbound.extend(self.outbound.drain(..));
        n
    }

    /// Bytes sent and not yet delivered.
    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.outbound.extend(data);
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.inbound.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.inbound.len());
        for (dst, src) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}
