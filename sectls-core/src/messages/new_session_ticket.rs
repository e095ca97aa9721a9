//! NewSessionTicket message (RFC 8446 Section 4.6.1).

use crate::codec::{put_vec_u16, put_vec_u8, Reader};
use crate::error::{Error, Result};
use crate::extensions::Extensions;
use bytes::{BufMut, BytesMut};

/// Tickets may not be valid for longer than seven days.
pub const MAX_TICKET_LIFETIME: u32 = 604_800;

/// NewSessionTicket message.
///
/// ```text
/// struct {
///     uint32 ticket_lifetime;
///     uint32 ticket_age_add;
///     opaque ticket_nonce<0..255>;
///     opaque ticket<1..2^16-1>;
///     Extension extensions<0..2^16-2>;
/// } NewSessionTicket;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionTicket {
    /// Lifetime in seconds
    pub lifetime: u32,
    /// Obfuscation added to the ticket age
    pub age_add: u32,
    /// Per-ticket nonce
    pub nonce: Vec<u8>,
    /// Opaque ticket identity
    pub ticket: Vec<u8>,
    /// Extensions (early_data)
    pub extensions: Extensions,
}

impl NewSessionTicket {
    /// Encode the body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::new();
        buf.put_u32(self.lifetime);
        buf.put_u32(self.age_add);
        put_vec_u8(&mut buf, &self.nonce)?;
        put_vec_u16(&mut buf, &self.ticket)?;
        self.extensions.encode(&mut buf)?;
        Ok(buf.to_vec())
    }

    /// Decode the body.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let lifetime = r.u32("ticket_lifetime")?;
        let age_add = r.u32("ticket_age_add")?;
        let nonce = r.vec_u8("ticket_nonce")?.to_vec();
        let ticket = r.vec_u16("ticket")?.to_vec();
        let extensions = Extensions::decode(&mut r)?;
        r.finish("NewSessionTicket")?;

        if ticket.is_empty() {
            return Err(Error::Decode("empty ticket".into()));
        }
        if lifetime > MAX_TICKET_LIFETIME {
            return Err(Error::IllegalParameter(format!(
                "ticket lifetime {}",
                lifetime
            )));
        }
        Ok(Self {
            lifetime,
            age_add,
            nonce,
            ticket,
            extensions,
        })
    }

    /// Early data limit advertised with the ticket, if any.
    pub fn max_early_data(&self) -> Result<Option<u32>> {
        self.extensions.max_early_data()
    }
}
