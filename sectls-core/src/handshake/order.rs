//! Handshake message ordering rules.
//!
//! Every incoming message is checked against the table for the current role
//! and phase before any processing:
//!
//! - a type with no rule is never valid here (`SanityMessage`)
//! - a `once` type seen before is a `DuplicateMessage`
//! - a type whose predecessors have not all been seen is `OutOfOrder`

use crate::error::{Error, Result};
use crate::protocol::HandshakeType;

/// One row of an ordering table.
#[derive(Debug, Clone, Copy)]
pub struct OrderRule {
    /// Message type the rule applies to
    pub msg: HandshakeType,
    /// Types that must have been seen first
    pub requires: &'static [HandshakeType],
    /// Whether the type may appear at most once
    pub once: bool,
}

const fn rule(msg: HandshakeType, requires: &'static [HandshakeType], once: bool) -> OrderRule {
    OrderRule {
        msg,
        requires,
        once,
    }
}

use HandshakeType::*;

/// Server messages a client accepts before the handshake completes.
pub const CLIENT_HANDSHAKE_RULES: &[OrderRule] = &[
    rule(ServerHello, &[], true),
    rule(EncryptedExtensions, &[ServerHello], true),
    rule(CertificateRequest, &[EncryptedExtensions], true),
    rule(Certificate, &[EncryptedExtensions], true),
    rule(CertificateVerify, &[Certificate], true),
    rule(Finished, &[EncryptedExtensions], true),
];

/// Server messages a client accepts once established.
pub const CLIENT_POST_HANDSHAKE_RULES: &[OrderRule] = &[
    rule(NewSessionTicket, &[], false),
    rule(KeyUpdate, &[], false),
    rule(CertificateRequest, &[], false),
];

/// Client messages a server accepts before the handshake completes.
pub const SERVER_HANDSHAKE_RULES: &[OrderRule] = &[
    rule(ClientHello, &[], true),
    rule(EndOfEarlyData, &[ClientHello], true),
    rule(Certificate, &[ClientHello], true),
    rule(CertificateVerify, &[Certificate], true),
    rule(Finished, &[ClientHello], true),
];

/// Client messages a server accepts once established. The authentication
/// rules apply to one post-handshake exchange; the set is cleared between
/// exchanges.
pub const SERVER_POST_HANDSHAKE_RULES: &[OrderRule] = &[
    rule(KeyUpdate, &[], false),
    rule(Certificate, &[], true),
    rule(CertificateVerify, &[Certificate], true),
    rule(Finished, &[Certificate], true),
];

/// Set of handshake types seen so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeenMessages {
    bits: u32,
}

fn bit(msg: HandshakeType) -> u32 {
    // Wire types fit in 0..=24; the synthetic message_hash never reaches here.
    1u32 << (msg.to_u8() & 31)
}

impl SeenMessages {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `msg` has been seen.
    pub fn contains(&self, msg: HandshakeType) -> bool {
        self.bits & bit(msg) != 0
    }

    /// Check `raw_type` against `rules` without recording it.
    pub fn check(&self, rules: &[OrderRule], raw_type: u8) -> Result<HandshakeType> {
        let rule = HandshakeType::from_u8(raw_type)
            .and_then(|msg| rules.iter().find(|r| r.msg == msg))
            .ok_or(Error::SanityMessage(raw_type))?;
        if rule.once && self.contains(rule.msg) {
            return Err(Error::DuplicateMessage(raw_type));
        }
        if !rule.requires.iter().all(|req| self.contains(*req)) {
            return Err(Error::OutOfOrder(raw_type));
        }
        Ok(rule.msg)
    }

    /// Record `msg` as seen.
    pub fn mark(&mut self, msg: HandshakeType) {
        self.bits |= bit(msg);
    }

    /// Forget `msg`, e.g. the first ClientHello after a retry.
    pub fn forget(&mut self, msg: HandshakeType) {
        self.bits &= !bit(msg);
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.bits = 0;
    }

    /// Check a batch of types in arrival order, as if each were marked
    /// after passing. `self` is not modified.
    pub fn check_sequence(
        &self,
        rules: &[OrderRule],
        types: impl IntoIterator<Item = u8>,
    ) -> Result<()> {
        let mut scratch = *self;
        for raw_type in types {
            let msg = scratch.check(rules, raw_type)?;
            scratch.mark(msg);
        }
        Ok(())
    }
}
