//! Ephemeral Diffie-Hellman over the `key_share` groups.
//!
//! Public shares travel in ClientHello/ServerHello `key_share` entries. The
//! private half and the agreed secret only ever live inside the types below,
//! which wipe themselves on drop and never print their contents.

use crate::Result;
use zeroize::Zeroize;

/// Named groups usable in a key share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyExchangeAlgorithm {
    /// Curve25519, 32-byte shares
    X25519,
    /// NIST P-256, uncompressed SEC1 points
    Secp256r1,
    /// NIST P-384, uncompressed SEC1 points
    Secp384r1,
}

// (group, codepoint, public share length, shared secret length)
const GROUPS: [(KeyExchangeAlgorithm, u16, usize, usize); 3] = [
    (KeyExchangeAlgorithm::X25519, 0x001D, 32, 32),
    (KeyExchangeAlgorithm::Secp256r1, 0x0017, 65, 32),
    (KeyExchangeAlgorithm::Secp384r1, 0x0018, 97, 48),
];

impl KeyExchangeAlgorithm {
    const fn params(self) -> (u16, usize, usize) {
        let (_, code, public, shared) = GROUPS[self as usize];
        (code, public, shared)
    }

    /// Length of a `key_share` entry's key_exchange field.
    pub const fn public_key_size(self) -> usize {
        self.params().1
    }

    /// Length of the agreed secret fed into HKDF-Extract.
    pub const fn shared_secret_size(self) -> usize {
        self.params().2
    }

    /// `NamedGroup` codepoint.
    pub const fn to_u16(self) -> u16 {
        self.params().0
    }

    /// `None` for groups this crate does not implement.
    pub fn from_u16(value: u16) -> Option<Self> {
        GROUPS
            .iter()
            .find(|(_, code, _, _)| *code == value)
            .map(|(group, _, _, _)| *group)
    }

    /// Lowercase IANA name, used in logs.
    pub const fn name(self) -> &'static str {
        match self {
            KeyExchangeAlgorithm::X25519 => "x25519",
            KeyExchangeAlgorithm::Secp256r1 => "secp256r1",
            KeyExchangeAlgorithm::Secp384r1 => "secp384r1",
        }
    }
}

macro_rules! secret_bytes {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Zeroize)]
        #[zeroize(drop)]
        pub struct $name {
            bytes: Vec<u8>,
        }

        impl $name {
            /// Take ownership of raw key bytes.
            pub fn from_bytes(bytes: Vec<u8>) -> Self {
                Self { bytes }
            }

            /// Borrow the raw bytes.
            pub fn as_bytes(&self) -> &[u8] {
                &self.bytes
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({} bytes, redacted)", stringify!($name), self.bytes.len())
            }
        }
    };
}

secret_bytes!(
    /// Our half of an ephemeral key pair, in the backend's encoding.
    PrivateKey
);

secret_bytes!(
    /// Output of the agreement, before it enters the key schedule.
    SharedSecret
);

/// Our public share, encoded as it goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    bytes: Vec<u8>,
}

impl PublicKey {
    /// Wrap an encoded share.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Encoded share.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encoded share, by value.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// One group's ephemeral agreement.
///
/// ```rust,ignore
/// let (ours, share) = kex.generate_keypair()?;
/// // send `share`, receive the peer's
/// let secret = kex.exchange(&ours, &peer_share)?;
/// ```
pub trait KeyExchange: Send + Sync {
    /// Fresh key pair for a single handshake.
    fn generate_keypair(&self) -> Result<(PrivateKey, PublicKey)>;

    /// Combine our private key with the peer's encoded share. A share that
    /// does not decode gives `InvalidPublicKey`; a degenerate result such as
    /// an all-zero X25519 output gives `KeyExchangeFailed`.
    fn exchange(&self, private_key: &PrivateKey, peer_public_key: &[u8]) -> Result<SharedSecret>;

    /// Group implemented by this instance.
    fn algorithm(&self) -> KeyExchangeAlgorithm;
}
