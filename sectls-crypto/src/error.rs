//! Failures reported by a crypto provider.
//!
//! The handshake maps these onto its own error type. Everything except
//! [`Error::Pending`] ends the connection; `Pending` only says the backend
//! has not answered yet.

use std::fmt;

/// Provider result.
pub type Result<T> = std::result::Result<T, Error>;

/// A provider-level failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // Caller handed in something the algorithm cannot use.
    /// The provider has no implementation of this algorithm.
    UnsupportedAlgorithm(String),

    /// Key material of the wrong length.
    InvalidKeySize {
        /// Length the algorithm needs
        expected: usize,
        /// Length supplied
        actual: usize,
    },

    /// AEAD nonce of the wrong length.
    InvalidNonceSize {
        /// Length the algorithm needs
        expected: usize,
        /// Length supplied
        actual: usize,
    },

    /// An output or input length outside the algorithm's range, such as an
    /// HKDF expansion longer than 255 hash blocks.
    InvalidLength,

    /// Peer public key that does not decode or lies outside the group.
    InvalidPublicKey,

    /// Local signing or key-exchange key that does not decode.
    InvalidPrivateKey,

    // Checks that ran and said no.
    /// AEAD tag mismatch.
    AuthenticationFailed,

    /// Signature does not verify under the given key.
    SignatureVerificationFailed,

    /// Shared secret could not be derived, e.g. an all-zero X25519 output.
    KeyExchangeFailed,

    // Backend trouble.
    /// The entropy source failed.
    RandomGenerationFailed,

    /// The backend accepted the request but has no result yet. Repeat the
    /// identical call later.
    Pending,

    /// Backend failure with its own description.
    CryptoError(String),

    /// Broken invariant inside the provider.
    Internal(String),
}

impl Error {
    /// True only for [`Error::Pending`].
    pub fn is_pending(&self) -> bool {
        matches!(self, Error::Pending)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnsupportedAlgorithm(name) => write!(f, "unsupported algorithm {}", name),
            Error::InvalidKeySize { expected, actual } => {
                write!(f, "key is {} bytes, algorithm needs {}", actual, expected)
            },
            Error::InvalidNonceSize { expected, actual } => {
                write!(f, "nonce is {} bytes, algorithm needs {}", actual, expected)
            },
            Error::InvalidLength => write!(f, "length out of range"),
            Error::InvalidPublicKey => write!(f, "malformed public key"),
            Error::InvalidPrivateKey => write!(f, "malformed private key"),
            Error::AuthenticationFailed => write!(f, "AEAD tag mismatch"),
            Error::SignatureVerificationFailed => write!(f, "bad signature"),
            Error::KeyExchangeFailed => write!(f, "key exchange produced no secret"),
            Error::RandomGenerationFailed => write!(f, "entropy source failed"),
            Error::Pending => write!(f, "provider operation still pending"),
            Error::CryptoError(msg) => write!(f, "provider: {}", msg),
            Error::Internal(msg) => write!(f, "provider invariant broken: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
