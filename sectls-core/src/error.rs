//! Error types for SecTLS core.
//!
//! Every failure carries enough information to pick the alert that goes on
//! the wire ([`Error::alert`]) and a coarse [`ErrorKind`] for callers that
//! only need to branch on the category.

use core::fmt;

/// Result type for SecTLS operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors that can occur in SecTLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Handshake framing violated a length rule (over-append, short
    /// completion, interleaved messages, data across a key change).
    BufferError(String),

    /// A handshake message declared a length above the configured maximum.
    HandshakeSizeError {
        /// Declared body length
        declared: usize,
        /// Configured maximum
        max: usize,
    },

    /// A record exceeded the plaintext or ciphertext size limit.
    RecordOverflow(usize),

    /// Malformed message contents.
    Decode(String),

    /// A message arrived before one of its required predecessors.
    OutOfOrder(u8),

    /// A once-only message arrived a second time.
    DuplicateMessage(u8),

    /// The message type is never valid for this role or phase.
    SanityMessage(u8),

    /// The message is well-formed but not acceptable in the current state.
    UnexpectedMessage(String),

    /// Finished verify_data did not match.
    VerifyMac,

    /// PSK binder did not match.
    BadBinder,

    /// CertificateVerify signature did not verify.
    BadSignature,

    /// HelloRetryRequest cookie failed integrity or format checks.
    HrrCookieError(String),

    /// Record authentication failed.
    BadRecordMac,

    /// No acceptable parameters could be negotiated.
    HandshakeFailure(String),

    /// A field held a value the protocol forbids.
    IllegalParameter(String),

    /// A mandatory extension was absent.
    MissingExtension(String),

    /// The peer does not speak TLS 1.3.
    ProtocolVersion,

    /// A client certificate was required but not supplied.
    CertificateRequired,

    /// The certificate validator rejected the peer chain.
    BadCertificate(String),

    /// The record sequence number space is exhausted.
    SequenceExhausted,

    /// The peer sent more early data than permitted.
    EarlyDataLimit,

    /// Internal invariant violated.
    InternalError(String),

    /// Error reported by the crypto provider.
    Crypto(sectls_crypto::Error),

    /// The peer sent a fatal alert.
    AlertReceived(AlertDescription),

    /// The connection is closed.
    ConnectionClosed,

    /// Invalid configuration.
    InvalidConfig(String),

    /// The API was called in a state that does not allow it. The connection
    /// is left unchanged.
    InvalidState(String),

    /// A provider operation has not finished. Converted into
    /// `Progress::Pending` before it reaches the caller.
    #[doc(hidden)]
    Pending,
}

/// Coarse category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Framing and length violations
    Framing,
    /// Message order or duplication violations
    ProtocolOrder,
    /// MAC, binder, signature, cookie or certificate verification failures
    Verification,
    /// Parameter negotiation failures
    Negotiation,
    /// Resource exhaustion and internal errors
    Internal,
    /// Peer-initiated termination
    Peer,
    /// API misuse
    Usage,
}

impl Error {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BufferError(_)
            | Error::HandshakeSizeError { .. }
            | Error::RecordOverflow(_)
            | Error::Decode(_) => ErrorKind::Framing,
            Error::OutOfOrder(_)
            | Error::DuplicateMessage(_)
            | Error::SanityMessage(_)
            | Error::UnexpectedMessage(_) => ErrorKind::ProtocolOrder,
            Error::VerifyMac
            | Error::BadBinder
            | Error::BadSignature
            | Error::HrrCookieError(_)
            | Error::BadRecordMac
            | Error::CertificateRequired
            | Error::BadCertificate(_) => ErrorKind::Verification,
            Error::HandshakeFailure(_)
            | Error::IllegalParameter(_)
            | Error::MissingExtension(_)
            | Error::ProtocolVersion => ErrorKind::Negotiation,
            Error::SequenceExhausted
            | Error::EarlyDataLimit
            | Error::InternalError(_)
            | Error::Crypto(_)
            | Error::Pending => ErrorKind::Internal,
            Error::AlertReceived(_) | Error::ConnectionClosed => ErrorKind::Peer,
            Error::InvalidConfig(_) | Error::InvalidState(_) => ErrorKind::Usage,
        }
    }

    /// Alert to send to the peer, if any.
    ///
    /// Verification failures other than record authentication share
    /// `illegal_parameter` so the peer cannot tell which check failed.
    pub fn alert(&self) -> Option<AlertDescription> {
        let description = match self {
            Error::BufferError(_) | Error::HandshakeSizeError { .. } | Error::Decode(_) => {
                AlertDescription::DecodeError
            },
            Error::RecordOverflow(_) => AlertDescription::RecordOverflow,
            Error::OutOfOrder(_)
            | Error::DuplicateMessage(_)
            | Error::SanityMessage(_)
            | Error::UnexpectedMessage(_)
            | Error::EarlyDataLimit => AlertDescription::UnexpectedMessage,
            Error::VerifyMac | Error::BadBinder | Error::BadSignature | Error::HrrCookieError(_) => {
                AlertDescription::IllegalParameter
            },
            Error::BadRecordMac => AlertDescription::BadRecordMac,
            Error::HandshakeFailure(_) => AlertDescription::HandshakeFailure,
            Error::IllegalParameter(_) => AlertDescription::IllegalParameter,
            Error::MissingExtension(_) => AlertDescription::MissingExtension,
            Error::ProtocolVersion => AlertDescription::ProtocolVersion,
            Error::CertificateRequired => AlertDescription::CertificateRequired,
            Error::BadCertificate(_) => AlertDescription::BadCertificate,
            Error::SequenceExhausted | Error::InternalError(_) | Error::Crypto(_) => {
                AlertDescription::InternalError
            },
            Error::AlertReceived(_)
            | Error::ConnectionClosed
            | Error::InvalidConfig(_)
            | Error::InvalidState(_)
            | Error::Pending => return None,
        };
        Some(description)
    }

    /// Whether the error terminates the connection.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::InvalidConfig(_) | Error::InvalidState(_) | Error::Pending
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BufferError(msg) => write!(f, "Handshake buffer error: {}", msg),
            Error::HandshakeSizeError { declared, max } => write!(
                f,
                "Handshake message of {} bytes exceeds limit of {}",
                declared, max
            ),
            Error::RecordOverflow(len) => write!(f, "Record of {} bytes too large", len),
            Error::Decode(msg) => write!(f, "Decode error: {}", msg),
            Error::OutOfOrder(t) => write!(f, "Handshake message {} out of order", t),
            Error::DuplicateMessage(t) => write!(f, "Duplicate handshake message {}", t),
            Error::SanityMessage(t) => write!(f, "Handshake message {} not valid here", t),
            Error::UnexpectedMessage(msg) => write!(f, "Unexpected message: {}", msg),
            Error::VerifyMac => write!(f, "Finished verification failed"),
            Error::BadBinder => write!(f, "PSK binder verification failed"),
            Error::BadSignature => write!(f, "CertificateVerify signature invalid"),
            Error::HrrCookieError(msg) => write!(f, "Retry cookie rejected: {}", msg),
            Error::BadRecordMac => write!(f, "Record authentication failed"),
            Error::HandshakeFailure(msg) => write!(f, "Handshake failure: {}", msg),
            Error::IllegalParameter(msg) => write!(f, "Illegal parameter: {}", msg),
            Error::MissingExtension(msg) => write!(f, "Missing extension: {}", msg),
            Error::ProtocolVersion => write!(f, "Peer does not support TLS 1.3"),
            Error::CertificateRequired => write!(f, "Certificate required"),
            Error::BadCertificate(msg) => write!(f, "Bad certificate: {}", msg),
            Error::SequenceExhausted => write!(f, "Record sequence number exhausted"),
            Error::EarlyDataLimit => write!(f, "Early data limit exceeded"),
            Error::InternalError(msg) => write!(f, "Internal error: {}", msg),
            Error::Crypto(e) => write!(f, "Cryptographic error: {}", e),
            Error::AlertReceived(desc) => write!(f, "Alert received: {:?}", desc),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::Pending => write!(f, "Operation pending"),
        }
    }
}

impl std::error::Error for Error {}

impl From<sectls_crypto::Error> for Error {
    fn from(e: sectls_crypto::Error) -> Self {
        match e {
            sectls_crypto::Error::Pending => Error::Pending,
            other => Error::Crypto(other),
        }
    }
}

/// TLS alert descriptions (RFC 8446 Section 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AlertDescription {
    /// Close notify
    CloseNotify = 0,

    /// Unexpected message
    UnexpectedMessage = 10,

    /// Bad record MAC
    BadRecordMac = 20,

    /// Record overflow
    RecordOverflow = 22,

    /// Handshake failure
    HandshakeFailure = 40,

    /// Bad certificate
    BadCertificate = 42,

    /// Unsupported certificate
    UnsupportedCertificate = 43,

    /// Certificate expired
    CertificateExpired = 45,

    /// Certificate unknown
    CertificateUnknown = 46,

    /// Illegal parameter
    IllegalParameter = 47,

    /// Unknown CA
    UnknownCa = 48,

    /// Decode error
    DecodeError = 50,

    /// Decrypt error
    DecryptError = 51,

    /// Protocol version
    ProtocolVersion = 70,

    /// Internal error
    InternalError = 80,

    /// User canceled
    UserCanceled = 90,

    /// Missing extension
    MissingExtension = 109,

    /// Unsupported extension
    UnsupportedExtension = 110,

    /// Unknown PSK identity
    UnknownPskIdentity = 115,

    /// Certificate required
    CertificateRequired = 116,

    /// No application protocol
    NoApplicationProtocol = 120,
}

impl AlertDescription {
    /// Convert from wire format (u8).
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(AlertDescription::CloseNotify),
            10 => Some(AlertDescription::UnexpectedMessage),
            20 => Some(AlertDescription::BadRecordMac),
            22 => Some(AlertDescription::RecordOverflow),
            40 => Some(AlertDescription::HandshakeFailure),
            42 => Some(AlertDescription::BadCertificate),
            43 => Some(AlertDescription::UnsupportedCertificate),
            45 => Some(AlertDescription::CertificateExpired),
            46 => Some(AlertDescription::CertificateUnknown),
            47 => Some(AlertDescription::IllegalParameter),
            48 => Some(AlertDescription::UnknownCa),
            50 => Some(AlertDescription::DecodeError),
            51 => Some(AlertDescription::DecryptError),
            70 => Some(AlertDescription::ProtocolVersion),
            80 => Some(AlertDescription::InternalError),
            90 => Some(AlertDescription::UserCanceled),
            109 => Some(AlertDescription::MissingExtension),
            110 => Some(AlertDescription::UnsupportedExtension),
            115 => Some(AlertDescription::UnknownPskIdentity),
            116 => Some(AlertDescription::CertificateRequired),
            120 => Some(AlertDescription::NoApplicationProtocol),
            _ => None,
        }
    }

    /// Convert to wire format (u8).
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this alert is fatal.
    ///
    /// All alerts except CloseNotify and UserCanceled are fatal in TLS 1.3.
    pub const fn is_fatal(self) -> bool {
        !matches!(
            self,
            AlertDescription::CloseNotify | AlertDescription::UserCanceled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_description_conversion() {
        assert_eq!(
            AlertDescription::from_u8(0),
            Some(AlertDescription::CloseNotify)
        );
        assert_eq!(
            AlertDescription::from_u8(116),
            Some(AlertDescription::CertificateRequired)
        );
        assert_eq!(AlertDescription::from_u8(255), None);
        assert_eq!(AlertDescription::HandshakeFailure.to_u8(), 40);
    }

    #[test]
    fn test_alert_fatality() {
        assert!(!AlertDescription::CloseNotify.is_fatal());
        assert!(!AlertDescription::UserCanceled.is_fatal());
        assert!(AlertDescription::BadRecordMac.is_fatal());
    }

    #[test]
    fn test_verification_failures_share_alert() {
        for err in [
            Error::VerifyMac,
            Error::BadBinder,
            Error::BadSignature,
            Error::HrrCookieError("tag".into()),
        ] {
            assert_eq!(err.kind(), ErrorKind::Verification);
            assert_eq!(err.alert(), Some(AlertDescription::IllegalParameter));
        }
        assert_eq!(Error::BadRecordMac.alert(), Some(AlertDescription::BadRecordMac));
    }

    #[test]
    fn test_alert_mapping_table() {
        assert_eq!(
            Error::HandshakeSizeError {
                declared: 70000,
                max: 65536
            }
            .alert(),
            Some(AlertDescription::DecodeError)
        );
        assert_eq!(
            Error::RecordOverflow(20000).alert(),
            Some(AlertDescription::RecordOverflow)
        );
        assert_eq!(
            Error::DuplicateMessage(1).alert(),
            Some(AlertDescription::UnexpectedMessage)
        );
        assert_eq!(
            Error::EarlyDataLimit.alert(),
            Some(AlertDescription::UnexpectedMessage)
        );
        assert_eq!(
            Error::SequenceExhausted.alert(),
            Some(AlertDescription::InternalError)
        );
        assert_eq!(Error::ConnectionClosed.alert(), None);
        assert_eq!(Error::InvalidState("busy".into()).alert(), None);
        assert!(!Error::InvalidState("busy".into()).is_fatal());
    }

    #[test]
    fn test_pending_conversion() {
        assert_eq!(Error::from(sectls_crypto::Error::Pending), Error::Pending);
        assert_eq!(
            Error::from(sectls_crypto::Error::InvalidLength),
            Error::Crypto(sectls_crypto::Error::InvalidLength)
        );
    }
}
