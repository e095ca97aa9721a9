//! TLS protocol constants and types.

/// TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum ProtocolVersion {
    /// TLS 1.0 (0x0301), only ever seen as the legacy record version of a
    /// first ClientHello.
    Tls10 = 0x0301,

    /// TLS 1.2 (0x0303), the frozen `legacy_version` of TLS 1.3.
    Tls12 = 0x0303,

    /// TLS 1.3 (0x0304)
    Tls13 = 0x0304,
}

impl ProtocolVersion {
    /// Convert from wire format (u16).
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0301 => Some(ProtocolVersion::Tls10),
            0x0303 => Some(ProtocolVersion::Tls12),
            0x0304 => Some(ProtocolVersion::Tls13),
            _ => None,
        }
    }

    /// Convert to wire format (u16).
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Human readable name.
    pub const fn name(self) -> &'static str {
        match self {
            ProtocolVersion::Tls10 => "TLS 1.0",
            ProtocolVersion::Tls12 => "TLS 1.2",
            ProtocolVersion::Tls13 => "TLS 1.3",
        }
    }
}

/// TLS record content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ContentType {
    /// Invalid (0), never valid on the wire
    Invalid = 0,

    /// Change Cipher Spec (20), middlebox compatibility only
    ChangeCipherSpec = 20,

    /// Alert (21)
    Alert = 21,

    /// Handshake (22)
    Handshake = 22,

    /// Application Data (23)
    ApplicationData = 23,
}

impl ContentType {
    /// Convert from wire format (u8).
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ContentType::Invalid),
            20 => Some(ContentType::ChangeCipherSpec),
            21 => Some(ContentType::Alert),
            22 => Some(ContentType::Handshake),
            23 => Some(ContentType::ApplicationData),
            _ => None,
        }
    }

    /// Convert to wire format (u8).
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether this type may appear inside a protected record.
    pub const fn is_valid_inner(self) -> bool {
        matches!(
            self,
            ContentType::Alert | ContentType::Handshake | ContentType::ApplicationData
        )
    }
}

/// Handshake message types used by TLS 1.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum HandshakeType {
    /// ClientHello (1)
    ClientHello = 1,

    /// ServerHello (2), also carries HelloRetryRequest
    ServerHello = 2,

    /// NewSessionTicket (4)
    NewSessionTicket = 4,

    /// EndOfEarlyData (5)
    EndOfEarlyData = 5,

    /// EncryptedExtensions (8)
    EncryptedExtensions = 8,

    /// Certificate (11)
    Certificate = 11,

    /// CertificateRequest (13)
    CertificateRequest = 13,

    /// CertificateVerify (15)
    CertificateVerify = 15,

    /// Finished (20)
    Finished = 20,

    /// KeyUpdate (24)
    KeyUpdate = 24,

    /// Synthetic message_hash (254) used in the transcript after
    /// HelloRetryRequest. Never sent on the wire.
    MessageHash = 254,
}

impl HandshakeType {
    /// Convert from wire format (u8).
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(HandshakeType::ClientHello),
            2 => Some(HandshakeType::ServerHello),
            4 => Some(HandshakeType::NewSessionTicket),
            5 => Some(HandshakeType::EndOfEarlyData),
            8 => Some(HandshakeType::EncryptedExtensions),
            11 => Some(HandshakeType::Certificate),
            13 => Some(HandshakeType::CertificateRequest),
            15 => Some(HandshakeType::CertificateVerify),
            20 => Some(HandshakeType::Finished),
            24 => Some(HandshakeType::KeyUpdate),
            254 => Some(HandshakeType::MessageHash),
            _ => None,
        }
    }

    /// Convert to wire format (u8).
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether a peer may legitimately send this type.
    pub const fn is_wire_type(self) -> bool {
        !matches!(self, HandshakeType::MessageHash)
    }
}

/// TLS extension types (RFC 8446 Section 4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum ExtensionType {
    /// Server Name Indication (0)
    ServerName = 0,

    /// Supported Groups (10)
    SupportedGroups = 10,

    /// Signature Algorithms (13)
    SignatureAlgorithms = 13,

    /// Application-Layer Protocol Negotiation (16)
    ApplicationLayerProtocolNegotiation = 16,

    /// Pre-Shared Key (41)
    PreSharedKey = 41,

    /// Early Data (42)
    EarlyData = 42,

    /// Supported Versions (43)
    SupportedVersions = 43,

    /// Cookie (44)
    Cookie = 44,

    /// PSK Key Exchange Modes (45)
    PskKeyExchangeModes = 45,

    /// Post-Handshake Authentication (49)
    PostHandshakeAuth = 49,

    /// Key Share (51)
    KeyShare = 51,
}

impl ExtensionType {
    /// Convert from wire format (u16).
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(ExtensionType::ServerName),
            10 => Some(ExtensionType::SupportedGroups),
            13 => Some(ExtensionType::SignatureAlgorithms),
            16 => Some(ExtensionType::ApplicationLayerProtocolNegotiation),
            41 => Some(ExtensionType::PreSharedKey),
            42 => Some(ExtensionType::EarlyData),
            43 => Some(ExtensionType::SupportedVersions),
            44 => Some(ExtensionType::Cookie),
            45 => Some(ExtensionType::PskKeyExchangeModes),
            49 => Some(ExtensionType::PostHandshakeAuth),
            51 => Some(ExtensionType::KeyShare),
            _ => None,
        }
    }

    /// Convert to wire format (u16).
    pub const fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Maximum plaintext fragment length (2^14).
pub const MAX_FRAGMENT_LENGTH: usize = 16384;

/// Maximum ciphertext record payload (2^14 + 256).
pub const MAX_CIPHERTEXT_LENGTH: usize = MAX_FRAGMENT_LENGTH + 256;

/// Size of the record header.
pub const RECORD_HEADER_LEN: usize = 5;

/// Size of the handshake message header.
pub const HANDSHAKE_HEADER_LEN: usize = 4;

/// Special ServerHello.random value that marks a HelloRetryRequest
/// (SHA-256 of "HelloRetryRequest").
pub const HELLO_RETRY_REQUEST_RANDOM: [u8; 32] = [
    0xCF, 0x21, 0xAD, 0x74, 0xE5, 0x9A, 0x61, 0x11, 0xBE, 0x1D, 0x8C, 0x02, 0x1E, 0x65, 0xB8,
    0x91, 0xC2, 0xA2, 0x11, 0x16, 0x7A, 0xBB, 0x8C, 0x5E, 0x07, 0x9E, 0x09, 0xE2, 0xC8, 0xA8,
    0x33, 0x9C,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version_conversion() {
        assert_eq!(
            ProtocolVersion::from_u16(0x0304),
            Some(ProtocolVersion::Tls13)
        );
        assert_eq!(ProtocolVersion::from_u16(0x0302), None);
        assert_eq!(ProtocolVersion::Tls13.to_u16(), 0x0304);
        assert_eq!(ProtocolVersion::Tls13.name(), "TLS 1.3");
    }

    #[test]
    fn test_content_type_conversion() {
        assert_eq!(ContentType::from_u8(22), Some(ContentType::Handshake));
        assert_eq!(ContentType::from_u8(26), None);
        assert!(ContentType::ApplicationData.is_valid_inner());
        assert!(!ContentType::ChangeCipherSpec.is_valid_inner());
    }

    #[test]
    fn test_handshake_type_conversion() {
        assert_eq!(HandshakeType::from_u8(24), Some(HandshakeType::KeyUpdate));
        assert_eq!(HandshakeType::from_u8(12), None);
        assert!(!HandshakeType::MessageHash.is_wire_type());
        assert_eq!(HandshakeType::EndOfEarlyData.to_u8(), 5);
    }

    #[test]
    fn test_extension_type_conversion() {
        assert_eq!(ExtensionType::from_u16(51), Some(ExtensionType::KeyShare));
        assert_eq!(ExtensionType::from_u16(0xFE0D), None);
    }

    #[test]
    fn test_record_limits() {
        assert_eq!(MAX_CIPHERTEXT_LENGTH, 16640);
    }
}
