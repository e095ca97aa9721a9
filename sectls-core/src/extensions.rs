//! TLS extensions implementation.
//!
//! Extensions are kept as raw `(type, data)` pairs; typed accessors encode
//! and decode the bodies this crate understands. Unknown extension types are
//! carried through untouched.

use crate::codec::{put_vec_u16, put_vec_u8, Reader};
use crate::error::{Error, Result};
use crate::protocol::{ExtensionType, ProtocolVersion};
use bytes::{BufMut, BytesMut};

/// TLS extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    /// Raw extension type
    pub extension_type: u16,

    /// Extension data
    pub data: Vec<u8>,
}

impl Extension {
    /// Create a new extension.
    pub fn new(extension_type: ExtensionType, data: Vec<u8>) -> Self {
        Self {
            extension_type: extension_type.to_u16(),
            data,
        }
    }

    /// Known extension type, if any.
    pub fn known_type(&self) -> Option<ExtensionType> {
        ExtensionType::from_u16(self.extension_type)
    }
}

/// One `KeyShareEntry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyShareEntry {
    /// Named group
    pub group: u16,
    /// Public value
    pub key_exchange: Vec<u8>,
}

/// PSK key exchange modes (RFC 8446 Section 4.2.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PskKeyExchangeMode {
    /// PSK-only key establishment
    PskKe = 0,
    /// PSK with (EC)DHE key establishment
    PskDheKe = 1,
}

impl PskKeyExchangeMode {
    /// Convert from wire format (u8).
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PskKeyExchangeMode::PskKe),
            1 => Some(PskKeyExchangeMode::PskDheKe),
            _ => None,
        }
    }
}

/// Ordered extension block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions {
    extensions: Vec<Extension>,
}

impl Extensions {
    /// Create an empty extension list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an extension, replacing any existing one of the same type.
    pub fn add(&mut self, extension: Extension) {
        self.extensions
            .retain(|e| e.extension_type != extension.extension_type);
        self.extensions.push(extension);
    }

    /// Get an extension by type.
    pub fn get(&self, ext_type: ExtensionType) -> Option<&Extension> {
        self.extensions
            .iter()
            .find(|e| e.extension_type == ext_type.to_u16())
    }

    /// Check if an extension is present.
    pub fn has(&self, ext_type: ExtensionType) -> bool {
        self.get(ext_type).is_some()
    }

    /// Remove an extension.
    pub fn remove(&mut self, ext_type: ExtensionType) {
        self.extensions
            .retain(|e| e.extension_type != ext_type.to_u16());
    }

    /// All extensions in order.
    pub fn iter(&self) -> impl Iterator<Item = &Extension> {
        self.extensions.iter()
    }

    /// Whether the last extension is of `ext_type`.
    pub fn is_last(&self, ext_type: ExtensionType) -> bool {
        self.extensions
            .last()
            .map_or(false, |e| e.extension_type == ext_type.to_u16())
    }

    /// Number of extensions.
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// Whether there are no extensions.
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Encode as `Extension extensions<0..2^16-1>`.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut inner = BytesMut::new();
        for ext in &self.extensions {
            inner.put_u16(ext.extension_type);
            put_vec_u16(&mut inner, &ext.data)?;
        }
        put_vec_u16(buf, &inner)
    }

    /// Decode an extension block. A repeated type is an illegal parameter.
    pub fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let mut r = Reader::new(reader.vec_u16("extensions")?);
        let mut extensions: Vec<Extension> = Vec::new();
        while !r.is_empty() {
            let extension_type = r.u16("extension type")?;
            let data = r.vec_u16("extension data")?.to_vec();
            if extensions.iter().any(|e| e.extension_type == extension_type) {
                return Err(Error::IllegalParameter(format!(
                    "duplicate extension {}",
                    extension_type
                )));
            }
            extensions.push(Extension {
                extension_type,
                data,
            });
        }
        Ok(Self { extensions })
    }

    fn body(&self, ext_type: ExtensionType) -> Option<Reader<'_>> {
        self.get(ext_type).map(|e| Reader::new(&e.data))
    }

    // supported_versions

    /// Client form: list of versions.
    pub fn add_supported_versions(&mut self, versions: &[ProtocolVersion]) -> Result<()> {
        let mut list = BytesMut::new();
        for v in versions {
            list.put_u16(v.to_u16());
        }
        let mut buf = BytesMut::new();
        put_vec_u8(&mut buf, &list)?;
        self.add(Extension::new(ExtensionType::SupportedVersions, buf.to_vec()));
        Ok(())
    }

    /// Client form: raw version codes offered.
    pub fn supported_versions(&self) -> Result<Option<Vec<u16>>> {
        let Some(mut r) = self.body(ExtensionType::SupportedVersions) else {
            return Ok(None);
        };
        let mut list = Reader::new(r.vec_u8("supported_versions")?);
        r.finish("supported_versions")?;
        let mut versions = Vec::new();
        while !list.is_empty() {
            versions.push(list.u16("version")?);
        }
        Ok(Some(versions))
    }

    /// Server form: the selected version.
    pub fn add_selected_version(&mut self, version: ProtocolVersion) {
        self.add(Extension::new(
            ExtensionType::SupportedVersions,
            version.to_u16().to_be_bytes().to_vec(),
        ));
    }

    /// Server form: the selected version.
    pub fn selected_version(&self) -> Result<Option<u16>> {
        let Some(mut r) = self.body(ExtensionType::SupportedVersions) else {
            return Ok(None);
        };
        let v = r.u16("selected_version")?;
        r.finish("selected_version")?;
        Ok(Some(v))
    }

    // supported_groups / signature_algorithms

    fn add_u16_list(&mut self, ext_type: ExtensionType, values: &[u16]) -> Result<()> {
        let mut list = BytesMut::new();
        for v in values {
            list.put_u16(*v);
        }
        let mut buf = BytesMut::new();
        put_vec_u16(&mut buf, &list)?;
        self.add(Extension::new(ext_type, buf.to_vec()));
        Ok(())
    }

    fn u16_list(&self, ext_type: ExtensionType, what: &str) -> Result<Option<Vec<u16>>> {
        let Some(mut r) = self.body(ext_type) else {
            return Ok(None);
        };
        let raw = r.vec_u16(what)?;
        r.finish(what)?;
        if raw.len() % 2 != 0 || raw.is_empty() {
            return Err(Error::Decode(format!("{} length", what)));
        }
        let mut list = Reader::new(raw);
        let mut values = Vec::with_capacity(raw.len() / 2);
        while !list.is_empty() {
            values.push(list.u16(what)?);
        }
        Ok(Some(values))
    }

    /// Named groups the client supports.
    pub fn add_supported_groups(&mut self, groups: &[u16]) -> Result<()> {
        self.add_u16_list(ExtensionType::SupportedGroups, groups)
    }

    /// Named groups the client supports.
    pub fn supported_groups(&self) -> Result<Option<Vec<u16>>> {
        self.u16_list(ExtensionType::SupportedGroups, "supported_groups")
    }

    /// Signature schemes accepted by the sender.
    pub fn add_signature_algorithms(&mut self, schemes: &[u16]) -> Result<()> {
        self.add_u16_list(ExtensionType::SignatureAlgorithms, schemes)
    }

    /// Signature schemes accepted by the sender.
    pub fn signature_algorithms(&self) -> Result<Option<Vec<u16>>> {
        self.u16_list(ExtensionType::SignatureAlgorithms, "signature_algorithms")
    }

    // key_share

    /// ClientHello form: list of shares.
    pub fn add_client_key_shares(&mut self, shares: &[KeyShareEntry]) -> Result<()> {
        let mut list = BytesMut::new();
        for share in shares {
            list.put_u16(share.group);
            put_vec_u16(&mut list, &share.key_exchange)?;
        }
        let mut buf = BytesMut::new();
        put_vec_u16(&mut buf, &list)?;
        self.add(Extension::new(ExtensionType::KeyShare, buf.to_vec()));
        Ok(())
    }

    /// ClientHello form. Each group may appear once.
    pub fn client_key_shares(&self) -> Result<Option<Vec<KeyShareEntry>>> {
        let Some(mut r) = self.body(ExtensionType::KeyShare) else {
            return Ok(None);
        };
        let mut list = Reader::new(r.vec_u16("key_share")?);
        r.finish("key_share")?;
        let mut shares: Vec<KeyShareEntry> = Vec::new();
        while !list.is_empty() {
            let group = list.u16("key_share group")?;
            let key_exchange = list.vec_u16("key_exchange")?.to_vec();
            if key_exchange.is_empty() {
                return Err(Error::Decode("empty key share".into()));
            }
            if shares.iter().any(|s| s.group == group) {
                return Err(Error::IllegalParameter("duplicate key share group".into()));
            }
            shares.push(KeyShareEntry {
                group,
                key_exchange,
            });
        }
        Ok(Some(shares))
    }

    /// ServerHello form: the single selected share.
    pub fn add_server_key_share(&mut self, share: &KeyShareEntry) -> Result<()> {
        let mut buf = BytesMut::new();
        buf.put_u16(share.group);
        put_vec_u16(&mut buf, &share.key_exchange)?;
        self.add(Extension::new(ExtensionType::KeyShare, buf.to_vec()));
        Ok(())
    }

    /// ServerHello form.
    pub fn server_key_share(&self) -> Result<Option<KeyShareEntry>> {
        let Some(mut r) = self.body(ExtensionType::KeyShare) else {
            return Ok(None);
        };
        let group = r.u16("key_share group")?;
        let key_exchange = r.vec_u16("key_exchange")?.to_vec();
        r.finish("key_share")?;
        Ok(Some(KeyShareEntry {
            group,
            key_exchange,
        }))
    }

    /// HelloRetryRequest form: the group the client should use.
    pub fn add_selected_group(&mut self, group: u16) {
        self.add(Extension::new(
            ExtensionType::KeyShare,
            group.to_be_bytes().to_vec(),
        ));
    }

    /// HelloRetryRequest form.
    pub fn selected_group(&self) -> Result<Option<u16>> {
        let Some(mut r) = self.body(ExtensionType::KeyShare) else {
            return Ok(None);
        };
        let group = r.u16("selected_group")?;
        r.finish("selected_group")?;
        Ok(Some(group))
    }

    // server_name

    /// SNI with a single host_name entry.
    pub fn add_server_name(&mut self, host: &str) -> Result<()> {
        let mut entry = BytesMut::new();
        entry.put_u8(0);
        put_vec_u16(&mut entry, host.as_bytes())?;
        let mut buf = BytesMut::new();
        put_vec_u16(&mut buf, &entry)?;
        self.add(Extension::new(ExtensionType::ServerName, buf.to_vec()));
        Ok(())
    }

    /// First host_name entry of the SNI extension.
    pub fn server_name(&self) -> Result<Option<String>> {
        let Some(mut r) = self.body(ExtensionType::ServerName) else {
            return Ok(None);
        };
        let mut list = Reader::new(r.vec_u16("server_name_list")?);
        r.finish("server_name")?;
        while !list.is_empty() {
            let name_type = list.u8("name_type")?;
            let name = list.vec_u16("host_name")?;
            if name_type == 0 {
                let host = std::str::from_utf8(name)
                    .map_err(|_| Error::Decode("server name is not UTF-8".into()))?;
                return Ok(Some(host.to_string()));
            }
        }
        Ok(None)
    }

    /// Empty SNI acknowledgement in EncryptedExtensions.
    pub fn add_server_name_ack(&mut self) {
        self.add(Extension::new(ExtensionType::ServerName, Vec::new()));
    }

    // application_layer_protocol_negotiation

    /// ALPN protocol list.
    pub fn add_alpn(&mut self, protocols: &[Vec<u8>]) -> Result<()> {
        let mut list = BytesMut::new();
        for p in protocols {
            if p.is_empty() {
                return Err(Error::InvalidConfig("empty ALPN protocol".into()));
            }
            put_vec_u8(&mut list, p)?;
        }
        let mut buf = BytesMut::new();
        put_vec_u16(&mut buf, &list)?;
        self.add(Extension::new(
            ExtensionType::ApplicationLayerProtocolNegotiation,
            buf.to_vec(),
        ));
        Ok(())
    }

    /// ALPN protocol list.
    pub fn alpn(&self) -> Result<Option<Vec<Vec<u8>>>> {
        let Some(mut r) = self.body(ExtensionType::ApplicationLayerProtocolNegotiation) else {
            return Ok(None);
        };
        let mut list = Reader::new(r.vec_u16("alpn")?);
        r.finish("alpn")?;
        let mut protocols = Vec::new();
        while !list.is_empty() {
            let p = list.vec_u8("alpn protocol")?;
            if p.is_empty() {
                return Err(Error::Decode("empty ALPN protocol".into()));
            }
            protocols.push(p.to_vec());
        }
        if protocols.is_empty() {
            return Err(Error::Decode("empty ALPN list".into()));
        }
        Ok(Some(protocols))
    }

    // psk_key_exchange_modes

    /// PSK key exchange modes.
    pub fn add_psk_modes(&mut self, modes: &[PskKeyExchangeMode]) -> Result<()> {
        let raw: Vec<u8> = modes.iter().map(|m| *m as u8).collect();
        let mut buf = BytesMut::new();
        put_vec_u8(&mut buf, &raw)?;
        self.add(Extension::new(ExtensionType::PskKeyExchangeModes, buf.to_vec()));
        Ok(())
    }

    /// PSK key exchange modes; unknown values are skipped.
    pub fn psk_modes(&self) -> Result<Option<Vec<PskKeyExchangeMode>>> {
        let Some(mut r) = self.body(ExtensionType::PskKeyExchangeModes) else {
            return Ok(None);
        };
        let raw = r.vec_u8("psk_key_exchange_modes")?;
        r.finish("psk_key_exchange_modes")?;
        Ok(Some(
            raw.iter()
                .filter_map(|m| PskKeyExchangeMode::from_u8(*m))
                .collect(),
        ))
    }

    // early_data

    /// Empty early_data indication (ClientHello, EncryptedExtensions).
    pub fn add_early_data(&mut self) {
        self.add(Extension::new(ExtensionType::EarlyData, Vec::new()));
    }

    /// NewSessionTicket form.
    pub fn add_max_early_data(&mut self, max: u32) {
        self.add(Extension::new(
            ExtensionType::EarlyData,
            max.to_be_bytes().to_vec(),
        ));
    }

    /// NewSessionTicket form.
    pub fn max_early_data(&self) -> Result<Option<u32>> {
        let Some(mut r) = self.body(ExtensionType::EarlyData) else {
            return Ok(None);
        };
        let max = r.u32("max_early_data_size")?;
        r.finish("early_data")?;
        Ok(Some(max))
    }

    // cookie

    /// Retry cookie.
    pub fn add_cookie(&mut self, cookie: &[u8]) -> Result<()> {
        let mut buf = BytesMut::new();
        put_vec_u16(&mut buf, cookie)?;
        self.add(Extension::new(ExtensionType::Cookie, buf.to_vec()));
        Ok(())
    }

    /// Retry cookie.
    pub fn cookie(&self) -> Result<Option<Vec<u8>>> {
        let Some(mut r) = self.body(ExtensionType::Cookie) else {
            return Ok(None);
        };
        let cookie = r.vec_u16("cookie")?.to_vec();
        r.finish("cookie")?;
        if cookie.is_empty() {
            return Err(Error::Decode("empty cookie".into()));
        }
        Ok(Some(cookie))
    }

    // post_handshake_auth

    /// Client willingness to do post-handshake authentication.
    pub fn add_post_handshake_auth(&mut self) {
        self.add(Extension::new(ExtensionType::PostHandshakeAuth, Vec::new()));
    }
}
