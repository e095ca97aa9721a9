//! Alert records: the two-byte `level || description` payload and how a
//! received one affects the connection.
//!
//! TLS 1.3 ignores the level on receipt. Only `close_notify` and
//! `user_canceled` leave the connection usable; every other description
//! tears it down.

use crate::error::{AlertDescription, Error, Result};

/// Level byte of an alert record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AlertLevel {
    /// Sent with closure alerts
    Warning = 1,

    /// Sent with error alerts
    Fatal = 2,
}

impl AlertLevel {
    /// `None` for any byte other than 1 or 2.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(AlertLevel::Warning),
            2 => Some(AlertLevel::Fatal),
            _ => None,
        }
    }

    /// Wire byte.
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

/// What a received alert does to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerAlert {
    /// The peer will send nothing more; answer with our own close_notify.
    Closure,
    /// The peer abandoned the handshake but keeps the connection open.
    Canceled,
    /// The connection is dead.
    Fatal(AlertDescription),
}

/// One alert as carried in an alert record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    /// Level byte
    pub level: AlertLevel,
    /// Description byte
    pub description: AlertDescription,
}

impl Alert {
    /// Error alert sent before tearing the connection down.
    pub fn fatal(description: AlertDescription) -> Self {
        Self {
            level: AlertLevel::Fatal,
            description,
        }
    }

    /// Orderly shutdown of our sending side.
    pub fn close_notify() -> Self {
        Self {
            level: AlertLevel::Warning,
            description: AlertDescription::CloseNotify,
        }
    }

    /// Record payload.
    pub fn encode(&self) -> [u8; 2] {
        [self.level.to_u8(), self.description.to_u8()]
    }

    /// Parse an alert record payload, which is exactly two bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (level, description) = match data {
            [level, description] => (*level, *description),
            _ => return Err(Error::Decode(format!("alert of {} bytes", data.len()))),
        };
        Ok(Self {
            level: AlertLevel::from_u8(level)
                .ok_or_else(|| Error::Decode(format!("alert level {}", level)))?,
            description: AlertDescription::from_u8(description)
                .ok_or_else(|| Error::Decode(format!("alert description {}", description)))?,
        })
    }

    /// A fatal level or an error description makes the alert fatal.
    pub fn is_fatal(&self) -> bool {
        self.level == AlertLevel::Fatal || self.description.is_fatal()
    }

    /// Effect on the receiving side. The level is not consulted.
    pub fn classify(&self) -> PeerAlert {
        match self.description {
            AlertDescription::CloseNotify => PeerAlert::Closure,
            AlertDescription::UserCanceled => PeerAlert::Canceled,
            description => PeerAlert::Fatal(description),
        }
    }
}
