//! Link Protocol Types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle role of the connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Idle,
    Listening,
    Connecting,
    Connected,
}

impl Role {
    /// Whether an inbound or dialed link may still be installed in this role
    pub fn accepts_link(&self) -> bool {
        matches!(self, Role::Listening | Role::Connecting)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Idle => "idle",
            Role::Listening => "listening",
            Role::Connecting => "connecting",
            Role::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Socket variant a service is advertised under
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantKind {
    Secure,
    Insecure,
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariantKind::Secure => f.write_str("secure"),
            VariantKind::Insecure => f.write_str("insecure"),
        }
    }
}

impl FromStr for VariantKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "secure" => Ok(VariantKind::Secure),
            "insecure" => Ok(VariantKind::Insecure),
            other => Err(format!("unknown service variant '{}'", other)),
        }
    }
}

/// A named service record: the variant tag plus its well-known identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceVariant {
    pub kind: VariantKind,
    pub name: String,
    pub uuid: Uuid,
}

/// Opaque address of a remote peer, as understood by the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(addr: &str) -> Self {
        Self::new(addr)
    }
}

impl From<String> for PeerAddress {
    fn from(addr: String) -> Self {
        Self(addr)
    }
}

/// Identity of the peer on the other end of a link, used for reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub address: PeerAddress,
    pub name: Option<String>,
}

impl PeerInfo {
    pub fn new(address: impl Into<PeerAddress>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name shown to the application; falls back to the address
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.address.to_string())
    }
}
