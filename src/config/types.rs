//! Configuration Types

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::{
    ServiceVariant, VariantKind, DEFAULT_FRAME_CAPACITY, INSECURE_SERVICE_NAME,
    INSECURE_SERVICE_UUID, READ_CHUNK_SIZE, SECURE_SERVICE_NAME, SECURE_SERVICE_UUID,
};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub link: LinkConfig,
    pub services: Vec<ServiceVariant>,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
}

/// Link behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LinkConfig {
    pub read_chunk_size: usize,
    pub frame_capacity: usize,
    #[serde(with = "humantime_serde")]
    pub pace_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// TCP stand-in transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    pub secure_bind: SocketAddr,
    pub insecure_bind: SocketAddr,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    /// Service record configured for `kind`
    pub fn service(&self, kind: VariantKind) -> Option<&ServiceVariant> {
        self.services.iter().find(|service| service.kind == kind)
    }

    pub fn service_mut(&mut self, kind: VariantKind) -> Option<&mut ServiceVariant> {
        self.services.iter_mut().find(|service| service.kind == kind)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            services: vec![
                ServiceVariant {
                    kind: VariantKind::Secure,
                    name: SECURE_SERVICE_NAME.to_string(),
                    uuid: Uuid::parse_str(SECURE_SERVICE_UUID).unwrap_or_default(),
                },
                ServiceVariant {
                    kind: VariantKind::Insecure,
                    name: INSECURE_SERVICE_NAME.to_string(),
                    uuid: Uuid::parse_str(INSECURE_SERVICE_UUID).unwrap_or_default(),
                },
            ],
            transport: TransportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: READ_CHUNK_SIZE,
            frame_capacity: DEFAULT_FRAME_CAPACITY,
            pace_interval: Duration::ZERO,
            dial_timeout: Duration::from_secs(12),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl TransportConfig {
    pub fn bind_addr(&self, kind: VariantKind) -> SocketAddr {
        match kind {
            VariantKind::Secure => self.secure_bind,
            VariantKind::Insecure => self.insecure_bind,
        }
    }

    pub fn bindings(&self) -> BTreeMap<VariantKind, SocketAddr> {
        [VariantKind::Secure, VariantKind::Insecure]
            .into_iter()
            .map(|kind| (kind, self.bind_addr(kind)))
            .collect()
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            secure_bind: SocketAddr::from(([127, 0, 0, 1], 7301)),
            insecure_bind: SocketAddr::from(([127, 0, 0, 1], 7302)),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
