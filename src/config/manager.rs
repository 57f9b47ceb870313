//! Configuration Manager

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::Path;

use anyhow::{bail, Context};
use uuid::Uuid;

use super::Config;
use crate::protocol::{VariantKind, MAX_PACE_INTERVAL};
use crate::Result;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(size) = std::env::var("TETHER_READ_CHUNK_SIZE") {
            config.link.read_chunk_size = size
                .parse::<usize>()
                .with_context(|| format!("Invalid TETHER_READ_CHUNK_SIZE: {}", size))?;
        }

        if let Ok(capacity) = std::env::var("TETHER_FRAME_CAPACITY") {
            config.link.frame_capacity = capacity
                .parse::<usize>()
                .with_context(|| format!("Invalid TETHER_FRAME_CAPACITY: {}", capacity))?;
        }

        if let Ok(interval) = std::env::var("TETHER_PACE_INTERVAL") {
            config.link.pace_interval = humantime::parse_duration(&interval)
                .with_context(|| format!("Invalid TETHER_PACE_INTERVAL: {}", interval))?;
        }

        if let Ok(timeout) = std::env::var("TETHER_DIAL_TIMEOUT") {
            config.link.dial_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid TETHER_DIAL_TIMEOUT: {}", timeout))?;
        }

        for (kind, var) in [
            (VariantKind::Secure, "TETHER_SECURE_UUID"),
            (VariantKind::Insecure, "TETHER_INSECURE_UUID"),
        ] {
            if let Ok(value) = std::env::var(var) {
                let uuid = Uuid::parse_str(&value)
                    .with_context(|| format!("Invalid {}: {}", var, value))?;
                if let Some(service) = config.service_mut(kind) {
                    service.uuid = uuid;
                }
            }
        }

        if let Ok(bind) = std::env::var("TETHER_SECURE_BIND") {
            config.transport.secure_bind = bind
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid TETHER_SECURE_BIND: {}", bind))?;
        }

        if let Ok(bind) = std::env::var("TETHER_INSECURE_BIND") {
            config.transport.insecure_bind = bind
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid TETHER_INSECURE_BIND: {}", bind))?;
        }

        if let Ok(log_level) = std::env::var("TETHER_LOG_LEVEL") {
            config.logging.level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_link_config()
            .with_context(|| "Link configuration validation failed")?;

        self.validate_services()
            .with_context(|| "Service configuration validation failed")?;

        self.validate_logging_config()
            .with_context(|| "Logging configuration validation failed")?;

        Ok(())
    }

    fn validate_link_config(&self) -> Result<()> {
        if self.link.read_chunk_size == 0 {
            bail!("read_chunk_size must be greater than 0");
        }

        if self.link.read_chunk_size > 65536 {
            bail!("read_chunk_size cannot exceed 64KB");
        }

        if self.link.frame_capacity < 2 {
            bail!("frame_capacity must hold at least one byte and a terminator");
        }

        if self.link.pace_interval > MAX_PACE_INTERVAL {
            bail!("pace_interval cannot exceed {:?}", MAX_PACE_INTERVAL);
        }

        if self.link.dial_timeout.is_zero() {
            bail!("dial_timeout must be greater than 0");
        }

        Ok(())
    }

    fn validate_services(&self) -> Result<()> {
        if self.services.is_empty() {
            bail!("at least one service must be configured");
        }

        let mut kinds = BTreeSet::new();
        for (i, service) in self.services.iter().enumerate() {
            if service.name.is_empty() {
                bail!("Service {} has empty name", i);
            }

            if service.uuid.is_nil() {
                bail!("Service {} has a nil UUID", i);
            }

            if !kinds.insert(service.kind) {
                bail!("Service variant {} is configured more than once", service.kind);
            }
        }

        if let (Some(secure), Some(insecure)) = (
            self.service(VariantKind::Secure),
            self.service(VariantKind::Insecure),
        ) {
            if secure.uuid == insecure.uuid {
                tracing::warn!(
                    "Secure and insecure services share UUID {}; peers cannot tell them apart",
                    secure.uuid
                );
            }
        }

        Ok(())
    }

    fn validate_logging_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            bail!(
                "logging.level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        log_level: Option<&str>,
        secure_bind: Option<&str>,
        insecure_bind: Option<&str>,
        dial_timeout: Option<u64>,
    ) {
        if let Some(level) = log_level {
            self.logging.level = level.to_string();
            tracing::info!("CLI override: log level set to {}", level);
        }

        if let Some(bind) = secure_bind {
            if let Ok(addr) = bind.parse::<SocketAddr>() {
                self.transport.secure_bind = addr;
                tracing::info!("CLI override: secure endpoint set to {}", addr);
            } else {
                tracing::warn!("Invalid secure bind address provided: {}", bind);
            }
        }

        if let Some(bind) = insecure_bind {
            if let Ok(addr) = bind.parse::<SocketAddr>() {
                self.transport.insecure_bind = addr;
                tracing::info!("CLI override: insecure endpoint set to {}", addr);
            } else {
                tracing::warn!("Invalid insecure bind address provided: {}", bind);
            }
        }

        if let Some(timeout_secs) = dial_timeout {
            self.link.dial_timeout = std::time::Duration::from_secs(timeout_secs);
            tracing::info!("CLI override: dial timeout set to {}s", timeout_secs);
        }
    }
}
