// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node configuration.
//!
//! Supports both programmatic and file-based (TOML) configuration. Every field
//! has a default matching the shipped firmware, so an empty file is valid.
//!
//! ```toml
//! [link]
//! max_payload = 238
//! retransmit = 3
//!
//! [link.queues]
//! control = 32
//!
//! [upgrade]
//! chunk_size = 1024
//! report_interval = 10
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::frame::{DEFAULT_MAX_PAYLOAD, RADIO_MTU};
use crate::transport::{Channel, HEADER_SIZE};
use crate::upgrade::message::{self, FIRMWARE_NAME_LEN};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for this schema.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete node configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Transport settings.
    #[serde(default)]
    pub link: LinkConfig,

    /// Upgrade controller settings.
    #[serde(default)]
    pub upgrade: UpgradeConfig,
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.link.validate()?;
        self.upgrade.validate()?;

        let needed = message::max_message_len(&self.upgrade);
        if needed > self.link.max_message_len() {
            return Err(ConfigError::Invalid(format!(
                "upgrade messages need {} bytes, link carries at most {}",
                needed,
                self.link.max_message_len()
            )));
        }
        Ok(())
    }
}

/// Receive queue capacity per channel, in frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueCapacity {
    /// [`Channel::Debug`] queue.
    pub debug: usize,
    /// [`Channel::Control`] queue.
    pub control: usize,
    /// [`Channel::Config`] queue.
    pub config: usize,
    /// [`Channel::Reserved`] queue.
    pub reserved: usize,
}

impl Default for QueueCapacity {
    fn default() -> Self {
        Self {
            debug: 8,
            control: 32,
            config: 8,
            reserved: 8,
        }
    }
}

impl QueueCapacity {
    /// Capacity of `channel`'s queue.
    pub fn of(&self, channel: Channel) -> usize {
        match channel {
            Channel::Debug => self.debug,
            Channel::Control => self.control,
            Channel::Config => self.config,
            Channel::Reserved => self.reserved,
        }
    }
}

/// Reliable transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Maximum payload bytes per frame.
    pub max_payload: usize,

    /// Transmission attempts per frame (first try included).
    pub retransmit: u8,

    /// Default timeout for a complete send, in milliseconds.
    pub send_timeout_ms: u64,

    /// Per-channel receive queue capacity.
    pub queues: QueueCapacity,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            retransmit: 3,
            send_timeout_ms: 3000,
            queues: QueueCapacity::default(),
        }
    }
}

impl LinkConfig {
    /// Default send timeout.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Largest message a single send can carry.
    ///
    /// Bounded by the 16-bit total length and the 8-bit fragment sequence.
    pub fn max_message_len(&self) -> usize {
        (self.max_payload * 256).min(usize::from(u16::MAX))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_payload == 0 || self.max_payload + HEADER_SIZE > RADIO_MTU {
            return Err(ConfigError::Invalid(format!(
                "max_payload must be in 1..={}, got {}",
                RADIO_MTU - HEADER_SIZE,
                self.max_payload
            )));
        }
        if self.retransmit == 0 {
            return Err(ConfigError::Invalid("retransmit must be at least 1".into()));
        }
        for channel in Channel::ALL {
            if self.queues.of(channel) == 0 {
                return Err(ConfigError::Invalid(format!(
                    "queue capacity for {:?} must be non-zero",
                    channel
                )));
            }
        }
        Ok(())
    }
}

/// Upgrade controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    /// Firmware bytes per data chunk.
    pub chunk_size: usize,

    /// Largest number of chunks an image may have (progress bitmap bits).
    pub max_chunks: usize,

    /// Progress reporting / persistence interval, in percent.
    pub report_interval: u8,

    /// Link keepalive used while the update partition is erased, in seconds.
    pub erase_keepalive_secs: u32,

    /// Key of the persisted session record.
    pub session_key: String,

    /// Timeout for status replies, in milliseconds.
    pub reply_timeout_ms: u64,

    /// Channel carrying upgrade traffic.
    pub channel: Channel,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            max_chunks: 5120,
            report_interval: 10,
            erase_keepalive_secs: 60,
            session_key: "upgrade_session".to_string(),
            reply_timeout_ms: 3000,
            channel: Channel::Control,
        }
    }
}

impl UpgradeConfig {
    /// Size of the progress bitmap in bytes.
    pub fn bitmap_len(&self) -> usize {
        self.max_chunks.div_ceil(8)
    }

    /// Largest image the controller accepts.
    pub fn max_image_size(&self) -> u64 {
        (self.chunk_size as u64 * self.max_chunks as u64).min(u64::from(u32::MAX))
    }

    /// Timeout for status replies.
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.chunk_size > usize::from(u16::MAX) {
            return Err(ConfigError::Invalid(format!(
                "chunk_size must be in 1..=65535, got {}",
                self.chunk_size
            )));
        }
        if self.max_chunks == 0 || self.max_chunks > usize::from(u16::MAX) + 1 {
            return Err(ConfigError::Invalid(format!(
                "max_chunks must be in 1..=65536, got {}",
                self.max_chunks
            )));
        }
        if self.report_interval == 0 || self.report_interval > 100 {
            return Err(ConfigError::Invalid(format!(
                "report_interval must be in 1..=100, got {}",
                self.report_interval
            )));
        }
        if self.session_key.is_empty() {
            return Err(ConfigError::Invalid("session_key is empty".into()));
        }
        Ok(())
    }
}

/// Longest firmware name that fits the status message.
pub const MAX_FIRMWARE_NAME: usize = FIRMWARE_NAME_LEN - 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.link.max_payload, 238);
        assert_eq!(config.upgrade.bitmap_len(), 640);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = NodeConfig::from_toml_str("").expect("parse");
        assert_eq!(config, NodeConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = NodeConfig::from_toml_str(
            r#"
            [link]
            retransmit = 5

            [link.queues]
            control = 64

            [upgrade]
            chunk_size = 200
            channel = "config"
            "#,
        )
        .expect("parse");

        assert_eq!(config.link.retransmit, 5);
        assert_eq!(config.link.max_payload, DEFAULT_MAX_PAYLOAD);
        assert_eq!(config.link.queues.of(Channel::Control), 64);
        assert_eq!(config.link.queues.of(Channel::Debug), 8);
        assert_eq!(config.upgrade.chunk_size, 200);
        assert_eq!(config.upgrade.channel, Channel::Config);
    }

    #[test]
    fn test_invalid_max_payload() {
        let err = NodeConfig::from_toml_str("[link]\nmax_payload = 300\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_invalid_zero_queue() {
        let err = NodeConfig::from_toml_str("[link.queues]\ndebug = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_invalid_report_interval() {
        let err = NodeConfig::from_toml_str("[upgrade]\nreport_interval = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_upgrade_messages_must_fit_link() {
        let err = NodeConfig::from_toml_str("[link]\nmax_payload = 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let err = NodeConfig::from_toml_str("[link\n").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("node.toml");
        std::fs::write(&path, "[upgrade]\nmax_chunks = 64\n").expect("write");

        let config = NodeConfig::from_file(&path).expect("load");
        assert_eq!(config.upgrade.max_chunks, 64);
        assert_eq!(config.upgrade.bitmap_len(), 8);
    }

    #[test]
    fn test_max_message_len() {
        let link = LinkConfig::default();
        assert_eq!(link.max_message_len(), usize::from(u16::MAX).min(238 * 256));

        let small = LinkConfig {
            max_payload: 10,
            ..LinkConfig::default()
        };
        assert_eq!(small.max_message_len(), 2560);
    }
}
