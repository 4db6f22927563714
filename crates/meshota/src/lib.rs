// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # meshota - Reliable Radio Transport and Resumable OTA for Mesh Nodes
//!
//! Firmware core for battery-powered mesh nodes that receive firmware images
//! over a lossy, MTU-limited peer-to-peer radio (ESP-NOW class, 250 bytes).
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------+
//! |  Application (events, dispatcher task)  |
//! +-----------------------------------------+
//!           v                    ^
//! +-----------------------------------------+
//! |  UpgradeController / FirmwareSource     |
//! +-----------------------------------------+
//!           v                    ^
//! +-----------------------------------------+
//! |  Upgrade messages (status, data)        |
//! +-----------------------------------------+
//!           v                    ^
//! +-----------------------------------------+
//! |  ReliableSender  /  ReceiveRouter       |
//! +-----------------------------------------+
//!           v                    ^
//! +-----------------------------------------+
//! |  Radio (driver) + platform traits       |
//! +-----------------------------------------+
//! ```
//!
//! ## Guarantees
//!
//! - **Ordered, acknowledged delivery** per message, with bounded retry
//! - **Resumable transfers**: progress persisted every few percent
//! - **Applied once**: the boot target switches exactly once per image

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Node configuration (TOML)
pub mod config;

/// Error types for meshota
pub mod error;

/// Notifications to the application layer
pub mod event;

/// Storage, flash and mesh collaborators
pub mod platform;

/// Reliable fragmenting transport
pub mod transport;

/// Resumable firmware upgrade
pub mod upgrade;

// Re-exports for convenience
pub use crate::config::{ConfigError, LinkConfig, NodeConfig, UpgradeConfig};
pub use crate::error::{Error, Result, StatusCode};
pub use crate::event::{Event, EventQueue, EventSink, NullSink};
pub use crate::transport::{
    Channel, MacAddr, Radio, ReceiveRouter, ReliableSender, SendCompletion,
};
pub use crate::upgrade::{
    ChannelLink, FirmwareSource, Platform, TransferStatus, UpgradeController, UpgradeLink,
    UpgradeState,
};
