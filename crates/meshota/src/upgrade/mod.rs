// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resumable firmware upgrade over the reliable transport.
//!
//! A source node announces an image with a [`TransferStatus`]; the target
//! replies with its progress bitmap and the source sends the missing chunks as
//! [`DataPacket`]s. The target side is driven by [`UpgradeController`], the
//! source side by [`FirmwareSource`].
//!
//! ```ignore
//! let link = Arc::new(ChannelLink::new(sender.clone(), &config.upgrade));
//! let mut controller = UpgradeController::new(config.upgrade.clone(), platform);
//!
//! let mut buf = vec![0u8; message::max_message_len(&config.upgrade)];
//! loop {
//!     upgrade::serve_once(&router, config.upgrade.channel, &mut controller, &mut buf, timeout)?;
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::config::UpgradeConfig;
use crate::error::Result;
use crate::transport::{Channel, MacAddr, Radio, ReceiveRouter, ReliableSender};

pub mod controller;
pub mod message;
pub mod session;
pub mod source;

pub use controller::{Platform, UpgradeController, UpgradeState};
pub use message::{DataPacket, MessageKind, ProgressBitmap, TransferStatus, UpgradeMessage};
pub use session::{SessionRecord, UpgradeSession};
pub use source::FirmwareSource;

/// Path carrying upgrade messages to a peer.
pub trait UpgradeLink: Send + Sync {
    /// Deliver one upgrade message to `dest`.
    fn send_upgrade(&self, dest: &MacAddr, message: &[u8]) -> Result<()>;
}

/// [`UpgradeLink`] over one channel of a [`ReliableSender`].
pub struct ChannelLink<R: Radio> {
    sender: Arc<ReliableSender<R>>,
    channel: Channel,
    timeout: Duration,
}

impl<R: Radio> ChannelLink<R> {
    /// Link on the configured upgrade channel and reply timeout.
    pub fn new(sender: Arc<ReliableSender<R>>, config: &UpgradeConfig) -> Self {
        Self {
            sender,
            channel: config.channel,
            timeout: config.reply_timeout(),
        }
    }

    /// Channel used.
    pub fn channel(&self) -> Channel {
        self.channel
    }
}

impl<R: Radio> UpgradeLink for ChannelLink<R> {
    fn send_upgrade(&self, dest: &MacAddr, message: &[u8]) -> Result<()> {
        self.sender.send(self.channel, dest, message, self.timeout)
    }
}

/// Receive one message on `channel` and hand it to `controller`.
///
/// # Errors
///
/// Receive errors (`Timeout`, `SequenceMismatch`) and controller errors.
pub fn serve_once(
    router: &ReceiveRouter,
    channel: Channel,
    controller: &mut UpgradeController,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<()> {
    let (src, len) = router.receive(channel, buf, timeout)?;
    controller.handle(&src, &buf[..len])
}
