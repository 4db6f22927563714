// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable fragmenting transport over a lossy point-to-point radio.
//!
//! ```text
//!   ReliableSender::send()                       ReceiveRouter::receive()
//!          |                                              ^
//!   fragment + token                              reassemble in order
//!          |                                              |
//!   Radio::send() --- air ---> driver rx callback -> on_frame_received()
//!          ^                                     (decode, dedup, enqueue)
//!   SendCompletion::signal()  <-- driver tx callback
//! ```
//!
//! The radio primitive is abstracted by [`Radio`]. Transmission outcome is
//! reported asynchronously by the driver through a [`SendCompletion`] handle.

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod crc;
pub mod deadline;
pub mod frame;
pub mod loopback;
pub mod router;
pub mod sender;

pub use deadline::Deadline;
pub use frame::{FrameError, LinkFrame, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use loopback::LoopbackRadio;
pub use router::{Disposition, ReceiveRouter};
pub use sender::{ReliableSender, SendCompletion};

/// Radio hardware address.
pub type MacAddr = [u8; 6];

/// Logical sub-stream multiplexed over the radio link.
///
/// Each channel owns an independent receive queue and duplicate filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Log forwarding; never raises transport notifications.
    Debug,
    /// Control traffic (upgrade status and data by default).
    Control,
    /// Configuration traffic.
    Config,
    /// Reserved for applications.
    Reserved,
}

impl Channel {
    /// Number of channels.
    pub const COUNT: usize = 4;

    /// All channels, in id order.
    pub const ALL: [Channel; Self::COUNT] = [
        Channel::Debug,
        Channel::Control,
        Channel::Config,
        Channel::Reserved,
    ];

    /// Wire id.
    pub const fn id(self) -> u8 {
        match self {
            Channel::Debug => 0,
            Channel::Control => 1,
            Channel::Config => 2,
            Channel::Reserved => 3,
        }
    }

    /// Parse a wire id.
    pub const fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Channel::Debug),
            1 => Some(Channel::Control),
            2 => Some(Channel::Config),
            3 => Some(Channel::Reserved),
            _ => None,
        }
    }

    /// Slot index for per-channel tables.
    #[inline]
    pub(crate) const fn index(self) -> usize {
        self.id() as usize
    }
}

/// Radio send primitive.
///
/// Implementors hand the frame to the hardware and return immediately. The
/// outcome (peer MAC-level ack or failure) must later be reported through the
/// [`SendCompletion`] handle registered by the [`ReliableSender`].
pub trait Radio: Send + Sync {
    /// Queue `frame` for transmission to `dest`.
    fn send(&self, dest: &MacAddr, frame: &[u8]) -> Result<()>;

    /// Install the handle the driver's tx-done callback reports through.
    fn register_completion(&self, completion: SendCompletion);

    /// Largest datagram the radio accepts.
    fn mtu(&self) -> usize {
        frame::RADIO_MTU
    }
}
