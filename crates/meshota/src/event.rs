// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Notifications to the application layer.
//!
//! The transport and upgrade controller never call back into application code
//! directly; they post an [`Event`] to an [`EventSink`]. Sinks must not block:
//! `notify` is invoked from the radio receive callback.

use crossbeam::channel::{self, Receiver, Sender};

use crate::transport::Channel;

/// Notification emitted by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A multi-frame send finished on a non-debug channel.
    SendCompleted(Channel),
    /// First fragment of a message arrived on a non-debug channel.
    FirstFragment(Channel),
    /// An upgrade session started writing (or was satisfied locally).
    UpgradeStarted,
    /// Upgrade progress crossed a reporting threshold (percent).
    UpgradeProgress(u8),
    /// The image is complete and selected for next boot.
    UpgradeFinished,
}

/// Receiver of core notifications.
pub trait EventSink: Send + Sync {
    /// Deliver an event. Must not block.
    fn notify(&self, event: Event);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn notify(&self, _event: Event) {}
}

/// Sink backed by an unbounded channel, drained by an application task.
#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: Sender<Event>,
    rx: Receiver<Event>,
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    /// Receiving half, for a dispatcher task.
    pub fn receiver(&self) -> Receiver<Event> {
        self.rx.clone()
    }

    /// Take every pending event.
    pub fn drain(&self) -> Vec<Event> {
        self.rx.try_iter().collect()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventQueue {
    fn notify(&self, event: Event) {
        // Receiver half lives in self, send cannot fail.
        let _ = self.tx.send(event);
    }
}
