// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receive router: per-channel queues, duplicate filter and reassembly.
//!
//! [`ReceiveRouter::on_frame_received`] runs in the radio driver's receive
//! context. It only decodes, filters and enqueues; a full queue drops the frame.
//! [`ReceiveRouter::receive`] runs in task context and rebuilds one message from
//! the channel's queue, in strict sequence order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use super::deadline::Deadline;
use super::frame::{FrameError, LinkFrame};
use super::{Channel, MacAddr};
use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::event::{Event, EventSink};

/// No token accepted yet (tokens are 32-bit).
const NO_TOKEN: u64 = u64::MAX;

/// What the router did with a received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Queued for `receive`.
    Accepted,
    /// Same token as the channel's last accepted frame.
    Duplicate,
    /// Frame failed to decode.
    Malformed(FrameError),
    /// Channel queue full; frame lost.
    QueueFull,
}

/// Router statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RouterStats {
    /// Frames queued.
    pub accepted: u64,
    /// Frames dropped as immediate duplicates.
    pub duplicates: u64,
    /// Frames dropped as undecodable.
    pub malformed: u64,
    /// Frames dropped on a full queue.
    pub overflows: u64,
}

#[derive(Default)]
struct AtomicRouterStats {
    accepted: AtomicU64,
    duplicates: AtomicU64,
    malformed: AtomicU64,
    overflows: AtomicU64,
}

#[derive(Debug)]
struct Received {
    src: MacAddr,
    frame: LinkFrame,
}

struct ChannelSlot {
    tx: Sender<Received>,
    rx: Receiver<Received>,
    last_token: AtomicU64,
}

impl ChannelSlot {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = channel::bounded(capacity);
        Self {
            tx,
            rx,
            last_token: AtomicU64::new(NO_TOKEN),
        }
    }
}

/// Demultiplexes received frames into per-channel queues.
pub struct ReceiveRouter {
    slots: [ChannelSlot; Channel::COUNT],
    max_payload: usize,
    events: Arc<dyn EventSink>,
    stats: AtomicRouterStats,
}

impl ReceiveRouter {
    /// Create a router with the queue capacities of `config`.
    pub fn new(config: &LinkConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            slots: Channel::ALL.map(|channel| ChannelSlot::new(config.queues.of(channel))),
            max_payload: config.max_payload,
            events,
            stats: AtomicRouterStats::default(),
        }
    }

    /// Driver receive callback. Never blocks.
    pub fn on_frame_received(&self, src: &MacAddr, raw: &[u8]) -> Disposition {
        let frame = match LinkFrame::decode(raw, self.max_payload) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                log::debug!("[router] dropped frame from {:02x?}: {}", src, e);
                return Disposition::Malformed(e);
            }
        };

        let channel = frame.channel;
        let slot = &self.slots[channel.index()];

        let token = u64::from(frame.dedup_token);
        if slot.last_token.swap(token, Ordering::AcqRel) == token {
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "[router] {:?} duplicate seq {} token {:#010x}",
                channel,
                frame.sequence,
                frame.dedup_token
            );
            return Disposition::Duplicate;
        }

        if frame.sequence == 0 && channel != Channel::Debug {
            self.events.notify(Event::FirstFragment(channel));
        }

        match slot.tx.try_send(Received { src: *src, frame }) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                Disposition::Accepted
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.stats.overflows.fetch_add(1, Ordering::Relaxed);
                log::debug!("[router] {:?} queue full, frame dropped", channel);
                Disposition::QueueFull
            }
        }
    }

    /// Receive one complete message on `channel` into `buf`.
    ///
    /// Frames that cannot start a message (non-zero sequence, or a declared
    /// length that does not fit `buf`) are discarded while waiting.
    ///
    /// Returns the sender address and the message length.
    ///
    /// # Errors
    ///
    /// - `Timeout` if no complete message arrived before `timeout`
    /// - `SequenceMismatch` if a fragment is missing or out of order
    pub fn receive(
        &self,
        channel: Channel,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<(MacAddr, usize)> {
        let deadline = Deadline::after(timeout);
        let slot = &self.slots[channel.index()];

        let first = loop {
            let received = Self::next(slot, &deadline)?;
            let frame = &received.frame;
            let total = usize::from(frame.total_len);

            if frame.sequence != 0 {
                log::debug!("[router] {:?} discarding stale seq {}", channel, frame.sequence);
                continue;
            }
            if total == 0 || total > buf.len() || frame.payload.len() > total {
                log::debug!(
                    "[router] {:?} discarding message of {} bytes (buffer {})",
                    channel,
                    total,
                    buf.len()
                );
                continue;
            }
            break received;
        };

        let src = first.src;
        let total = usize::from(first.frame.total_len);
        let mut read = first.frame.payload.len();
        buf[..read].copy_from_slice(&first.frame.payload);
        let mut expected: u8 = 1;

        while read < total {
            let received = Self::next(slot, &deadline)?;
            let frame = received.frame;

            if frame.sequence != expected || read + frame.payload.len() > total {
                log::debug!(
                    "[router] {:?} expected seq {}, got {} ({} of {} bytes)",
                    channel,
                    expected,
                    frame.sequence,
                    read,
                    total
                );
                return Err(Error::SequenceMismatch {
                    expected,
                    got: frame.sequence,
                });
            }

            buf[read..read + frame.payload.len()].copy_from_slice(&frame.payload);
            read += frame.payload.len();
            expected = expected.wrapping_add(1);
        }

        Ok((src, read))
    }

    /// Drop every queued frame and forget the duplicate filter state.
    pub fn clear(&self) {
        for slot in &self.slots {
            while slot.rx.try_recv().is_ok() {}
            slot.last_token.store(NO_TOKEN, Ordering::Release);
        }
    }

    /// Frames waiting on `channel`.
    pub fn pending(&self, channel: Channel) -> usize {
        self.slots[channel.index()].rx.len()
    }

    /// Snapshot of the statistics.
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            accepted: self.stats.accepted.load(Ordering::Relaxed),
            duplicates: self.stats.duplicates.load(Ordering::Relaxed),
            malformed: self.stats.malformed.load(Ordering::Relaxed),
            overflows: self.stats.overflows.load(Ordering::Relaxed),
        }
    }

    fn next(slot: &ChannelSlot, deadline: &Deadline) -> Result<Received> {
        match deadline.remaining() {
            None => slot.rx.recv().map_err(|_| Error::Timeout),
            Some(remaining) => slot.rx.recv_timeout(remaining).map_err(|_| Error::Timeout),
        }
    }
}
