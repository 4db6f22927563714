// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process radio for host tests.
//!
//! [`LoopbackRadio`] hands every frame straight to a peer [`ReceiveRouter`]
//! and reports the outcome through the registered [`SendCompletion`], like a
//! driver whose tx-done callback fires once the peer acked at MAC level.
//!
//! Impairments can be injected to exercise the retry paths:
//! - refused sends (radio primitive error)
//! - lost frames (not delivered, failure reported)
//! - lost acks (delivered, failure reported, so the sender retransmits)
//! - silence (not delivered, no outcome reported)
//! - random loss with a seeded generator

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use super::router::ReceiveRouter;
use super::sender::SendCompletion;
use super::{MacAddr, Radio};
use crate::error::{Error, Result};

/// Loopback statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoopbackStats {
    /// Frames handed to the radio.
    pub frames_sent: u64,
    /// Frames delivered to the peer router.
    pub frames_delivered: u64,
    /// Frames lost (refused, dropped or silenced).
    pub frames_lost: u64,
}

#[derive(Debug, Default)]
struct Impairments {
    refuse_next: u32,
    drop_next: u32,
    lose_ack_next: u32,
    silent: bool,
    loss_rate: f64,
}

/// Radio delivering frames to a peer router in the same process.
pub struct LoopbackRadio {
    local: MacAddr,
    peer: Arc<ReceiveRouter>,
    completion: OnceLock<SendCompletion>,
    impairments: Mutex<Impairments>,
    rng: Mutex<fastrand::Rng>,
    stats: Mutex<LoopbackStats>,
}

impl LoopbackRadio {
    /// Radio with address `local` whose frames reach `peer`.
    pub fn new(local: MacAddr, peer: Arc<ReceiveRouter>) -> Self {
        Self {
            local,
            peer,
            completion: OnceLock::new(),
            impairments: Mutex::new(Impairments::default()),
            rng: Mutex::new(fastrand::Rng::with_seed(0x6d65_7368)),
            stats: Mutex::new(LoopbackStats::default()),
        }
    }

    /// Address frames are delivered from.
    pub fn local_addr(&self) -> MacAddr {
        self.local
    }

    /// Refuse the next `n` sends with a transport error.
    pub fn refuse_next(&self, n: u32) {
        self.impairments.lock().refuse_next = n;
    }

    /// Lose the next `n` frames in the air.
    pub fn drop_next(&self, n: u32) {
        self.impairments.lock().drop_next = n;
    }

    /// Deliver the next `n` frames but report them as failed.
    pub fn lose_ack_next(&self, n: u32) {
        self.impairments.lock().lose_ack_next = n;
    }

    /// Swallow frames without reporting any outcome.
    pub fn set_silent(&self, silent: bool) {
        self.impairments.lock().silent = silent;
    }

    /// Random frame loss probability (0.0 - 1.0).
    pub fn set_loss_rate(&self, loss_rate: f64) {
        self.impairments.lock().loss_rate = loss_rate.clamp(0.0, 1.0);
    }

    /// Reseed the loss generator for reproducible runs.
    pub fn set_seed(&self, seed: u64) {
        self.rng.lock().seed(seed);
    }

    /// Snapshot of the statistics.
    pub fn stats(&self) -> LoopbackStats {
        self.stats.lock().clone()
    }

    fn signal(&self, ok: bool) {
        if let Some(completion) = self.completion.get() {
            completion.signal(ok);
        }
    }
}

/// What happens to one frame.
enum Fate {
    Refused,
    Silenced,
    Lost,
    AckLost,
    Delivered,
}

impl Radio for LoopbackRadio {
    fn send(&self, _dest: &MacAddr, frame: &[u8]) -> Result<()> {
        let fate = {
            let mut imp = self.impairments.lock();
            if imp.refuse_next > 0 {
                imp.refuse_next -= 1;
                Fate::Refused
            } else if imp.silent {
                Fate::Silenced
            } else if imp.drop_next > 0 {
                imp.drop_next -= 1;
                Fate::Lost
            } else if imp.lose_ack_next > 0 {
                imp.lose_ack_next -= 1;
                Fate::AckLost
            } else if imp.loss_rate > 0.0 && self.rng.lock().f64() < imp.loss_rate {
                Fate::Lost
            } else {
                Fate::Delivered
            }
        };

        let mut stats = self.stats.lock();
        match fate {
            Fate::Refused => {
                stats.frames_lost += 1;
                return Err(Error::TransportError);
            }
            Fate::Silenced => {
                stats.frames_sent += 1;
                stats.frames_lost += 1;
            }
            Fate::Lost => {
                stats.frames_sent += 1;
                stats.frames_lost += 1;
                drop(stats);
                self.signal(false);
            }
            Fate::AckLost => {
                stats.frames_sent += 1;
                stats.frames_delivered += 1;
                drop(stats);
                self.peer.on_frame_received(&self.local, frame);
                self.signal(false);
            }
            Fate::Delivered => {
                stats.frames_sent += 1;
                stats.frames_delivered += 1;
                drop(stats);
                self.peer.on_frame_received(&self.local, frame);
                self.signal(true);
            }
        }
        Ok(())
    }

    fn register_completion(&self, completion: SendCompletion) {
        if self.completion.set(completion).is_err() {
            log::warn!("[loopback] completion already registered, ignoring");
        }
    }
}
