// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Upgrade session state and its persisted record.

use std::time::{Duration, Instant};

use super::message::{ProgressBitmap, TransferStatus, STATUS_HEADER_LEN};
use crate::error::{Error, Result, StatusCode};
use crate::platform::{PartitionId, WriteHandle};
use crate::transport::MacAddr;

/// The single in-flight upgrade.
#[derive(Debug, Clone)]
pub struct UpgradeSession {
    /// Progress of the image being received.
    pub status: TransferStatus,
    /// Partition receiving the image.
    pub target: Option<PartitionId>,
    /// Open write session on `target`.
    pub handle: Option<WriteHandle>,
    /// Node that announced the image; replies go there.
    pub announcer: MacAddr,
    /// When writing started.
    pub started_at: Instant,
    /// Image complete and selected for boot.
    pub finished: bool,
    /// Next progress percentage that triggers persistence.
    pub next_threshold: u32,
}

impl UpgradeSession {
    /// Empty session reporting to `announcer`.
    pub fn new(announcer: MacAddr, bitmap_len: usize, report_interval: u8) -> Self {
        Self {
            status: TransferStatus {
                progress: ProgressBitmap::new(bitmap_len),
                ..TransferStatus::default()
            },
            target: None,
            handle: None,
            announcer,
            started_at: Instant::now(),
            finished: false,
            next_threshold: u32::from(report_interval),
        }
    }

    /// Session rebuilt from a persisted record.
    pub fn restored(record: SessionRecord, bitmap_len: usize, report_interval: u8) -> Self {
        let mut session = Self::new(record.announcer, bitmap_len, report_interval);
        session.status = record.status;
        session.status.progress.resize(bitmap_len);
        session.next_threshold = next_threshold(session.status.percent(), report_interval);
        session
    }

    /// Adopt a newly announced image, dropping all progress.
    pub fn reset(&mut self, announced: &TransferStatus, report_interval: u8) {
        self.status.name.clone_from(&announced.name);
        self.status.total_size = announced.total_size;
        self.status.written_size = 0;
        self.status.error_code = StatusCode::Ok;
        self.status.progress.clear();
        self.finished = false;
        self.handle = None;
        self.started_at = Instant::now();
        self.next_threshold = u32::from(report_interval);
    }

    /// The session was stopped or aborted.
    pub fn is_stopped(&self) -> bool {
        self.status.error_code == StatusCode::Stopped
    }

    /// Time since writing started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Record to persist for resuming after a reset.
    pub fn record(&self) -> SessionRecord {
        SessionRecord {
            status: self.status.clone(),
            announcer: self.announcer,
        }
    }
}

/// First reporting threshold strictly above `percent`.
pub(crate) fn next_threshold(percent: u8, interval: u8) -> u32 {
    let interval = u32::from(interval.max(1));
    (u32::from(percent) / interval + 1) * interval
}

/// Durable form of a session: full status (bitmap included) then the
/// announcer address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Transfer progress.
    pub status: TransferStatus,
    /// Node replies go to.
    pub announcer: MacAddr,
}

impl SessionRecord {
    /// Encode for the key-value store.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.status.encode_full();
        buf.extend_from_slice(&self.announcer);
        buf
    }

    /// Decode a stored record.
    ///
    /// # Errors
    ///
    /// `Malformed` if the record is truncated or its status is invalid.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < STATUS_HEADER_LEN + 6 {
            return Err(Error::Malformed("session record truncated"));
        }
        let (status, addr) = bytes.split_at(bytes.len() - 6);
        let status = TransferStatus::decode(status)?;
        if status.written_size > status.total_size {
            return Err(Error::Malformed("session record written beyond total"));
        }

        let mut announcer = [0u8; 6];
        announcer.copy_from_slice(addr);
        Ok(Self { status, announcer })
    }
}
