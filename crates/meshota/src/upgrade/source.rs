// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Source side of a transfer: announce an image and send what a target lacks.

use super::message::{DataPacket, TransferStatus};
use super::UpgradeLink;
use crate::config::{UpgradeConfig, MAX_FIRMWARE_NAME};
use crate::error::{Error, Result, StatusCode};
use crate::transport::MacAddr;

/// Firmware image held by the distributing node.
#[derive(Debug, Clone)]
pub struct FirmwareSource {
    name: String,
    image: Vec<u8>,
    chunk_size: usize,
}

impl FirmwareSource {
    /// Wrap `image` for distribution under `name`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the name is empty or too long, or the image is
    /// empty or has more chunks than a target can track.
    pub fn new(name: &str, image: Vec<u8>, config: &UpgradeConfig) -> Result<Self> {
        if name.is_empty() || name.len() > MAX_FIRMWARE_NAME {
            return Err(Error::InvalidArgument("firmware name length"));
        }
        if image.is_empty() || image.len() as u64 > config.max_image_size() {
            return Err(Error::InvalidArgument("firmware image size"));
        }
        Ok(Self {
            name: name.to_string(),
            image,
            chunk_size: config.chunk_size,
        })
    }

    /// Firmware name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Image size in bytes.
    pub fn total_size(&self) -> u32 {
        self.image.len() as u32
    }

    /// Number of chunks.
    pub fn chunk_count(&self) -> usize {
        self.image.len().div_ceil(self.chunk_size)
    }

    /// Status announcing the image.
    pub fn announcement(&self) -> TransferStatus {
        TransferStatus::announce(&self.name, self.total_size())
    }

    /// `report` concerns this image.
    pub fn matches(&self, report: &TransferStatus) -> bool {
        report.name == self.name && report.total_size == self.total_size()
    }

    /// `report` shows this image fully received.
    pub fn is_complete(&self, report: &TransferStatus) -> bool {
        self.matches(report)
            && report.error_code != StatusCode::Stopped
            && report.written_size >= report.total_size
    }

    /// Chunks the target behind `report` still needs, in order.
    pub fn missing_chunks(&self, report: &TransferStatus) -> Vec<u16> {
        let all = || -> Vec<u16> { (0..self.chunk_count()).map(|seq| seq as u16).collect() };

        if !self.matches(report) || report.error_code == StatusCode::Stopped {
            return all();
        }
        if report.written_size >= report.total_size {
            return Vec::new();
        }
        if report.written_size == 0 || report.progress.is_empty() {
            return all();
        }
        (0..self.chunk_count())
            .filter(|&seq| !report.progress.get(seq))
            .map(|seq| seq as u16)
            .collect()
    }

    /// Chunk `sequence`, `None` past the end of the image.
    pub fn packet(&self, sequence: u16) -> Option<DataPacket> {
        let start = usize::from(sequence) * self.chunk_size;
        if start >= self.image.len() {
            return None;
        }
        let end = (start + self.chunk_size).min(self.image.len());
        DataPacket::new(sequence, &self.image[start..end]).ok()
    }

    /// Send every chunk `report` lacks to `dest`. Returns the number sent.
    ///
    /// # Errors
    ///
    /// The first link error; chunks already sent stay sent.
    pub fn distribute(
        &self,
        link: &dyn UpgradeLink,
        dest: &MacAddr,
        report: &TransferStatus,
    ) -> Result<usize> {
        let missing = self.missing_chunks(report);
        log::debug!(
            "[source] '{}' to {:02x?}: {} of {} chunks missing",
            self.name,
            dest,
            missing.len(),
            self.chunk_count()
        );

        let mut sent = 0;
        for seq in missing {
            let Some(packet) = self.packet(seq) else {
                continue;
            };
            link.send_upgrade(dest, &packet.encode())?;
            sent += 1;
        }
        Ok(sent)
    }
}
