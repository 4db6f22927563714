// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Upgrade controller: the target side of a firmware transfer.
//!
//! ```text
//!            on_status (new image)
//!   Idle ───────────────────────────► Active ──── last chunk ───► Finished
//!     ▲                                 │                            │
//!     │          stop()                 │ set-boot failure           │ stop()
//!     └─────────────────────────────────┴──────────► Aborted ◄───────┘
//! ```
//!
//! Progress is persisted every `report_interval` percent so a reset resumes
//! from the last saved bitmap. The record is erased once the image is
//! complete or the session is stopped.

use std::sync::Arc;
use std::time::Duration;

use super::message::{DataPacket, MessageKind, TransferStatus, UpgradeMessage};
use super::session::{next_threshold, SessionRecord, UpgradeSession};
use super::UpgradeLink;
use crate::config::UpgradeConfig;
use crate::error::{Error, Result, StatusCode};
use crate::event::{Event, EventSink};
use crate::platform::{FirmwareStorage, KvStore, MeshNode};
use crate::transport::MacAddr;

/// Collaborators of the controller.
#[derive(Clone)]
pub struct Platform {
    /// Firmware partitions.
    pub storage: Arc<dyn FirmwareStorage>,
    /// Durable store for the session record.
    pub kv: Arc<dyn KvStore>,
    /// Mesh stack.
    pub mesh: Arc<dyn MeshNode>,
    /// Path back to the announcer.
    pub link: Arc<dyn UpgradeLink>,
    /// Application notifications.
    pub events: Arc<dyn EventSink>,
}

/// Externally visible controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeState {
    /// No session.
    Idle,
    /// Receiving an image.
    Active,
    /// Image complete and selected for next boot.
    Finished,
    /// Session stopped or failed to switch boot target.
    Aborted,
}

/// Target-side upgrade state machine.
///
/// Owns the single upgrade session of this node. Not internally
/// synchronised; share behind a mutex if several tasks feed it.
pub struct UpgradeController {
    config: UpgradeConfig,
    platform: Platform,
    session: Option<UpgradeSession>,
}

impl UpgradeController {
    /// Create an idle controller.
    pub fn new(config: UpgradeConfig, platform: Platform) -> Self {
        Self {
            config,
            platform,
            session: None,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &UpgradeConfig {
        &self.config
    }

    /// Decode `bytes` and dispatch to [`on_status`](Self::on_status) or
    /// [`on_data`](Self::on_data). Unknown kinds are ignored.
    pub fn handle(&mut self, from: &MacAddr, bytes: &[u8]) -> Result<()> {
        if MessageKind::of(bytes).is_none() {
            log::debug!("[upgrade] ignoring message with unknown kind from {:02x?}", from);
            return Ok(());
        }
        match UpgradeMessage::decode(bytes)? {
            UpgradeMessage::Status(status) => self.on_status(from, &status),
            UpgradeMessage::Data(packet) => self.on_data(from, &packet),
        }
    }

    /// Handle an image announcement from `from`.
    ///
    /// Re-announcing the image already in progress only replies with the
    /// current status. Any other image restarts the session.
    ///
    /// # Errors
    ///
    /// The preparation error (partition, erase, persistence) after the reply
    /// was sent, or the reply's own transport error.
    pub fn on_status(&mut self, from: &MacAddr, announced: &TransferStatus) -> Result<()> {
        let mut session = match self.session.take() {
            Some(session) => session,
            None => self.restore().unwrap_or_else(|| {
                UpgradeSession::new(*from, self.config.bitmap_len(), self.config.report_interval)
            }),
        };
        session.announcer = *from;

        // A session whose preparation failed has no handle and is retried.
        let continuing = session.status.name == announced.name
            && session.status.total_size == announced.total_size
            && !session.is_stopped()
            && (session.finished || session.handle.is_some());

        let outcome = if continuing {
            log::debug!(
                "[upgrade] '{}' already known, {}/{} bytes",
                announced.name,
                session.status.written_size,
                session.status.total_size
            );
            Ok(())
        } else {
            session.reset(announced, self.config.report_interval);
            if self.platform.mesh.role().is_source() {
                self.finish_locally(&mut session)
            } else {
                self.prepare_target(&mut session)
            }
        };

        if let Err(e) = &outcome {
            log::warn!("[upgrade] preparing '{}' failed: {}", announced.name, e);
        }
        if !session.is_stopped() {
            session.status.error_code = match &outcome {
                Ok(()) => StatusCode::Ok,
                Err(e) => StatusCode::from(e),
            };
        }
        if session.status.is_complete() {
            self.platform.events.notify(Event::UpgradeProgress(100));
        }

        let reply = self.send_status(&session, session.status.encode());
        self.session = Some(session);
        reply?;
        outcome
    }

    /// Handle a firmware chunk.
    ///
    /// Duplicate chunks are acknowledged without rewriting.
    ///
    /// # Errors
    ///
    /// - `NotInitialized` without a session (live or persisted)
    /// - `InvalidArgument` for a chunk outside the image or a size mismatch
    /// - `PartitionWriteFailed` if the write failed (session kept)
    /// - `BootSelectFailed` if the complete image could not be selected
    pub fn on_data(&mut self, from: &MacAddr, packet: &DataPacket) -> Result<()> {
        let mut session = match self.session.take() {
            Some(session) => session,
            None => match self.restore() {
                Some(session) => session,
                None => {
                    log::warn!("[upgrade] chunk {} from {:02x?} without session", packet.sequence, from);
                    return Err(Error::NotInitialized);
                }
            },
        };

        let result = self.write_chunk(&mut session, packet);
        self.session = Some(session);
        result
    }

    /// Abort the session, reverting the boot target if the image was already
    /// selected. The announcer is told and the session is dropped.
    ///
    /// # Errors
    ///
    /// `BootSelectFailed` if the running image could not be reselected; the
    /// session is then kept.
    pub fn stop(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };

        if session.finished {
            let reverted = self
                .platform
                .storage
                .running_target()
                .ok_or(Error::NotSupported)
                .and_then(|running| self.platform.storage.set_boot_target(running));
            if let Err(e) = reverted {
                log::warn!("[upgrade] reverting boot target failed: {}", e);
                self.session = Some(session);
                return Err(Error::BootSelectFailed);
            }
        }

        session.status.error_code = StatusCode::Stopped;
        session.status.written_size = 0;
        session.status.progress.clear();
        self.erase_record();
        log::info!("[upgrade] '{}' stopped", session.status.name);

        self.send_status(&session, session.status.encode_compact())
    }

    /// Current transfer status.
    ///
    /// # Errors
    ///
    /// `NotSupported` when no session exists.
    pub fn status(&self) -> Result<TransferStatus> {
        self.session
            .as_ref()
            .map(|session| session.status.clone())
            .ok_or(Error::NotSupported)
    }

    /// Current state.
    pub fn state(&self) -> UpgradeState {
        match &self.session {
            None => UpgradeState::Idle,
            Some(session) if session.finished => UpgradeState::Finished,
            Some(session) if session.is_stopped() => UpgradeState::Aborted,
            Some(_) => UpgradeState::Active,
        }
    }

    /// The image is complete and selected for next boot.
    pub fn is_finished(&self) -> bool {
        self.session.as_ref().is_some_and(|session| session.finished)
    }

    /// Time since the session started writing.
    pub fn elapsed(&self) -> Option<Duration> {
        self.session.as_ref().map(UpgradeSession::elapsed)
    }

    /// Source role: the image is already local, just boot it.
    fn finish_locally(&self, session: &mut UpgradeSession) -> Result<()> {
        let update = self
            .platform
            .storage
            .next_update_target()
            .ok_or(Error::NotSupported)?;
        self.platform
            .storage
            .set_boot_target(update)
            .map_err(|_| Error::BootSelectFailed)?;

        session.target = Some(update);
        session.finished = true;
        self.platform.events.notify(Event::UpgradeStarted);
        session.status.written_size = session.status.total_size;
        session.status.progress.fill();
        self.platform.events.notify(Event::UpgradeFinished);
        log::info!("[upgrade] source node selected '{}' for boot", session.status.name);
        Ok(())
    }

    /// Target role: erase the update partition and persist the new session.
    fn prepare_target(&self, session: &mut UpgradeSession) -> Result<()> {
        let storage = &self.platform.storage;
        let (running, update) = match (storage.running_target(), storage.next_update_target()) {
            (Some(running), Some(update)) if running != update => (running, update),
            _ => {
                log::warn!("[upgrade] no update partition available");
                return Err(Error::NotSupported);
            }
        };

        let total = u64::from(session.status.total_size);
        if total == 0 || total > self.config.max_image_size() {
            return Err(Error::InvalidArgument("image size out of range"));
        }

        log::debug!(
            "[upgrade] running {:?}, writing '{}' ({} bytes) to {:?}",
            running,
            session.status.name,
            total,
            update
        );
        session.target = Some(update);

        // Erasing can outlast the child association timeout.
        let mesh = &self.platform.mesh;
        let previous = mesh.keepalive_timeout();
        if let Err(e) = mesh.set_keepalive_timeout(self.config.erase_keepalive_secs) {
            log::warn!("[upgrade] raising keepalive failed: {}", e);
        }
        let begun = storage.begin(update, session.status.total_size);
        if let Err(e) = mesh.set_keepalive_timeout(previous) {
            log::warn!("[upgrade] restoring keepalive failed: {}", e);
        }
        let handle = begun?;

        // Without a record the session is not resumable; the next announce retries.
        self.save_record(session)?;
        session.handle = Some(handle);
        self.platform.events.notify(Event::UpgradeStarted);
        log::info!(
            "[upgrade] started '{}' ({} bytes)",
            session.status.name,
            session.status.total_size
        );
        Ok(())
    }

    fn write_chunk(&self, session: &mut UpgradeSession, packet: &DataPacket) -> Result<()> {
        if session.is_stopped() {
            session.status.written_size = 0;
            session.status.progress.clear();
            self.erase_record();
            return self.send_status(session, session.status.encode_compact());
        }

        let seq = usize::from(packet.sequence);
        let size = usize::from(packet.size);
        let total = session.status.total_size as usize;
        let offset = seq * self.config.chunk_size;

        if offset > total || seq >= self.config.max_chunks {
            log::debug!("[upgrade] chunk {} outside image of {} bytes", seq, total);
            return Err(Error::InvalidArgument("chunk sequence outside image"));
        }
        if size == 0 || size != packet.data.len() || size > self.config.chunk_size {
            return Err(Error::InvalidArgument("chunk size mismatch"));
        }
        if offset + size > total {
            return Err(Error::InvalidArgument("chunk extends past image end"));
        }

        if session.status.progress.get(seq) {
            log::debug!("[upgrade] duplicate chunk {}", seq);
            return Ok(());
        }

        let written = session
            .handle
            .ok_or(Error::PartitionWriteFailed)
            .and_then(|handle| {
                self.platform
                    .storage
                    .write(handle, offset as u32, &packet.data)
            });
        if let Err(e) = written {
            log::warn!("[upgrade] writing chunk {} at {:#x} failed: {}", seq, offset, e);
            session.status.error_code = StatusCode::PartitionWriteFailed;
            return Err(Error::PartitionWriteFailed);
        }

        session.status.progress.set(seq);
        session.status.written_size += u32::from(packet.size);

        let percent = session.status.percent();
        log::debug!(
            "[upgrade] chunk {} ({} bytes), {}/{} bytes, {}%",
            seq,
            size,
            session.status.written_size,
            session.status.total_size,
            percent
        );
        if u32::from(percent) >= session.next_threshold {
            session.next_threshold = next_threshold(percent, self.config.report_interval);
            if let Err(e) = self.save_record(session) {
                log::warn!("[upgrade] saving progress failed: {}", e);
            }
            self.platform.events.notify(Event::UpgradeProgress(percent));
        }

        if session.status.is_complete() {
            return self.complete(session);
        }
        Ok(())
    }

    fn complete(&self, session: &mut UpgradeSession) -> Result<()> {
        log::info!(
            "[upgrade] '{}' complete, {} bytes in {:.1}s",
            session.status.name,
            session.status.written_size,
            session.elapsed().as_secs_f32()
        );

        // A handle reopened after reset may be stale; the boot switch still works.
        if let Some(handle) = session.handle.take() {
            if let Err(e) = self.platform.storage.commit(handle) {
                log::warn!("[upgrade] commit failed: {}", e);
            }
        }
        self.erase_record();

        let selected = session
            .target
            .or_else(|| self.platform.storage.next_update_target())
            .ok_or(Error::NotSupported)
            .and_then(|target| self.platform.storage.set_boot_target(target));
        if let Err(e) = selected {
            log::warn!("[upgrade] selecting new image failed: {}", e);
            session.status.written_size = 0;
            session.status.progress.clear();
            session.status.error_code = StatusCode::Stopped;
            return Err(Error::BootSelectFailed);
        }

        session.finished = true;
        self.platform.events.notify(Event::UpgradeFinished);
        self.send_status(session, session.status.encode_compact())
    }

    fn restore(&self) -> Option<UpgradeSession> {
        let bytes = match self.platform.kv.load(&self.config.session_key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("[upgrade] loading session record failed: {}", e);
                return None;
            }
        };
        let record = match SessionRecord::decode(&bytes) {
            Ok(record) => record,
            Err(e) => {
                log::warn!("[upgrade] discarding session record: {}", e);
                self.erase_record();
                return None;
            }
        };

        let mut session =
            UpgradeSession::restored(record, self.config.bitmap_len(), self.config.report_interval);
        session.target = self.platform.storage.next_update_target();
        session.handle = session
            .target
            .and_then(|target| match self.platform.storage.resume(target) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    log::warn!("[upgrade] reopening {:?} failed: {}", target, e);
                    None
                }
            });

        log::info!(
            "[upgrade] resumed '{}' at {}/{} bytes",
            session.status.name,
            session.status.written_size,
            session.status.total_size
        );
        Some(session)
    }

    fn save_record(&self, session: &UpgradeSession) -> Result<()> {
        self.platform
            .kv
            .save(&self.config.session_key, &session.record().encode())
            .map_err(|e| Error::Persist(e.to_string()))
    }

    fn erase_record(&self) {
        if let Err(e) = self.platform.kv.erase(&self.config.session_key) {
            log::warn!("[upgrade] erasing session record failed: {}", e);
        }
    }

    fn send_status(&self, session: &UpgradeSession, bytes: Vec<u8>) -> Result<()> {
        self.platform
            .link
            .send_upgrade(&session.announcer, &bytes)
            .map_err(|e| {
                log::warn!("[upgrade] status reply to {:02x?} failed: {}", session.announcer, e);
                e
            })
    }
}
