// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Firmware partitions and boot selection.
//!
//! Modelled on an A/B layout: the image runs from one partition while the
//! other receives the update. [`FirmwareStorage::set_boot_target`] picks the
//! partition started on the next reset.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Firmware partition identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionId(pub u8);

/// Open write session on a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriteHandle(pub u32);

/// Firmware partition access.
pub trait FirmwareStorage: Send + Sync {
    /// Partition the current image runs from.
    fn running_target(&self) -> Option<PartitionId>;

    /// Partition the next update should be written to.
    fn next_update_target(&self) -> Option<PartitionId>;

    /// Erase `target` for an image of `size` bytes and open it for writing.
    ///
    /// May take several seconds on real flash.
    fn begin(&self, target: PartitionId, size: u32) -> Result<WriteHandle>;

    /// Reopen `target` for writing without erasing (resume after reset).
    fn resume(&self, target: PartitionId) -> Result<WriteHandle>;

    /// Write `bytes` at `offset` within the partition.
    fn write(&self, handle: WriteHandle, offset: u32, bytes: &[u8]) -> Result<()>;

    /// Close the write session.
    fn commit(&self, handle: WriteHandle) -> Result<()>;

    /// Select the partition started on next reset.
    fn set_boot_target(&self, target: PartitionId) -> Result<()>;
}

#[derive(Debug)]
struct FlashState {
    partitions: Vec<Vec<u8>>,
    running: PartitionId,
    boot: PartitionId,
    open: HashMap<WriteHandle, PartitionId>,
    next_handle: u32,
    erases: u32,
    commits: u32,
    boot_selections: u32,
    fail_writes: u32,
    fail_begin: bool,
    fail_boot_select: bool,
}

/// RAM-backed A/B flash with failure injection.
#[derive(Debug)]
pub struct MemoryFlash {
    state: Mutex<FlashState>,
    partition_size: usize,
}

impl MemoryFlash {
    /// Two partitions of `partition_size` bytes, running from the first.
    pub fn new(partition_size: usize) -> Self {
        Self::with_partitions(2, partition_size)
    }

    /// `count` partitions; with fewer than two there is no update target.
    pub fn with_partitions(count: usize, partition_size: usize) -> Self {
        Self {
            state: Mutex::new(FlashState {
                partitions: vec![vec![0xFF; partition_size]; count],
                running: PartitionId(0),
                boot: PartitionId(0),
                open: HashMap::new(),
                next_handle: 1,
                erases: 0,
                commits: 0,
                boot_selections: 0,
                fail_writes: 0,
                fail_begin: false,
                fail_boot_select: false,
            }),
            partition_size,
        }
    }

    /// Simulate a reset: boot the selected partition, drop open handles.
    pub fn reboot(&self) {
        let mut state = self.state.lock();
        state.running = state.boot;
        state.open.clear();
    }

    /// Contents of `target`, `None` if it does not exist.
    pub fn image(&self, target: PartitionId) -> Option<Vec<u8>> {
        self.state
            .lock()
            .partitions
            .get(usize::from(target.0))
            .cloned()
    }

    /// Partition selected for next boot.
    pub fn boot_target(&self) -> PartitionId {
        self.state.lock().boot
    }

    /// Successful `set_boot_target` calls.
    pub fn boot_selections(&self) -> u32 {
        self.state.lock().boot_selections
    }

    /// Partition erases performed by `begin`.
    pub fn erases(&self) -> u32 {
        self.state.lock().erases
    }

    /// Write sessions committed.
    pub fn commits(&self) -> u32 {
        self.state.lock().commits
    }

    /// Fail the next `n` writes.
    pub fn fail_writes(&self, n: u32) {
        self.state.lock().fail_writes = n;
    }

    /// Make `begin` fail.
    pub fn fail_begin(&self, fail: bool) {
        self.state.lock().fail_begin = fail;
    }

    /// Make `set_boot_target` fail.
    pub fn fail_boot_select(&self, fail: bool) {
        self.state.lock().fail_boot_select = fail;
    }

    fn exists(state: &FlashState, target: PartitionId) -> bool {
        usize::from(target.0) < state.partitions.len()
    }

    fn open(state: &mut FlashState, target: PartitionId) -> WriteHandle {
        let handle = WriteHandle(state.next_handle);
        state.next_handle = state.next_handle.wrapping_add(1);
        state.open.insert(handle, target);
        handle
    }
}

impl FirmwareStorage for MemoryFlash {
    fn running_target(&self) -> Option<PartitionId> {
        Some(self.state.lock().running)
    }

    fn next_update_target(&self) -> Option<PartitionId> {
        let state = self.state.lock();
        let count = state.partitions.len();
        if count < 2 {
            return None;
        }
        Some(PartitionId(
            ((usize::from(state.running.0) + 1) % count) as u8,
        ))
    }

    fn begin(&self, target: PartitionId, size: u32) -> Result<WriteHandle> {
        let mut state = self.state.lock();
        if state.fail_begin {
            return Err(Error::PartitionWriteFailed);
        }
        if !Self::exists(&state, target) || target == state.running {
            return Err(Error::NotSupported);
        }
        if size as usize > self.partition_size {
            return Err(Error::InvalidArgument("image larger than partition"));
        }

        state.partitions[usize::from(target.0)].fill(0xFF);
        state.erases += 1;
        Ok(Self::open(&mut state, target))
    }

    fn resume(&self, target: PartitionId) -> Result<WriteHandle> {
        let mut state = self.state.lock();
        if !Self::exists(&state, target) || target == state.running {
            return Err(Error::NotSupported);
        }
        Ok(Self::open(&mut state, target))
    }

    fn write(&self, handle: WriteHandle, offset: u32, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            return Err(Error::PartitionWriteFailed);
        }

        let target = *state
            .open
            .get(&handle)
            .ok_or(Error::InvalidArgument("write handle not open"))?;
        let start = offset as usize;
        let end = start + bytes.len();
        if end > self.partition_size {
            return Err(Error::PartitionWriteFailed);
        }

        state.partitions[usize::from(target.0)][start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn commit(&self, handle: WriteHandle) -> Result<()> {
        let mut state = self.state.lock();
        if state.open.remove(&handle).is_none() {
            return Err(Error::InvalidArgument("write handle not open"));
        }
        state.commits += 1;
        Ok(())
    }

    fn set_boot_target(&self, target: PartitionId) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_boot_select || !Self::exists(&state, target) {
            return Err(Error::BootSelectFailed);
        }
        state.boot = target;
        state.boot_selections += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ab_targets() {
        let flash = MemoryFlash::new(64);
        assert_eq!(flash.running_target(), Some(PartitionId(0)));
        assert_eq!(flash.next_update_target(), Some(PartitionId(1)));

        flash.set_boot_target(PartitionId(1)).expect("boot");
        flash.reboot();
        assert_eq!(flash.running_target(), Some(PartitionId(1)));
        assert_eq!(flash.next_update_target(), Some(PartitionId(0)));
    }

    #[test]
    fn test_single_partition_has_no_update_target() {
        let flash = MemoryFlash::with_partitions(1, 64);
        assert_eq!(flash.next_update_target(), None);
    }

    #[test]
    fn test_write_and_commit() {
        let flash = MemoryFlash::new(16);
        let handle = flash.begin(PartitionId(1), 8).expect("begin");
        flash.write(handle, 4, b"abcd").expect("write");
        flash.commit(handle).expect("commit");

        let image = flash.image(PartitionId(1)).expect("image");
        assert_eq!(&image[4..8], b"abcd");
        assert_eq!(image[0], 0xFF);
        assert!(flash.write(handle, 0, b"x").is_err());
        assert_eq!(flash.commits(), 1);
    }

    #[test]
    fn test_begin_erases_resume_does_not() {
        let flash = MemoryFlash::new(8);
        let handle = flash.begin(PartitionId(1), 8).expect("begin");
        flash.write(handle, 0, b"keep").expect("write");

        flash.reboot();
        let resumed = flash.resume(PartitionId(1)).expect("resume");
        assert_ne!(resumed, handle);
        assert_eq!(&flash.image(PartitionId(1)).expect("image")[..4], b"keep");
        assert_eq!(flash.erases(), 1);
    }

    #[test]
    fn test_begin_rejects_running_and_oversized() {
        let flash = MemoryFlash::new(8);
        assert!(matches!(
            flash.begin(PartitionId(0), 4),
            Err(Error::NotSupported)
        ));
        assert!(matches!(
            flash.begin(PartitionId(1), 9),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_failure_injection() {
        let flash = MemoryFlash::new(8);
        let handle = flash.begin(PartitionId(1), 8).expect("begin");

        flash.fail_writes(1);
        assert!(matches!(
            flash.write(handle, 0, b"x"),
            Err(Error::PartitionWriteFailed)
        ));
        flash.write(handle, 0, b"x").expect("second write");

        flash.fail_boot_select(true);
        assert!(matches!(
            flash.set_boot_target(PartitionId(1)),
            Err(Error::BootSelectFailed)
        ));
        assert_eq!(flash.boot_selections(), 0);
    }
}
