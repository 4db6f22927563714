// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Platform collaborators consumed by the upgrade controller.
//!
//! Each concern is a trait with a host implementation usable in tests and
//! simulations:
//!
//! | Trait | Host implementation |
//! |-------|---------------------|
//! | [`KvStore`] | [`MemoryStore`], [`FileStore`] |
//! | [`FirmwareStorage`] | [`MemoryFlash`] |
//! | [`MeshNode`] | [`StaticMesh`] |
//!
//! Firmware ports implement the traits over NVS, the OTA partition API and the
//! mesh stack.

pub mod flash;
pub mod kv;
pub mod mesh;

pub use flash::{FirmwareStorage, MemoryFlash, PartitionId, WriteHandle};
pub use kv::{FileStore, KvStore, MemoryStore};
pub use mesh::{MeshNode, MeshRole, StaticMesh};
