// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Mesh membership accessors.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::error::Result;

/// Position of this node in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshRole {
    /// Mesh root, connected to the upstream network.
    Root,
    /// Intermediate node.
    Node,
    /// Leaf node.
    Leaf,
    /// Plain station outside the mesh.
    Station,
}

impl MeshRole {
    /// Root and stations hold the image being distributed; they never
    /// receive it over the mesh.
    pub const fn is_source(self) -> bool {
        matches!(self, MeshRole::Root | MeshRole::Station)
    }
}

/// Mesh stack accessors used during an upgrade.
pub trait MeshNode: Send + Sync {
    /// Current role.
    fn role(&self) -> MeshRole;

    /// Child association keepalive, in seconds.
    fn keepalive_timeout(&self) -> u32;

    /// Change the child association keepalive.
    fn set_keepalive_timeout(&self, secs: u32) -> Result<()>;
}

/// Mesh node with a fixed role, recording keepalive changes.
#[derive(Debug)]
pub struct StaticMesh {
    role: Mutex<MeshRole>,
    keepalive: AtomicU32,
    history: Mutex<Vec<u32>>,
}

impl StaticMesh {
    /// Node with `role` and a keepalive of `keepalive_secs`.
    pub fn new(role: MeshRole, keepalive_secs: u32) -> Self {
        Self {
            role: Mutex::new(role),
            keepalive: AtomicU32::new(keepalive_secs),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Change the role (e.g. after a root election).
    pub fn set_role(&self, role: MeshRole) {
        *self.role.lock() = role;
    }

    /// Every keepalive value set so far, in order.
    pub fn keepalive_history(&self) -> Vec<u32> {
        self.history.lock().clone()
    }
}

impl MeshNode for StaticMesh {
    fn role(&self) -> MeshRole {
        *self.role.lock()
    }

    fn keepalive_timeout(&self) -> u32 {
        self.keepalive.load(Ordering::Acquire)
    }

    fn set_keepalive_timeout(&self, secs: u32) -> Result<()> {
        self.keepalive.store(secs, Ordering::Release);
        self.history.lock().push(secs);
        Ok(())
    }
}
