// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared decrementing deadline.
//!
//! A [`Deadline`] is computed once per blocking call and queried for the
//! remaining budget at every wait, so that nested retries can never exceed the
//! caller's total timeout.

use std::time::{Duration, Instant};

/// Point in time after which a blocking call gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    /// `None` = wait forever.
    at: Option<Instant>,
}

impl Deadline {
    /// Deadline `timeout` from now. Timeouts too large to represent wait forever.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
        }
    }

    /// Deadline that never expires.
    pub const fn never() -> Self {
        Self { at: None }
    }

    /// Remaining budget, `None` when unbounded. Saturates at zero.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// `true` once the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }
}
