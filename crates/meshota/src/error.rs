// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for meshota
//!
//! [`Error`] is returned by every blocking operation (sender, router, upgrade
//! controller). [`StatusCode`] is its on-wire projection, carried in the
//! `error_code` field of a transfer status so that a peer can see why a node
//! is not making progress.

use thiserror::Error;

use crate::transport::frame::FrameError;

/// Result type for meshota operations
pub type Result<T> = core::result::Result<T, Error>;

/// Error type for meshota
#[derive(Debug, Error)]
pub enum Error {
    /// No upgrade session exists (and none could be restored)
    #[error("upgrade session not initialized")]
    NotInitialized,

    /// Bad sequence, size or parameter
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Ack wait, lock wait or queue wait exhausted the deadline
    #[error("operation timed out")]
    Timeout,

    /// A buffer or record could not be allocated or does not fit
    #[error("out of memory")]
    NoMemory,

    /// A fragment arrived out of order while reassembling a message
    #[error("fragment sequence mismatch: expected {expected}, got {got}")]
    SequenceMismatch {
        /// Sequence the receiver was waiting for
        expected: u8,
        /// Sequence actually dequeued
        got: u8,
    },

    /// Firmware storage rejected a chunk write
    #[error("firmware partition write failed")]
    PartitionWriteFailed,

    /// Boot target could not be switched
    #[error("boot target selection failed")]
    BootSelectFailed,

    /// The upgrade was stopped by the user or aborted
    #[error("upgrade stopped")]
    Stopped,

    /// Operation not available in the current state
    #[error("operation not supported")]
    NotSupported,

    /// Radio primitive refused or failed a transmission
    #[error("transport error")]
    TransportError,

    /// Malformed link frame
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Malformed upgrade message or persisted record
    #[error("malformed upgrade message: {0}")]
    Malformed(&'static str),

    /// Durable key-value store failure
    #[error("persistence failed: {0}")]
    Persist(String),

    /// I/O error from a file-backed collaborator
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Status code carried on the wire in a transfer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusCode {
    /// No error
    #[default]
    Ok,
    /// See [`Error::NotInitialized`]
    NotInitialized,
    /// See [`Error::InvalidArgument`]
    InvalidArgument,
    /// See [`Error::Timeout`]
    Timeout,
    /// See [`Error::NoMemory`]
    NoMemory,
    /// See [`Error::SequenceMismatch`]
    SequenceMismatch,
    /// See [`Error::PartitionWriteFailed`]
    PartitionWriteFailed,
    /// See [`Error::BootSelectFailed`]
    BootSelectFailed,
    /// See [`Error::Stopped`]
    Stopped,
    /// See [`Error::NotSupported`]
    NotSupported,
    /// Transport, persistence or any other local failure
    Failed,
    /// Code not known to this firmware version
    Other(u32),
}

impl StatusCode {
    /// Wire representation
    pub const fn to_raw(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::NotInitialized => 1,
            Self::InvalidArgument => 2,
            Self::Timeout => 3,
            Self::NoMemory => 4,
            Self::SequenceMismatch => 5,
            Self::PartitionWriteFailed => 6,
            Self::BootSelectFailed => 7,
            Self::Stopped => 8,
            Self::NotSupported => 9,
            Self::Failed => 10,
            Self::Other(raw) => raw,
        }
    }

    /// Parse a wire value; unknown values are preserved as [`StatusCode::Other`]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Ok,
            1 => Self::NotInitialized,
            2 => Self::InvalidArgument,
            3 => Self::Timeout,
            4 => Self::NoMemory,
            5 => Self::SequenceMismatch,
            6 => Self::PartitionWriteFailed,
            7 => Self::BootSelectFailed,
            8 => Self::Stopped,
            9 => Self::NotSupported,
            10 => Self::Failed,
            other => Self::Other(other),
        }
    }

    /// `true` for [`StatusCode::Ok`]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl From<&Error> for StatusCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::NotInitialized => Self::NotInitialized,
            Error::InvalidArgument(_) => Self::InvalidArgument,
            Error::Timeout => Self::Timeout,
            Error::NoMemory => Self::NoMemory,
            Error::SequenceMismatch { .. } => Self::SequenceMismatch,
            Error::PartitionWriteFailed => Self::PartitionWriteFailed,
            Error::BootSelectFailed => Self::BootSelectFailed,
            Error::Stopped => Self::Stopped,
            Error::NotSupported => Self::NotSupported,
            Error::TransportError
            | Error::Frame(_)
            | Error::Malformed(_)
            | Error::Persist(_)
            | Error::Io(_) => Self::Failed,
        }
    }
}
