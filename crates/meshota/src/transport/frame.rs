// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Link frame encoding and decoding.
//!
//! # Wire Format
//!
//! ```text
//! +--------+---------+-----+-----+--------------+-----------+-------------+---------+
//! | marker | channel | crc | seq | fragment_len | total_len | dedup_token | payload |
//! | 'N''O' |   u8    | u8  | u8  |      u8      |  u16 LE   |   u32 LE    |  (...)  |
//! +--------+---------+-----+-----+--------------+-----------+-------------+---------+
//! ```
//!
//! - `crc` = CRC-8 over `payload[..fragment_len]`
//! - `total_len` = length of the whole message this fragment belongs to
//! - `dedup_token` = random per transmission, lets the receiver drop an
//!   immediate retransmission of the same frame

use thiserror::Error;

use super::crc::checksum8;
use super::Channel;

/// Frame marker filtering out foreign traffic on the same radio.
pub const FRAME_MARKER: [u8; 2] = [0x4E, 0x4F];

/// Fixed header size.
pub const HEADER_SIZE: usize = 12;

/// Largest radio datagram the frame format is sized for.
pub const RADIO_MTU: usize = 250;

/// Default maximum payload per frame (`RADIO_MTU - HEADER_SIZE`).
pub const DEFAULT_MAX_PAYLOAD: usize = RADIO_MTU - HEADER_SIZE;

/// Error during frame encoding or decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Output buffer too small for encoding.
    #[error("buffer too small for frame")]
    BufferTooSmall,
    /// Input shorter than the header or than the declared fragment.
    #[error("truncated frame")]
    Truncated,
    /// Marker bytes do not match.
    #[error("invalid frame marker")]
    InvalidMarker,
    /// Channel id outside the known set.
    #[error("unknown channel {0}")]
    UnknownChannel(u8),
    /// Fragment longer than the configured maximum payload.
    #[error("fragment of {0} bytes exceeds maximum payload")]
    FragmentTooLarge(usize),
    /// Payload checksum failed.
    #[error("checksum mismatch")]
    ChecksumMismatch,
}

/// One radio-sized transmission unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFrame {
    /// Logical channel.
    pub channel: Channel,
    /// Fragment index within the message (0 = first).
    pub sequence: u8,
    /// Length of the complete message.
    pub total_len: u16,
    /// Per-transmission duplicate filter token.
    pub dedup_token: u32,
    /// Fragment payload.
    pub payload: Vec<u8>,
}

impl LinkFrame {
    /// Build a frame around `payload`.
    pub fn new(
        channel: Channel,
        sequence: u8,
        total_len: u16,
        dedup_token: u32,
        payload: &[u8],
    ) -> Result<Self, FrameError> {
        if payload.len() > usize::from(u8::MAX) {
            return Err(FrameError::FragmentTooLarge(payload.len()));
        }
        Ok(Self {
            channel,
            sequence,
            total_len,
            dedup_token,
            payload: payload.to_vec(),
        })
    }

    /// Checksum of the payload as it goes on the wire.
    #[inline]
    pub fn checksum(&self) -> u8 {
        checksum8(&self.payload)
    }

    /// Encoded size in bytes.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode into `buf`, returning the number of bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, FrameError> {
        let len = self.encoded_len();
        if buf.len() < len {
            return Err(FrameError::BufferTooSmall);
        }

        buf[0..2].copy_from_slice(&FRAME_MARKER);
        buf[2] = self.channel.id();
        buf[3] = self.checksum();
        buf[4] = self.sequence;
        buf[5] = self.payload.len() as u8;
        buf[6..8].copy_from_slice(&self.total_len.to_le_bytes());
        buf[8..12].copy_from_slice(&self.dedup_token.to_le_bytes());
        buf[HEADER_SIZE..len].copy_from_slice(&self.payload);

        Ok(len)
    }

    /// Encode into a freshly allocated vector.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.encoded_len()];
        // Buffer is sized from encoded_len, encode cannot fail.
        let _ = self.encode(&mut buf);
        buf
    }

    /// Decode a frame, rejecting fragments longer than `max_payload`.
    ///
    /// # Errors
    ///
    /// - `Truncated` if `buf` is shorter than the header or the fragment
    /// - `InvalidMarker` if the marker does not match
    /// - `UnknownChannel` if the channel id is not known
    /// - `FragmentTooLarge` if `fragment_len > max_payload`
    /// - `ChecksumMismatch` if the payload checksum fails
    pub fn decode(buf: &[u8], max_payload: usize) -> Result<Self, FrameError> {
        if buf.len() < HEADER_SIZE {
            return Err(FrameError::Truncated);
        }
        if buf[0..2] != FRAME_MARKER {
            return Err(FrameError::InvalidMarker);
        }

        let channel = Channel::from_id(buf[2]).ok_or(FrameError::UnknownChannel(buf[2]))?;
        let crc = buf[3];
        let sequence = buf[4];
        let fragment_len = usize::from(buf[5]);
        let total_len = u16::from_le_bytes([buf[6], buf[7]]);
        let dedup_token = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);

        if fragment_len > max_payload {
            return Err(FrameError::FragmentTooLarge(fragment_len));
        }
        let end = HEADER_SIZE + fragment_len;
        if buf.len() < end {
            return Err(FrameError::Truncated);
        }

        let payload = &buf[HEADER_SIZE..end];
        if checksum8(payload) != crc {
            return Err(FrameError::ChecksumMismatch);
        }

        Ok(Self {
            channel,
            sequence,
            total_len,
            dedup_token,
            payload: payload.to_vec(),
        })
    }
}
