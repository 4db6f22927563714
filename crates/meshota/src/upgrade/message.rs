// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Upgrade wire messages.
//!
//! Every message starts with a one-byte kind tag. Integers are little-endian.
//!
//! ```text
//! Status: | kind (1) | name (32, NUL padded) | total (4) | written (4) | error (4) | bitmap? |
//! Data:   | kind (1) | sequence (2) | size (2) | bytes (size) |
//! ```
//!
//! The status bitmap is only sent while a transfer is partial; a decoder
//! treats any bytes after the fixed header as the bitmap.

use crate::config::UpgradeConfig;
use crate::error::{Error, Result, StatusCode};

/// Bytes reserved for the firmware name, terminator included.
pub const FIRMWARE_NAME_LEN: usize = 32;

/// Fixed part of a status message.
pub const STATUS_HEADER_LEN: usize = 1 + FIRMWARE_NAME_LEN + 4 + 4 + 4;

/// Fixed part of a data message.
pub const DATA_HEADER_LEN: usize = 1 + 2 + 2;

/// Message kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// [`TransferStatus`].
    Status = 0x01,
    /// [`DataPacket`].
    Data = 0x02,
}

impl MessageKind {
    /// Parse a tag byte.
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(MessageKind::Status),
            0x02 => Some(MessageKind::Data),
            _ => None,
        }
    }

    /// Kind of an encoded message, if recognised.
    pub fn of(bytes: &[u8]) -> Option<Self> {
        bytes.first().copied().and_then(Self::from_tag)
    }
}

/// Largest upgrade message for `config`, in bytes.
pub fn max_message_len(config: &UpgradeConfig) -> usize {
    (STATUS_HEADER_LEN + config.bitmap_len()).max(DATA_HEADER_LEN + config.chunk_size)
}

/// One bit per chunk, set once the chunk is durably written.
///
/// Bit `n` lives in byte `n / 8` at position `n % 8` (LSB first).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressBitmap {
    bytes: Vec<u8>,
}

impl ProgressBitmap {
    /// Empty bitmap of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0; len],
        }
    }

    /// Bitmap over raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// `true` if the bitmap holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether chunk `seq` is marked. Out-of-range chunks are unmarked.
    #[inline]
    pub fn get(&self, seq: usize) -> bool {
        self.bytes
            .get(seq / 8)
            .is_some_and(|byte| byte & (1 << (seq % 8)) != 0)
    }

    /// Mark chunk `seq`. Returns `false` if it lies outside the bitmap.
    #[inline]
    pub fn set(&mut self, seq: usize) -> bool {
        match self.bytes.get_mut(seq / 8) {
            Some(byte) => {
                *byte |= 1 << (seq % 8);
                true
            }
            None => false,
        }
    }

    /// Unmark every chunk.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    /// Mark every chunk.
    pub fn fill(&mut self) {
        self.bytes.fill(0xFF);
    }

    /// Grow or shrink to `len` bytes, keeping existing bits.
    pub fn resize(&mut self, len: usize) {
        self.bytes.resize(len, 0);
    }

    /// Number of marked chunks.
    pub fn count(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }
}

/// Transfer progress of one firmware image.
///
/// Sent by the source to announce an image and by the target to report
/// progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferStatus {
    /// Firmware name; at most [`FIRMWARE_NAME_LEN`]` - 1` bytes go on the wire.
    pub name: String,
    /// Image size in bytes.
    pub total_size: u32,
    /// Bytes durably written.
    pub written_size: u32,
    /// Result of the last operation.
    pub error_code: StatusCode,
    /// Per-chunk progress.
    pub progress: ProgressBitmap,
}

impl TransferStatus {
    /// Announcement of an image, no progress.
    pub fn announce(name: &str, total_size: u32) -> Self {
        Self {
            name: name.to_string(),
            total_size,
            ..Self::default()
        }
    }

    /// `0 < written < total`.
    pub fn is_partial(&self) -> bool {
        self.written_size > 0 && self.written_size < self.total_size
    }

    /// Every byte written.
    pub fn is_complete(&self) -> bool {
        self.written_size == self.total_size
    }

    /// Written share of the image, in whole percent.
    pub fn percent(&self) -> u8 {
        if self.total_size == 0 {
            return 100;
        }
        (u64::from(self.written_size) * 100 / u64::from(self.total_size)).min(100) as u8
    }

    /// Encode, carrying the bitmap only while the transfer is partial.
    pub fn encode(&self) -> Vec<u8> {
        self.encode_inner(self.is_partial())
    }

    /// Encode without the bitmap.
    pub fn encode_compact(&self) -> Vec<u8> {
        self.encode_inner(false)
    }

    /// Encode with the bitmap regardless of progress.
    pub fn encode_full(&self) -> Vec<u8> {
        self.encode_inner(true)
    }

    fn encode_inner(&self, with_bitmap: bool) -> Vec<u8> {
        let bitmap: &[u8] = if with_bitmap { self.progress.as_bytes() } else { &[] };
        let mut buf = Vec::with_capacity(STATUS_HEADER_LEN + bitmap.len());

        buf.push(MessageKind::Status as u8);
        let name = self.name.as_bytes();
        let name_len = name.len().min(FIRMWARE_NAME_LEN - 1);
        buf.extend_from_slice(&name[..name_len]);
        buf.resize(1 + FIRMWARE_NAME_LEN, 0);
        buf.extend_from_slice(&self.total_size.to_le_bytes());
        buf.extend_from_slice(&self.written_size.to_le_bytes());
        buf.extend_from_slice(&self.error_code.to_raw().to_le_bytes());
        buf.extend_from_slice(bitmap);
        buf
    }

    /// Decode a status message.
    ///
    /// # Errors
    ///
    /// `Malformed` if the buffer is shorter than the fixed header or is not
    /// tagged as a status.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < STATUS_HEADER_LEN {
            return Err(Error::Malformed("status message truncated"));
        }
        if MessageKind::of(bytes) != Some(MessageKind::Status) {
            return Err(Error::Malformed("not a status message"));
        }

        let name_field = &bytes[1..1 + FIRMWARE_NAME_LEN];
        let name_end = name_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(FIRMWARE_NAME_LEN);
        let name = String::from_utf8_lossy(&name_field[..name_end]).into_owned();

        let mut pos = 1 + FIRMWARE_NAME_LEN;
        let total_size = read_u32(bytes, &mut pos);
        let written_size = read_u32(bytes, &mut pos);
        let error_code = StatusCode::from_raw(read_u32(bytes, &mut pos));

        Ok(Self {
            name,
            total_size,
            written_size,
            error_code,
            progress: ProgressBitmap::from_bytes(&bytes[pos..]),
        })
    }
}

/// One firmware chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    /// Chunk index; the chunk lives at `sequence * chunk_size`.
    pub sequence: u16,
    /// Declared chunk length.
    pub size: u16,
    /// Chunk bytes.
    pub data: Vec<u8>,
}

impl DataPacket {
    /// Packet carrying `data` as chunk `sequence`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `data` does not fit a 16-bit size.
    pub fn new(sequence: u16, data: &[u8]) -> Result<Self> {
        let size = u16::try_from(data.len())
            .map_err(|_| Error::InvalidArgument("chunk larger than 65535 bytes"))?;
        Ok(Self {
            sequence,
            size,
            data: data.to_vec(),
        })
    }

    /// Encode to wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(DATA_HEADER_LEN + self.data.len());
        buf.push(MessageKind::Data as u8);
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Decode a data message. The declared size is kept as sent; checking it
    /// against the payload is left to the receiver.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < DATA_HEADER_LEN {
            return Err(Error::Malformed("data message truncated"));
        }
        if MessageKind::of(bytes) != Some(MessageKind::Data) {
            return Err(Error::Malformed("not a data message"));
        }
        Ok(Self {
            sequence: u16::from_le_bytes([bytes[1], bytes[2]]),
            size: u16::from_le_bytes([bytes[3], bytes[4]]),
            data: bytes[DATA_HEADER_LEN..].to_vec(),
        })
    }
}

/// Tagged upgrade message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeMessage {
    /// Announcement or progress report.
    Status(TransferStatus),
    /// Firmware chunk.
    Data(DataPacket),
}

impl UpgradeMessage {
    /// Encode to wire format.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            UpgradeMessage::Status(status) => status.encode(),
            UpgradeMessage::Data(packet) => packet.encode(),
        }
    }

    /// Decode by kind tag.
    ///
    /// # Errors
    ///
    /// `Malformed` for an empty buffer, an unknown tag or a truncated body.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        match MessageKind::of(bytes) {
            Some(MessageKind::Status) => TransferStatus::decode(bytes).map(UpgradeMessage::Status),
            Some(MessageKind::Data) => DataPacket::decode(bytes).map(UpgradeMessage::Data),
            None => Err(Error::Malformed("unknown message kind")),
        }
    }
}

#[inline]
fn read_u32(bytes: &[u8], pos: &mut usize) -> u32 {
    let value = u32::from_le_bytes([bytes[*pos], bytes[*pos + 1], bytes[*pos + 2], bytes[*pos + 3]]);
    *pos += 4;
    value
}
