// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CRC-8 checksum for link frame payloads.
//!
//! # Parameters
//!
//! | Parameter | Value |
//! |-----------|-------|
//! | Polynomial | 0x31 (reflected 0x8C) |
//! | Init | 0xFF |
//! | RefIn | true |
//! | RefOut | true |
//! | XorOut | 0x00 |
//!
//! The checksum covers the payload only, never the header.

/// Reflected polynomial.
const POLY: u8 = 0x8C;

/// Initial value for CRC calculation.
const INIT: u8 = 0xFF;

/// Precomputed lookup table, generated at compile time.
const CRC_TABLE: [u8; 256] = {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut j = 0;
        while j < 8 {
            if crc & 0x01 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Calculate the 8-bit checksum of `data`.
#[inline]
#[must_use]
pub fn checksum8(data: &[u8]) -> u8 {
    checksum8_update(INIT, data)
}

/// Update an existing checksum with more data.
#[inline]
#[must_use]
pub fn checksum8_update(crc: u8, data: &[u8]) -> u8 {
    let mut crc = crc;
    for &byte in data {
        crc = CRC_TABLE[(crc ^ byte) as usize];
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bitwise reference implementation.
    fn checksum8_slow(data: &[u8]) -> u8 {
        let mut crc = INIT;
        for &byte in data {
            crc ^= byte;
            for _ in 0..8 {
                crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
            }
        }
        crc
    }

    #[test]
    fn test_checksum8_empty_is_init() {
        assert_eq!(checksum8(&[]), INIT);
    }

    #[test]
    fn test_checksum8_matches_bitwise() {
        let data: Vec<u8> = (0..=255u8).collect();
        assert_eq!(checksum8(&data), checksum8_slow(&data));
        assert_eq!(checksum8(b"123456789"), checksum8_slow(b"123456789"));
    }

    #[test]
    fn test_checksum8_streaming() {
        let data = b"firmware chunk payload";
        let (a, b) = data.split_at(7);
        assert_eq!(checksum8_update(checksum8(a), b), checksum8(data));
    }

    #[test]
    fn test_checksum8_detects_bit_flip() {
        let mut data = *b"hello radio";
        let crc = checksum8(&data);
        data[3] ^= 0x10;
        assert_ne!(checksum8(&data), crc);
    }
}
