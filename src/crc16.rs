//! CRC16-XMODEM and hash-slot computation for cluster routing.
//!
//! Every key maps to one of 16384 slots: `CRC16(tag) % 16384`, where `tag`
//! is the `{...}` hash tag when the key has a non-empty one, or the whole key.

/// Number of hash slots in a cluster.
pub const SLOT_COUNT: u16 = 16384;

/// CRC16-XMODEM lookup table (polynomial 0x1021).
static CRC16_TABLE: [u16; 256] = {
    let mut table = [0u16; 256];
    let mut i = 0u16;
    while i < 256 {
        let mut crc = i << 8;
        let mut j = 0;
        while j < 8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
};

/// Compute CRC16-XMODEM checksum of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        let idx = ((crc >> 8) ^ (byte as u16)) as usize;
        crc = (crc << 8) ^ CRC16_TABLE[idx];
    }
    crc
}

/// The portion of `key` that is hashed.
///
/// Scans for the first `{`, then for the first `}` after it. With no `{`,
/// no closing `}`, or nothing between the braces, the whole key is used.
pub fn extract_hash_tag(key: &[u8]) -> &[u8] {
    let Some(open) = memchr::memchr(b'{', key) else {
        return key;
    };
    match memchr::memchr(b'}', &key[open + 1..]) {
        Some(close) if close > 0 => &key[open + 1..open + 1 + close],
        _ => key,
    }
}

/// Hash slot for a key.
pub fn hash_slot(key: &[u8]) -> u16 {
    crc16(extract_hash_tag(key)) % SLOT_COUNT
}

// ── Tests ──────────────────────────────────────────────────────────
