//! Message traits and write helpers for single-allocation TNS serialization.
//!
//! Outbound messages implement [`Message`], which separates size calculation
//! from serialization so a whole function call (including piggybacks) can be
//! written into one exactly-sized buffer.

use crate::error::Result;
use crate::protocol::constants::*;

/// A message that can calculate its wire size and serialize to bytes.
///
/// 1. Call `wire_size()` to determine buffer capacity needed
/// 2. Allocate buffer with exact capacity
/// 3. Call `write_to()` to serialize directly into buffer
///
/// The `Sync` bound lets borrowed message batches cross await points on the
/// connection task.
pub trait Message: Sync {
    /// Calculate the serialized size in bytes (excluding packet header).
    fn wire_size(&self) -> usize;

    /// Write message content to buffer.
    ///
    /// The caller guarantees the buffer has sufficient capacity (from
    /// `wire_size()`).
    fn write_to(&self, buf: &mut Vec<u8>) -> Result<()>;
}

/// A DATA packet message: two bytes of data flags precede the content.
pub trait DataMessage: Message {
    /// Data flags for this message.
    fn data_flags(&self) -> u16 {
        0
    }

    /// Total wire size including the 2-byte data_flags prefix.
    fn data_wire_size(&self) -> usize {
        2 + self.wire_size()
    }
}

/// Wire size of a UB2 value in TNS variable-length format.
#[inline]
pub const fn ub2_wire_size(val: u16) -> usize {
    match val {
        0 => 1,
        1..=0xFF => 2,
        _ => 3,
    }
}

/// Wire size of a UB4 value in TNS variable-length format.
#[inline]
pub const fn ub4_wire_size(val: u32) -> usize {
    match val {
        0 => 1,
        1..=0xFF => 2,
        0x100..=0xFFFF => 3,
        0x10000..=0xFFFFFF => 4,
        _ => 5,
    }
}

/// Wire size of a UB8 value in TNS variable-length format.
#[inline]
pub const fn ub8_wire_size(val: u64) -> usize {
    match val {
        0 => 1,
        1..=0xFF => 2,
        0x100..=0xFFFF => 3,
        0x10000..=0xFFFFFF => 4,
        0x1000000..=0xFFFFFFFF => 5,
        0x100000000..=0xFFFFFFFFFF => 6,
        0x10000000000..=0xFFFFFFFFFFFF => 7,
        0x1000000000000..=0xFFFFFFFFFFFFFF => 8,
        _ => 9,
    }
}

/// Wire size of length-prefixed bytes (short or chunked long form).
#[inline]
pub const fn bytes_with_length_wire_size(len: usize) -> usize {
    if len == 0 {
        1
    } else if len <= TNS_MAX_SHORT_LENGTH as usize {
        1 + len
    } else {
        // Long form: 0xFE marker, then per chunk a ub4 length (worst case 5
        // bytes for the 64K chunk size used on write) plus the data, then a
        // one-byte zero-length terminator.
        let num_chunks = len.div_ceil(TNS_CHUNK_SIZE);
        1 + (num_chunks * 5) + len + 1
    }
}

/// Wire size of a length-prefixed string.
#[inline]
pub const fn str_with_length_wire_size(s: &str) -> usize {
    bytes_with_length_wire_size(s.len())
}

/// Wire size of one key-value pair in auth messages.
pub fn key_value_wire_size(key: &str, value: &str, flags: u32) -> usize {
    let key_len = key.len();
    let value_len = value.len();

    ub4_wire_size(key_len as u32)
        + bytes_with_length_wire_size(key_len)
        + ub4_wire_size(value_len as u32)
        + if value_len == 0 {
            0
        } else {
            bytes_with_length_wire_size(value_len)
        }
        + ub4_wire_size(flags)
}

/// Extension trait for writing TNS protocol data to `Vec<u8>`.
pub trait WriteExt {
    fn write_u8(&mut self, val: u8);
    fn write_u16_be(&mut self, val: u16);
    fn write_u16_le(&mut self, val: u16);
    fn write_u32_be(&mut self, val: u32);
    fn write_u64_be(&mut self, val: u64);
    fn write_bytes(&mut self, bytes: &[u8]);
    fn write_zeros(&mut self, count: usize);
    fn write_ub1(&mut self, val: u8);
    fn write_ub2(&mut self, val: u16);
    fn write_ub4(&mut self, val: u32);
    fn write_ub8(&mut self, val: u64);
    fn write_bytes_with_length(&mut self, bytes: &[u8]);
    fn write_str_with_length(&mut self, s: &str);
    fn write_key_value(&mut self, key: &str, value: &str, flags: u32);
}

impl WriteExt for Vec<u8> {
    #[inline]
    fn write_u8(&mut self, val: u8) {
        self.push(val);
    }

    #[inline]
    fn write_u16_be(&mut self, val: u16) {
        self.extend_from_slice(&val.to_be_bytes());
    }

    #[inline]
    fn write_u16_le(&mut self, val: u16) {
        self.extend_from_slice(&val.to_le_bytes());
    }

    #[inline]
    fn write_u32_be(&mut self, val: u32) {
        self.extend_from_slice(&val.to_be_bytes());
    }

    #[inline]
    fn write_u64_be(&mut self, val: u64) {
        self.extend_from_slice(&val.to_be_bytes());
    }

    #[inline]
    fn write_bytes(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }

    #[inline]
    fn write_zeros(&mut self, count: usize) {
        self.resize(self.len() + count, 0);
    }

    #[inline]
    fn write_ub1(&mut self, val: u8) {
        self.push(val);
    }

    fn write_ub2(&mut self, val: u16) {
        if val == 0 {
            self.push(0);
        } else if val <= 0xFF {
            self.push(1);
            self.push(val as u8);
        } else {
            self.push(2);
            self.push((val >> 8) as u8);
            self.push(val as u8);
        }
    }

    fn write_ub4(&mut self, val: u32) {
        if val == 0 {
            self.push(0);
        } else {
            let bytes = val.to_be_bytes();
            let leading = (val.leading_zeros() / 8) as usize;
            self.push((4 - leading) as u8);
            self.extend_from_slice(&bytes[leading..]);
        }
    }

    fn write_ub8(&mut self, val: u64) {
        if val == 0 {
            self.push(0);
        } else {
            let bytes = val.to_be_bytes();
            let leading = (val.leading_zeros() / 8) as usize;
            self.push((8 - leading) as u8);
            self.extend_from_slice(&bytes[leading..]);
        }
    }

    fn write_bytes_with_length(&mut self, bytes: &[u8]) {
        let len = bytes.len();
        if len == 0 {
            self.push(0);
        } else if len <= TNS_MAX_SHORT_LENGTH as usize {
            self.push(len as u8);
            self.extend_from_slice(bytes);
        } else {
            self.push(TNS_LONG_LENGTH_INDICATOR);
            let mut offset = 0;
            while offset < len {
                let chunk_len = std::cmp::min(len - offset, TNS_CHUNK_SIZE);
                self.write_ub4(chunk_len as u32);
                self.extend_from_slice(&bytes[offset..offset + chunk_len]);
                offset += chunk_len;
            }
            self.write_ub4(0);
        }
    }

    #[inline]
    fn write_str_with_length(&mut self, s: &str) {
        self.write_bytes_with_length(s.as_bytes());
    }

    fn write_key_value(&mut self, key: &str, value: &str, flags: u32) {
        let key_bytes = key.as_bytes();
        let value_bytes = value.as_bytes();

        self.write_ub4(key_bytes.len() as u32);
        self.write_bytes_with_length(key_bytes);
        self.write_ub4(value_bytes.len() as u32);
        if !value_bytes.is_empty() {
            self.write_bytes_with_length(value_bytes);
        }
        self.write_ub4(flags);
    }
}

/// Write a TNS packet header.
///
/// Large-SDU connections (protocol version 315+) use a 4-byte length; earlier
/// versions a 2-byte length followed by a 2-byte zero.
pub fn write_packet_header(
    buf: &mut Vec<u8>,
    packet_type: u8,
    packet_flags: u8,
    total_size: usize,
    use_large_sdu: bool,
) {
    if use_large_sdu {
        buf.write_u32_be(total_size as u32);
    } else {
        buf.write_u16_be(total_size as u16);
        buf.write_u16_be(0);
    }
    buf.write_u8(packet_type);
    buf.write_u8(packet_flags);
    buf.write_u16_be(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ub2_wire_size() {
        assert_eq!(ub2_wire_size(0), 1);
        assert_eq!(ub2_wire_size(1), 2);
        assert_eq!(ub2_wire_size(255), 2);
        assert_eq!(ub2_wire_size(256), 3);
        assert_eq!(ub2_wire_size(65535), 3);
    }

    #[test]
    fn test_ub4_wire_size() {
        assert_eq!(ub4_wire_size(0), 1);
        assert_eq!(ub4_wire_size(255), 2);
        assert_eq!(ub4_wire_size(65535), 3);
        assert_eq!(ub4_wire_size(16777215), 4);
        assert_eq!(ub4_wire_size(u32::MAX), 5);
    }

    #[test]
    fn test_write_ub4_big_endian() {
        let mut buf = Vec::new();
        buf.write_ub4(0x12345678);
        assert_eq!(buf, vec![4, 0x12, 0x34, 0x56, 0x78]);

        buf.clear();
        buf.write_ub4(0x8061);
        assert_eq!(buf, vec![2, 0x80, 0x61]);
    }

    #[test]
    fn test_wire_size_matches_written() {
        let mut buf = Vec::new();

        for val in [0u32, 1, 255, 256, 65535, 65536, 0xFFFFFF, u32::MAX] {
            buf.clear();
            buf.write_ub4(val);
            assert_eq!(buf.len(), ub4_wire_size(val), "UB4 size mismatch for {val}");
        }

        for len in [0usize, 1, 100, 252, 253, 70_000, 150_000] {
            buf.clear();
            let data = vec![0u8; len];
            buf.write_bytes_with_length(&data);
            // The size helper over-reserves for chunked values whose ub4
            // chunk lengths encode shorter than the 5-byte worst case.
            assert!(
                buf.len() <= bytes_with_length_wire_size(len),
                "bytes_with_length size mismatch for len={len}"
            );
            if len <= TNS_MAX_SHORT_LENGTH as usize {
                assert_eq!(buf.len(), bytes_with_length_wire_size(len));
            }
        }
    }

    #[test]
    fn test_write_key_value_size() {
        let mut buf = Vec::new();
        buf.write_key_value("AUTH_TERMINAL", "unknown", 0);
        assert_eq!(buf.len(), key_value_wire_size("AUTH_TERMINAL", "unknown", 0));
    }

    #[test]
    fn test_packet_header_layouts() {
        let mut buf = Vec::new();
        write_packet_header(&mut buf, TNS_PACKET_TYPE_DATA, 0, 100, false);
        assert_eq!(buf.len(), PACKET_HEADER_SIZE);
        assert_eq!(buf[0..2], [0, 100]);
        assert_eq!(buf[2..4], [0, 0]);
        assert_eq!(buf[4], TNS_PACKET_TYPE_DATA);

        buf.clear();
        write_packet_header(&mut buf, TNS_PACKET_TYPE_DATA, 0, 100, true);
        assert_eq!(buf.len(), PACKET_HEADER_SIZE);
        assert_eq!(buf[0..4], [0, 0, 0, 100]);
        assert_eq!(buf[4], TNS_PACKET_TYPE_DATA);
    }
}
