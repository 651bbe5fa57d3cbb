//! Buffer utilities for reading and writing TNS protocol data.

use crate::error::{Error, Result};
use crate::protocol::constants::*;
use bytes::{BufMut, Bytes, BytesMut};

#[track_caller]
fn underflow(needed: usize, available: usize) -> Error {
    Error::decoding(format!("need {} bytes, have {}", needed, available))
}

/// A buffer for reading TNS protocol data.
pub struct ReadBuffer {
    data: Bytes,
    pos: usize,
}

impl ReadBuffer {
    /// Create a new read buffer from bytes.
    pub fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    /// Get the current position in the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Get the remaining bytes in the buffer.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Check if the buffer has at least `n` bytes remaining.
    pub fn has_remaining(&self, n: usize) -> bool {
        self.remaining() >= n
    }

    /// Get a slice of the remaining data.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    /// Skip `n` bytes.
    #[track_caller]
    pub fn skip(&mut self, n: usize) -> Result<()> {
        if !self.has_remaining(n) {
            return Err(underflow(n, self.remaining()));
        }
        self.pos += n;
        Ok(())
    }

    /// Read a single byte.
    #[track_caller]
    pub fn read_u8(&mut self) -> Result<u8> {
        if !self.has_remaining(1) {
            return Err(underflow(1, self.remaining()));
        }
        let val = self.data[self.pos];
        self.pos += 1;
        Ok(val)
    }

    /// Read a big-endian u16.
    #[track_caller]
    pub fn read_u16_be(&mut self) -> Result<u16> {
        if !self.has_remaining(2) {
            return Err(underflow(2, self.remaining()));
        }
        let val = u16::from_be_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(val)
    }

    /// Read a little-endian u16.
    #[track_caller]
    pub fn read_u16_le(&mut self) -> Result<u16> {
        if !self.has_remaining(2) {
            return Err(underflow(2, self.remaining()));
        }
        let val = u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(val)
    }

    /// Read a big-endian u32.
    #[track_caller]
    pub fn read_u32_be(&mut self) -> Result<u32> {
        if !self.has_remaining(4) {
            return Err(underflow(4, self.remaining()));
        }
        let val = u32::from_be_bytes([
            self.data[self.pos],
            self.data[self.pos + 1],
            self.data[self.pos + 2],
            self.data[self.pos + 3],
        ]);
        self.pos += 4;
        Ok(val)
    }

    /// Read raw bytes.
    #[track_caller]
    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes> {
        if !self.has_remaining(n) {
            return Err(underflow(n, self.remaining()));
        }
        let bytes = self.data.slice(self.pos..self.pos + n);
        self.pos += n;
        Ok(bytes)
    }

    /// Read a UB1 value.
    pub fn read_ub1(&mut self) -> Result<u8> {
        self.read_u8()
    }

    /// Read a variable-length u16 (Oracle's UB2 format).
    pub fn read_ub2(&mut self) -> Result<u16> {
        let length = self.read_u8()?;
        match length {
            0 => Ok(0),
            1 => Ok(self.read_u8()? as u16),
            2 => {
                let b1 = self.read_u8()? as u16;
                let b2 = self.read_u8()? as u16;
                Ok((b1 << 8) | b2)
            }
            _ => Err(Error::decoding(format!("invalid UB2 length: {}", length))),
        }
    }

    /// Read a variable-length u32 (Oracle's UB4 format).
    pub fn read_ub4(&mut self) -> Result<u32> {
        let length = self.read_u8()?;
        if length == 0 {
            return Ok(0);
        }
        if length & 0x80 != 0 || length > 4 {
            return Err(Error::decoding(format!("invalid UB4 length: {}", length)));
        }
        let mut val: u32 = 0;
        for _ in 0..length {
            val = (val << 8) | (self.read_u8()? as u32);
        }
        Ok(val)
    }

    /// Read a variable-length u64 (Oracle's UB8 format).
    pub fn read_ub8(&mut self) -> Result<u64> {
        let length = self.read_u8()?;
        if length == 0 {
            return Ok(0);
        }
        if length & 0x80 != 0 || length > 8 {
            return Err(Error::decoding(format!("invalid UB8 length: {}", length)));
        }
        let mut val: u64 = 0;
        for _ in 0..length {
            val = (val << 8) | (self.read_u8()? as u64);
        }
        Ok(val)
    }

    /// Skip a UB4 value without materializing it.
    pub fn skip_ub4(&mut self) -> Result<()> {
        let length = self.read_u8()?;
        if length > 0 {
            self.skip(length as usize)?;
        }
        Ok(())
    }

    /// Read length-prefixed bytes.
    ///
    /// Three schemes coexist on the wire: a short length (one byte, up to
    /// 252), the null indicators (0 and 255), and the long form (254 followed
    /// by chunked data terminated by a zero-length chunk). The escape byte
    /// (253) introduces a one-byte special token which decodes to null.
    pub fn read_bytes_with_length(&mut self) -> Result<Option<Bytes>> {
        let length = self.read_u8()?;
        match length {
            0 | TNS_NULL_LENGTH_INDICATOR => Ok(None),
            TNS_ESCAPE_CHAR => {
                let _token = self.read_u8()?;
                Ok(None)
            }
            TNS_LONG_LENGTH_INDICATOR => {
                let mut result = BytesMut::new();
                loop {
                    let chunk_len = self.read_ub4()?;
                    if chunk_len == 0 {
                        break;
                    }
                    let chunk = self.read_bytes(chunk_len as usize)?;
                    result.extend_from_slice(&chunk);
                }
                Ok(Some(result.freeze()))
            }
            n => Ok(Some(self.read_bytes(n as usize)?)),
        }
    }

    /// Read a length-prefixed string (lossy UTF-8).
    pub fn read_str_with_length(&mut self) -> Result<Option<String>> {
        Ok(self
            .read_bytes_with_length()?
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string()))
    }

    /// Skip length-prefixed bytes that may be chunked.
    pub fn skip_raw_bytes_chunked(&mut self) -> Result<()> {
        let length = self.read_u8()?;
        if length != TNS_LONG_LENGTH_INDICATOR {
            self.skip(length as usize)?;
        } else {
            loop {
                let chunk_len = self.read_ub4()?;
                if chunk_len == 0 {
                    break;
                }
                self.skip(chunk_len as usize)?;
            }
        }
        Ok(())
    }
}

/// A buffer for writing TNS protocol data.
pub struct WriteBuffer {
    data: BytesMut,
}

impl WriteBuffer {
    /// Create a new write buffer with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(8192)
    }

    /// Create a new write buffer with specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
        }
    }

    /// Get the current length of the buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the buffer contents as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Freeze the buffer into immutable bytes.
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }

    /// Clear the buffer, keeping its capacity for reuse.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, val: u8) {
        self.data.put_u8(val);
    }

    /// Write a big-endian u16.
    pub fn write_u16_be(&mut self, val: u16) {
        self.data.put_u16(val);
    }

    /// Write a little-endian u16.
    pub fn write_u16_le(&mut self, val: u16) {
        self.data.put_u16_le(val);
    }

    /// Write a big-endian u32.
    pub fn write_u32_be(&mut self, val: u32) {
        self.data.put_u32(val);
    }

    /// Write a big-endian u64.
    pub fn write_u64_be(&mut self, val: u64) {
        self.data.put_u64(val);
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Write a UB1 value.
    pub fn write_ub1(&mut self, val: u8) {
        self.write_u8(val);
    }

    /// Write a variable-length u16 (Oracle's UB2 format).
    pub fn write_ub2(&mut self, val: u16) {
        if val == 0 {
            self.write_u8(0);
        } else if val <= 0xff {
            self.write_u8(1);
            self.write_u8(val as u8);
        } else {
            self.write_u8(2);
            self.write_u8((val >> 8) as u8);
            self.write_u8(val as u8);
        }
    }

    /// Write a variable-length u32 (Oracle's UB4 format).
    pub fn write_ub4(&mut self, val: u32) {
        if val == 0 {
            self.write_u8(0);
        } else {
            let bytes = val.to_be_bytes();
            let leading = (val.leading_zeros() / 8) as usize;
            self.write_u8((4 - leading) as u8);
            self.data.extend_from_slice(&bytes[leading..]);
        }
    }

    /// Write a variable-length u64 (Oracle's UB8 format).
    pub fn write_ub8(&mut self, val: u64) {
        if val == 0 {
            self.write_u8(0);
        } else {
            let bytes = val.to_be_bytes();
            let leading = (val.leading_zeros() / 8) as usize;
            self.write_u8((8 - leading) as u8);
            self.data.extend_from_slice(&bytes[leading..]);
        }
    }

    /// Write bytes with a length prefix, chunking long values.
    pub fn write_bytes_with_length(&mut self, bytes: &[u8]) {
        let len = bytes.len();
        if len == 0 {
            self.write_u8(0);
        } else if len <= TNS_MAX_SHORT_LENGTH as usize {
            self.write_u8(len as u8);
            self.write_bytes(bytes);
        } else {
            self.write_u8(TNS_LONG_LENGTH_INDICATOR);
            let mut offset = 0;
            while offset < len {
                let chunk_len = std::cmp::min(len - offset, TNS_CHUNK_SIZE);
                self.write_ub4(chunk_len as u32);
                self.write_bytes(&bytes[offset..offset + chunk_len]);
                offset += chunk_len;
            }
            self.write_ub4(0);
        }
    }

    /// Write a string with a length prefix.
    pub fn write_str_with_length(&mut self, s: &str) {
        self.write_bytes_with_length(s.as_bytes());
    }

    /// Write padding zeros.
    pub fn write_zeros(&mut self, count: usize) {
        self.data.resize(self.data.len() + count, 0);
    }
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}
