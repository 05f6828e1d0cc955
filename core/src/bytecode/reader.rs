//! Positional cursor over a raw module blob.
//!
//! All multi-byte quantities on the wire are little-endian. Readers fail with
//! an error on overread and leave the cursor unspecified; the loader treats
//! any failure as fatal and aborts the whole load.

use anyhow::{Result, ensure};

/// Maximum number of bytes a varint may occupy (7 data bits each).
const VARINT_MAX_BYTES: usize = 5;

pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        ensure!(self.pos < self.bytes.len(), "unexpected end of module at byte {}", self.pos);
        let v = self.bytes[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let slice = self.take(4)?;
        Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32_le()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let slice = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(slice);
        Ok(f64::from_le_bytes(buf))
    }

    /// LEB128-style varint: 7 data bits per byte, MSB is the continuation bit.
    pub fn read_varint(&mut self) -> Result<u32> {
        let mut value: u32 = 0;
        for i in 0..VARINT_MAX_BYTES {
            let byte = self.read_u8()?;
            value |= u32::from(byte & 0x7F) << (i * 7);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        anyhow::bail!("varint exceeds {} bytes at byte {}", VARINT_MAX_BYTES, self.pos);
    }

    pub fn read_string(&mut self, len: usize) -> Result<&'a str> {
        let slice = self.take(len)?;
        std::str::from_utf8(slice).map_err(|_| anyhow::anyhow!("string table entry is not valid UTF-8"))
    }

    /// Consume the rest of the stream, lossily decoded. Used for the
    /// compile-error payload carried by version-0 modules.
    pub fn read_rest_lossy(&mut self) -> String {
        let rest = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        String::from_utf8_lossy(rest).into_owned()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        ensure!(
            self.remaining() >= len,
            "unexpected end of module: need {} bytes at byte {}, have {}",
            len,
            self.pos,
            self.remaining()
        );
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}
