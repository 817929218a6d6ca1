//! Byte-level primitives of the virtualization wire format.
//!
//! Counts and table indices are LEB128 varints; geometry is written as
//! milli-points so a round trip is exact.

use crate::error::FillError;
use crate::types::{Color, Pt};

#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_varint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    /// Zig-zag so small negative numbers stay short.
    pub fn write_signed(&mut self, value: i64) {
        self.write_varint(((value << 1) ^ (value >> 63)) as u64);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_varint(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_bits().to_le_bytes());
    }

    pub fn write_pt(&mut self, value: Pt) {
        self.write_signed(value.to_milli_i64());
    }

    pub fn write_color(&mut self, color: Color) {
        self.write_f32(color.r);
        self.write_f32(color.g);
        self.write_f32(color.b);
    }
}

/// Cursor over one stream. Every failure is a [`FillError::MalformedStream`]
/// carrying the stream id and byte position.
#[derive(Debug)]
pub struct ByteReader<'a> {
    stream: u64,
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(stream: u64, data: &'a [u8]) -> Self {
        Self {
            stream,
            data,
            pos: 0,
        }
    }

    pub fn stream(&self) -> u64 {
        self.stream
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn malformed(&self, message: impl Into<String>) -> FillError {
        FillError::MalformedStream {
            stream: self.stream,
            position: self.pos,
            message: message.into(),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, FillError> {
        let Some(byte) = self.data.get(self.pos) else {
            return Err(self.malformed("unexpected end of stream"));
        };
        self.pos += 1;
        Ok(*byte)
    }

    pub fn read_raw(&mut self, len: usize) -> Result<&'a [u8], FillError> {
        if self.remaining() < len {
            return Err(self.malformed(format!(
                "needs {len} bytes, {} left",
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_varint(&mut self) -> Result<u64, FillError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift >= 64 || (shift == 63 && byte > 1) {
                return Err(self.malformed("varint too long"));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    pub fn read_signed(&mut self) -> Result<i64, FillError> {
        let raw = self.read_varint()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    pub fn read_len(&mut self) -> Result<usize, FillError> {
        let len = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| self.malformed("length overflows usize"))?;
        if len > self.remaining() {
            return Err(self.malformed(format!(
                "length {len} exceeds the {} bytes left",
                self.remaining()
            )));
        }
        Ok(len)
    }

    /// Element counts are not byte lengths, so they are only bounded by the
    /// bytes left (every element takes at least one).
    pub fn read_count(&mut self) -> Result<usize, FillError> {
        self.read_len()
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8], FillError> {
        let len = self.read_len()?;
        self.read_raw(len)
    }

    pub fn read_string(&mut self) -> Result<String, FillError> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|err| self.malformed(err.to_string()))
    }

    pub fn read_bool(&mut self) -> Result<bool, FillError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(self.malformed(format!("invalid bool byte {other}"))),
        }
    }

    pub fn read_f32(&mut self) -> Result<f32, FillError> {
        let raw = self.read_raw(4)?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(raw);
        Ok(f32::from_bits(u32::from_le_bytes(buf)))
    }

    pub fn read_pt(&mut self) -> Result<Pt, FillError> {
        Ok(Pt::from_milli_i64(self.read_signed()?))
    }

    pub fn read_color(&mut self) -> Result<Color, FillError> {
        Ok(Color {
            r: self.read_f32()?,
            g: self.read_f32()?,
            b: self.read_f32()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_indices_take_one_byte() {
        let mut writer = ByteWriter::new();
        writer.write_varint(0);
        writer.write_varint(127);
        assert_eq!(writer.len(), 2);
        writer.write_varint(128);
        assert_eq!(writer.len(), 4);
        writer.write_varint(u64::MAX);

        let bytes = writer.into_inner();
        let mut reader = ByteReader::new(1, &bytes);
        assert_eq!(reader.read_varint().unwrap(), 0);
        assert_eq!(reader.read_varint().unwrap(), 127);
        assert_eq!(reader.read_varint().unwrap(), 128);
        assert_eq!(reader.read_varint().unwrap(), u64::MAX);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn signed_values_and_points() {
        let mut writer = ByteWriter::new();
        writer.write_signed(-1);
        writer.write_pt(Pt::from_f32(-12.345));
        let bytes = writer.into_inner();
        assert_eq!(bytes[0], 1);
        let mut reader = ByteReader::new(1, &bytes);
        assert_eq!(reader.read_signed().unwrap(), -1);
        assert_eq!(reader.read_pt().unwrap(), Pt::from_f32(-12.345));
    }

    #[test]
    fn truncation_reports_position() {
        let mut writer = ByteWriter::new();
        writer.write_str("hello");
        let bytes = writer.into_inner();
        let mut reader = ByteReader::new(9, &bytes[..3]);
        let err = reader.read_string().unwrap_err();
        match err {
            FillError::MalformedStream { stream, position, .. } => {
                assert_eq!(stream, 9);
                assert_eq!(position, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn overlong_varint_is_rejected() {
        let bytes = [0xffu8; 11];
        let mut reader = ByteReader::new(1, &bytes);
        assert!(reader.read_varint().is_err());
    }
}
