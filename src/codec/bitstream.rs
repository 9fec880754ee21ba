// Copyright 2025 trackrec authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Little-endian bitstream primitives. Every multi-byte value is
//! little-endian; strings are u32-length-prefixed UTF-8; record tags are
//! eight ASCII bytes packed into a u64.

use bytes::{BufMut, BytesMut};

use crate::error::CodecError;

/// Packs an 8-byte ASCII tag into its wire representation.
#[must_use]
pub const fn tag(bytes: &[u8; 8]) -> u64 {
    u64::from_le_bytes(*bytes)
}

/// Longest accepted string on the wire (type names, identifiers and the
/// camera-calibration JSON blob).
pub const MAX_STRING_BYTES: usize = 16 * 1024 * 1024;

/// Append-only little-endian writer.
#[derive(Debug, Default)]
pub struct BitstreamWriter {
    buf: BytesMut,
}

impl BitstreamWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_tag(&mut self, tag: u64) {
        self.buf.put_u64_le(tag);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.put_f32_le(value);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.put_f64_le(value);
    }

    pub fn write_string(&mut self, value: &str) {
        debug_assert!(value.len() <= MAX_STRING_BYTES);
        self.buf.put_u32_le(value.len() as u32);
        self.buf.put_slice(value.as_bytes());
    }

    pub fn write_bytes(&mut self, value: &[u8]) {
        self.buf.put_slice(value);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.buf.freeze().to_vec()
    }
}

/// Bounds-checked little-endian cursor. Every read either yields the
/// value or fails with [`CodecError::Truncated`]; no read advances past
/// the end.
#[derive(Debug)]
pub struct BitstreamReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitstreamReader<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < len {
            return Err(CodecError::Truncated);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(CodecError::Malformed("boolean byte out of range")),
        }
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        let bytes: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| CodecError::Truncated)?;
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// The next tag without advancing.
    pub fn peek_tag(&self) -> Result<u64, CodecError> {
        if self.remaining() < 8 {
            return Err(CodecError::Truncated);
        }
        let bytes: [u8; 8] = self.data[self.pos..self.pos + 8]
            .try_into()
            .map_err(|_| CodecError::Truncated)?;
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn read_tag(&mut self) -> Result<u64, CodecError> {
        self.read_u64()
    }

    /// Consumes the next tag, failing if it is not `expected`.
    pub fn expect_tag(&mut self, expected: u64) -> Result<(), CodecError> {
        let found = self.read_u64()?;
        if found != expected {
            return Err(CodecError::TagMismatch { expected, found });
        }
        Ok(())
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_u32()? as usize;
        if len > MAX_STRING_BYTES {
            return Err(CodecError::SizeLimit {
                what: "string",
                size: len as u64,
                limit: MAX_STRING_BYTES as u64,
            });
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::Malformed("invalid UTF-8"))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        self.take(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_round_trip() {
        let mut writer = BitstreamWriter::new();
        writer.write_tag(tag(b"_TRKSES_"));
        writer.write_bool(true);
        writer.write_u32(7);
        writer.write_i64(-9);
        writer.write_f32(1.5);
        writer.write_f64(-2.25);
        writer.write_string("hello");
        let bytes = writer.into_vec();

        let mut reader = BitstreamReader::new(&bytes);
        reader.expect_tag(tag(b"_TRKSES_")).unwrap();
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.read_u32().unwrap(), 7);
        assert_eq!(reader.read_i64().unwrap(), -9);
        assert_eq!(reader.read_f32().unwrap(), 1.5);
        assert_eq!(reader.read_f64().unwrap(), -2.25);
        assert_eq!(reader.read_string().unwrap(), "hello");
        assert!(reader.is_exhausted());
    }

    #[test]
    fn truncated_reads_fail_closed() {
        let mut writer = BitstreamWriter::new();
        writer.write_u32(42);
        let bytes = writer.into_vec();
        let mut reader = BitstreamReader::new(&bytes);
        assert!(matches!(reader.read_u64(), Err(CodecError::Truncated)));
        // Failed read must not consume anything.
        assert_eq!(reader.read_u32().unwrap(), 42);
    }

    #[test]
    fn tag_mismatch_is_reported() {
        let mut writer = BitstreamWriter::new();
        writer.write_tag(tag(b"_TRKPLS_"));
        let bytes = writer.into_vec();
        let mut reader = BitstreamReader::new(&bytes);
        let err = reader.expect_tag(tag(b"_TRKMES_")).unwrap_err();
        assert!(matches!(err, CodecError::TagMismatch { .. }));
    }

    #[test]
    fn oversized_string_is_rejected() {
        let mut writer = BitstreamWriter::new();
        writer.write_u32(u32::MAX);
        let bytes = writer.into_vec();
        let mut reader = BitstreamReader::new(&bytes);
        assert!(matches!(
            reader.read_string(),
            Err(CodecError::SizeLimit { .. })
        ));
    }

    #[test]
    fn peek_does_not_advance() {
        let mut writer = BitstreamWriter::new();
        writer.write_tag(tag(b"_TRKDPH_"));
        let bytes = writer.into_vec();
        let mut reader = BitstreamReader::new(&bytes);
        assert_eq!(reader.peek_tag().unwrap(), tag(b"_TRKDPH_"));
        assert_eq!(reader.read_tag().unwrap(), tag(b"_TRKDPH_"));
    }
}
