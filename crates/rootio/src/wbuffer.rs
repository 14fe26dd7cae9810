//! Big-endian writer mirroring [`RBuffer`](crate::rbuffer::RBuffer).
//!
//! Only the pieces of the write side that the decoder's contracts are stated
//! in terms of: primitives, strings, version envelopes with back-patched
//! byte counts, and object/class tags. It is what tests use to lay out
//! synthetic records byte for byte.

use std::collections::HashMap;

use crate::error::{Result, RootError};
use crate::rbuffer::{K_BYTE_COUNT_MASK, K_CLASS_MASK, K_MAP_OFFSET, K_NEW_CLASS_TAG};

/// A growable big-endian output buffer.
#[derive(Debug, Default, Clone)]
pub struct WBuffer {
    data: Vec<u8>,
    offset: u64,
    classes: HashMap<String, u64>,
}

impl WBuffer {
    /// An empty buffer starting at absolute position 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty buffer whose first byte sits at absolute position `offset`
    /// (the key header length, for key payloads).
    pub fn with_offset(offset: u64) -> Self {
        Self { offset, ..Self::default() }
    }

    /// Absolute position of the next byte written.
    pub fn pos(&self) -> u64 {
        self.offset + self.data.len() as u64
    }

    /// Bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, b: &[u8]) {
        self.data.extend_from_slice(b);
    }

    /// Append a byte.
    pub fn write_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    /// Append a signed byte.
    pub fn write_i8(&mut self, v: i8) {
        self.data.push(v as u8);
    }

    /// Append a boolean byte.
    pub fn write_bool(&mut self, v: bool) {
        self.data.push(u8::from(v));
    }

    /// Append a big-endian u16.
    pub fn write_u16(&mut self, v: u16) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Append a big-endian i16.
    pub fn write_i16(&mut self, v: i16) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Append a big-endian u32.
    pub fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Append a big-endian i32.
    pub fn write_i32(&mut self, v: i32) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Append a big-endian u64.
    pub fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Append a big-endian i64.
    pub fn write_i64(&mut self, v: i64) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Append a big-endian f32.
    pub fn write_f32(&mut self, v: f32) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Append a big-endian f64.
    pub fn write_f64(&mut self, v: f64) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Append a ROOT string: 1-byte length, or 255 + u32 length when longer.
    pub fn write_string(&mut self, s: &str) {
        let n = s.len();
        if n < 255 {
            self.write_u8(n as u8);
        } else {
            self.write_u8(255);
            self.write_u32(n as u32);
        }
        self.write_bytes(s.as_bytes());
    }

    /// Append a NUL-terminated string.
    pub fn write_cstring(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
        self.write_u8(0);
    }

    /// Open a version envelope: a byte-count placeholder then `version`.
    ///
    /// Returns the envelope start, to be handed to [`set_byte_count`](Self::set_byte_count).
    pub fn write_version(&mut self, version: i16) -> u64 {
        let beg = self.pos();
        self.write_u32(0);
        self.write_i16(version);
        beg
    }

    /// Close the envelope opened at `beg`, patching in its byte count.
    ///
    /// Returns the total envelope size in bytes.
    pub fn set_byte_count(&mut self, beg: u64) -> Result<u32> {
        let at = beg
            .checked_sub(self.offset)
            .map(|p| p as usize)
            .filter(|&p| p + 4 <= self.data.len())
            .ok_or_else(|| RootError::Format(format!("envelope start {} not in buffer", beg)))?;
        let bcnt = self.pos() - beg - 4;
        if bcnt >= u64::from(K_BYTE_COUNT_MASK) {
            return Err(RootError::Format(format!("object too large for byte count: {}", bcnt)));
        }
        let bcnt = bcnt as u32;
        self.data[at..at + 4].copy_from_slice(&(bcnt | K_BYTE_COUNT_MASK).to_be_bytes());
        Ok(bcnt + 4)
    }

    /// Start a non-null object pointer of class `class`.
    ///
    /// Writes the byte-count placeholder and either a new-class tag with the
    /// class name or a reference to the class's first occurrence. The caller
    /// then writes the object and calls [`finish_object`](Self::finish_object).
    pub fn write_object_header(&mut self, class: &str) -> u64 {
        let beg = self.pos();
        self.write_u32(0);
        let start = self.pos();
        match self.classes.get(class) {
            Some(&slot) => self.write_u32(slot as u32 | K_CLASS_MASK),
            None => {
                self.write_u32(K_NEW_CLASS_TAG);
                self.write_cstring(class);
                self.classes.insert(class.to_string(), start + K_MAP_OFFSET);
            }
        }
        beg
    }

    /// Close an object pointer opened with [`write_object_header`](Self::write_object_header).
    pub fn finish_object(&mut self, beg: u64) -> Result<u32> {
        self.set_byte_count(beg)
    }

    /// Write a null object pointer.
    pub fn write_null_object(&mut self) {
        self.write_u32(0);
    }
}
