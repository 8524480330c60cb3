use byteorder::{BigEndian, ByteOrder};

use crate::consts::OOB_MARKER;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    #[error("message truncated, needed {needed} bytes but only {remaining} remain")]
    Truncated { needed: usize, remaining: usize },
    #[error("out-of-band command is not ascii text")]
    InvalidText,
}

/// A growable byte buffer with a read cursor.
///
/// Writes always append to the end of the buffer, reads consume from the cursor.
/// All integers are big-endian. Every read checks the remaining length and fails
/// with [`WireError::Truncated`] instead of running past the end.
///
/// Messages are meant to be reused: [`begin_write`](WireMessage::begin_write) and
/// [`begin_read`](WireMessage::begin_read) reset the cursor but keep the allocation.
#[derive(Debug, Default, Clone)]
pub struct WireMessage {
    buffer: Vec<u8>,
    read_count: usize,
}

impl WireMessage {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            read_count: 0,
        }
    }
    /// Clears the buffer so the message can be written from scratch.
    pub fn begin_write(&mut self) {
        self.buffer.clear();
        self.read_count = 0;
    }
    /// Loads `bytes` into the buffer and rewinds the cursor to the start.
    pub fn begin_read(&mut self, bytes: &[u8]) {
        self.buffer.clear();
        self.buffer.extend_from_slice(bytes);
        self.read_count = 0;
    }
    /// Rewinds the cursor without touching the buffer.
    pub fn rewind(&mut self) {
        self.read_count = 0;
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
    pub fn len(&self) -> usize {
        self.buffer.len()
    }
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
    pub fn read_position(&self) -> usize {
        self.read_count
    }
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.read_count
    }

    pub fn write_i32(&mut self, value: i32) {
        let mut raw = [0u8; 4];
        BigEndian::write_i32(&mut raw, value);
        self.buffer.extend_from_slice(&raw);
    }
    pub fn write_u32(&mut self, value: u32) {
        let mut raw = [0u8; 4];
        BigEndian::write_u32(&mut raw, value);
        self.buffer.extend_from_slice(&raw);
    }
    pub fn write_i16(&mut self, value: i16) {
        let mut raw = [0u8; 2];
        BigEndian::write_i16(&mut raw, value);
        self.buffer.extend_from_slice(&raw);
    }
    pub fn write_u16(&mut self, value: u16) {
        let mut raw = [0u8; 2];
        BigEndian::write_u16(&mut raw, value);
        self.buffer.extend_from_slice(&raw);
    }
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }
    pub fn write_data(&mut self, src: &[u8]) {
        self.buffer.extend_from_slice(src);
    }

    fn take(&mut self, count: usize) -> Result<&[u8], WireError> {
        let remaining = self.remaining();
        if count > remaining {
            return Err(WireError::Truncated {
                needed: count,
                remaining,
            });
        }
        let start = self.read_count;
        self.read_count += count;
        Ok(&self.buffer[start..start + count])
    }
    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        self.take(4).map(BigEndian::read_i32)
    }
    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        self.take(4).map(BigEndian::read_u32)
    }
    pub fn read_i16(&mut self) -> Result<i16, WireError> {
        self.take(2).map(BigEndian::read_i16)
    }
    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        self.take(2).map(BigEndian::read_u16)
    }
    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        self.take(1).map(|raw| raw[0])
    }
    /// Fills `dst` completely from the cursor.
    pub fn read_data(&mut self, dst: &mut [u8]) -> Result<(), WireError> {
        let src = self.take(dst.len())?;
        dst.copy_from_slice(src);
        Ok(())
    }
    /// Consumes everything after the cursor.
    pub fn read_remaining(&mut self) -> &[u8] {
        let start = self.read_count;
        self.read_count = self.buffer.len();
        &self.buffer[start..]
    }
    /// Appends `count` bytes (or everything left when `None`) to `dst`.
    pub fn append_data(&mut self, dst: &mut Vec<u8>, count: Option<usize>) -> Result<(), WireError> {
        let count = count.unwrap_or_else(|| self.remaining());
        dst.extend_from_slice(self.take(count)?);
        Ok(())
    }

    /// Replaces the contents with an out-of-band command: the `-1` marker followed by
    /// the ascii bytes of `text`. Non-ascii characters are written as `?`.
    pub fn oob_print(&mut self, text: &str) {
        self.begin_write();
        self.write_i32(OOB_MARKER);
        self.buffer
            .extend(text.chars().map(|c| if c.is_ascii() { c as u8 } else { b'?' }));
    }
    /// Returns true if the buffer starts with the out-of-band marker.
    pub fn is_oob(&self) -> bool {
        is_oob(&self.buffer)
    }
}

pub(crate) fn is_oob(data: &[u8]) -> bool {
    data.len() >= 4 && BigEndian::read_i32(&data[..4]) == OOB_MARKER
}
