//! Bounded byte buffer

use crate::error::{Error, Result};
use crate::types::ByteSink;

/// Fixed-capacity byte buffer
///
/// `append` copies into the unused tail and fails instead of growing past the
/// capacity chosen at `init`. `reset` rewinds without releasing memory.
#[derive(Debug, Default)]
pub struct Buffer {
    data: Vec<u8>,
    pos: usize,
}

crate::proxy_opaque!(Buffer => "Buffer");

impl Buffer {
    /// Buffer with room for `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        let mut buffer = Self::default();
        buffer.init(capacity);
        buffer
    }

    /// Allocate `capacity` bytes
    pub fn init(&mut self, capacity: usize) {
        self.data = vec![0; capacity];
        self.pos = 0;
    }

    /// Copy `bytes` in at the current position
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self
            .pos
            .checked_add(bytes.len())
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                Error::out_of_range(format!(
                    "buffer overflow: {} bytes at {} of {}",
                    bytes.len(),
                    self.pos,
                    self.data.len()
                ))
            })?;
        self.data[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    /// Rewind to the start
    pub fn reset(&mut self) {
        self.pos = 0;
    }

    /// Bytes written since the last reset
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.pos]
    }

    /// Number of bytes written
    pub fn len(&self) -> usize {
        self.pos
    }

    /// Nothing written
    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    /// Total capacity
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Unused bytes
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Release the allocation
    pub fn destroy(&mut self) {
        self.data = Vec::new();
        self.pos = 0;
    }
}

impl ByteSink for Buffer {
    fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.append(bytes)
    }
}

impl ByteSink for &mut Buffer {
    fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.append(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SerializeOutput, Value};

    #[test]
    fn test_append_and_reset() {
        let mut buffer = Buffer::with_capacity(8);
        buffer.append(b"abc").unwrap();
        buffer.append(b"defgh").unwrap();
        assert_eq!(buffer.as_slice(), b"abcdefgh");
        assert!(matches!(buffer.append(b"i"), Err(Error::OutOfRange(_))));
        assert_eq!(buffer.len(), 8);

        buffer.reset();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 8);
        buffer.append(b"xy").unwrap();
        assert_eq!(buffer.as_slice(), b"xy");
    }

    #[test]
    fn test_values_serialize_into_buffer() {
        let mut buffer = Buffer::with_capacity(6);
        {
            let mut out = SerializeOutput::new(&mut buffer);
            Value::integer(5).serialize_to(&mut out).unwrap();
            assert!(Value::integer(6).serialize_to(&mut out).is_err());
        }
        assert_eq!(buffer.as_slice(), &[0, 0, 0, 5]);
    }
}
