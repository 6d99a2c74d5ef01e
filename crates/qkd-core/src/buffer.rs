//! A small push/pop byte buffer used for the fixed key frame layout and, in
//! `qkd-transport`, for the tagged-field message wire format. All multi-byte
//! integers are big-endian ("network byte order"); byte strings are
//! length-prefixed with a `u64`.

use crate::error::{QkdError, Result};

#[derive(Debug, Default, Clone)]
pub struct BufferWriter {
    buf: Vec<u8>,
}

impl BufferWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn push_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn push_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn push_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.push_u64(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    pub fn push_str(&mut self, s: &str) -> Result<()> {
        self.push_bytes(s.as_bytes());
        Ok(())
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

pub struct BufferReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BufferReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(QkdError::BufferUnderrun {
                needed: n,
                available: self.buf.len() - self.pos,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn pop_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn pop_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes(b.try_into().unwrap()))
    }

    pub fn pop_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes(b.try_into().unwrap()))
    }

    pub fn pop_f64(&mut self) -> Result<f64> {
        let b = self.take(8)?;
        Ok(f64::from_be_bytes(b.try_into().unwrap()))
    }

    pub fn pop_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.pop_u64()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn pop_str(&mut self) -> Result<String> {
        let bytes = self.pop_bytes()?;
        String::from_utf8(bytes).map_err(|e| QkdError::Other(e.to_string()))
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mixed_fields() {
        let mut w = BufferWriter::new();
        w.push_u32(42);
        w.push_u8(7);
        w.push_u64(9001);
        w.push_f64(0.0271828);
        w.push_str("evhash-64").unwrap();
        let bytes = w.into_vec();

        let mut r = BufferReader::new(&bytes);
        assert_eq!(r.pop_u32().unwrap(), 42);
        assert_eq!(r.pop_u8().unwrap(), 7);
        assert_eq!(r.pop_u64().unwrap(), 9001);
        assert_eq!(r.pop_f64().unwrap(), 0.0271828);
        assert_eq!(r.pop_str().unwrap(), "evhash-64");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn underrun_is_reported() {
        let bytes = [0u8; 2];
        let mut r = BufferReader::new(&bytes);
        assert!(matches!(
            r.pop_u32(),
            Err(QkdError::BufferUnderrun { .. })
        ));
    }
}
