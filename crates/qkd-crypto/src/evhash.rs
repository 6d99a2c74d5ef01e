//! Polynomial-evaluation universal hash ("evhash" crypto scheme).
//!
//! Input is split into `bits`-wide blocks (zero-padded on the final block)
//! and folded via Horner's rule over `GF(2^bits)`:
//! `acc' = (acc + block) * key`. `finalize` XORs the running accumulator
//! with a one-time pad to produce the authentication tag, matching a
//! Wegman-Carter construction.

use crate::gf::GfElement;
use qkd_core::error::Result;

#[derive(Debug, Clone)]
pub struct EvHashContext {
    bits: u32,
    key: GfElement,
    acc: GfElement,
}

impl EvHashContext {
    pub fn new(bits: u32, key_bytes: &[u8]) -> Self {
        let key = if key_bytes.is_empty() {
            // A zero key would collapse every tag to zero; fall back to the
            // field element `1` so an unconfigured context still hashes.
            GfElement::from_bytes(bits, &[1])
        } else {
            GfElement::from_bytes(bits, key_bytes)
        };
        EvHashContext {
            bits,
            key,
            acc: GfElement::zero(bits),
        }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    fn block_bytes(&self) -> usize {
        (self.bits / 8) as usize
    }

    pub fn add(&mut self, data: &[u8]) -> Result<()> {
        let block_len = self.block_bytes();
        for chunk in data.chunks(block_len) {
            let mut padded = vec![0u8; block_len];
            padded[block_len - chunk.len()..].copy_from_slice(chunk);
            let block = GfElement::from_bytes(self.bits, &padded);
            self.acc = self.acc.add(&block).mul(&self.key)?;
        }
        Ok(())
    }

    /// Fold another context's current accumulator in as one more block.
    pub fn add_context(&mut self, other: &EvHashContext) -> Result<()> {
        self.acc = self.acc.add(&other.acc).mul(&self.key)?;
        Ok(())
    }

    pub fn finalize(&self, final_key: &[u8]) -> Vec<u8> {
        let pad = GfElement::from_bytes(self.bits, final_key);
        self.acc.add(&pad).as_bytes().to_vec()
    }

    pub fn state(&self) -> Vec<u8> {
        self.acc.as_bytes().to_vec()
    }

    pub fn set_state(&mut self, bytes: &[u8]) {
        self.acc = GfElement::from_bytes(self.bits, bytes);
    }

    pub fn key_bytes(&self) -> Vec<u8> {
        self.key.as_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_input() {
        let mut a = EvHashContext::new(64, b"secretkey");
        let mut b = EvHashContext::new(64, b"secretkey");
        a.add(b"hello world, this is a test message").unwrap();
        b.add(b"hello world, this is a test message").unwrap();
        assert_eq!(a.state(), b.state());
    }

    #[test]
    fn different_keys_diverge() {
        let mut a = EvHashContext::new(64, b"keyone__");
        let mut b = EvHashContext::new(64, b"keytwo__");
        a.add(b"identical payload").unwrap();
        b.add(b"identical payload").unwrap();
        assert_ne!(a.state(), b.state());
    }

    #[test]
    fn state_round_trips() {
        let mut a = EvHashContext::new(128, b"0123456789abcdef");
        a.add(b"some bytes to accumulate").unwrap();
        let snapshot = a.state();
        let mut b = EvHashContext::new(128, b"0123456789abcdef");
        b.set_state(&snapshot);
        assert_eq!(a.state(), b.state());
    }

    #[test]
    fn finalize_applies_pad() {
        let mut a = EvHashContext::new(32, b"k");
        a.add(b"abcd").unwrap();
        let tag1 = a.finalize(&[0, 0, 0, 0]);
        let tag2 = a.finalize(&[0, 0, 0, 1]);
        assert_ne!(tag1, tag2);
    }
}
