//! Binary (`GF(2^n)`) field arithmetic used by the evaluation-hash scheme.
//!
//! Elements are stored as `n/8` bytes, most-significant byte first. Addition
//! is bytewise XOR; multiplication is schoolbook carry-less multiply followed
//! by polynomial-basis reduction against a fixed per-width irreducible
//! polynomial.

use qkd_core::error::{QkdError, Result};

/// Non-leading-term exponents of the reduction polynomial for each supported
/// width (the leading `x^n` term is implicit).
fn reduction_terms(bits: u32) -> Result<&'static [u32]> {
    Ok(match bits {
        32 => &[7, 3, 2, 0],
        64 => &[4, 3, 1, 0],
        96 => &[10, 9, 6, 0],
        128 => &[7, 2, 1, 0],
        256 => &[10, 5, 2, 0],
        other => return Err(QkdError::UnsupportedEvHashWidth(other)),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GfElement {
    bits: u32,
    // MSB-first, length = bits / 8.
    bytes: Vec<u8>,
}

impl GfElement {
    pub fn zero(bits: u32) -> Self {
        GfElement {
            bits,
            bytes: vec![0u8; (bits / 8) as usize],
        }
    }

    pub fn from_bytes(bits: u32, data: &[u8]) -> Self {
        let width = (bits / 8) as usize;
        let mut bytes = vec![0u8; width];
        let copy_len = data.len().min(width);
        // Right-align: the tail of `data` fills the low-order bytes.
        bytes[width - copy_len..].copy_from_slice(&data[data.len() - copy_len..]);
        GfElement { bits, bytes }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_zero(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }

    pub fn add(&self, other: &GfElement) -> GfElement {
        debug_assert_eq!(self.bits, other.bits);
        let bytes = self
            .bytes
            .iter()
            .zip(other.bytes.iter())
            .map(|(a, b)| a ^ b)
            .collect();
        GfElement {
            bits: self.bits,
            bytes,
        }
    }

    fn bit(&self, index: u32) -> bool {
        // index 0 is the least-significant bit.
        let byte = self.bytes.len() - 1 - (index / 8) as usize;
        (self.bytes[byte] >> (index % 8)) & 1 == 1
    }

    fn set_bit(bits: &mut [u8], index: u32) {
        let byte = bits.len() - 1 - (index / 8) as usize;
        bits[byte] |= 1 << (index % 8);
    }

    pub fn mul(&self, other: &GfElement) -> Result<GfElement> {
        debug_assert_eq!(self.bits, other.bits);
        let n = self.bits;
        let terms = reduction_terms(n)?;

        // Schoolbook carry-less multiply into a 2n-bit product.
        let mut product = vec![0u8; (n / 4) as usize];
        for i in 0..n {
            if !self.bit(i) {
                continue;
            }
            for j in 0..n {
                if other.bit(j) {
                    Self::xor_bit(&mut product, i + j);
                }
            }
        }

        // Reduce top bits (2n-1 down to n) against the irreducible polynomial.
        for k in (n..2 * n).rev() {
            let byte_len = product.len();
            let byte = byte_len - 1 - (k / 8) as usize;
            let is_set = (product[byte] >> (k % 8)) & 1 == 1;
            if !is_set {
                continue;
            }
            Self::xor_bit(&mut product, k);
            let shift = k - n;
            for &t in terms {
                Self::xor_bit(&mut product, t + shift);
            }
        }

        let low_bytes = (n / 8) as usize;
        let total = product.len();
        let bytes = product[total - low_bytes..].to_vec();
        Ok(GfElement { bits: n, bytes })
    }

    fn xor_bit(bits: &mut [u8], index: u32) {
        let byte = bits.len() - 1 - (index / 8) as usize;
        bits[byte] ^= 1 << (index % 8);
    }
}

// Silence an unused-import-style warning for `set_bit`, kept for symmetry
// with `xor_bit` and useful when constructing test fixtures bit-by-bit.
#[allow(dead_code)]
fn _unused(bits: &mut Vec<u8>, index: u32) {
    GfElement::set_bit(bits, index);
}
