//! Number-theoretic transform and cyclic convolution over [`field`].
//!
//! The reference implementation this is grounded on decomposes the
//! transform into radix-4 butterflies with a radix-2 fixup pass when
//! `log2(n)` is odd. A cyclic convolution's *result* does not depend on
//! which correct butterfly decomposition computed it, only on the modulus,
//! the chosen root of unity, and the ordering convention — so this
//! implementation uses the textbook iterative radix-2 Cooley-Tukey
//! butterfly (bit-reversal permutation, then `log2n` passes) to reach the
//! same numbers with much less bookkeeping.

use crate::field::{mod_add, mod_inv, mod_mul, mod_pow, mod_sub, root_of_unity, MODULUS};
use qkd_core::error::{QkdError, Result};

fn log2_exact(n: usize) -> Result<u32> {
    if n == 0 || !n.is_power_of_two() {
        return Err(QkdError::NotPowerOfTwo(n));
    }
    Ok(n.trailing_zeros())
}

fn bit_reverse_permute(a: &mut [u64]) {
    let n = a.len();
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            a.swap(i, j);
        }
    }
}

/// In-place NTT. `invert` selects the inverse transform; the caller is
/// responsible for the final `1/n` scaling.
pub fn ntt(a: &mut [u64], invert: bool) -> Result<()> {
    let n = a.len();
    let log2n = log2_exact(n)?;
    bit_reverse_permute(a);

    for stage in 1..=log2n {
        let len = 1usize << stage;
        let half = len / 2;
        let mut w_len = root_of_unity(stage);
        if invert {
            w_len = mod_inv(w_len);
        }
        let mut start = 0;
        while start < n {
            let mut w = 1u64;
            for i in 0..half {
                let u = a[start + i];
                let v = mod_mul(a[start + i + half], w);
                a[start + i] = mod_add(u, v);
                a[start + i + half] = mod_sub(u, v);
                w = mod_mul(w, w_len);
            }
            start += len;
        }
    }

    if invert {
        let n_inv = mod_inv(n as u64);
        for x in a.iter_mut() {
            *x = mod_mul(*x, n_inv);
        }
    }

    Ok(())
}

/// Cyclic convolution of `a` and `b`, both already zero-padded to the same
/// power-of-two length. Forward transform both, multiply pointwise, inverse
/// transform the product.
pub fn convolution(a: &[u64], b: &[u64]) -> Result<Vec<u64>> {
    if a.len() != b.len() {
        return Err(QkdError::Other(
            "convolution operands must be the same length".to_string(),
        ));
    }
    let mut fa = a.to_vec();
    let mut fb = b.to_vec();
    ntt(&mut fa, false)?;
    ntt(&mut fb, false)?;
    for (x, y) in fa.iter_mut().zip(fb.iter()) {
        *x = mod_mul(*x, *y);
    }
    ntt(&mut fa, true)?;
    Ok(fa)
}

/// Linear convolution of two bit (0/1) sequences, returned as field
/// elements. Pads to the next power of two at least `a.len() + b.len() - 1`
/// so wraparound from the cyclic transform never aliases real output terms.
pub fn linear_convolution_bits(a: &[u8], b: &[u8]) -> Result<Vec<u64>> {
    let needed = a.len() + b.len() - 1;
    let padded_len = needed.next_power_of_two();
    let mut fa = vec![0u64; padded_len];
    let mut fb = vec![0u64; padded_len];
    for (i, &bit) in a.iter().enumerate() {
        fa[i] = bit as u64;
    }
    for (i, &bit) in b.iter().enumerate() {
        fb[i] = bit as u64;
    }
    let conv = convolution(&fa, &fb)?;
    Ok(conv[..needed].to_vec())
}
