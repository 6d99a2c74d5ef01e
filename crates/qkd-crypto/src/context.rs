use crate::evhash::EvHashContext;
use crate::null::NullContext;
use crate::xor::XorContext;
use qkd_core::error::Result;
use qkd_core::types::{Algorithm, SchemeSpec};
use zeroize::Zeroize;

/// A crypto context pairs a scheme with its accumulated state. It travels
/// alongside a key between stages (`ctx_in` from the peer, `ctx_out` to the
/// peer) and between nibbles of a tag exchange.
#[derive(Debug, Clone)]
pub enum CryptoContext {
    Null(NullContext),
    Xor(XorContext),
    EvHash(EvHashContext),
}

impl CryptoContext {
    pub fn from_spec(spec: &SchemeSpec) -> Self {
        match spec.algorithm {
            Algorithm::Null => CryptoContext::Null(NullContext::new()),
            Algorithm::Xor => {
                let mut ctx = XorContext::new(spec.init_key.as_deref().unwrap_or(&[]));
                if let Some(state) = &spec.state {
                    ctx.set_state(state);
                }
                CryptoContext::Xor(ctx)
            }
            Algorithm::EvHash => {
                let bits = spec.bits.unwrap_or(128);
                let mut ctx = EvHashContext::new(bits, spec.init_key.as_deref().unwrap_or(&[]));
                if let Some(state) = &spec.state {
                    ctx.set_state(state);
                }
                CryptoContext::EvHash(ctx)
            }
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        Ok(Self::from_spec(&SchemeSpec::parse(s)?))
    }

    pub fn add(&mut self, data: &[u8]) -> Result<()> {
        match self {
            CryptoContext::Null(c) => c.add(data),
            CryptoContext::Xor(c) => c.add(data),
            CryptoContext::EvHash(c) => c.add(data)?,
        }
        Ok(())
    }

    /// Combine another context's running state into this one, e.g. when a
    /// stage needs to authenticate two halves of a peer exchange with a
    /// single tag.
    pub fn add_context(&mut self, other: &CryptoContext) -> Result<()> {
        match (self, other) {
            (CryptoContext::Null(a), CryptoContext::Null(b)) => a.add_context(b),
            (CryptoContext::Xor(a), CryptoContext::Xor(b)) => a.add_context(b),
            (CryptoContext::EvHash(a), CryptoContext::EvHash(b)) => a.add_context(b)?,
            _ => return Err(qkd_core::error::QkdError::Other(
                "cannot combine crypto contexts of different schemes".to_string(),
            )),
        }
        Ok(())
    }

    /// Whether `finalize` needs a fresh, never-reused final key to be secure.
    /// `null` never produces a tag at all so it trivially doesn't; `xor` and
    /// `evhash` both fold a final key into their finalized tag.
    pub fn needs_final_key(&self) -> bool {
        !matches!(self, CryptoContext::Null(_))
    }

    /// Byte length of the final key `finalize` expects.
    pub fn final_key_size(&self) -> usize {
        match self {
            CryptoContext::Null(_) => 0,
            CryptoContext::Xor(_) => 32,
            CryptoContext::EvHash(c) => (c.bits() / 8) as usize,
        }
    }

    pub fn finalize(&self, final_key: &[u8]) -> Vec<u8> {
        match self {
            CryptoContext::Null(c) => c.finalize(final_key),
            CryptoContext::Xor(c) => c.finalize(final_key),
            CryptoContext::EvHash(c) => c.finalize(final_key),
        }
    }

    pub fn state(&self) -> Vec<u8> {
        match self {
            CryptoContext::Null(c) => c.state(),
            CryptoContext::Xor(c) => c.state(),
            CryptoContext::EvHash(c) => c.state(),
        }
    }

    pub fn set_state(&mut self, bytes: &[u8]) {
        match self {
            CryptoContext::Null(c) => c.set_state(bytes),
            CryptoContext::Xor(c) => c.set_state(bytes),
            CryptoContext::EvHash(c) => c.set_state(bytes),
        }
    }

    /// Render back to the `ALG[-BITS]:STATE_HEX` wire form carried in a key
    /// frame's `scheme_in`/`scheme_out` field.
    pub fn to_scheme_string(&self) -> String {
        let state = self.state();
        match self {
            CryptoContext::Null(_) => "null".to_string(),
            CryptoContext::Xor(_) => format!("xor::{}", hex::encode(&state)),
            CryptoContext::EvHash(c) => {
                format!("evhash-{}::{}", c.bits(), hex::encode(&state))
            }
        }
    }

    /// Securely erase any key material this context holds. Called when a
    /// context is retired (e.g. after a successful authentication exchange).
    pub fn wipe(&mut self) {
        match self {
            CryptoContext::Null(_) => {}
            CryptoContext::Xor(c) => {
                let mut state = c.state();
                state.zeroize();
                c.set_state(&[]);
            }
            CryptoContext::EvHash(c) => {
                let mut key = c.key_bytes();
                key.zeroize();
                c.set_state(&[]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_round_trips_through_string() {
        let ctx = CryptoContext::from_str("null").unwrap();
        assert_eq!(ctx.to_scheme_string(), "null");
    }

    #[test]
    fn evhash_state_survives_string_round_trip() {
        let mut ctx = CryptoContext::from_str("evhash-32:deadbeef").unwrap();
        ctx.add(b"payload").unwrap();
        let s = ctx.to_scheme_string();
        let spec = SchemeSpec::parse(&s).unwrap();
        let restored = CryptoContext::from_spec(&spec);
        assert_eq!(restored.state(), ctx.state());
    }

    #[test]
    fn mismatched_schemes_cannot_combine() {
        let mut a = CryptoContext::from_str("xor").unwrap();
        let b = CryptoContext::from_str("null").unwrap();
        assert!(a.add_context(&b).is_err());
    }
}
