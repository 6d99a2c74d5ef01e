//! Privacy amplification: compresses a confirmed key down using a Toeplitz
//! hash sized to wash out an eavesdropper's information, estimated from the
//! channel's observed error rate and the bits already disclosed upstream.
//!
//! Alice draws the hash's defining seed and shift at random and sends both to
//! Bob in one message; Bob checks their lengths against what it independently
//! computes before both sides hash their own copy of the key with
//! [`qkd_ntt::toeplitz::amplify`]. The compressed length can be sized two
//! ways: a fixed security margin subtracted from the information-theoretic
//! bound (the default), or a flat reduction rate applied to that bound
//! instead. Configuring both is almost certainly a mistake, so it is logged
//! rather than silently picking one.

use async_trait::async_trait;
use qkd_core::constants::{DEFAULT_REDUCTION_RATE, DEFAULT_SECURITY_BITS};
use qkd_core::error::{QkdError, Result};
use qkd_core::key::Key;
use qkd_core::types::{KeyId, KeyIdCounter, KeyState};
use qkd_stage::{PeerChannel, Role, Stage, StageOutcome};
use rand::RngCore;

const TAG_SEED_SHIFT: u8 = 1;

/// How the compressed output length is derived from the raw key length.
#[derive(Debug, Clone, Copy)]
pub enum AmplificationMode {
    /// `floor(n * tau(e) - disclosed - security_bits)`.
    SecurityBits(u64),
    /// `floor(floor(n * tau(e) - disclosed) * reduction_rate)`, `reduction_rate` in `[0, 1]`.
    ReductionRate(f64),
}

impl Default for AmplificationMode {
    fn default() -> Self {
        AmplificationMode::SecurityBits(DEFAULT_SECURITY_BITS)
    }
}

pub struct PrivacyAmplificationStage {
    mode: AmplificationMode,
    ids: KeyIdCounter,
}

impl PrivacyAmplificationStage {
    pub fn new(mode: AmplificationMode) -> Self {
        if let AmplificationMode::ReductionRate(r) = mode {
            if !(0.0..=1.0).contains(&r) {
                tracing::warn!("reduction rate {} outside [0, 1], clamping", r);
            }
        }
        PrivacyAmplificationStage {
            mode,
            ids: KeyIdCounter::default(),
        }
    }

    /// Security-bits mode is the default; this also accepts a simultaneous
    /// reduction rate, logging a warning since the two together is likely a
    /// misconfiguration rather than an intentional combination.
    pub fn with_both(security_bits: Option<u64>, reduction_rate: Option<f64>) -> Self {
        match (security_bits, reduction_rate) {
            (Some(s), Some(r)) => {
                tracing::warn!(
                    "both security_bits ({}) and reduction_rate ({}) are configured; using security_bits and ignoring reduction_rate",
                    s, r
                );
                PrivacyAmplificationStage::new(AmplificationMode::SecurityBits(s))
            }
            (Some(s), None) => PrivacyAmplificationStage::new(AmplificationMode::SecurityBits(s)),
            (None, Some(r)) => PrivacyAmplificationStage::new(AmplificationMode::ReductionRate(r)),
            (None, None) => PrivacyAmplificationStage::new(AmplificationMode::default()),
        }
    }

    fn shift_bits(&self, n: usize, error_rate: f64, disclosed_bits: u64) -> Result<usize> {
        match self.mode {
            AmplificationMode::SecurityBits(security_bits) => {
                qkd_ntt::compressed_length(n, error_rate, disclosed_bits, security_bits)
            }
            AmplificationMode::ReductionRate(rate) => {
                let rate = rate.clamp(0.0, 1.0);
                let base = qkd_ntt::compressed_length(n, error_rate, disclosed_bits, 0)?;
                let reduced = (base as f64 * rate).floor() as usize;
                if reduced == 0 {
                    return Err(QkdError::AmplificationExhausted);
                }
                Ok(reduced)
            }
        }
    }
}

impl Default for PrivacyAmplificationStage {
    fn default() -> Self {
        PrivacyAmplificationStage::new(AmplificationMode::default())
    }
}

fn bytes_to_bits(bytes: &[u8]) -> Vec<bool> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for byte in bytes {
        for shift in (0..8).rev() {
            bits.push((byte >> shift) & 1 == 1);
        }
    }
    bits
}

fn bits_to_bytes(bits: &[bool]) -> Vec<u8> {
    let mut out = vec![0u8; (bits.len() + 7) / 8];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            out[i / 8] |= 1 << (7 - (i % 8));
        }
    }
    out
}

fn encode_seed_shift(seed: &[u8], shift: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + seed.len() + shift.len());
    out.extend_from_slice(&(seed.len() as u64).to_be_bytes());
    out.extend_from_slice(seed);
    out.extend_from_slice(&(shift.len() as u64).to_be_bytes());
    out.extend_from_slice(shift);
    out
}

struct SeedShift {
    seed: Vec<u8>,
    shift: Vec<u8>,
}

fn decode_seed_shift(bytes: &[u8]) -> Result<SeedShift> {
    let mut offset = 0usize;
    let read_u64 = |bytes: &[u8], offset: &mut usize| -> Result<u64> {
        let slice = bytes.get(*offset..*offset + 8).ok_or(QkdError::SizeMismatch)?;
        *offset += 8;
        Ok(u64::from_be_bytes(slice.try_into().unwrap()))
    };
    let seed_len = read_u64(bytes, &mut offset)? as usize;
    let seed = bytes.get(offset..offset + seed_len).ok_or(QkdError::SizeMismatch)?.to_vec();
    offset += seed_len;
    let shift_len = read_u64(bytes, &mut offset)? as usize;
    let shift = bytes.get(offset..offset + shift_len).ok_or(QkdError::SizeMismatch)?.to_vec();
    Ok(SeedShift { seed, shift })
}

#[async_trait]
impl Stage for PrivacyAmplificationStage {
    async fn process(&mut self, role: Role, channel: &mut PeerChannel, key: Key) -> Result<StageOutcome> {
        if key.state == KeyState::Disclosed {
            return Ok(StageOutcome::drop(key));
        }

        let key_bits = key.data.len() * 8;
        let shift_bits = match self.shift_bits(key_bits, key.qber, key.disclosed_bits) {
            Ok(n) => n,
            Err(QkdError::AmplificationExhausted) => {
                tracing::warn!(
                    "privacy amplification exhausted for key {}: {} raw bits, qber {:.4}, {} disclosed",
                    key.id, key_bits, key.qber, key.disclosed_bits
                );
                let mut key = key;
                key.state = KeyState::Disclosed;
                return Ok(StageOutcome::drop(key));
            }
            Err(e) => return Err(e),
        };
        let shift_bytes = shift_bits / 8;
        if shift_bytes == 0 {
            tracing::warn!("privacy amplification would yield less than a byte for key {}", key.id);
            let mut key = key;
            key.state = KeyState::Disclosed;
            return Ok(StageOutcome::drop(key));
        }
        let shift_bits = shift_bytes * 8;

        // Seed length matches the raw key's bit length, byte-aligned (it
        // already is, since key.data is whole bytes).
        let seed_bits = key_bits;

        let (seed_bytes, shift_bytes_buf) = match role {
            Role::Alice => {
                let mut seed = vec![0u8; seed_bits / 8];
                let mut shift = vec![0u8; shift_bytes];
                rand::thread_rng().fill_bytes(&mut seed);
                rand::thread_rng().fill_bytes(&mut shift);
                let payload = encode_seed_shift(&seed, &shift);
                channel.send(key.id, TAG_SEED_SHIFT, payload).await?;
                (seed, shift)
            }
            Role::Bob => {
                let env = channel.recv_for(key.id).await?;
                let received = decode_seed_shift(&env.payload)?;
                if received.seed.len() * 8 != seed_bits || received.shift.len() != shift_bytes {
                    tracing::error!(
                        "privacy amplification size mismatch for key {}: expected seed {} bits / shift {} bytes, got seed {} bits / shift {} bytes",
                        key.id, seed_bits, shift_bytes, received.seed.len() * 8, received.shift.len()
                    );
                    let mut key = key;
                    key.state = KeyState::Disclosed;
                    return Ok(StageOutcome::drop(key));
                }
                (received.seed, received.shift)
            }
        };

        let key_vec = bytes_to_bits(&key.data);
        let seed_vec = bytes_to_bits(&seed_bytes);
        let shift_vec = bytes_to_bits(&shift_bytes_buf);
        let compressed = qkd_ntt::amplify(&key_vec, &seed_vec, &shift_vec)?;
        debug_assert_eq!(compressed.len(), shift_bits);

        let mut out = Key::new(self.ids.next(), bits_to_bytes(&compressed));
        out.state = KeyState::Amplified;
        out.qber = key.qber;
        out.disclosed_bits = 0;
        out.scheme_in = key.scheme_in.clone();
        out.scheme_out = key.scheme_out.clone();
        Ok(StageOutcome::forward(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qkd_transport::Link;
    use tokio::io::duplex;

    #[tokio::test]
    async fn matching_keys_amplify_to_the_same_output() {
        let (a_link, b_link) = duplex(8192);
        let mut alice_channel = PeerChannel::new(Link::from_stream(a_link));
        let mut bob_channel = PeerChannel::new(Link::from_stream(b_link));

        let mut alice_stage = PrivacyAmplificationStage::new(AmplificationMode::SecurityBits(8));
        let mut bob_stage = PrivacyAmplificationStage::new(AmplificationMode::SecurityBits(8));

        let mut alice_key = Key::new(KeyId(1), vec![0xAB; 32]);
        alice_key.state = KeyState::Confirmed;
        alice_key.qber = 0.01;
        alice_key.disclosed_bits = 4;
        let bob_key = alice_key.clone();

        let (alice_outcome, bob_outcome) = tokio::join!(
            alice_stage.process(Role::Alice, &mut alice_channel, alice_key),
            bob_stage.process(Role::Bob, &mut bob_channel, bob_key),
        );

        let alice_result = alice_outcome.unwrap();
        let bob_result = bob_outcome.unwrap();
        assert!(alice_result.forward);
        assert!(bob_result.forward);
        assert_eq!(alice_result.key.state, KeyState::Amplified);
        assert_eq!(bob_result.key.state, KeyState::Amplified);
        assert_eq!(alice_result.key.data, bob_result.key.data);
        assert!(!alice_result.key.data.is_empty());
    }

    #[tokio::test]
    async fn exhausted_budget_discards_the_key() {
        let (a_link, _b_link) = duplex(64);
        let mut channel = PeerChannel::new(Link::from_stream(a_link));
        let mut stage = PrivacyAmplificationStage::new(AmplificationMode::SecurityBits(1_000_000));

        let mut key = Key::new(KeyId(2), vec![0x11; 8]);
        key.state = KeyState::Confirmed;
        key.qber = 0.0;

        let outcome = stage.process(Role::Alice, &mut channel, key).await.unwrap();
        assert!(!outcome.forward);
        assert_eq!(outcome.key.state, KeyState::Disclosed);
    }

    #[tokio::test]
    async fn disclosed_keys_bypass_amplification() {
        let (a_link, _b_link) = duplex(64);
        let mut channel = PeerChannel::new(Link::from_stream(a_link));
        let mut stage = PrivacyAmplificationStage::default();
        let mut key = Key::new(KeyId(3), vec![1, 2, 3]);
        key.state = KeyState::Disclosed;
        let outcome = stage.process(Role::Alice, &mut channel, key).await.unwrap();
        assert!(!outcome.forward);
    }

    #[test]
    fn bit_byte_round_trip() {
        let bytes = vec![0xDE, 0xAD, 0xBE, 0xEF];
        let bits = bytes_to_bits(&bytes);
        assert_eq!(bits.len(), 32);
        assert_eq!(bits_to_bytes(&bits), bytes);
    }
}
