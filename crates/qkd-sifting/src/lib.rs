//! Sifting stage: turns a raw quantum-table key into an agreed-basis bit
//! string.
//!
//! Alice and Bob each derive a measurement basis per detector-click event
//! from their own raw key, exchange basis tables over the peer channel, keep
//! only positions where both sides agree, derive a bit for every surviving
//! position, and accumulate bits across as many raw keys as it takes to
//! fill one sifted key of the configured length. Bob inverts every derived
//! bit unconditionally, matching Alice's encoding convention.

pub mod basis;

use async_trait::async_trait;
use basis::{derive_bit, extract_bases, merge_bases, pack_basis_table, pack_bits, unpack_basis_table};
use qkd_core::error::Result;
use qkd_core::key::Key;
use qkd_core::types::{KeyId, KeyIdCounter, KeyState};
use qkd_stage::{PeerChannel, Role, Stage, StageOutcome};

const TAG_BASIS_TABLE: u8 = 1;
const TAG_MERGED_TABLE: u8 = 2;

/// Sifts incoming raw keys into agreed-basis bit strings of a fixed length.
pub struct SiftingStage {
    rawkey_length_bytes: usize,
    bit_buffer: Vec<bool>,
    ids: KeyIdCounter,
}

impl SiftingStage {
    pub fn new(rawkey_length_bytes: usize) -> Self {
        SiftingStage {
            rawkey_length_bytes,
            bit_buffer: Vec::new(),
            ids: KeyIdCounter::default(),
        }
    }

    fn target_bits(&self) -> usize {
        self.rawkey_length_bytes * 8
    }

    fn drain_sifted_key(&mut self) -> Option<Key> {
        let target = self.target_bits();
        if self.bit_buffer.len() < target {
            return None;
        }
        let bits: Vec<bool> = self.bit_buffer.drain(..target).collect();
        let data = pack_bits(&bits);
        let mut key = Key::new(self.ids.next(), data);
        key.state = KeyState::Sifted;
        Some(key)
    }
}

#[async_trait]
impl Stage for SiftingStage {
    async fn process(
        &mut self,
        role: Role,
        channel: &mut PeerChannel,
        key: Key,
    ) -> Result<StageOutcome> {
        if key.state == KeyState::Disclosed {
            return Ok(StageOutcome::drop(key));
        }

        let mine = extract_bases(&key.data);
        let count = mine.len();
        let mine_packed = pack_basis_table(&mine);

        let merged = match role {
            Role::Alice => {
                channel.send(key.id, TAG_BASIS_TABLE, mine_packed).await?;
                let theirs_env = channel.recv_for(key.id).await?;
                let theirs = unpack_basis_table(&theirs_env.payload, count);
                let merged = merge_bases(&mine, &theirs);
                channel
                    .send(key.id, TAG_MERGED_TABLE, pack_basis_table(&merged))
                    .await?;
                merged
            }
            Role::Bob => {
                let theirs_env = channel.recv_for(key.id).await?;
                let theirs = unpack_basis_table(&theirs_env.payload, count);
                channel.send(key.id, TAG_BASIS_TABLE, mine_packed).await?;
                let merged_env = channel.recv_for(key.id).await?;
                let _ = theirs;
                unpack_basis_table(&merged_env.payload, count)
            }
        };

        let events = basis::extract_events(&key.data);
        let mut rng = rand::thread_rng();
        for (event, b) in events.into_iter().zip(merged.into_iter()) {
            if b == basis::Basis::Invalid {
                continue;
            }
            let mut bit = derive_bit(event, &mut rng);
            if role == Role::Bob {
                bit = !bit;
            }
            self.bit_buffer.push(bit);
        }

        match self.drain_sifted_key() {
            Some(sifted) => Ok(StageOutcome::forward(sifted)),
            None => Ok(StageOutcome::drop(Key::new(KeyId::NULL, Vec::new()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qkd_transport::Link;
    use tokio::io::duplex;

    async fn run_pair(
        alice_raw: Vec<u8>,
        bob_raw: Vec<u8>,
        rawkey_length_bytes: usize,
    ) -> (Option<Key>, Option<Key>) {
        let (a_link, b_link) = duplex(4096);
        let mut alice_channel = PeerChannel::new(Link::from_stream(a_link));
        let mut bob_channel = PeerChannel::new(Link::from_stream(b_link));

        let mut alice_stage = SiftingStage::new(rawkey_length_bytes);
        let mut bob_stage = SiftingStage::new(rawkey_length_bytes);

        let mut alice_key = Key::new(KeyId(1), alice_raw);
        alice_key.state = KeyState::Raw;
        let mut bob_key = Key::new(KeyId(1), bob_raw);
        bob_key.state = KeyState::Raw;

        let alice_fut = alice_stage.process(Role::Alice, &mut alice_channel, alice_key);
        let bob_fut = bob_stage.process(Role::Bob, &mut bob_channel, bob_key);
        let (alice_outcome, bob_outcome) = tokio::join!(alice_fut, bob_fut);

        let alice_result = alice_outcome.unwrap();
        let bob_result = bob_outcome.unwrap();
        (
            alice_result.forward.then_some(alice_result.key),
            bob_result.forward.then_some(bob_result.key),
        )
    }

    #[tokio::test]
    async fn agreeing_bases_yield_a_sifted_key() {
        // Single byte: high nibble 0b0001 (rect click H), low nibble 0b0100 (diag click D).
        let raw = vec![0b0001_0100u8; 2];
        let (alice, bob) = run_pair(raw.clone(), raw, 1).await;
        assert!(alice.is_some());
        assert!(bob.is_some());
        assert_eq!(alice.unwrap().state, KeyState::Sifted);
        assert_eq!(bob.unwrap().state, KeyState::Sifted);
    }

    #[tokio::test]
    async fn insufficient_bits_accumulate_without_forwarding() {
        let raw = vec![0b0001_0100u8];
        let (alice, bob) = run_pair(raw.clone(), raw, 64).await;
        assert!(alice.is_none());
        assert!(bob.is_none());
    }

    #[tokio::test]
    async fn disclosed_keys_bypass_sifting() {
        let (a_link, b_link) = duplex(4096);
        let mut alice_channel = PeerChannel::new(Link::from_stream(a_link));
        let _ = b_link;
        let mut stage = SiftingStage::new(1);
        let mut key = Key::new(KeyId(2), vec![1, 2, 3]);
        key.state = KeyState::Disclosed;
        let outcome = stage.process(Role::Alice, &mut alice_channel, key).await.unwrap();
        assert!(!outcome.forward);
    }
}
