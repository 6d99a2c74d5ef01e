//! Authentication stage: mutually verifies every upstream crypto context tag
//! against an out-of-band-shared pool of authentication key material, then
//! opens a fresh (possibly null) crypto context for whatever comes next.
//!
//! Two volatile [`qkd_db::KeyStore`]s hold the authentication key material —
//! one for the incoming direction, one for outgoing — stocked externally (via
//! [`AuthStage::store_keys_incoming`]/[`store_keys_outgoing`]) and
//! replenished by nibbling the tail off amplified keys as they pass through.
//! Both peers hold identical copies of this material, so each side computes
//! all four tag variants (itself-as-Alice, itself-as-Bob, both directions)
//! from its own local store and only needs to exchange the two tags that
//! matter for its role.

use async_trait::async_trait;
use qkd_core::error::{QkdError, Result};
use qkd_core::key::Key;
use qkd_core::types::{KeyId, KeyState};
use qkd_crypto::CryptoContext;
use qkd_db::KeyStore;
use qkd_stage::{PeerChannel, Role, Stage, StageOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const TAG_EXCHANGE: u8 = 1;

pub struct AuthStage {
    store_in: KeyStore,
    store_out: KeyStore,
    current_scheme_in: Option<String>,
    current_scheme_out: Option<String>,
    next_scheme_in: Option<String>,
    next_scheme_out: Option<String>,
    threshold_bytes: usize,
    starving: Arc<AtomicBool>,
    faulted: Arc<AtomicBool>,
}

impl AuthStage {
    pub fn new(store_in: KeyStore, store_out: KeyStore, threshold_bytes: usize) -> Self {
        AuthStage {
            store_in,
            store_out,
            current_scheme_in: None,
            current_scheme_out: None,
            next_scheme_in: None,
            next_scheme_out: None,
            threshold_bytes,
            starving: Arc::new(AtomicBool::new(false)),
            faulted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn starving_handle(&self) -> Arc<AtomicBool> {
        self.starving.clone()
    }

    pub fn fault_handle(&self) -> Arc<AtomicBool> {
        self.faulted.clone()
    }

    pub fn set_next_scheme_in(&mut self, scheme: String) {
        self.next_scheme_in = Some(scheme);
    }

    pub fn set_next_scheme_out(&mut self, scheme: String) {
        self.next_scheme_out = Some(scheme);
    }

    pub fn store_keys_incoming(&self, material: &[u8]) -> Result<usize> {
        store_bytes(&self.store_in, material)
    }

    pub fn store_keys_outgoing(&self, material: &[u8]) -> Result<usize> {
        store_bytes(&self.store_out, material)
    }

    fn available_incoming(&self) -> usize {
        self.store_in.count() * self.store_in.quantum()
    }

    fn available_outgoing(&self) -> usize {
        self.store_out.count() * self.store_out.quantum()
    }

    /// Promote the queued next scheme (if any) and build fresh contexts for
    /// whatever comes after this stage.
    fn create_contexts(&mut self) -> (CryptoContext, CryptoContext) {
        if let Some(next) = self.next_scheme_in.take() {
            self.current_scheme_in = Some(next);
        }
        if let Some(next) = self.next_scheme_out.take() {
            self.current_scheme_out = Some(next);
        }

        let ctx_in = self
            .current_scheme_in
            .as_deref()
            .and_then(|s| CryptoContext::from_str(s).ok())
            .unwrap_or_else(|| CryptoContext::from_str("null").unwrap());
        let ctx_out = self
            .current_scheme_out
            .as_deref()
            .and_then(|s| CryptoContext::from_str(s).ok())
            .unwrap_or_else(|| CryptoContext::from_str("null").unwrap());
        (ctx_in, ctx_out)
    }

}

fn store_bytes(store: &KeyStore, material: &[u8]) -> Result<usize> {
    let quantum = store.quantum();
    if quantum == 0 {
        return Ok(0);
    }
    let mut inserted = 0;
    for chunk in material.chunks(quantum) {
        if chunk.len() != quantum {
            tracing::debug!(
                "dropping {} bytes of authentication material, not a full quantum ({} bytes)",
                chunk.len(),
                quantum
            );
            continue;
        }
        match store.find_spare(1) {
            Ok(ids) => {
                store.insert(ids[0], chunk.to_vec())?;
                store.set_flags(ids[0], |f| {
                    f.injected = true;
                    f.real_sync = true;
                })?;
                inserted += 1;
            }
            Err(_) => {
                tracing::warn!("authentication key database exhausted, dropping remaining material");
                break;
            }
        }
    }
    Ok(inserted)
}

fn nibble(key: &mut Key, store: &KeyStore, threshold: usize) -> Result<()> {
    let key_size = key.data.len();
    let eat = key_size.min(threshold);
    if eat == 0 {
        return Ok(());
    }
    let food = key.data[key_size - eat..].to_vec();
    store_bytes(store, &food)?;
    key.data.truncate(key_size - eat);
    Ok(())
}

/// Compute this side's tag for one direction, consuming a two-final-key-size
/// run of authentication material. `Ok(None)` signals famine: not enough
/// contiguous material to draw a final key from.
fn compute_tag(for_alice: bool, ctx: &CryptoContext, store: &KeyStore) -> Result<Option<(Vec<u8>, Vec<KeyId>)>> {
    if !ctx.needs_final_key() {
        return Ok(Some((Vec::new(), Vec::new())));
    }
    let final_size = ctx.final_key_size();
    let ids = match store.find_contiguous(final_size * 2) {
        Ok(ids) => ids,
        Err(_) => return Ok(None),
    };
    let _guard = store.reserve(&ids)?;
    let mut material = Vec::with_capacity(final_size * 2);
    for id in &ids {
        material.extend(store.get(*id)?);
    }
    let half = material.len() / 2;
    let final_key = if for_alice { &material[..half] } else { &material[half..] };
    Ok(Some((ctx.finalize(final_key), ids)))
}

fn encode_exchange(tag_in: &[u8], tag_out: &[u8], threshold: Option<u64>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(tag_in.len() as u64).to_be_bytes());
    out.extend_from_slice(tag_in);
    out.extend_from_slice(&(tag_out.len() as u64).to_be_bytes());
    out.extend_from_slice(tag_out);
    if let Some(t) = threshold {
        out.extend_from_slice(&t.to_be_bytes());
    }
    out
}

struct Exchange {
    tag_in: Vec<u8>,
    tag_out: Vec<u8>,
    threshold: Option<u64>,
}

fn decode_exchange(bytes: &[u8], expect_threshold: bool) -> Result<Exchange> {
    let mut offset = 0usize;
    let read_u64 = |bytes: &[u8], offset: &mut usize| -> Result<u64> {
        let slice = bytes.get(*offset..*offset + 8).ok_or(QkdError::SizeMismatch)?;
        *offset += 8;
        Ok(u64::from_be_bytes(slice.try_into().unwrap()))
    };
    let in_len = read_u64(bytes, &mut offset)? as usize;
    let tag_in = bytes.get(offset..offset + in_len).ok_or(QkdError::SizeMismatch)?.to_vec();
    offset += in_len;
    let out_len = read_u64(bytes, &mut offset)? as usize;
    let tag_out = bytes.get(offset..offset + out_len).ok_or(QkdError::SizeMismatch)?.to_vec();
    offset += out_len;
    let threshold = if expect_threshold {
        Some(read_u64(bytes, &mut offset)?)
    } else {
        None
    };
    Ok(Exchange { tag_in, tag_out, threshold })
}

#[async_trait]
impl Stage for AuthStage {
    async fn process(&mut self, role: Role, channel: &mut PeerChannel, mut key: Key) -> Result<StageOutcome> {
        if key.state == KeyState::Disclosed {
            return Ok(StageOutcome::drop(key));
        }

        let original_state = key.state;
        let ctx_in = CryptoContext::from_str(&key.scheme_in)?;
        let ctx_out = CryptoContext::from_str(&key.scheme_out)?;

        if ctx_in.needs_final_key() || ctx_out.needs_final_key() {
            let tag_in_alice = compute_tag(true, &ctx_in, &self.store_in)?;
            let tag_out_alice = compute_tag(true, &ctx_out, &self.store_out)?;
            let tag_in_bob = compute_tag(false, &ctx_in, &self.store_in)?;
            let tag_out_bob = compute_tag(false, &ctx_out, &self.store_out)?;

            let (tag_in_alice, ids_in_alice) = match tag_in_alice {
                Some(v) => v,
                None => return Ok(self.authentication_famine(key)),
            };
            let (tag_out_alice, ids_out_alice) = match tag_out_alice {
                Some(v) => v,
                None => return Ok(self.authentication_famine(key)),
            };
            let (tag_in_bob, ids_in_bob) = match tag_in_bob {
                Some(v) => v,
                None => return Ok(self.authentication_famine(key)),
            };
            let (tag_out_bob, ids_out_bob) = match tag_out_bob {
                Some(v) => v,
                None => return Ok(self.authentication_famine(key)),
            };

            let payload = match role {
                Role::Alice => encode_exchange(&tag_in_alice, &tag_out_alice, Some(self.threshold_bytes as u64)),
                Role::Bob => encode_exchange(&tag_in_bob, &tag_out_bob, None),
            };
            channel.send(key.id, TAG_EXCHANGE, payload).await?;

            let reply = channel.recv_for(key.id).await?;
            let exchange = decode_exchange(&reply.payload, role == Role::Bob)?;

            let authentic = match role {
                Role::Alice => tag_in_bob == exchange.tag_out && tag_out_bob == exchange.tag_in,
                Role::Bob => tag_in_alice == exchange.tag_out && tag_out_alice == exchange.tag_in,
            };

            if !authentic {
                self.faulted.store(true, Ordering::SeqCst);
                tracing::error!("authentication verification failed for key {}", key.id);
                return Ok(StageOutcome::drop(key));
            }

            self.store_in.delete_many(&ids_in_alice)?;
            self.store_in.delete_many(&ids_in_bob)?;
            self.store_out.delete_many(&ids_out_alice)?;
            self.store_out.delete_many(&ids_out_bob)?;

            if role == Role::Bob {
                if let Some(peer_threshold) = exchange.threshold {
                    if peer_threshold as usize != self.threshold_bytes {
                        self.threshold_bytes = peer_threshold as usize;
                    }
                }
            }
        }

        if original_state == KeyState::Amplified {
            match role {
                Role::Alice => {
                    if self.available_incoming() < self.threshold_bytes {
                        nibble(&mut key, &self.store_in, self.threshold_bytes)?;
                    }
                    if self.available_outgoing() < self.threshold_bytes {
                        nibble(&mut key, &self.store_out, self.threshold_bytes)?;
                    }
                }
                Role::Bob => {
                    if self.available_outgoing() < self.threshold_bytes {
                        nibble(&mut key, &self.store_out, self.threshold_bytes)?;
                    }
                    if self.available_incoming() < self.threshold_bytes {
                        nibble(&mut key, &self.store_in, self.threshold_bytes)?;
                    }
                }
            }
        }

        if self.available_incoming() < self.threshold_bytes || self.available_outgoing() < self.threshold_bytes {
            tracing::debug!(
                "key material famine: incoming {}/{} outgoing {}/{}",
                self.available_incoming(),
                self.threshold_bytes,
                self.available_outgoing(),
                self.threshold_bytes
            );
            self.starving.store(true, Ordering::SeqCst);
        } else {
            self.starving.store(false, Ordering::SeqCst);
        }

        key.state = KeyState::Authenticated;
        let (new_ctx_in, new_ctx_out) = self.create_contexts();
        key.scheme_in = new_ctx_in.to_scheme_string();
        key.scheme_out = new_ctx_out.to_scheme_string();

        if key.data.is_empty() {
            tracing::info!("authentication stage consumed the whole key, nothing left to forward");
            return Ok(StageOutcome::drop(key));
        }

        Ok(StageOutcome::forward(key))
    }
}

impl AuthStage {
    fn authentication_famine(&mut self, mut key: Key) -> StageOutcome {
        tracing::error!(
            "cannot deduce enough key material for authentication tag creation for key {} - pipeline broken",
            key.id
        );
        self.faulted.store(true, Ordering::SeqCst);
        key.state = KeyState::Disclosed;
        StageOutcome::drop(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qkd_transport::Link;
    use tokio::io::duplex;

    fn stores() -> (KeyStore, KeyStore) {
        (
            KeyStore::open_ram(0, 64, 16).unwrap(),
            KeyStore::open_ram(0, 64, 16).unwrap(),
        )
    }

    fn fill(store: &KeyStore, n: usize) {
        for _ in 0..n {
            store_bytes(store, &[0xAB; 16]).unwrap();
        }
    }

    #[tokio::test]
    async fn null_contexts_skip_authentication_entirely() {
        let (a_link, b_link) = duplex(4096);
        let mut channel = PeerChannel::new(Link::from_stream(a_link));
        let _ = b_link;
        let (store_in, store_out) = stores();
        let mut stage = AuthStage::new(store_in, store_out, 64);

        let mut key = Key::new(KeyId(1), vec![1, 2, 3, 4]);
        key.state = KeyState::Confirmed;
        key.scheme_in = "null".to_string();
        key.scheme_out = "null".to_string();

        let outcome = stage.process(Role::Alice, &mut channel, key).await.unwrap();
        assert!(outcome.forward);
        assert_eq!(outcome.key.state, KeyState::Authenticated);
    }

    #[tokio::test]
    async fn matching_xor_contexts_authenticate() {
        let (a_link, b_link) = duplex(8192);
        let mut alice_channel = PeerChannel::new(Link::from_stream(a_link));
        let mut bob_channel = PeerChannel::new(Link::from_stream(b_link));

        let (alice_in, alice_out) = stores();
        let (bob_in, bob_out) = stores();
        fill(&alice_in, 8);
        fill(&alice_out, 8);
        fill(&bob_in, 8);
        fill(&bob_out, 8);

        let mut alice_stage = AuthStage::new(alice_in, alice_out, 64);
        let mut bob_stage = AuthStage::new(bob_in, bob_out, 64);

        let mut alice_key = Key::new(KeyId(5), vec![9, 9, 9, 9]);
        alice_key.state = KeyState::Confirmed;
        alice_key.scheme_in = "xor:aabbccdd".to_string();
        alice_key.scheme_out = "xor:11223344".to_string();
        let mut bob_key = alice_key.clone();
        // Bob's incoming is Alice's outgoing and vice versa for a real link,
        // but both local stores hold identical shared auth material so the
        // scheme strings (and therefore final key draws) line up either way.
        bob_key.id = KeyId(5);

        let (alice_outcome, bob_outcome) = tokio::join!(
            alice_stage.process(Role::Alice, &mut alice_channel, alice_key),
            bob_stage.process(Role::Bob, &mut bob_channel, bob_key),
        );

        let alice_result = alice_outcome.unwrap();
        let bob_result = bob_outcome.unwrap();
        assert!(alice_result.forward);
        assert!(bob_result.forward);
        assert_eq!(alice_result.key.state, KeyState::Authenticated);
        assert_eq!(bob_result.key.state, KeyState::Authenticated);
    }

    #[tokio::test]
    async fn disclosed_keys_bypass_authentication() {
        let (a_link, b_link) = duplex(64);
        let mut channel = PeerChannel::new(Link::from_stream(a_link));
        let _ = b_link;
        let (store_in, store_out) = stores();
        let mut stage = AuthStage::new(store_in, store_out, 64);
        let mut key = Key::new(KeyId(3), vec![1, 2]);
        key.state = KeyState::Disclosed;
        let outcome = stage.process(Role::Alice, &mut channel, key).await.unwrap();
        assert!(!outcome.forward);
    }

    #[test]
    fn store_bytes_drops_partial_quantum_remainder() {
        let store = KeyStore::open_ram(0, 8, 16).unwrap();
        let inserted = store_bytes(&store, &[1u8; 20]).unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(store.count(), 1);
    }
}
