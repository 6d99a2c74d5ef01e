//! Resize stage: buffers incoming keys and reassembles them into a fixed
//! shape before forwarding, in one of two modes.
//!
//! `Exact(n)` cuts and concatenates buffered key material into keys of
//! exactly `n` bytes, splitting whichever key straddles a boundary. Both
//! halves of a split key inherit the original's qber unchanged (error rate
//! is assumed uniform across the key), while disclosed-bit count is
//! prorated by the byte fraction each half keeps. `Minimum(n)` instead
//! concatenates keys until at least `n` bytes have accumulated and forwards
//! everything in one shot, leaving no remainder buffered.
//!
//! This stage relies on the pipeline keeping both peers' key streams in
//! lock-step, since a size mismatch between Alice's and Bob's buffers would
//! desynchronize every following stage; there is no peer exchange here.

use async_trait::async_trait;
use qkd_core::error::Result;
use qkd_core::key::Key;
use qkd_core::types::{KeyId, KeyIdCounter, KeyState};
use qkd_stage::{PeerChannel, Role, Stage, StageOutcome};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy)]
pub enum ResizeMode {
    Exact(usize),
    Minimum(usize),
    Passthrough,
}

struct Segment {
    data: Vec<u8>,
    qber: f64,
    disclosed_bits: u64,
}

pub struct ResizeStage {
    mode: ResizeMode,
    buffer: VecDeque<Segment>,
    current_size: usize,
    ready: VecDeque<Key>,
    ids: KeyIdCounter,
}

impl ResizeStage {
    pub fn new(mode: ResizeMode) -> Self {
        ResizeStage {
            mode,
            buffer: VecDeque::new(),
            current_size: 0,
            ready: VecDeque::new(),
            ids: KeyIdCounter::default(),
        }
    }

    fn push(&mut self, key: &Key) {
        self.current_size += key.data.len();
        self.buffer.push_back(Segment {
            data: key.data.clone(),
            qber: key.qber,
            disclosed_bits: key.disclosed_bits,
        });
    }

    /// Pull exactly `want` bytes off the front of the buffer, splitting the
    /// segment that straddles the boundary and requeuing its remainder.
    fn extract(&mut self, want: usize) -> (Vec<u8>, f64, u64) {
        let mut data = Vec::with_capacity(want);
        let mut error_bits = 0.0f64;
        let mut total_bits = 0.0f64;
        let mut disclosed = 0u64;

        while data.len() < want {
            let mut seg = self.buffer.pop_front().expect("enough bytes were reserved by the caller");
            let need = want - data.len();
            if seg.data.len() <= need {
                total_bits += (seg.data.len() * 8) as f64;
                error_bits += seg.qber * (seg.data.len() * 8) as f64;
                disclosed += seg.disclosed_bits;
                data.extend_from_slice(&seg.data);
            } else {
                let cut = need;
                let fraction = cut as f64 / seg.data.len() as f64;
                let (first, rest) = seg.data.split_at(cut);
                data.extend_from_slice(first);
                total_bits += (cut * 8) as f64;
                error_bits += seg.qber * (cut * 8) as f64;
                disclosed += (seg.disclosed_bits as f64 * fraction).round() as u64;

                let remainder = Segment {
                    data: rest.to_vec(),
                    qber: seg.qber,
                    disclosed_bits: seg.disclosed_bits - (seg.disclosed_bits as f64 * fraction).round() as u64,
                };
                seg.data.clear();
                self.buffer.push_front(remainder);
            }
        }

        self.current_size -= want;
        let qber = if total_bits > 0.0 { error_bits / total_bits } else { 0.0 };
        (data, qber, disclosed)
    }

    fn drain_exact(&mut self, n: usize) {
        while self.current_size >= n {
            let (data, qber, disclosed_bits) = self.extract(n);
            let mut key = Key::new(self.ids.next(), data);
            key.state = KeyState::Sifted;
            key.qber = qber;
            key.disclosed_bits = disclosed_bits;
            self.ready.push_back(key);
        }
    }

    fn drain_minimum(&mut self, n: usize) {
        if self.current_size < n {
            return;
        }
        let want = self.current_size;
        let (data, qber, disclosed_bits) = self.extract(want);
        let mut key = Key::new(self.ids.next(), data);
        key.state = KeyState::Sifted;
        key.qber = qber;
        key.disclosed_bits = disclosed_bits;
        self.ready.push_back(key);
    }
}

#[async_trait]
impl Stage for ResizeStage {
    async fn process(
        &mut self,
        _role: Role,
        _channel: &mut PeerChannel,
        key: Key,
    ) -> Result<StageOutcome> {
        if key.state == KeyState::Disclosed {
            return Ok(StageOutcome::drop(key));
        }

        match self.mode {
            ResizeMode::Passthrough => return Ok(StageOutcome::forward(key)),
            ResizeMode::Exact(n) => {
                self.push(&key);
                self.drain_exact(n);
            }
            ResizeMode::Minimum(n) => {
                self.push(&key);
                self.drain_minimum(n);
            }
        }

        // Drain everything that completed this call — a single input key can
        // push several buffered runs past `exact_size` at once (e.g. two
        // 1500-byte keys against a 1000-byte target complete two keys on the
        // second push), and every one of them must be forwarded, not just
        // the first.
        let batch: Vec<Key> = self.ready.drain(..).collect();
        Ok(StageOutcome::forward_batch(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qkd_transport::Link;
    use tokio::io::duplex;

    fn dummy_channel() -> PeerChannel {
        let (a, _b) = duplex(64);
        PeerChannel::new(Link::from_stream(a))
    }

    #[tokio::test]
    async fn exact_size_splits_a_crossing_key() {
        let mut stage = ResizeStage::new(ResizeMode::Exact(4));
        let mut channel = dummy_channel();

        let mut k1 = Key::new(KeyId(1), vec![1, 2, 3]);
        k1.state = KeyState::Confirmed;
        k1.qber = 0.02;
        k1.disclosed_bits = 10;
        let out1 = stage.process(Role::Alice, &mut channel, k1).await.unwrap();
        assert!(!out1.forward);

        let mut k2 = Key::new(KeyId(2), vec![4, 5, 6]);
        k2.state = KeyState::Confirmed;
        k2.qber = 0.04;
        k2.disclosed_bits = 20;
        let out2 = stage.process(Role::Alice, &mut channel, k2).await.unwrap();
        assert!(out2.forward);
        assert_eq!(out2.key.data, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn minimum_size_concatenates_until_threshold() {
        let mut stage = ResizeStage::new(ResizeMode::Minimum(5));
        let mut channel = dummy_channel();

        let mut k1 = Key::new(KeyId(1), vec![1, 2]);
        k1.state = KeyState::Confirmed;
        let out1 = stage.process(Role::Alice, &mut channel, k1).await.unwrap();
        assert!(!out1.forward);

        let mut k2 = Key::new(KeyId(2), vec![3, 4, 5]);
        k2.state = KeyState::Confirmed;
        let out2 = stage.process(Role::Alice, &mut channel, k2).await.unwrap();
        assert!(out2.forward);
        assert_eq!(out2.key.data, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn a_single_push_can_complete_more_than_one_exact_key() {
        // Two 1500-byte inputs against a 1000-byte target must yield three
        // 1000-byte outputs, with the one straddling the boundary carrying
        // the size-weighted mean qber and prorated disclosed bits.
        let mut stage = ResizeStage::new(ResizeMode::Exact(1000));
        let mut channel = dummy_channel();

        let mut k1 = Key::new(KeyId(1), vec![0u8; 1500]);
        k1.state = KeyState::Confirmed;
        k1.qber = 0.02;
        k1.disclosed_bits = 100;
        let out1 = stage.process(Role::Alice, &mut channel, k1).await.unwrap();
        assert!(out1.forward);
        assert!(out1.extra.is_empty());
        assert_eq!(out1.key.data.len(), 1000);

        let mut k2 = Key::new(KeyId(2), vec![0u8; 1500]);
        k2.state = KeyState::Confirmed;
        k2.qber = 0.04;
        k2.disclosed_bits = 200;
        let out2 = stage.process(Role::Alice, &mut channel, k2).await.unwrap();
        assert!(out2.forward);
        assert_eq!(out2.extra.len(), 1, "the second push completes two keys at once");

        let straddling = &out2.key;
        assert_eq!(straddling.data.len(), 1000);
        assert!((straddling.qber - 0.03).abs() < 1e-9);
        assert_eq!(straddling.disclosed_bits, 100);
    }

    #[tokio::test]
    async fn disclosed_keys_bypass_resizing() {
        let mut stage = ResizeStage::new(ResizeMode::Exact(4));
        let mut channel = dummy_channel();
        let mut key = Key::new(KeyId(9), vec![1, 2, 3]);
        key.state = KeyState::Disclosed;
        let out = stage.process(Role::Alice, &mut channel, key).await.unwrap();
        assert!(!out.forward);
    }
}
