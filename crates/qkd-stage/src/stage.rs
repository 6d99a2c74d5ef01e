use crate::role::Role;
use crate::sync::ReorderQueue;
use async_trait::async_trait;
use qkd_core::constants::{DEFAULT_SYNC_RETRIES, DEFAULT_SYNC_TIMEOUT_MS};
use qkd_core::error::{QkdError, Result};
use qkd_core::key::Key;
use qkd_core::types::{KeyId, KeyState};
use qkd_transport::{read_envelope, read_key, write_envelope, write_key, Envelope, Link};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;

/// A stage's verdict for one input key: the primary (possibly transformed)
/// key, whether it should be forwarded downstream at all, and any further
/// keys produced by the same call. A `false` verdict mirrors a key being
/// consumed entirely by this stage (e.g. dropped for a failed confirmation
/// round with no replacement emitted). `extra` is how a stage answers "zero
/// or more keys" when one input completes several outputs at once — resize
/// is the only stage that currently does this, when a buffered run crosses
/// more than one `exact_size` boundary in a single `process` call.
pub struct StageOutcome {
    pub key: Key,
    pub forward: bool,
    pub extra: Vec<Key>,
}

impl StageOutcome {
    pub fn forward(key: Key) -> Self {
        StageOutcome {
            key,
            forward: true,
            extra: Vec::new(),
        }
    }

    pub fn drop(key: Key) -> Self {
        StageOutcome {
            key,
            forward: false,
            extra: Vec::new(),
        }
    }

    /// Forward every key in `keys`, in order. Empty input is equivalent to
    /// dropping a null key (nothing ready yet this call).
    pub fn forward_batch(mut keys: Vec<Key>) -> Self {
        if keys.is_empty() {
            return StageOutcome::drop(Key::new(KeyId::NULL, Vec::new()));
        }
        let first = keys.remove(0);
        StageOutcome {
            key: first,
            forward: true,
            extra: keys,
        }
    }

    /// All keys this outcome forwards, primary first, in emission order.
    pub fn forwarded_keys(self) -> Vec<Key> {
        if !self.forward {
            return Vec::new();
        }
        let mut keys = Vec::with_capacity(1 + self.extra.len());
        keys.push(self.key);
        keys.extend(self.extra);
        keys
    }
}

/// One pipeline stage's transformation of a single key, with its peer
/// exchange channel available for the rounds of messaging most stages need.
#[async_trait]
pub trait Stage: Send {
    async fn process(
        &mut self,
        role: Role,
        channel: &mut PeerChannel,
        key: Key,
    ) -> Result<StageOutcome>;
}

/// Wraps a [`Link`] with the per-key reorder parking queue described in the
/// stage framework: messages for a key other than the one currently being
/// waited on are parked (or dropped, if stale) rather than blocking
/// processing of the wrong key.
pub struct PeerChannel {
    link: Link,
    queue: ReorderQueue<Envelope>,
    retries: u32,
    attempt_timeout: Duration,
}

impl PeerChannel {
    pub fn new(link: Link) -> Self {
        PeerChannel {
            link,
            queue: ReorderQueue::new(qkd_core::constants::DEFAULT_REORDER_QUEUE_CAPACITY),
            retries: DEFAULT_SYNC_RETRIES,
            attempt_timeout: Duration::from_millis(DEFAULT_SYNC_TIMEOUT_MS),
        }
    }

    pub fn with_limits(mut self, retries: u32, attempt_timeout: Duration) -> Self {
        self.retries = retries;
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub async fn send(&mut self, key_id: KeyId, tag: u8, payload: Vec<u8>) -> Result<()> {
        write_envelope(&mut self.link, &Envelope::new(key_id, tag, payload)).await
    }

    /// Block (up to the configured retry/timeout budget) for the message
    /// tagged with `key_id`, parking anything else that arrives first.
    pub async fn recv_for(&mut self, key_id: KeyId) -> Result<Envelope> {
        self.queue.set_current(key_id);
        if let Some(env) = self.queue.take_current() {
            return Ok(env);
        }
        let mut attempts = 0u32;
        loop {
            if attempts > self.retries {
                return Err(QkdError::SyncTimeout(key_id.0));
            }
            attempts += 1;
            match timeout(self.attempt_timeout, read_envelope(&mut self.link)).await {
                Ok(Ok(env)) => {
                    let id = env.key_id;
                    if let Some(ready) = self.queue.offer(id, env)? {
                        return Ok(ready);
                    }
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => continue,
            }
        }
    }
}

/// Drives a stage's cooperative read -> process -> write loop over a pair of
/// key streams. Cancellation is a checked flag rather than a forced abort,
/// so a stage always finishes the key it is currently processing.
pub struct StageRunner<S: Stage> {
    stage: S,
    role: Role,
    cancel: Arc<AtomicBool>,
}

impl<S: Stage> StageRunner<S> {
    pub fn new(stage: S, role: Role) -> Self {
        StageRunner {
            stage,
            role,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub async fn run<R, W>(
        &mut self,
        mut input: R,
        mut output: W,
        channel: &mut PeerChannel,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return Ok(());
            }
            let key = match read_key(&mut input).await {
                Ok(k) => k,
                Err(QkdError::ConnectionClosed) => return Ok(()),
                Err(e) => return Err(e),
            };

            let outcome = self.stage.process(self.role, channel, key).await?;
            for out_key in outcome.forwarded_keys() {
                if out_key.state != KeyState::Disclosed {
                    write_key(&mut output, &out_key).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qkd_core::types::KeyId;

    struct Passthrough;

    #[async_trait]
    impl Stage for Passthrough {
        async fn process(
            &mut self,
            _role: Role,
            _channel: &mut PeerChannel,
            key: Key,
        ) -> Result<StageOutcome> {
            Ok(StageOutcome::forward(key))
        }
    }

    #[tokio::test]
    async fn passthrough_forwards_one_key_and_stops_on_close() {
        let (mut feed_in, input) = tokio::io::duplex(4096);
        let (output, mut feed_out) = tokio::io::duplex(4096);
        let (link_a, _link_b) = tokio::io::duplex(64);
        let mut channel = PeerChannel::new(Link::from_stream(link_a));

        let key = Key::new(KeyId(1), vec![9, 9]);
        write_key(&mut feed_in, &key).await.unwrap();
        drop(feed_in);

        let mut runner = StageRunner::new(Passthrough, Role::Alice);
        runner.run(input, output, &mut channel).await.unwrap();

        let back = read_key(&mut feed_out).await.unwrap();
        assert_eq!(back.id, KeyId(1));
    }
}
