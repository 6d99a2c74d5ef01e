//! Wiring for the full distillation pipeline: sifting, confirmation, privacy
//! amplification, resize, and authentication, chained in that order over
//! five independent peer channels (one per stage, so a stage never sees a
//! message meant for its neighbour).
//!
//! This crate is the orchestration layer a node binary would build on: it
//! owns no transport of its own beyond what [`qkd_stage::PeerChannel`]
//! already provides, and runs every stage for a given role in a single
//! future so a caller only has to drive one `process` call per raw key.

use qkd_auth::AuthStage;
use qkd_confirmation::ConfirmationStage;
use qkd_core::error::Result;
use qkd_core::key::Key;
use qkd_privacy_amplification::PrivacyAmplificationStage;
use qkd_resize::ResizeStage;
use qkd_sifting::SiftingStage;
use qkd_stage::{PeerChannel, Role, Stage};
use qkd_transport::Link;
use tokio::io::{AsyncRead, AsyncWrite};

/// One peer channel per stage. Each is backed by its own transport
/// connection (or, for an in-process pairing, its own `duplex` half) so that
/// reordered messages in one stage can never be mistaken for another's.
pub struct PipelineChannels {
    pub sifting: PeerChannel,
    pub confirmation: PeerChannel,
    pub amplification: PeerChannel,
    pub resize: PeerChannel,
    pub auth: PeerChannel,
}

impl PipelineChannels {
    pub fn new(
        sifting: PeerChannel,
        confirmation: PeerChannel,
        amplification: PeerChannel,
        resize: PeerChannel,
        auth: PeerChannel,
    ) -> Self {
        PipelineChannels {
            sifting,
            confirmation,
            amplification,
            resize,
            auth,
        }
    }
}

/// Wraps a `duplex`-style stream pair into matching [`PeerChannel`]s for the
/// two sides of a single stage, for in-process wiring and tests.
pub fn peer_channel_pair<A, B>(alice_side: A, bob_side: B) -> (PeerChannel, PeerChannel)
where
    A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    (
        PeerChannel::new(Link::from_stream(alice_side)),
        PeerChannel::new(Link::from_stream(bob_side)),
    )
}

/// The five stages in fixed order, owned by one side of a link.
pub struct Pipeline {
    sifting: SiftingStage,
    confirmation: ConfirmationStage,
    amplification: PrivacyAmplificationStage,
    resize: ResizeStage,
    auth: AuthStage,
}

impl Pipeline {
    pub fn new(
        sifting: SiftingStage,
        confirmation: ConfirmationStage,
        amplification: PrivacyAmplificationStage,
        resize: ResizeStage,
        auth: AuthStage,
    ) -> Self {
        Pipeline {
            sifting,
            confirmation,
            amplification,
            resize,
            auth,
        }
    }

    /// Run one raw key through every stage, stopping early (and returning no
    /// keys) wherever a stage consumes it without a replacement to forward —
    /// e.g. not enough bits sifted yet, a failed confirmation round, or an
    /// authentication famine. Resize is the one stage that can turn a single
    /// input into several completed keys in one call (a buffered run
    /// crossing more than one `exact_size` boundary at once), so every key
    /// it emits is carried through authentication independently and the
    /// pipeline as a whole returns a batch rather than a single key.
    pub async fn process(
        &mut self,
        role: Role,
        channels: &mut PipelineChannels,
        key: Key,
    ) -> Result<Vec<Key>> {
        let outcome = self.sifting.process(role, &mut channels.sifting, key).await?;
        if !outcome.forward {
            return Ok(Vec::new());
        }
        let outcome = self
            .confirmation
            .process(role, &mut channels.confirmation, outcome.key)
            .await?;
        if !outcome.forward {
            return Ok(Vec::new());
        }
        let outcome = self
            .amplification
            .process(role, &mut channels.amplification, outcome.key)
            .await?;
        if !outcome.forward {
            return Ok(Vec::new());
        }
        let outcome = self.resize.process(role, &mut channels.resize, outcome.key).await?;
        let resized_keys = outcome.forwarded_keys();

        let mut authenticated = Vec::with_capacity(resized_keys.len());
        for resized_key in resized_keys {
            let outcome = self.auth.process(role, &mut channels.auth, resized_key).await?;
            authenticated.extend(outcome.forwarded_keys());
        }
        Ok(authenticated)
    }
}
