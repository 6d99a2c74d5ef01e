//! Numeric constants shared across the pipeline. Most of these mirror fixed
//! values from the reference distillation protocol; they are not tunable
//! without breaking wire compatibility between peers.

// ── NTT prime fields ─────────────────────────────────────────────────────────
// p = 15 * 2^27 + 1. Has a 2^27 subgroup, which covers every practical key
// length; this is the field privacy amplification runs in.
pub const NTT_PRIME_15_27: u64 = 2_013_265_921;

// p = 13 * 2^20 + 1. Retained for interoperability with peers configured for
// the smaller modulus; unused unless explicitly selected.
pub const NTT_PRIME_13_20: u64 = 13_631_489;

/// log2 of the multiplicative subgroup order of [`NTT_PRIME_15_27`].
pub const NTT_MAX_LOG2_15_27: u32 = 27;

/// log2 of the multiplicative subgroup order of [`NTT_PRIME_13_20`].
pub const NTT_MAX_LOG2_13_20: u32 = 20;

// ── Evaluation-hash scheme ───────────────────────────────────────────────────
/// Field widths the evaluation-hash (`evhash`) crypto scheme may run over.
pub const EVHASH_VALID_BITS: [u32; 5] = [32, 64, 96, 128, 256];

// ── Key id allocation ────────────────────────────────────────────────────────
/// Key id 0 is reserved to mean "null key" and must never be assigned.
pub const NULL_KEY_ID: u32 = 0;

/// Default shift applied by the key id counter: `id = (n << shift) + add`.
pub const DEFAULT_KEY_ID_SHIFT: u32 = 0;

/// Default additive offset applied by the key id counter.
pub const DEFAULT_KEY_ID_ADD: u32 = 0;

// ── Stage framework ──────────────────────────────────────────────────────────
/// Default capacity of the per-key reorder parking queue before a stage
/// treats the peer as desynchronized.
pub const DEFAULT_REORDER_QUEUE_CAPACITY: usize = 16;

/// Default number of retries a stage attempts before giving up on a pending
/// peer exchange.
pub const DEFAULT_SYNC_RETRIES: u32 = 3;

/// Default timeout, in milliseconds, for a single peer exchange attempt.
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 2_000;

// ── Confirmation stage ───────────────────────────────────────────────────────
/// Default number of random masks Alice draws per confirmation round.
pub const DEFAULT_CONFIRMATION_ROUNDS: u32 = 10;

// ── Authentication stage ─────────────────────────────────────────────────────
/// Default quantum (bytes per authentication slot) when a pipeline does not
/// override it.
pub const DEFAULT_QUANTUM: usize = 256;

/// Fraction of `quantum * 2` (one tag exchange's draw) below which a store is
/// considered "deficient" and eligible for nibbling from the amplified pool.
pub const DEFAULT_AUTH_LOW_WATER_SLOTS: usize = 4;

// ── Privacy amplification ────────────────────────────────────────────────────
/// Default security margin, in bits, subtracted from the compressed key size
/// when sizing mode is security-bits based.
pub const DEFAULT_SECURITY_BITS: u64 = 100;

/// Default fraction of the security-bits-computed size kept when sizing mode
/// is reduction-rate based. `1.0` keeps the full computed size.
pub const DEFAULT_REDUCTION_RATE: f64 = 1.0;
