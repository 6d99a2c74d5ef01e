use thiserror::Error;

/// Errors shared across the pipeline core crates.
#[derive(Debug, Error)]
pub enum QkdError {
    // ── Key framing ──────────────────────────────────────────────────────────
    #[error("key buffer underrun: needed {needed} bytes, had {available}")]
    BufferUnderrun { needed: usize, available: usize },

    #[error("crypto scheme string exceeds u64 length prefix")]
    SchemeTooLong,

    #[error("payload exceeds declared size field")]
    SizeMismatch,

    // ── Crypto scheme grammar ───────────────────────────────────────────────
    #[error("malformed crypto scheme string: {0}")]
    MalformedScheme(String),

    #[error("unknown crypto algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("unsupported evaluation-hash width: {0} bits")]
    UnsupportedEvHashWidth(u32),

    #[error("invalid hex in crypto scheme field: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    // ── Stage framework ─────────────────────────────────────────────────────
    #[error("peer reorder queue is full for key {0}")]
    ReorderQueueFull(u32),

    #[error("peer synchronization timed out waiting for key {0}")]
    SyncTimeout(u32),

    #[error("stage received a key older than the current cursor")]
    StaleKey,

    #[error("key was dropped: {0}")]
    KeyDropped(String),

    // ── Key database ────────────────────────────────────────────────────────
    #[error("key database is not open")]
    DbNotOpen,

    #[error("key id {0} is out of the configured [min, max) range")]
    IdOutOfRange(u32),

    #[error("key id {0} already present")]
    DuplicateId(u32),

    #[error("key id {0} not found")]
    NotFound(u32),

    #[error("no contiguous run of {0} free slots available")]
    NoContiguousRun(usize),

    #[error("key database is exhausted")]
    Exhausted,

    // ── Transport ────────────────────────────────────────────────────────────
    #[error("unsupported stream endpoint scheme: {0}")]
    UnsupportedScheme(String),

    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer connection closed")]
    ConnectionClosed,

    // ── Privacy amplification ───────────────────────────────────────────────
    #[error("requested NTT length is not a power of two: {0}")]
    NotPowerOfTwo(usize),

    #[error("privacy amplification would yield a non-positive key length")]
    AmplificationExhausted,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, QkdError>;
