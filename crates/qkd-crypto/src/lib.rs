pub mod context;
pub mod evhash;
pub mod gf;
pub mod null;
pub mod xor;

pub use context::CryptoContext;
pub use evhash::EvHashContext;
pub use null::NullContext;
pub use xor::XorContext;
