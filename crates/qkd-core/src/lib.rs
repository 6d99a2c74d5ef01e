pub mod buffer;
pub mod constants;
pub mod error;
pub mod key;
pub mod types;

pub use buffer::{BufferReader, BufferWriter};
pub use error::{QkdError, Result};
pub use key::Key;
pub use types::{Algorithm, KeyId, KeyIdCounter, KeyState, SchemeSpec};
