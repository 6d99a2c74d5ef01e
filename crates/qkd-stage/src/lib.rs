pub mod role;
pub mod stage;
pub mod sync;

pub use role::Role;
pub use stage::{PeerChannel, Stage, StageOutcome, StageRunner};
pub use sync::ReorderQueue;
