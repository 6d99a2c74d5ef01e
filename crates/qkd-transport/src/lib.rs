pub mod endpoint;
pub mod link;
pub mod message;

pub use endpoint::EndpointSpec;
pub use link::{Link, LinkRole};
pub use message::{read_envelope, read_key, write_envelope, write_key, Envelope};
