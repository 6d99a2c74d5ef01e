pub mod field;
pub mod toeplitz;
pub mod transform;

pub use field::MODULUS;
pub use toeplitz::{amplify, binary_entropy, build_toeplitz_vector, compressed_length, tau};
pub use transform::{convolution, linear_convolution_bits, ntt};
