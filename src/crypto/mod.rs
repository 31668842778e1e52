pub mod encoding;
pub mod sra;

pub use encoding::BigNum;
pub use sra::{SraError, SraKeyPair};
