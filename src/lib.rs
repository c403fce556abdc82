pub mod bits;
pub mod codes;
pub mod error;
pub mod ir;
pub mod reader;
pub mod stream;

pub use self::error::Error;
pub use self::reader::{parse_bitcode, read_bitcode_triple, BitcodeReader};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
