#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod error;
pub mod storage;

pub use error::ConfigError;
pub use storage::CacheStorage;
