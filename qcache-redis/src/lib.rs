#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod connection;
pub mod error;
pub mod metrics;
pub mod reply;
pub mod storage;
pub mod token;

#[doc(inline)]
pub use crate::connection::{
    Connection, Connector, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IO_TIMEOUT, Endpoint, RedisConnector,
    Transport,
};
#[doc(inline)]
pub use crate::error::ConnectionError;
#[doc(inline)]
pub use crate::reply::{Frame, Reply, ReplyType};
#[doc(inline)]
pub use crate::storage::{DEFAULT_INVALIDATE_ATTEMPTS, RedisStorage, RedisStorageBuilder};
#[doc(inline)]
pub use crate::token::RedisToken;
