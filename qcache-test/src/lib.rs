//! Test support for qcache storages.

pub mod mock_store;
pub mod session;
pub mod tracing;

pub use mock_store::{MockConnector, MockStore, MockTransport};
pub use session::{Session, key, tags};
