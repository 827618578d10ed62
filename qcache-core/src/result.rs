//! Operation outcomes and lookup flags.

use bitflags::bitflags;

/// Outcome of a cache operation.
///
/// Every token operation returns [`CacheResult::Pending`] synchronously.
/// The terminal code (`Ok`, `NotFound` or `Error`) arrives later through the
/// operation's callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheResult {
    /// The operation succeeded.
    Ok,
    /// The key (or tag) was not present.
    NotFound,
    /// The operation failed; from the proxy's point of view this is a miss.
    Error,
    /// The real outcome will be delivered asynchronously.
    Pending,
}

impl CacheResult {
    /// Returns `true` for [`CacheResult::Ok`].
    #[inline]
    pub fn is_ok(self) -> bool {
        self == CacheResult::Ok
    }

    /// Returns `true` for [`CacheResult::Pending`].
    #[inline]
    pub fn is_pending(self) -> bool {
        self == CacheResult::Pending
    }

    /// Short lowercase name, used as a log field and metrics label.
    pub fn as_str(self) -> &'static str {
        match self {
            CacheResult::Ok => "ok",
            CacheResult::NotFound => "not_found",
            CacheResult::Error => "error",
            CacheResult::Pending => "pending",
        }
    }
}

bitflags! {
    /// Flags modifying a value lookup.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LookupFlags: u32 {
        /// Return a stale value instead of reporting it missing.
        const INCLUDE_STALE = 0x01;
    }
}
