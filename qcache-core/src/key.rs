//! Cache key and invalidation tag types.
//!
//! - [`CacheKey`] - fingerprint of a query result, built by the cache filter
//! - [`InvalidationTag`] - coarse data dependency (usually a table name)
//!
//! ## Serialized form
//!
//! Storages never look inside a key. They only use its serialized form,
//! produced by [`CacheKey::to_bytes`], as the identifier of the stored value.
//! Two keys are equal exactly when their serialized forms are equal.
//!
//! ```
//! use qcache_core::CacheKey;
//!
//! let key = CacheKey::new("app", "10.0.0.1", 0x1f, 0x2e);
//! let bytes = key.to_bytes();
//!
//! assert_eq!(CacheKey::from_bytes(&bytes).unwrap(), key);
//! assert_eq!(format!("{}", key), "app@10.0.0.1:1f:2e");
//! ```

use std::fmt;
use std::sync::Arc;

use bitcode::{Decode, Encode};
use smol_str::SmolStr;

/// Inner structure containing the actual key data.
/// Wrapped in Arc for cheap cloning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Encode, Decode)]
struct CacheKeyInner {
    user: String,
    host: String,
    data_hash: u64,
    full_hash: u64,
}

/// Fingerprint identifying a cached query result.
///
/// A key combines the identity of the client (`user`, `host`) with two hashes
/// computed by the filter: `data_hash` over the statement and the default
/// database, `full_hash` over everything that can affect the result.
///
/// Keys are immutable. Cloning only increments a reference count.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    inner: Arc<CacheKeyInner>,
}

impl CacheKey {
    /// Creates a new cache key.
    pub fn new(
        user: impl Into<String>,
        host: impl Into<String>,
        data_hash: u64,
        full_hash: u64,
    ) -> Self {
        CacheKey {
            inner: Arc::new(CacheKeyInner {
                user: user.into(),
                host: host.into(),
                data_hash,
                full_hash,
            }),
        }
    }

    /// User the result was computed for.
    pub fn user(&self) -> &str {
        &self.inner.user
    }

    /// Host the user connected from.
    pub fn host(&self) -> &str {
        &self.inner.host
    }

    /// Hash of the statement and default database.
    pub fn data_hash(&self) -> u64 {
        self.inner.data_hash
    }

    /// Hash over everything affecting the result.
    pub fn full_hash(&self) -> u64 {
        self.inner.full_hash
    }

    /// Serialized form used as the storage-level identifier of the value.
    pub fn to_bytes(&self) -> Vec<u8> {
        bitcode::encode(&*self.inner)
    }

    /// Reconstructs a key from its serialized form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bitcode::Error> {
        let inner: CacheKeyInner = bitcode::decode(bytes)?;
        Ok(CacheKey {
            inner: Arc::new(inner),
        })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{:x}:{:x}",
            self.inner.user, self.inner.host, self.inner.data_hash, self.inner.full_hash
        )
    }
}

/// Name of a coarse-grained data dependency, e.g. a fully qualified table name.
///
/// Many keys may share a tag. Invalidating a tag removes every value stored
/// under it.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InvalidationTag(SmolStr);

impl InvalidationTag {
    /// Creates a new tag.
    #[inline]
    pub fn new(tag: impl Into<SmolStr>) -> Self {
        Self(tag.into())
    }

    /// Returns the tag as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the tag as raw bytes, as sent to the store.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for InvalidationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for InvalidationTag {
    #[inline]
    fn from(tag: &str) -> Self {
        Self(SmolStr::new(tag))
    }
}

impl From<String> for InvalidationTag {
    #[inline]
    fn from(tag: String) -> Self {
        Self(SmolStr::from(tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_keys_serialize_identically() {
        let a = CacheKey::new("app", "%", 1, 2);
        let b = CacheKey::new("app", "%", 1, 2);
        assert_eq!(a, b);
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn keys_differing_in_any_part_differ_in_bytes() {
        let base = CacheKey::new("app", "%", 1, 2);
        let others = [
            CacheKey::new("api", "%", 1, 2),
            CacheKey::new("app", "localhost", 1, 2),
            CacheKey::new("app", "%", 3, 2),
            CacheKey::new("app", "%", 1, 4),
        ];
        for other in others {
            assert_ne!(base, other);
            assert_ne!(base.to_bytes(), other.to_bytes());
        }
    }

    #[test]
    fn empty_bytes_do_not_decode() {
        assert!(CacheKey::from_bytes(&[]).is_err());
    }

    #[test]
    fn tag_display_and_bytes() {
        let tag = InvalidationTag::from("shop.orders");
        assert_eq!(tag.to_string(), "shop.orders");
        assert_eq!(tag.as_bytes(), b"shop.orders");
    }
}
