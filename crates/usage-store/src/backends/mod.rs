//! Storage substrates able to hold a usage flag.
//!
//! Each backend is independently clearable by the visitor, which is why the
//! consensus store writes to all of them and trusts any single hit.

mod cache;
mod cookie;
mod indexed;
mod kv;

pub use cache::{CacheBackend, CachedResponse, CACHE_PATH_PREFIX};
pub use cookie::{Cookie, CookieBackend};
pub use indexed::{FlagRecord, IndexedRecordBackend};
pub use kv::{KeyValueBackend, KeyValueScope};

use crate::error::BackendError;
use crate::types::{BackendKind, UsageFlag};
use async_trait::async_trait;
use trial_identity::Fingerprint;

/// A durable medium for usage flags.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FlagBackend: Send + Sync {
    /// Which substrate this is.
    fn kind(&self) -> BackendKind;

    /// Store the flag, overwriting any previous copy.
    async fn set_flag(&self, flag: &UsageFlag) -> Result<(), BackendError>;

    /// Whether a live flag for `fingerprint` is present.
    async fn has_flag(&self, fingerprint: &Fingerprint) -> Result<bool, BackendError>;
}
