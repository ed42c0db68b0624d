//! Redundant usage-flag storage.
//!
//! A trial claim is recorded as a [`UsageFlag`] in several independent
//! storage substrates at once. A claim counts as used if any one of them
//! still remembers it, so clearing a single mechanism is not enough to claim
//! again.
//!
//! ```text
//! mark_used(fp) ─┬─> ephemeral ─┐
//!                ├─> session    │
//!                ├─> cookie     ├─ is_used(fp) = OR of all
//!                ├─> indexed    │
//!                └─> cache    ──┘
//! ```

pub mod backends;
pub mod clock;
pub mod error;
pub mod store;
pub mod types;

pub use backends::{
    CacheBackend, Cookie, CookieBackend, FlagBackend, FlagRecord, IndexedRecordBackend,
    KeyValueBackend, KeyValueScope,
};
pub use clock::{end_of_month, Clock, FixedClock, SystemClock};
pub use error::BackendError;
pub use store::UsageConsensusStore;
pub use types::{BackendKind, BackendReading, FlagKey, FlagPresence, UsageFlag, WriteReport};
