//! Persistent page-image cache.
//!
//! One PNG per decoded page, keyed by document file name, page index, and
//! aspect signature, with per-key locking for concurrent access.

mod disk;
mod key;

pub use disk::{CacheError, CacheStats, PageCache};
pub use key::{AspectSignature, CacheKey};
