//! TTL-bounded result caches.
//!
//! - [`TtlCache`]: generic key/value store with passive expiry
//! - [`ResultCache`]: the complete-set cache, per-domain projection caches and
//!   the backing-store fallback composed into one read path

mod result_cache;
mod ttl;

pub use result_cache::{DomainResult, ResultCache, ResultSource, is_valid_key};
pub use ttl::TtlCache;
