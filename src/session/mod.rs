//! Generation sessions and reuse resolution.
//!
//! A session is the correlation id that ties one query to its live event
//! stream and its cached result set.
//!
//! - [`GenerationSession`]: one submitted query
//! - [`SessionStore`]: thread-safe in-memory index of sessions
//! - [`SessionResolver`]: decides whether a request reuses a recent session
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use travel_stream::session::{SessionResolver, SessionStore};
//!
//! let store = SessionStore::new();
//! let resolver = SessionResolver::new(store.clone(), Duration::from_secs(600));
//!
//! let first = resolver.resolve(Some("user-1"), "tapas in Madrid");
//! let again = resolver.resolve(Some("user-1"), "tapas in Madrid");
//! assert_eq!(first.session_id, again.session_id);
//! assert!(again.reused);
//! ```

mod resolver;
mod store;

pub use resolver::{Resolution, SessionResolver};
pub use store::{GenerationSession, SessionStatus, SessionStore};
