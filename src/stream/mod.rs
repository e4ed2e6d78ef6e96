//! Session-scoped event streaming.
//!
//! - [`StreamRegistry`]: one bounded channel per live session
//! - [`EventTranslator`]: producer events to [`StreamEnvelope`](crate::normalized::StreamEnvelope)s
//! - [`TransportLoop`]: drains a channel to one connected client

pub mod registry;
pub mod translator;
pub mod transport;

pub use registry::{SessionChannel, StreamRegistry};
pub use translator::{EventTranslator, ProducerEvent};
pub use transport::TransportLoop;
