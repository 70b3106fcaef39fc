//! Live readings relay
//!
//! Change feed → [`adapter`] → normalizer → [`dedup`] → [`hub`] → one
//! [`session`] per stream connection. [`service::ListenerService`] owns the
//! single change-feed subscription.

pub mod adapter;
pub mod dedup;
pub mod hub;
pub mod service;
pub mod session;

pub use dedup::Deduplicator;
pub use hub::{RelayHub, RelaySubscriber, TryNext};
pub use service::ListenerService;
pub use session::{reading_stream, SessionConfig, SessionPhase};
