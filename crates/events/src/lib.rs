//! Event primitives: the `Event` trait, persisted envelopes and a pub/sub bus.
//!
//! The stock ledger notifies synchronously; this crate provides the
//! channel-based bus used when consumers must run off the writer's thread.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
