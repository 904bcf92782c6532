//! # Shared Bus
//!
//! One-way, in-process event bus. Chain ingestion publishes
//! `BlockConnected` strictly after the backing batch commits; mining
//! publishes `BlockMined` for the runtime to feed back into ingestion.
//! Listeners (mining preemption, mempool eviction, propagation) subscribe
//! with a topic filter.

pub mod events;
pub mod publisher;
pub mod subscriber;

pub use events::{BlockConnectedEvent, EventFilter, EventTopic, NodeEvent};
pub use publisher::{EventPublisher, InMemoryEventBus};
pub use subscriber::Subscription;

/// Default broadcast channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
