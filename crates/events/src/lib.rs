//! `piiscan-events`: topic-based publish/subscribe for the job pipeline.
//!
//! Producers publish JSON [`EventEnvelope`]s on a [`Topic`]; each topic has at
//! most one [`MessageHandler`] per process.

pub mod bus;
pub mod envelope;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{PubSub, PubSubError, Subscribed, Topic};
pub use envelope::EventEnvelope;
pub use handler::{HandlerError, MessageHandler};
pub use in_memory_bus::InMemoryPubSub;
