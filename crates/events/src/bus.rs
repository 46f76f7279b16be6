//! Topic-based publish/subscribe abstraction (mechanics only).
//!
//! The pipeline uses two logical topics, *job-created* and *job-status-updated*,
//! to decouple producers from the workers that consume them.
//!
//! ## Delivery Guarantees
//!
//! - **At-least-once**: a message may be handed to a handler more than once;
//!   handlers must be idempotent.
//! - **No ordering guarantee** between messages about different jobs.
//! - **One subscription per topic per process**: a second `subscribe` for the
//!   same topic is ignored and reported as [`Subscribed::AlreadySubscribed`],
//!   so a message is never dispatched to two stacked handlers.
//!
//! ## Error Handling
//!
//! `publish()` failures are returned to the caller and never swallowed; the
//! caller decides whether to fail, retry, or log and continue.

use std::sync::Arc;

use async_trait::async_trait;

use crate::handler::MessageHandler;

/// Name of a logical topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Topic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Outcome of a `subscribe` call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Subscribed {
    /// A consumer was attached to the topic.
    New,
    /// The topic already had a consumer in this process; the call was ignored.
    AlreadySubscribed,
}

#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
    #[error("failed to serialize message: {0}")]
    Serialization(String),

    #[error("transport error on topic {topic}: {message}")]
    Transport { topic: Topic, message: String },

    #[error("topic {0} is closed")]
    Closed(Topic),
}

impl PubSubError {
    pub fn transport(topic: &Topic, message: impl Into<String>) -> Self {
        Self::Transport {
            topic: topic.clone(),
            message: message.into(),
        }
    }
}

/// Transport-agnostic pub/sub channel.
///
/// Implementations: [`crate::InMemoryPubSub`] (single process) and, in
/// `piiscan-infra`, a Redis-backed queue for multi-process deployments.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish raw bytes to a topic.
    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<(), PubSubError>;

    /// Attach `handler` as the consumer of `topic`.
    async fn subscribe(
        &self,
        topic: &Topic,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscribed, PubSubError>;
}

#[async_trait]
impl<B> PubSub for Arc<B>
where
    B: PubSub + ?Sized,
{
    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<(), PubSubError> {
        (**self).publish(topic, payload).await
    }

    async fn subscribe(
        &self,
        topic: &Topic,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscribed, PubSubError> {
        (**self).subscribe(topic, handler).await
    }
}
