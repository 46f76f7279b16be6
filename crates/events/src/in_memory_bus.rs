//! In-memory pub/sub for tests, dev, and single-process deployments.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, warn};

use crate::bus::{PubSub, PubSubError, Subscribed, Topic};
use crate::handler::MessageHandler;

/// Default number of messages handled concurrently per topic.
pub const DEFAULT_PREFETCH: usize = 10;

#[derive(Debug)]
struct TopicQueue {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    /// Taken by the first subscriber.
    rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl TopicQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

/// In-memory topic queues.
///
/// - Messages published before anyone subscribes are queued, not dropped
/// - One consumer per topic; later `subscribe` calls are ignored
/// - Up to `prefetch` handler invocations run concurrently per topic
#[derive(Debug)]
pub struct InMemoryPubSub {
    topics: Mutex<HashMap<Topic, TopicQueue>>,
    prefetch: usize,
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self::with_prefetch(DEFAULT_PREFETCH)
    }

    pub fn with_prefetch(prefetch: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            prefetch: prefetch.max(1),
        }
    }

    /// Whether a consumer is attached to `topic`.
    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics.get(topic).is_some_and(|q| q.rx.is_none())
    }
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for InMemoryPubSub {
    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<(), PubSubError> {
        let mut topics = self
            .topics
            .lock()
            .map_err(|_| PubSubError::transport(topic, "topic registry poisoned"))?;

        topics
            .entry(topic.clone())
            .or_insert_with(TopicQueue::new)
            .tx
            .send(payload)
            .map_err(|_| PubSubError::Closed(topic.clone()))
    }

    async fn subscribe(
        &self,
        topic: &Topic,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscribed, PubSubError> {
        let rx = {
            let mut topics = self
                .topics
                .lock()
                .map_err(|_| PubSubError::transport(topic, "topic registry poisoned"))?;
            topics
                .entry(topic.clone())
                .or_insert_with(TopicQueue::new)
                .rx
                .take()
        };

        let Some(mut rx) = rx else {
            debug!(topic = %topic, "topic already has a consumer; ignoring subscribe");
            return Ok(Subscribed::AlreadySubscribed);
        };

        let permits = Arc::new(Semaphore::new(self.prefetch));
        let topic = topic.clone();
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let handler = handler.clone();
                let topic = topic.clone();
                tokio::spawn(async move {
                    if let Err(e) = handler.handle(payload).await {
                        warn!(topic = %topic, error = %e, "message handler failed");
                    }
                    drop(permit);
                });
            }
        });

        Ok(Subscribed::New)
    }
}
