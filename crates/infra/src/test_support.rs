//! Test doubles shared by the unit tests of this crate.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use piiscan_ai::{AiError, LanguageModel, TokenBudget};
use piiscan_events::{EventEnvelope, MessageHandler, PubSub, PubSubError, Subscribed, Topic};

/// Records every publish instead of delivering it; can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingPubSub {
    published: Mutex<Vec<(Topic, Vec<u8>)>>,
    failing: AtomicBool,
}

impl RecordingPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_publishes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decoded payloads published on `topic`, in publish order.
    pub fn payloads<T: DeserializeOwned>(&self, topic: &Topic) -> Vec<T> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, bytes)| EventEnvelope::<T>::from_bytes(bytes).unwrap().into_payload())
            .collect()
    }
}

#[async_trait]
impl PubSub for RecordingPubSub {
    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<(), PubSubError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PubSubError::transport(topic, "broker unreachable"));
        }
        self.published.lock().unwrap().push((topic.clone(), payload));
        Ok(())
    }

    async fn subscribe(
        &self,
        _topic: &Topic,
        _handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscribed, PubSubError> {
        Ok(Subscribed::New)
    }
}

/// Language model double with a canned answer and an optional delay.
#[derive(Debug)]
pub struct StubModel {
    answer: Mutex<Result<Vec<serde_json::Value>, AiError>>,
    delay: Option<Duration>,
    budget: TokenBudget,
    calls: AtomicUsize,
}

impl StubModel {
    pub fn answering(items: Vec<serde_json::Value>) -> Self {
        Self {
            answer: Mutex::new(Ok(items)),
            delay: None,
            budget: TokenBudget::default(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: AiError) -> Self {
        Self {
            answer: Mutex::new(Err(err)),
            ..Self::answering(Vec::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_budget(mut self, budget: TokenBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn ask(&self, _prompt: &str) -> Result<Vec<serde_json::Value>, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answer.lock().unwrap().clone()
    }

    fn exceeds_token_budget(&self, prompt: &str) -> bool {
        self.budget.exceeds(prompt)
    }
}
