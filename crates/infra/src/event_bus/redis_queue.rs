//! Redis list-backed pub/sub (durable, at-least-once hand-off).
//!
//! ## Layout
//!
//! - **Queue**: `piiscan:queue:{topic}`, producers `RPUSH` payloads
//! - **In flight**: `piiscan:queue:{topic}:processing:{consumer}`, each consumer
//!   moves a payload into its own list with `BLMOVE` and removes it (`LREM`)
//!   once handled
//! - **Consumers**: `piiscan:queue:{topic}:consumers`, a sorted set of consumer
//!   names scored by their last heartbeat (unix seconds)
//!
//! Every consumer refreshes its heartbeat while subscribed. A consumer whose
//! heartbeat is older than the lease is dead: any live consumer moves the dead
//! one's in-flight payloads back to the head of the queue and forgets it, so
//! those messages are delivered again. Work held by live consumers is never
//! touched.
//!
//! Messages are removed after the handler returns, whether it succeeded or
//! not: handler errors are logged, never retried here.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use piiscan_events::{MessageHandler, PubSub, PubSubError, Subscribed, Topic};

/// Default key prefix for topic queues.
const DEFAULT_KEY_PREFIX: &str = "piiscan:queue";

/// How long a blocking read waits before checking for shutdown.
const POLL_TIMEOUT_SECS: u64 = 1;

/// Pause before reconnecting after a Redis error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// A consumer silent for longer than this is considered dead.
const DEFAULT_LEASE: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct RedisQueueBus {
    client: Arc<redis::Client>,
    key_prefix: String,
    consumer: String,
    lease: Duration,
    prefetch: usize,
    subscribed: Mutex<HashSet<Topic>>,
}

impl RedisQueueBus {
    /// Create a bus for `redis_url` with a unique consumer name. No connection
    /// is made until first use.
    pub fn new(redis_url: impl AsRef<str>, prefetch: usize) -> Result<Self, PubSubError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(|e| PubSubError::Transport {
            topic: Topic::new("*"),
            message: format!("invalid redis url: {e}"),
        })?;
        Ok(Self {
            client: Arc::new(client),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            consumer: format!("consumer-{}", Uuid::now_v7()),
            lease: DEFAULT_LEASE,
            prefetch: prefetch.max(1),
            subscribed: Mutex::new(HashSet::new()),
        })
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer = name.into();
        self
    }

    /// Heartbeat age after which a consumer's in-flight work is reclaimed.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease.max(Duration::from_secs(1));
        self
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer
    }

    pub fn queue_key(&self, topic: &Topic) -> String {
        self.keys(topic).queue
    }

    pub fn processing_key(&self, topic: &Topic) -> String {
        self.keys(topic).processing(&self.consumer)
    }

    pub fn consumers_key(&self, topic: &Topic) -> String {
        self.keys(topic).consumers
    }

    fn keys(&self, topic: &Topic) -> QueueKeys {
        QueueKeys {
            queue: format!("{}:{}", self.key_prefix, topic),
            consumers: format!("{}:{}:consumers", self.key_prefix, topic),
            processing_prefix: format!("{}:{}:processing", self.key_prefix, topic),
        }
    }
}

#[derive(Debug, Clone)]
struct QueueKeys {
    queue: String,
    consumers: String,
    processing_prefix: String,
}

impl QueueKeys {
    fn processing(&self, consumer: &str) -> String {
        format!("{}:{}", self.processing_prefix, consumer)
    }
}

/// The queue's bookkeeping commands, kept apart from the connection for tests.
trait QueueCommands {
    fn heartbeat(&mut self, consumers: &str, consumer: &str, at: i64) -> redis::RedisResult<()>;

    /// Consumers whose last heartbeat is strictly before `before`.
    fn stale_consumers(&mut self, consumers: &str, before: i64) -> redis::RedisResult<Vec<String>>;

    /// Move the newest payload of `from` to the head of `queue`; false when `from` is empty.
    fn move_to_queue_head(&mut self, from: &str, queue: &str) -> redis::RedisResult<bool>;

    fn forget(&mut self, consumers: &str, consumer: &str) -> redis::RedisResult<()>;
}

impl QueueCommands for redis::Connection {
    fn heartbeat(&mut self, consumers: &str, consumer: &str, at: i64) -> redis::RedisResult<()> {
        let _: i64 = redis::cmd("ZADD")
            .arg(consumers)
            .arg(at)
            .arg(consumer)
            .query(self)?;
        Ok(())
    }

    fn stale_consumers(&mut self, consumers: &str, before: i64) -> redis::RedisResult<Vec<String>> {
        redis::cmd("ZRANGEBYSCORE")
            .arg(consumers)
            .arg("-inf")
            .arg(format!("({before}"))
            .query(self)
    }

    fn move_to_queue_head(&mut self, from: &str, queue: &str) -> redis::RedisResult<bool> {
        let payload: Option<Vec<u8>> = redis::cmd("LMOVE")
            .arg(from)
            .arg(queue)
            .arg("RIGHT")
            .arg("LEFT")
            .query(self)?;
        Ok(payload.is_some())
    }

    fn forget(&mut self, consumers: &str, consumer: &str) -> redis::RedisResult<()> {
        let _: i64 = redis::cmd("ZREM").arg(consumers).arg(consumer).query(self)?;
        Ok(())
    }
}

/// Return the in-flight payloads of every consumer other than `me` whose
/// heartbeat is older than `before` to the queue head, oldest first.
fn recover_stale<C: QueueCommands>(
    conn: &mut C,
    keys: &QueueKeys,
    me: &str,
    before: i64,
) -> redis::RedisResult<usize> {
    let mut moved = 0;
    for consumer in conn.stale_consumers(&keys.consumers, before)? {
        if consumer == me {
            continue;
        }
        let processing = keys.processing(&consumer);
        while conn.move_to_queue_head(&processing, &keys.queue)? {
            moved += 1;
        }
        conn.forget(&keys.consumers, &consumer)?;
    }
    Ok(moved)
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

fn push(client: &redis::Client, key: &str, payload: &[u8]) -> redis::RedisResult<()> {
    let mut conn = client.get_connection()?;
    let _: i64 = redis::cmd("RPUSH").arg(key).arg(payload).query(&mut conn)?;
    Ok(())
}

fn ack(client: &redis::Client, processing_key: &str, payload: &[u8]) -> redis::RedisResult<()> {
    let mut conn = client.get_connection()?;
    let _: i64 = redis::cmd("LREM")
        .arg(processing_key)
        .arg(1)
        .arg(payload)
        .query(&mut conn)?;
    Ok(())
}

/// Shared state of one topic subscription's background threads.
#[derive(Debug, Clone)]
struct Consumer {
    client: Arc<redis::Client>,
    topic: Topic,
    keys: QueueKeys,
    name: String,
    lease: Duration,
}

impl Consumer {
    fn connect(&self) -> redis::Connection {
        loop {
            match self.client.get_connection() {
                Ok(conn) => return conn,
                Err(e) => {
                    warn!(topic = %self.topic, error = %e, "redis connection failed; retrying");
                    thread::sleep(RECONNECT_DELAY);
                }
            }
        }
    }

    /// Refresh this consumer's heartbeat and reclaim work from dead consumers.
    fn keep_alive(&self, conn: &mut redis::Connection) -> redis::RedisResult<()> {
        let now = now_secs();
        conn.heartbeat(&self.keys.consumers, &self.name, now)?;
        let before = now - self.lease.as_secs() as i64;
        let moved = recover_stale(conn, &self.keys, &self.name, before)?;
        if moved > 0 {
            info!(topic = %self.topic, moved, "requeued messages of a dead consumer");
        }
        Ok(())
    }

    /// Heartbeat loop; runs on its own thread until the subscription closes.
    fn heartbeat_loop(self, alive: mpsc::Sender<Vec<u8>>) {
        let interval = (self.lease / 3).max(Duration::from_secs(1));
        let mut conn = self.connect();
        while !alive.is_closed() {
            if let Err(e) = self.keep_alive(&mut conn) {
                warn!(topic = %self.topic, error = %e, "redis heartbeat failed; reconnecting");
                thread::sleep(RECONNECT_DELAY);
                conn = self.connect();
                continue;
            }
            thread::sleep(interval);
        }
        // Left registered: once the lease lapses, a live consumer requeues
        // whatever is still in this consumer's in-flight list.
    }

    /// Blocking read loop; runs on its own thread.
    fn read_loop(self, tx: mpsc::Sender<Vec<u8>>) {
        let processing = self.keys.processing(&self.name);
        loop {
            let mut conn = self.connect();
            loop {
                let next: redis::RedisResult<Option<Vec<u8>>> = redis::cmd("BLMOVE")
                    .arg(&self.keys.queue)
                    .arg(&processing)
                    .arg("LEFT")
                    .arg("RIGHT")
                    .arg(POLL_TIMEOUT_SECS)
                    .query(&mut conn);

                match next {
                    Ok(Some(payload)) => {
                        if tx.blocking_send(payload).is_err() {
                            debug!(topic = %self.topic, "consumer closed; stopping redis reader");
                            return;
                        }
                    }
                    Ok(None) => {
                        if tx.is_closed() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(topic = %self.topic, error = %e, "redis read failed; reconnecting");
                        thread::sleep(RECONNECT_DELAY);
                        break;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl PubSub for RedisQueueBus {
    #[instrument(skip(self, payload), fields(topic = %topic, bytes = payload.len()), err)]
    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<(), PubSubError> {
        let client = self.client.clone();
        let key = self.queue_key(topic);
        tokio::task::spawn_blocking(move || push(&client, &key, &payload))
            .await
            .map_err(|e| PubSubError::transport(topic, e.to_string()))?
            .map_err(|e| PubSubError::transport(topic, format!("RPUSH failed: {e}")))
    }

    async fn subscribe(
        &self,
        topic: &Topic,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscribed, PubSubError> {
        {
            let mut subscribed = self
                .subscribed
                .lock()
                .map_err(|_| PubSubError::transport(topic, "subscription registry poisoned"))?;
            if !subscribed.insert(topic.clone()) {
                debug!(topic = %topic, "topic already has a consumer; ignoring subscribe");
                return Ok(Subscribed::AlreadySubscribed);
            }
        }

        let consumer = Consumer {
            client: self.client.clone(),
            topic: topic.clone(),
            keys: self.keys(topic),
            name: self.consumer.clone(),
            lease: self.lease,
        };

        // Registered before the first read so in-flight work is never orphaned.
        {
            let consumer = consumer.clone();
            tokio::task::spawn_blocking(move || {
                let mut conn = consumer.client.get_connection()?;
                consumer.keep_alive(&mut conn)
            })
            .await
            .map_err(|e| PubSubError::transport(topic, e.to_string()))?
            .map_err(|e| PubSubError::transport(topic, format!("consumer registration failed: {e}")))?;
        }

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(self.prefetch);
        {
            let consumer = consumer.clone();
            let tx = tx.clone();
            thread::Builder::new()
                .name(format!("redis-queue-heartbeat-{topic}"))
                .spawn(move || consumer.heartbeat_loop(tx))
                .map_err(|e| PubSubError::transport(topic, e.to_string()))?;
        }
        thread::Builder::new()
            .name(format!("redis-queue-reader-{topic}"))
            .spawn(move || consumer.read_loop(tx))
            .map_err(|e| PubSubError::transport(topic, e.to_string()))?;

        let permits = Arc::new(Semaphore::new(self.prefetch));
        let client = self.client.clone();
        let processing_key = self.processing_key(topic);
        let topic = topic.clone();
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let handler = handler.clone();
                let client = client.clone();
                let topic = topic.clone();
                let processing_key = processing_key.clone();
                tokio::spawn(async move {
                    if let Err(e) = handler.handle(payload.clone()).await {
                        warn!(topic = %topic, error = %e, "message handler failed");
                    }
                    let acked =
                        tokio::task::spawn_blocking(move || ack(&client, &processing_key, &payload))
                            .await;
                    match acked {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!(topic = %topic, error = %e, "failed to ack message"),
                        Err(e) => warn!(topic = %topic, error = %e, "ack task failed"),
                    }
                    drop(permit);
                });
            }
        });

        Ok(Subscribed::New)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};

    /// Lists and the consumer set, held in memory.
    #[derive(Debug, Default)]
    struct FakeRedis {
        lists: HashMap<String, VecDeque<Vec<u8>>>,
        consumers: HashMap<String, i64>,
    }

    impl FakeRedis {
        fn list(&self, key: &str) -> Vec<&str> {
            self.lists
                .get(key)
                .into_iter()
                .flatten()
                .map(|p| std::str::from_utf8(p).unwrap())
                .collect()
        }

        fn push(&mut self, key: &str, payload: &str) {
            self.lists
                .entry(key.to_string())
                .or_default()
                .push_back(payload.as_bytes().to_vec());
        }
    }

    impl QueueCommands for FakeRedis {
        fn heartbeat(&mut self, _: &str, consumer: &str, at: i64) -> redis::RedisResult<()> {
            self.consumers.insert(consumer.to_string(), at);
            Ok(())
        }

        fn stale_consumers(&mut self, _: &str, before: i64) -> redis::RedisResult<Vec<String>> {
            let mut stale: Vec<String> = self
                .consumers
                .iter()
                .filter(|(_, at)| **at < before)
                .map(|(name, _)| name.clone())
                .collect();
            stale.sort();
            Ok(stale)
        }

        fn move_to_queue_head(&mut self, from: &str, queue: &str) -> redis::RedisResult<bool> {
            let Some(payload) = self.lists.get_mut(from).and_then(VecDeque::pop_back) else {
                return Ok(false);
            };
            self.lists.entry(queue.to_string()).or_default().push_front(payload);
            Ok(true)
        }

        fn forget(&mut self, _: &str, consumer: &str) -> redis::RedisResult<()> {
            self.consumers.remove(consumer);
            Ok(())
        }
    }

    fn keys() -> QueueKeys {
        RedisQueueBus::new("redis://127.0.0.1:6379", 10)
            .unwrap()
            .keys(&Topic::new("job-created"))
    }

    #[test]
    fn keys_are_namespaced_per_topic_and_consumer() {
        let bus = RedisQueueBus::new("redis://127.0.0.1:6379", 10)
            .unwrap()
            .with_consumer_name("worker-1");
        let topic = Topic::new("job-created");

        assert_eq!(bus.queue_key(&topic), "piiscan:queue:job-created");
        assert_eq!(
            bus.processing_key(&topic),
            "piiscan:queue:job-created:processing:worker-1"
        );
        assert_eq!(bus.consumers_key(&topic), "piiscan:queue:job-created:consumers");

        let bus = bus.with_key_prefix("staging");
        assert_eq!(bus.queue_key(&topic), "staging:job-created");
    }

    #[test]
    fn every_bus_gets_its_own_consumer_name() {
        let a = RedisQueueBus::new("redis://127.0.0.1:6379", 10).unwrap();
        let b = RedisQueueBus::new("redis://127.0.0.1:6379", 10).unwrap();
        assert_ne!(a.consumer_name(), b.consumer_name());
    }

    #[test]
    fn invalid_urls_are_rejected() {
        assert!(matches!(
            RedisQueueBus::new("not a url", 10),
            Err(PubSubError::Transport { .. })
        ));
    }

    #[test]
    fn dead_consumer_work_returns_to_the_queue_head_in_order() {
        let keys = keys();
        let mut redis = FakeRedis::default();
        redis.push(&keys.queue, "c");
        redis.push(&keys.processing("dead"), "a");
        redis.push(&keys.processing("dead"), "b");
        redis.heartbeat(&keys.consumers, "dead", 100).unwrap();

        let moved = recover_stale(&mut redis, &keys, "me", 200).unwrap();

        assert_eq!(moved, 2);
        assert_eq!(redis.list(&keys.queue), vec!["a", "b", "c"]);
        assert!(redis.list(&keys.processing("dead")).is_empty());
        assert!(!redis.consumers.contains_key("dead"));
    }

    #[test]
    fn live_consumers_keep_their_in_flight_work() {
        let keys = keys();
        let mut redis = FakeRedis::default();
        redis.push(&keys.processing("busy"), "x");
        redis.heartbeat(&keys.consumers, "busy", 195).unwrap();
        redis.push(&keys.processing("dead"), "y");
        redis.heartbeat(&keys.consumers, "dead", 150).unwrap();

        let moved = recover_stale(&mut redis, &keys, "me", 170).unwrap();

        assert_eq!(moved, 1);
        assert_eq!(redis.list(&keys.processing("busy")), vec!["x"]);
        assert_eq!(redis.list(&keys.queue), vec!["y"]);
        assert!(redis.consumers.contains_key("busy"));
    }

    #[test]
    fn a_consumer_never_reclaims_its_own_work() {
        let keys = keys();
        let mut redis = FakeRedis::default();
        redis.push(&keys.processing("me"), "mine");
        redis.heartbeat(&keys.consumers, "me", 1).unwrap();

        assert_eq!(recover_stale(&mut redis, &keys, "me", 1_000).unwrap(), 0);
        assert_eq!(redis.list(&keys.processing("me")), vec!["mine"]);
    }

    struct Collect(tokio::sync::mpsc::UnboundedSender<Vec<u8>>);

    #[async_trait]
    impl MessageHandler for Collect {
        async fn handle(&self, payload: Vec<u8>) -> Result<(), piiscan_events::HandlerError> {
            let _ = self.0.send(payload);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore] // Requires a Redis server at REDIS_URL
    async fn delivers_and_acks_against_a_live_server() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let prefix = format!("piiscan-test:{}", Uuid::now_v7());
        let bus = RedisQueueBus::new(&url, 4).unwrap().with_key_prefix(prefix);
        let topic = Topic::new("job-created");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        assert_eq!(
            bus.subscribe(&topic, Arc::new(Collect(tx))).await.unwrap(),
            Subscribed::New
        );
        bus.publish(&topic, b"hello".to_vec()).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, b"hello");

        let client = redis::Client::open(url.as_str()).unwrap();
        let processing = bus.processing_key(&topic);
        let mut remaining = 1;
        for _ in 0..50 {
            let mut conn = client.get_connection().unwrap();
            remaining = redis::cmd("LLEN").arg(&processing).query(&mut conn).unwrap();
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(remaining, 0, "handled message should be acked");
    }
}
