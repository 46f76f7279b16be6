//! Log Buffer: in-memory accumulation of raw log entries.
//!
//! Entries are flushed to a single registered [`FlushSink`] when the buffer
//! would grow past `max_entries`, on every `flush_interval` tick, and once
//! more on shutdown. Flushed batches go through a dispatcher task, so
//! `collect` never waits for the sink and batches reach it in flush order.
//!
//! At most [`MAX_PENDING_BATCHES`] flushed batches wait for the sink. While
//! that queue is full a flush keeps its entries buffered instead, in order,
//! and they go out with the next flush that finds room.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

/// Default `MAX_NUMBER_OF_LOGS_TO_COLLECT`.
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Default `LOG_FLUSH_INTERVAL_IN_SECONDS`.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Flushed batches allowed to wait for a slow sink.
pub const MAX_PENDING_BATCHES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBufferConfig {
    /// Flush eagerly before the buffer would hold more than this many entries.
    pub max_entries: usize,
    pub flush_interval: Duration,
}

impl Default for LogBufferConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

/// Why a flush happened.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FlushReason {
    Size,
    Interval,
    Shutdown,
    Manual,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Size => "size",
            FlushReason::Interval => "interval",
            FlushReason::Shutdown => "shutdown",
            FlushReason::Manual => "manual",
        }
    }
}

impl core::fmt::Display for FlushReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives every non-empty flushed batch.
#[async_trait]
pub trait FlushSink: Send + Sync + 'static {
    async fn flush(&self, entries: Vec<String>, reason: FlushReason);
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryFlushSink {
    inner: Mutex<Vec<(FlushReason, Vec<String>)>>,
}

impl InMemoryFlushSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every batch received so far, oldest first.
    pub fn batches(&self) -> Vec<(FlushReason, Vec<String>)> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl FlushSink for InMemoryFlushSink {
    async fn flush(&self, entries: Vec<String>, reason: FlushReason) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((reason, entries));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("no flush sink registered; call set_sink before start")]
    NoSink,

    #[error("a flush sink is already registered")]
    SinkAlreadyRegistered,

    #[error("log buffer already started")]
    AlreadyStarted,
}

enum Dispatch {
    Batch {
        entries: Vec<String>,
        reason: FlushReason,
    },
    Stop(oneshot::Sender<()>),
}

/// Split one raw ingestion payload into discrete log entries.
///
/// - a JSON array yields one entry per element (strings as-is, other values
///   re-serialised)
/// - a JSON object, any other JSON value, or text that is not JSON at all is
///   kept verbatim as a single entry
/// - blank input yields nothing
pub fn normalize_entry(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<JsonValue>(raw) {
        Ok(JsonValue::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                JsonValue::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        _ => vec![raw.to_string()],
    }
}

/// Shared, mutex-guarded log buffer.
pub struct LogBuffer {
    config: LogBufferConfig,
    entries: Mutex<Vec<String>>,
    sink: OnceLock<Arc<dyn FlushSink>>,
    dispatch_tx: mpsc::Sender<Dispatch>,
    dispatch_rx: Mutex<Option<mpsc::Receiver<Dispatch>>>,
    started: AtomicBool,
    backlogged: AtomicBool,
}

impl core::fmt::Debug for LogBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LogBuffer")
            .field("config", &self.config)
            .field("len", &self.len())
            .field("has_sink", &self.sink.get().is_some())
            .finish()
    }
}

impl LogBuffer {
    pub fn new(config: LogBufferConfig) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(MAX_PENDING_BATCHES);
        Self {
            config: LogBufferConfig {
                max_entries: config.max_entries.max(1),
                ..config
            },
            entries: Mutex::new(Vec::new()),
            sink: OnceLock::new(),
            dispatch_tx,
            dispatch_rx: Mutex::new(Some(dispatch_rx)),
            started: AtomicBool::new(false),
            backlogged: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &LogBufferConfig {
        &self.config
    }

    /// Register the sink. Only one sink may ever be registered.
    pub fn set_sink(&self, sink: Arc<dyn FlushSink>) -> Result<(), BufferError> {
        self.sink
            .set(sink)
            .map_err(|_| BufferError::SinkAlreadyRegistered)
    }

    /// Number of entries currently buffered.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add one raw payload. Never waits for the sink.
    ///
    /// Returns the number of entries the payload was split into.
    pub fn collect(&self, raw: &str) -> usize {
        let normalized = normalize_entry(raw);
        let count = normalized.len();

        for entry in normalized {
            let full = {
                let mut entries = self.lock_entries();
                let full = if entries.len() + 1 > self.config.max_entries {
                    std::mem::take(&mut *entries)
                } else {
                    Vec::new()
                };
                entries.push(entry);
                full
            };
            if !full.is_empty() {
                self.dispatch(full, FlushReason::Size);
            }
        }
        count
    }

    /// Hand the whole buffer to the sink and clear it. No-op when empty.
    ///
    /// Returns the number of entries flushed; 0 when the sink is too far
    /// behind and the entries stay buffered.
    pub fn flush(&self, reason: FlushReason) -> usize {
        let entries = std::mem::take(&mut *self.lock_entries());
        let count = entries.len();
        if count > 0 && self.dispatch(entries, reason) {
            count
        } else {
            0
        }
    }

    /// Start the dispatcher and the flush timer.
    ///
    /// Fails when no sink is registered. Batches flushed before `start` are
    /// delivered first.
    pub fn start(self: &Arc<Self>) -> Result<LogBufferHandle, BufferError> {
        let sink = self.sink.get().cloned().ok_or(BufferError::NoSink)?;
        let mut rx = self
            .dispatch_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(BufferError::AlreadyStarted)?;
        self.started.store(true, Ordering::SeqCst);

        let dispatcher = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    Dispatch::Batch { entries, reason } => sink.flush(entries, reason).await,
                    Dispatch::Stop(ack) => {
                        let _ = ack.send(());
                        break;
                    }
                }
            }
        });

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let period = self.config.flush_interval;
        let buffer = Arc::clone(self);
        let timer = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticks.tick() => {
                        buffer.flush(FlushReason::Interval);
                    }
                    _ = &mut stop_rx => break,
                }
            }
        });

        info!(
            max_entries = self.config.max_entries,
            flush_interval_secs = period.as_secs(),
            "log buffer started"
        );

        Ok(LogBufferHandle {
            buffer: Arc::clone(self),
            stop_timer: Some(stop_tx),
            timer: Some(timer),
            dispatcher: Some(dispatcher),
        })
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Queue a batch for the sink; on a full queue the entries go back into
    /// the buffer ahead of anything collected since.
    fn dispatch(&self, entries: Vec<String>, reason: FlushReason) -> bool {
        let count = entries.len();
        match self.dispatch_tx.try_send(Dispatch::Batch { entries, reason }) {
            Ok(()) => {
                self.backlogged.store(false, Ordering::SeqCst);
                info!(reason = %reason, count, "flushing buffered logs");
                true
            }
            Err(TrySendError::Full(Dispatch::Batch { entries, .. })) => {
                if !self.backlogged.swap(true, Ordering::SeqCst) {
                    warn!(
                        reason = %reason,
                        count,
                        pending = MAX_PENDING_BATCHES,
                        "log sink is behind; keeping entries buffered"
                    );
                }
                let mut buffered = self.lock_entries();
                let newer = std::mem::replace(&mut *buffered, entries);
                buffered.extend(newer);
                false
            }
            Err(_) => {
                warn!(reason = %reason, count, "log buffer dispatcher has stopped; batch dropped");
                false
            }
        }
    }

    /// Flush everything, waiting for room in the dispatch queue.
    async fn drain(&self, reason: FlushReason) {
        let entries = std::mem::take(&mut *self.lock_entries());
        let count = entries.len();
        if count == 0 {
            return;
        }
        info!(reason = %reason, count, "flushing buffered logs");
        if self
            .dispatch_tx
            .send(Dispatch::Batch { entries, reason })
            .await
            .is_err()
        {
            warn!(reason = %reason, count, "log buffer dispatcher has stopped; batch dropped");
        }
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle to the buffer's background tasks.
#[derive(Debug)]
pub struct LogBufferHandle {
    buffer: Arc<LogBuffer>,
    stop_timer: Option<oneshot::Sender<()>>,
    timer: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl LogBufferHandle {
    pub fn buffer(&self) -> &Arc<LogBuffer> {
        &self.buffer
    }

    /// Stop the timer, flush what is left, and wait for the sink to drain.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop_timer.take() {
            let _ = stop.send(());
        }
        if let Some(timer) = self.timer.take() {
            let _ = timer.await;
        }

        self.buffer.drain(FlushReason::Shutdown).await;

        let (ack_tx, ack_rx) = oneshot::channel();
        if self.buffer.dispatch_tx.send(Dispatch::Stop(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.await;
        }
        debug!("log buffer stopped");
    }
}
