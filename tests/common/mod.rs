#![allow(dead_code)]

use credential_provider::{
    AcquisitionError, Callback, CredentialProviderRegistry, DirectExecutor, MetricsErrorKind,
    MetricsRecorder, Outcome, SecretSource, SecretStream,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub type Item = Result<String, AcquisitionError>;

/// Secret source driven by the test: every `watch` opens a channel the test feeds.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    state: Arc<Mutex<Script>>,
    panic_next_watch: Arc<AtomicBool>,
}

#[derive(Default)]
struct Script {
    senders: HashMap<String, mpsc::UnboundedSender<Item>>,
    watches: HashMap<String, usize>,
}

impl ScriptedSource {
    /// Feeds `item` to the most recent stream opened for `key`.
    pub fn push(&self, key: &str, item: Item) {
        assert!(self.try_push(key, item), "no live stream for {key}");
    }

    /// Like [`push`](Self::push), returning `false` if the stream is gone.
    pub fn try_push(&self, key: &str, item: Item) -> bool {
        let state = self.state.lock().unwrap();
        state
            .senders
            .get(key)
            .is_some_and(|tx| tx.send(item).is_ok())
    }

    /// Ends the most recent stream opened for `key`.
    pub fn end(&self, key: &str) {
        self.state.lock().unwrap().senders.remove(key);
    }

    /// Makes the next `watch` call panic instead of opening a stream.
    pub fn panic_next_watch(&self) {
        self.panic_next_watch.store(true, Ordering::SeqCst);
    }

    /// How many times a stream was opened for `key`, i.e. how many providers were built.
    pub fn watch_count(&self, key: &str) -> usize {
        *self.state.lock().unwrap().watches.get(key).unwrap_or(&0)
    }
}

impl SecretSource for ScriptedSource {
    type Key = String;
    type Secret = String;

    fn watch(&self, key: &String) -> SecretStream<String> {
        if self.panic_next_watch.swap(false, Ordering::SeqCst) {
            panic!("secret source unavailable: key={key}");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap();
        state.senders.insert(key.clone(), tx);
        *state.watches.entry(key.clone()).or_insert(0) += 1;
        Box::pin(UnboundedReceiverStream::new(rx))
    }
}

/// Metrics recorder that counts every event.
#[derive(Default)]
pub struct CountingMetrics {
    created: Mutex<u64>,
    evicted: Mutex<u64>,
    updates: Mutex<u64>,
    errors: Mutex<HashMap<MetricsErrorKind, u64>>,
}

impl CountingMetrics {
    pub fn created(&self) -> u64 {
        *self.created.lock().unwrap()
    }

    pub fn evicted(&self) -> u64 {
        *self.evicted.lock().unwrap()
    }

    pub fn updates(&self) -> u64 {
        *self.updates.lock().unwrap()
    }

    pub fn errors(&self, kind: MetricsErrorKind) -> u64 {
        *self.errors.lock().unwrap().get(&kind).unwrap_or(&0)
    }
}

impl MetricsRecorder for CountingMetrics {
    fn record_provider_created(&self) {
        *self.created.lock().unwrap() += 1;
    }

    fn record_provider_evicted(&self) {
        *self.evicted.lock().unwrap() += 1;
    }

    fn record_update(&self) {
        *self.updates.lock().unwrap() += 1;
    }

    fn record_error(&self, kind: MetricsErrorKind) {
        *self.errors.lock().unwrap().entry(kind).or_insert(0) += 1;
    }
}

pub fn key(name: &str) -> String {
    name.to_string()
}

pub fn registry(
    source: &ScriptedSource,
    metrics: &Arc<CountingMetrics>,
) -> CredentialProviderRegistry<ScriptedSource> {
    CredentialProviderRegistry::builder(source.clone())
        .strict_release(true)
        .no_initial_fetch_timeout()
        .metrics(metrics.clone())
        .build()
        .expect("registry should build inside a tokio runtime")
}

/// Callback that forwards every outcome (stringified errors) into a channel.
pub fn channel_callback() -> (
    Callback<String>,
    mpsc::UnboundedReceiver<Result<String, String>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback = Callback::from_fn(DirectExecutor, move |o: Outcome<String>| {
        let _ = tx.send(o.map_err(|e| e.to_string()));
    });
    (callback, rx)
}

/// Receives the next outcome or fails the test after a second.
pub async fn next_outcome(
    rx: &mut mpsc::UnboundedReceiver<Result<String, String>>,
) -> Result<String, String> {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("callback did not fire in time")
        .expect("callback dropped without firing")
}

/// Asserts no further outcome arrives within a short grace period.
pub async fn assert_silent(rx: &mut mpsc::UnboundedReceiver<Result<String, String>>) {
    let extra = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
    assert!(
        !matches!(extra, Ok(Some(_))),
        "callback fired more than once"
    );
}

/// Polls `cond` until it holds or a second has passed.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
