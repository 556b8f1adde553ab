use super::*;
use crate::error::BuildError;
use crate::provider::ProviderStatus;
use crate::source::{SecretSource, SecretStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::runtime::Runtime;

/// Source whose streams never yield; counts how often it is watched.
#[derive(Default)]
struct IdleSource {
    watches: AtomicUsize,
}

impl SecretSource for Arc<IdleSource> {
    type Key = &'static str;
    type Secret = u32;

    fn watch(&self, _key: &&'static str) -> SecretStream<u32> {
        self.watches.fetch_add(1, Ordering::SeqCst);
        Box::pin(futures::stream::pending())
    }
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn registry(
    rt: &Runtime,
    source: &Arc<IdleSource>,
    strict: bool,
) -> CredentialProviderRegistry<Arc<IdleSource>> {
    CredentialProviderRegistry::builder(Arc::clone(source))
        .runtime(rt.handle().clone())
        .strict_release(strict)
        .build()
        .unwrap()
}

#[test]
fn same_key_shares_one_provider() {
    let rt = runtime();
    let source = Arc::new(IdleSource::default());
    let registry = registry(&rt, &source, true);

    let first = registry.find_or_create(&"k");
    let second = registry.find_or_create(&"k");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.ref_count(&"k"), 2);
    assert_eq!(registry.len(), 1);
    assert_eq!(source.watches.load(Ordering::SeqCst), 1);

    registry.release(&first).unwrap();
    assert_eq!(registry.ref_count(&"k"), 1);
    assert_eq!(second.status(), ProviderStatus::Pending);
    registry.release(&second).unwrap();
    assert!(registry.is_empty());
}

#[test]
fn concurrent_creation_yields_single_instance() {
    let rt = runtime();
    let source = Arc::new(IdleSource::default());
    let registry = registry(&rt, &source, true);

    let providers: Vec<_> = (0..16)
        .map(|_| {
            let registry = registry.clone();
            thread::spawn(move || registry.find_or_create(&"k"))
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|t| t.join().unwrap())
        .collect();

    assert!(providers.iter().all(|p| Arc::ptr_eq(p, &providers[0])));
    assert_eq!(registry.ref_count(&"k"), 16);
    assert_eq!(source.watches.load(Ordering::SeqCst), 1);

    for provider in &providers {
        registry.release(provider).unwrap();
    }
    assert!(registry.is_empty());
}

#[test]
fn last_release_evicts_and_shuts_down() {
    let rt = runtime();
    let source = Arc::new(IdleSource::default());
    let registry = registry(&rt, &source, true);

    let provider = registry.find_or_create(&"k");
    registry.release(&provider).unwrap();

    assert!(!registry.contains(&"k"));
    assert_eq!(provider.status(), ProviderStatus::Closed);

    let fresh = registry.find_or_create(&"k");
    assert!(!Arc::ptr_eq(&provider, &fresh));
    assert_eq!(fresh.status(), ProviderStatus::Pending);
    assert_eq!(source.watches.load(Ordering::SeqCst), 2);
    registry.release(&fresh).unwrap();
}

#[test]
fn lenient_release_reports_imbalance() {
    let rt = runtime();
    let source = Arc::new(IdleSource::default());
    let registry = registry(&rt, &source, false);

    let stale = registry.find_or_create(&"k");
    registry.release(&stale).unwrap();

    let err = registry.release(&stale).unwrap_err();
    assert_eq!(
        err.to_string(),
        "release without matching acquisition: key=\"k\""
    );

    // A provider from an earlier generation must not touch the live entry.
    let live = registry.find_or_create(&"k");
    assert!(registry.release(&stale).is_err());
    assert_eq!(registry.ref_count(&"k"), 1);
    assert_eq!(live.status(), ProviderStatus::Pending);

    // Nor may one from another registry.
    let other = self::registry(&rt, &source, false);
    let foreign = other.find_or_create(&"k");
    assert!(registry.release(&foreign).is_err());
    assert_eq!(registry.ref_count(&"k"), 1);

    registry.release(&live).unwrap();
    other.release(&foreign).unwrap();
}

#[test]
#[should_panic(expected = "release without matching acquisition")]
fn strict_release_panics_on_imbalance() {
    let rt = runtime();
    let source = Arc::new(IdleSource::default());
    let registry = registry(&rt, &source, true);

    let provider = registry.find_or_create(&"k");
    registry.release(&provider).unwrap();
    let _ = registry.release(&provider);
}

#[test]
fn build_requires_runtime() {
    let source = Arc::new(IdleSource::default());
    let err = CredentialProviderRegistry::new(source).unwrap_err();
    assert!(matches!(err, BuildError::NoRuntime(_)));
}

#[test]
fn build_picks_up_ambient_runtime() {
    let rt = runtime();
    let _guard = rt.enter();
    let registry = CredentialProviderRegistry::new(Arc::new(IdleSource::default())).unwrap();
    assert_eq!(registry.len(), 0);
}

/// Source whose first `watch` panics.
#[derive(Default)]
struct FlakySource {
    watches: AtomicUsize,
}

impl SecretSource for Arc<FlakySource> {
    type Key = &'static str;
    type Secret = u32;

    fn watch(&self, _key: &&'static str) -> SecretStream<u32> {
        if self.watches.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("watch failed to start");
        }
        Box::pin(futures::stream::pending())
    }
}

#[test]
fn panicking_watch_fails_provider_and_keeps_counts_balanced() {
    let rt = runtime();
    let source = Arc::new(FlakySource::default());
    let registry = CredentialProviderRegistry::builder(Arc::clone(&source))
        .runtime(rt.handle().clone())
        .strict_release(true)
        .build()
        .unwrap();

    let failed = registry.find_or_create(&"k");
    assert_eq!(failed.status(), ProviderStatus::Failed);
    assert_eq!(registry.ref_count(&"k"), 1);

    registry.release(&failed).unwrap();
    assert!(registry.is_empty());

    let fresh = registry.find_or_create(&"k");
    assert_eq!(fresh.status(), ProviderStatus::Pending);
    assert_eq!(source.watches.load(Ordering::SeqCst), 2);
    registry.release(&fresh).unwrap();
}
