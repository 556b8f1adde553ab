use super::builder::RegistryBuilder;
use crate::error::{AcquisitionError, ReleaseImbalance};
use crate::metrics::{MetricsErrorKind, MetricsRecorder};
use crate::prelude::{debug, error};
use crate::provider::pipeline::Pipeline;
use crate::provider::CredentialProvider;
use crate::source::SecretSource;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt::{self, Debug};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

const WATCH_PANICKED: &str = "secret source panicked";

/// Provider type served by a registry over `Src`.
pub type ProviderOf<Src> =
    CredentialProvider<<Src as SecretSource>::Key, <Src as SecretSource>::Secret>;

struct Slot<Src: SecretSource> {
    provider: Arc<ProviderOf<Src>>,
    refs: usize,
}

/// Reference-counted cache of credential providers, one per config key.
///
/// [`find_or_create`](Self::find_or_create) and [`release`](Self::release) must be
/// paired exactly. The provider for a key is created by the first acquisition, shared
/// by every later one, and shut down deterministically when the last acquisition is
/// released. A later acquisition for the same key then creates a fresh provider.
///
/// Entries live in a sharded map: operations on the same key serialize, operations on
/// different keys do not contend on a common lock. No I/O happens inside the registry.
///
/// Cloning a registry is cheap and yields another reference to the same cache.
pub struct CredentialProviderRegistry<Src: SecretSource> {
    inner: Arc<Inner<Src>>,
}

struct Inner<Src: SecretSource> {
    source: Src,
    entries: DashMap<Src::Key, Slot<Src>>,
    runtime: Handle,
    initial_fetch_timeout: Option<Duration>,
    strict_release: bool,
    metrics: Option<Arc<dyn MetricsRecorder>>,
}

impl<Src: SecretSource> Clone for CredentialProviderRegistry<Src> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Src: SecretSource> Debug for CredentialProviderRegistry<Src> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialProviderRegistry")
            .field("source", &"<SecretSource>")
            .field("entries", &self.inner.entries.len())
            .field("initial_fetch_timeout", &self.inner.initial_fetch_timeout)
            .field("strict_release", &self.inner.strict_release)
            .field(
                "metrics",
                &self.inner.metrics.as_ref().map(|_| "<MetricsRecorder>"),
            )
            .finish()
    }
}

impl<Src: SecretSource> CredentialProviderRegistry<Src> {
    /// Creates a registry with default settings on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::NoRuntime`](crate::BuildError::NoRuntime) when called
    /// outside a tokio runtime.
    pub fn new(source: Src) -> Result<Self, crate::BuildError> {
        RegistryBuilder::new(source).build()
    }

    /// Creates a builder for configuring a registry.
    pub fn builder(source: Src) -> RegistryBuilder<Src> {
        RegistryBuilder::new(source)
    }

    pub(super) fn from_parts(
        source: Src,
        runtime: Handle,
        initial_fetch_timeout: Option<Duration>,
        strict_release: bool,
        metrics: Option<Arc<dyn MetricsRecorder>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                entries: DashMap::new(),
                runtime,
                initial_fetch_timeout,
                strict_release,
                metrics,
            }),
        }
    }

    /// Acquires the provider for `key`, creating it if no live entry exists.
    ///
    /// Every call must be matched by exactly one [`release`](Self::release) of the
    /// returned provider. Concurrent calls for equal keys return the same instance.
    pub fn find_or_create(&self, key: &Src::Key) -> Arc<ProviderOf<Src>> {
        let created = match self.inner.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                slot.refs += 1;
                return Arc::clone(&slot.provider);
            }
            Entry::Vacant(vacant) => {
                let provider = Arc::new(CredentialProvider::new(key.clone()));
                vacant.insert(Slot {
                    provider: Arc::clone(&provider),
                    refs: 1,
                });
                provider
            }
        };

        // The shard lock is released; start the source outside of it.
        debug!(
            "Created credential provider: key={:?}, id={}",
            key,
            created.id()
        );
        if let Some(m) = self.inner.metrics.as_deref() {
            m.record_provider_created();
        }
        self.start_pipeline(&created);
        created
    }

    /// Releases one acquisition of `provider`.
    ///
    /// When the count reaches zero the entry is removed and the provider is shut down
    /// before this call returns.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseImbalance`] if `provider` has no live entry in this registry,
    /// i.e. it was already released as often as it was acquired, or it belongs to an
    /// earlier generation of the key. This is a caller bug.
    ///
    /// # Panics
    ///
    /// On imbalance, if strict release checking is enabled (the default in debug
    /// builds).
    pub fn release(&self, provider: &Arc<ProviderOf<Src>>) -> Result<(), ReleaseImbalance> {
        let released = match self.inner.entries.entry(provider.key().clone()) {
            Entry::Occupied(mut occupied) if Arc::ptr_eq(&occupied.get().provider, provider) => {
                let slot = occupied.get_mut();
                slot.refs -= 1;
                if slot.refs == 0 {
                    Some(Some(occupied.remove().provider))
                } else {
                    Some(None)
                }
            }
            _ => None,
        };

        let Some(evicted) = released else {
            return Err(self.imbalance(provider));
        };

        if let Some(provider) = evicted {
            debug!(
                "Evicting credential provider: key={:?}, id={}",
                provider.key(),
                provider.id()
            );
            provider.shutdown();
            if let Some(m) = self.inner.metrics.as_deref() {
                m.record_provider_evicted();
            }
        }
        Ok(())
    }

    /// Number of unreleased acquisitions for `key` (`0` when absent).
    pub fn ref_count(&self, key: &Src::Key) -> usize {
        self.inner.entries.get(key).map_or(0, |slot| slot.refs)
    }

    /// Returns `true` if a live provider exists for `key`.
    pub fn contains(&self, key: &Src::Key) -> bool {
        self.inner.entries.contains_key(key)
    }

    /// Number of live providers.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Returns `true` if no provider is live.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Starts the provider's source. A panicking `watch` fails the provider instead of
    /// leaving it pending, so it is evicted through the normal release.
    fn start_pipeline(&self, provider: &Arc<ProviderOf<Src>>) {
        let watched = panic::catch_unwind(AssertUnwindSafe(|| {
            self.inner.source.watch(provider.key())
        }));
        let stream = match watched {
            Ok(stream) => stream,
            Err(_) => {
                error!(
                    "Secret source panicked while starting: key={:?}, id={}",
                    provider.key(),
                    provider.id()
                );
                // Nothing is subscribed yet; the failure is retained for replay.
                let _ = provider.apply(Err(AcquisitionError::message(WATCH_PANICKED)));
                if let Some(m) = self.inner.metrics.as_deref() {
                    m.record_error(MetricsErrorKind::AcquisitionFailed);
                }
                return;
            }
        };

        let pipeline = Pipeline {
            provider: Arc::clone(provider),
            stream,
            initial_fetch_timeout: self.inner.initial_fetch_timeout,
            metrics: self.inner.metrics.clone(),
        };
        drop(self.inner.runtime.spawn(pipeline.run()));
    }

    fn imbalance(&self, provider: &ProviderOf<Src>) -> ReleaseImbalance {
        let err = ReleaseImbalance {
            key: format!("{:?}", provider.key()),
        };
        error!(
            "Credential provider released without matching acquisition: key={}, id={}",
            err.key,
            provider.id()
        );
        if let Some(m) = self.inner.metrics.as_deref() {
            m.record_error(MetricsErrorKind::ReleaseImbalance);
        }
        assert!(!self.inner.strict_release, "{err}");
        err
    }
}
