//! Per-consumer facade over the registry.

use crate::callback::{self, Callback, Outcome, SecretWatcher};
use crate::error::{ProviderError, ShutdownError};
use crate::executor::DirectExecutor;
use crate::prelude::debug;
use crate::registry::{CredentialProviderRegistry, ProviderOf};
use crate::source::SecretSource;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Requests secrets for one config key on behalf of one consumer.
///
/// Each [`request_secret`](Self::request_secret) acquires the key's provider from the
/// registry and holds that reference only until the consumer has been notified. The
/// reference is released exactly once: by the notification, or by
/// [`close`](Self::close) if that comes first. A closed handle answers every further
/// request with [`ShutdownError::Handle`] without touching the registry.
///
/// Dropping the handle closes it.
pub struct ProviderHandle<Src: SecretSource> {
    key: Src::Key,
    registry: CredentialProviderRegistry<Src>,
    state: Arc<Mutex<Acquisitions<Src>>>,
}

/// Acquisitions not yet matched by a release, keyed by request.
struct Acquisitions<Src: SecretSource> {
    closed: bool,
    next_request: u64,
    outstanding: HashMap<u64, Arc<ProviderOf<Src>>>,
}

impl<Src: SecretSource> Acquisitions<Src> {
    fn take(&mut self, request: u64) -> Option<Arc<ProviderOf<Src>>> {
        self.outstanding.remove(&request)
    }
}

impl<Src: SecretSource> Debug for ProviderHandle<Src> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("ProviderHandle")
            .field("key", &self.key)
            .field("closed", &state.closed)
            .field("outstanding", &state.outstanding.len())
            .finish_non_exhaustive()
    }
}

impl<Src: SecretSource> ProviderHandle<Src> {
    /// Creates an idle handle for `key`. Nothing is acquired until the first request.
    pub fn new(key: Src::Key, registry: CredentialProviderRegistry<Src>) -> Self {
        Self {
            key,
            registry,
            state: Arc::new(Mutex::new(Acquisitions {
                closed: false,
                next_request: 0,
                outstanding: HashMap::new(),
            })),
        }
    }

    /// The config key this handle requests secrets for.
    pub fn key(&self) -> &Src::Key {
        &self.key
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Requests one secret, delivered to `callback` exactly once.
    ///
    /// On an open handle this acquires the key's provider and subscribes to it; the
    /// acquisition is released right after `callback` has been notified. On a closed
    /// handle `callback` receives [`ShutdownError::Handle`].
    pub fn request_secret(&self, callback: Callback<Src::Secret>) {
        let (request, provider) = {
            let mut state = lock(&self.state);
            if state.closed {
                drop(state);
                debug!("Secret requested on closed handle: key={:?}", self.key);
                callback.dispatch(Err(ShutdownError::Handle.into()));
                return;
            }

            let provider = self.registry.find_or_create(&self.key);
            let request = state.next_request;
            state.next_request += 1;
            state.outstanding.insert(request, Arc::clone(&provider));
            (request, provider)
        };

        let (executor, consumer) = callback.into_parts();
        let relay = Relay {
            consumer,
            request,
            state: Arc::clone(&self.state),
            registry: self.registry.clone(),
        };
        let relay = Callback::from_parts(executor, Box::new(relay));

        let registered = panic::catch_unwind(AssertUnwindSafe(|| provider.add_callback(relay)));
        if let Err(payload) = registered {
            release_request(&self.state, &self.registry, request);
            panic::resume_unwind(payload);
        }
    }

    /// Requests one secret and waits for it.
    ///
    /// If the returned future is dropped before completion the request stays
    /// outstanding until the provider resolves or the handle is closed.
    ///
    /// # Errors
    ///
    /// Returns the [`ProviderError`] delivered for this request.
    pub async fn secret(&self) -> Result<Src::Secret, ProviderError> {
        let (tx, rx) = oneshot::channel();
        self.request_secret(Callback::from_fn(DirectExecutor, move |outcome| {
            let _ = tx.send(outcome);
        }));
        rx.await
            .unwrap_or_else(|_| Err(ShutdownError::Provider.into()))
    }

    /// Closes the handle and releases every acquisition still awaiting notification.
    ///
    /// Idempotent. Callbacks of outstanding requests still fire once, with whatever the
    /// provider eventually delivers.
    pub fn close(&self) {
        let drained: Vec<_> = {
            let mut state = lock(&self.state);
            if !state.closed {
                state.closed = true;
                debug!(
                    "Closing provider handle: key={:?}, outstanding={}",
                    self.key,
                    state.outstanding.len()
                );
            }
            state.outstanding.drain().map(|(_, p)| p).collect()
        };

        for provider in drained {
            // Imbalances are reported by the registry.
            let _ = self.registry.release(&provider);
        }
    }
}

impl<Src: SecretSource> Drop for ProviderHandle<Src> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<Src: SecretSource> CredentialProviderRegistry<Src> {
    /// Creates a [`ProviderHandle`] for `key` backed by this registry.
    pub fn handle(&self, key: Src::Key) -> ProviderHandle<Src> {
        ProviderHandle::new(key, self.clone())
    }
}

/// Forwards the provider's outcome to the consumer, then gives back the acquisition.
struct Relay<Src: SecretSource> {
    consumer: Box<dyn SecretWatcher<Src::Secret>>,
    request: u64,
    state: Arc<Mutex<Acquisitions<Src>>>,
    registry: CredentialProviderRegistry<Src>,
}

impl<Src: SecretSource> Relay<Src> {
    fn relay(self, outcome: Outcome<Src::Secret>) {
        let Self {
            consumer,
            request,
            state,
            registry,
        } = self;
        callback::run_isolated(consumer, outcome);
        release_request(&state, &registry, request);
    }
}

impl<Src: SecretSource> SecretWatcher<Src::Secret> for Relay<Src> {
    fn on_secret(self: Box<Self>, secret: Src::Secret) {
        (*self).relay(Ok(secret));
    }

    fn on_error(self: Box<Self>, error: ProviderError) {
        (*self).relay(Err(error));
    }
}

/// Releases `request`'s acquisition unless `close` or the relay already did.
fn release_request<Src: SecretSource>(
    state: &Mutex<Acquisitions<Src>>,
    registry: &CredentialProviderRegistry<Src>,
    request: u64,
) {
    let provider = lock(state).take(request);
    if let Some(provider) = provider {
        let _ = registry.release(&provider);
    }
}

// The lock only guards bookkeeping, never user code, so poisoning leaves it consistent.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
