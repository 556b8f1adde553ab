use super::state::{Applied, ProviderStatus, State};
use crate::callback::Callback;
use crate::error::AcquisitionError;
use crate::prelude::debug;
use std::fmt::{self, Debug};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Shared, asynchronously resolved holder of the secret for one config key.
///
/// Providers are created and shut down by the
/// [`CredentialProviderRegistry`](crate::CredentialProviderRegistry); consumers
/// normally reach them through a [`ProviderHandle`](crate::ProviderHandle).
///
/// Every callback registered with [`CredentialProvider::add_callback`] receives exactly
/// one outcome, delivered on the callback's executor after the internal lock has been
/// released.
pub struct CredentialProvider<K, S> {
    key: K,
    // Correlates log lines of one provider instance.
    id: u64,
    state: Mutex<State<S>>,
    cancel: CancellationToken,
}

impl<K: Debug, S> Debug for CredentialProvider<K, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialProvider")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("state", &"<Mutex<State>>")
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl<K, S> CredentialProvider<K, S>
where
    K: Debug + Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(key: K) -> Self {
        Self {
            key,
            id: fastrand::u64(..),
            state: Mutex::new(State::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// The config key this provider serves.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Current state of the provider.
    ///
    /// The value may be stale as soon as it is returned; use it for diagnostics only.
    pub fn status(&self) -> ProviderStatus {
        self.lock().status()
    }

    /// Number of secrets published so far (`0` until the provider is ready).
    pub fn generation(&self) -> u64 {
        self.lock().generation()
    }

    /// The latest published secret, if the provider is ready.
    pub fn current_secret(&self) -> Option<S> {
        self.lock().secret()
    }

    /// Registers `callback` for exactly one outcome.
    ///
    /// A pending provider queues the callback until the source resolves. A ready or
    /// failed provider dispatches the retained outcome immediately; a closed provider
    /// dispatches [`ShutdownError::Provider`](crate::ShutdownError::Provider). Dispatch
    /// always goes through the callback's executor.
    ///
    /// # Panics
    ///
    /// If the provider is already resolved and the callback's executor panics, the
    /// panic propagates to the caller. The provider state is unaffected.
    pub fn add_callback(&self, callback: Callback<S>) {
        let immediate = self.lock().subscribe(callback);
        if let Some(dispatch) = immediate {
            dispatch.run_propagating();
        }
    }

    /// Moves the provider to `Closed` and cancels its secret source.
    ///
    /// Callbacks still waiting receive
    /// [`ShutdownError::Provider`](crate::ShutdownError::Provider); results the source
    /// produces afterwards are discarded. Idempotent. The registry calls this when the
    /// last reference is released.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let dispatch = self.lock().close();
        if let Some(dispatch) = dispatch {
            debug!(
                "Credential provider shut down: key={:?}, id={}, waiters={}",
                self.key,
                self.id,
                dispatch.len()
            );
            dispatch.run();
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Feeds one source item into the provider and notifies waiters if it resolved.
    pub(crate) fn apply(&self, item: Result<S, AcquisitionError>) -> Update {
        let applied = self.lock().apply(item);
        match applied {
            Applied::Resolved(dispatch) => {
                dispatch.run();
                Update::Resolved
            }
            Applied::Rotated { generation } => Update::Rotated { generation },
            Applied::Kept => Update::Kept,
            Applied::Discarded => Update::Discarded,
        }
    }

    // No user code runs under this lock, so a poisoned state is still consistent.
    fn lock(&self) -> MutexGuard<'_, State<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// What [`CredentialProvider::apply`] did with a source item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Update {
    Resolved,
    Rotated { generation: u64 },
    Kept,
    Discarded,
}
