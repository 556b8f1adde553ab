//! The consumer side of the notification protocol.

use crate::error::ProviderError;
use crate::executor::{Executor, SharedExecutor};
use crate::prelude::error;
use std::fmt::{self, Debug};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Receives exactly one outcome of a secret request.
///
/// Both methods consume the watcher: a watcher is notified once and then dropped.
pub trait SecretWatcher<S>: Send + 'static {
    /// Called with the secret when one is available.
    fn on_secret(self: Box<Self>, secret: S);

    /// Called when no secret can be delivered.
    fn on_error(self: Box<Self>, error: ProviderError);
}

/// Outcome delivered to a [`SecretWatcher`].
pub type Outcome<S> = Result<S, ProviderError>;

pub(crate) fn deliver<S: 'static>(watcher: Box<dyn SecretWatcher<S>>, outcome: Outcome<S>) {
    match outcome {
        Ok(secret) => watcher.on_secret(secret),
        Err(e) => watcher.on_error(e),
    }
}

struct FnWatcher<F>(F);

impl<S, F> SecretWatcher<S> for FnWatcher<F>
where
    F: FnOnce(Outcome<S>) + Send + 'static,
{
    fn on_secret(self: Box<Self>, secret: S) {
        (self.0)(Ok(secret));
    }

    fn on_error(self: Box<Self>, error: ProviderError) {
        (self.0)(Err(error));
    }
}

/// A [`SecretWatcher`] bound to the executor its outcome must be delivered on.
pub struct Callback<S> {
    executor: SharedExecutor,
    watcher: Box<dyn SecretWatcher<S>>,
}

impl<S> Debug for Callback<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("executor", &"<Executor>")
            .field("watcher", &"<SecretWatcher>")
            .finish()
    }
}

impl<S: Send + 'static> Callback<S> {
    /// Creates a callback delivering to `watcher` on `executor`.
    pub fn new<E, W>(executor: E, watcher: W) -> Self
    where
        E: Executor,
        W: SecretWatcher<S>,
    {
        Self {
            executor: Arc::new(executor),
            watcher: Box::new(watcher),
        }
    }

    /// Creates a callback from a closure receiving the outcome.
    ///
    /// # Examples
    ///
    /// ```
    /// use credential_provider::{Callback, DirectExecutor};
    ///
    /// let callback = Callback::<String>::from_fn(DirectExecutor, |outcome| match outcome {
    ///     Ok(secret) => println!("got {secret}"),
    ///     Err(e) => eprintln!("no secret: {e}"),
    /// });
    /// # drop(callback);
    /// ```
    pub fn from_fn<E, F>(executor: E, f: F) -> Self
    where
        E: Executor,
        F: FnOnce(Outcome<S>) + Send + 'static,
    {
        Self::new(executor, FnWatcher(f))
    }

    pub(crate) fn from_parts(
        executor: SharedExecutor,
        watcher: Box<dyn SecretWatcher<S>>,
    ) -> Self {
        Self { executor, watcher }
    }

    pub(crate) fn into_parts(self) -> (SharedExecutor, Box<dyn SecretWatcher<S>>) {
        (self.executor, self.watcher)
    }

    /// Hands the outcome to the executor. Must not be called while holding a lock.
    pub(crate) fn dispatch(self, outcome: Outcome<S>) {
        let Self { executor, watcher } = self;
        executor.execute(Box::new(move || run_isolated(watcher, outcome)));
    }
}

/// Delivers `outcome`, containing any panic raised by the watcher.
pub(crate) fn run_isolated<S: 'static>(watcher: Box<dyn SecretWatcher<S>>, outcome: Outcome<S>) {
    if panic::catch_unwind(AssertUnwindSafe(move || deliver(watcher, outcome))).is_err() {
        error!("Secret watcher panicked; outcome dropped");
    }
}
