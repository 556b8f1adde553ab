use crate::callback::{Callback, Outcome};
use crate::error::{AcquisitionError, ShutdownError};
use crate::prelude::error;
use std::mem;
use std::panic::{self, AssertUnwindSafe};

/// Coarse view of a provider's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderStatus {
    /// No secret yet; callbacks are queued.
    Pending,
    /// A secret is available and replayed to new subscribers.
    Ready,
    /// The source failed before producing a secret; the failure is replayed.
    Failed,
    /// The provider was shut down.
    Closed,
}

pub(super) enum State<S> {
    Pending { waiters: Vec<Callback<S>> },
    Ready { secret: S, generation: u64 },
    Failed(AcquisitionError),
    Closed,
}

/// Callbacks to notify once the state lock is released.
#[must_use]
pub(super) struct Dispatch<S> {
    callbacks: Vec<Callback<S>>,
    outcome: Outcome<S>,
}

impl<S: Clone + Send + 'static> Dispatch<S> {
    fn single(callback: Callback<S>, outcome: Outcome<S>) -> Self {
        Self {
            callbacks: vec![callback],
            outcome,
        }
    }

    pub(super) fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Hands the outcome to every callback. A panicking executor loses its own
    /// callback only; the remaining callbacks are still dispatched.
    pub(super) fn run(self) {
        let Self { callbacks, outcome } = self;
        for callback in callbacks {
            let outcome = outcome.clone();
            if panic::catch_unwind(AssertUnwindSafe(|| callback.dispatch(outcome))).is_err() {
                error!("Callback executor panicked while dispatching; callback dropped");
            }
        }
    }

    /// Dispatches on the caller's thread, letting an executor panic reach the caller.
    pub(super) fn run_propagating(self) {
        let Self { callbacks, outcome } = self;
        for callback in callbacks {
            callback.dispatch(outcome.clone());
        }
    }
}

/// Effect of feeding one source item into the state.
#[must_use]
pub(super) enum Applied<S> {
    /// First outcome; the queued waiters must be notified.
    Resolved(Dispatch<S>),
    /// A newer secret replaced the current one.
    Rotated { generation: u64 },
    /// An error arrived after a secret was published; the secret is kept.
    Kept,
    /// The provider is already failed or closed; the item was dropped.
    Discarded,
}

impl<S: Clone + Send + 'static> State<S> {
    pub(super) fn new() -> Self {
        Self::Pending {
            waiters: Vec::new(),
        }
    }

    pub(super) fn status(&self) -> ProviderStatus {
        match self {
            Self::Pending { .. } => ProviderStatus::Pending,
            Self::Ready { .. } => ProviderStatus::Ready,
            Self::Failed(_) => ProviderStatus::Failed,
            Self::Closed => ProviderStatus::Closed,
        }
    }

    pub(super) fn generation(&self) -> u64 {
        match self {
            Self::Ready { generation, .. } => *generation,
            _ => 0,
        }
    }

    pub(super) fn secret(&self) -> Option<S> {
        match self {
            Self::Ready { secret, .. } => Some(secret.clone()),
            _ => None,
        }
    }

    /// Queues `callback`, or returns it with the outcome to replay.
    pub(super) fn subscribe(&mut self, callback: Callback<S>) -> Option<Dispatch<S>> {
        let outcome = match self {
            Self::Pending { waiters } => {
                waiters.push(callback);
                return None;
            }
            Self::Ready { secret, .. } => Ok(secret.clone()),
            Self::Failed(e) => Err(e.clone().into()),
            Self::Closed => Err(ShutdownError::Provider.into()),
        };
        Some(Dispatch::single(callback, outcome))
    }

    pub(super) fn apply(&mut self, item: Result<S, AcquisitionError>) -> Applied<S> {
        let callbacks = match self {
            Self::Closed | Self::Failed(_) => return Applied::Discarded,
            Self::Ready { secret, generation } => {
                return match item {
                    Ok(next) => {
                        *secret = next;
                        *generation += 1;
                        Applied::Rotated {
                            generation: *generation,
                        }
                    }
                    Err(_) => Applied::Kept,
                };
            }
            Self::Pending { waiters } => mem::take(waiters),
        };

        let outcome = match item {
            Ok(secret) => {
                *self = Self::Ready {
                    secret: secret.clone(),
                    generation: 1,
                };
                Ok(secret)
            }
            Err(e) => {
                *self = Self::Failed(e.clone());
                Err(e.into())
            }
        };
        Applied::Resolved(Dispatch { callbacks, outcome })
    }

    /// Moves to `Closed`; queued waiters are told the provider is shut down.
    /// Returns `None` if the state was already closed.
    pub(super) fn close(&mut self) -> Option<Dispatch<S>> {
        match mem::replace(self, Self::Closed) {
            Self::Closed => None,
            Self::Pending { waiters } => Some(Dispatch {
                callbacks: waiters,
                outcome: Err(ShutdownError::Provider.into()),
            }),
            Self::Ready { .. } | Self::Failed(_) => Some(Dispatch {
                callbacks: Vec::new(),
                outcome: Err(ShutdownError::Provider.into()),
            }),
        }
    }
}
