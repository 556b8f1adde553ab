//! Where callback outcomes are delivered.
//!
//! Providers never invoke consumer code directly: every outcome is packaged as a
//! [`Task`] and handed to the executor the consumer supplied with its callback, after
//! all provider locks have been released.

use std::sync::Arc;

/// A unit of work submitted to an [`Executor`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Dispatches callback tasks.
pub trait Executor: Send + Sync + 'static {
    /// Runs `task`, now or later, on a thread of the executor's choosing.
    fn execute(&self, task: Task);
}

/// Executor shared between callbacks.
pub type SharedExecutor = Arc<dyn Executor>;

impl Executor for tokio::runtime::Handle {
    fn execute(&self, task: Task) {
        drop(self.spawn(async move { task() }));
    }
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, task: Task) {
        (**self).execute(task);
    }
}

/// Runs each task inline on the thread that dispatches it.
///
/// Dispatch always happens after provider locks are released, so a task run by a
/// `DirectExecutor` may safely call back into the provider or its handle. The task
/// runs on whichever thread produced the outcome: the caller of `add_callback` for an
/// already resolved provider, or the thread driving the secret source otherwise.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectExecutor;

impl Executor for DirectExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}
