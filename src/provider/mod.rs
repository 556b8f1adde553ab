//! Credential provider: one shared, asynchronously resolved secret per config key.
//!
//! A provider starts `Pending` and queues callbacks. The first item produced by its
//! [`SecretSource`](crate::SecretSource) moves it to `Ready` (or `Failed`) and every
//! queued callback is notified exactly once. The outcome is retained and replayed to
//! later subscribers. Later secrets rotate a ready provider in place; later errors are
//! logged and the last-known-good secret is kept.
//!
//! [`CredentialProvider::shutdown`] closes the provider, cancels its pipeline and
//! answers any remaining waiters with
//! [`ShutdownError::Provider`](crate::ShutdownError::Provider).

mod credential;
pub(crate) mod pipeline;
mod state;

pub use credential::CredentialProvider;
pub use state::ProviderStatus;
