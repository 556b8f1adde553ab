//! Error types for credential providers, handles and the registry.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The secret source could not produce a secret for a provider.
///
/// Delivered to every current and future subscriber of the failed provider. The
/// value is cheaply cloneable so the same failure can be replayed to late
/// subscribers.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum AcquisitionError {
    /// The source reported a failure while fetching, parsing or validating the secret.
    #[error("secret fetch failed: {0}")]
    Fetch(#[source] Arc<dyn StdError + Send + Sync + 'static>),

    /// The source stream terminated before producing a secret.
    #[error("secret stream ended before a secret was produced")]
    StreamEnded,

    /// No secret was produced within the configured initial fetch timeout.
    #[error("no secret produced within {0:?}")]
    Timeout(Duration),
}

impl AcquisitionError {
    /// Wraps an arbitrary source failure.
    pub fn fetch<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Fetch(Arc::new(err))
    }

    /// Wraps a plain failure message.
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Fetch(Arc::new(Message(msg.into())))
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}

/// A request reached a handle or provider that has already been shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ShutdownError {
    /// The request was made on a closed [`ProviderHandle`](crate::ProviderHandle).
    #[error("handle is shutdown")]
    Handle,

    /// The provider was shut down before it could deliver a secret.
    #[error("provider is shutdown")]
    Provider,
}

/// The error half of every callback outcome.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// The secret could not be acquired.
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    /// The handle or provider is shut down.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

impl ProviderError {
    /// Returns `true` if this error reports a shutdown rather than a failed acquisition.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown(_))
    }
}

/// A provider was released without a matching acquisition.
///
/// This is a reference-counting bug in the caller, never a runtime condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("release without matching acquisition: key={key}")]
pub struct ReleaseImbalance {
    /// Debug rendering of the provider's config key.
    pub key: String,
}

/// Errors returned when building a [`CredentialProviderRegistry`](crate::CredentialProviderRegistry).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    /// No runtime handle was configured and the builder was not called from within a
    /// tokio runtime.
    #[error("no tokio runtime available to drive secret sources")]
    NoRuntime(#[source] tokio::runtime::TryCurrentError),
}
