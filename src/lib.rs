#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

//! Shared, reference-counted TLS credential providers with out-of-band rotation.
//!
//! Connections need up-to-date certificates and keys that are fetched and rotated by
//! an external pipeline (typically a secret-discovery service). Fetching is expensive,
//! so every connection that uses the same trust configuration should share one
//! provider. This crate supplies the lifecycle machinery for that sharing:
//!
//! - [`CredentialProvider`] holds the current (or in-flight) secret for one config key
//!   and notifies each subscriber exactly once, replaying the retained outcome to late
//!   subscribers.
//! - [`CredentialProviderRegistry`] maps config keys to providers with explicit
//!   reference counts, creating a provider on first demand and shutting it down when
//!   the last reference is released.
//! - [`ProviderHandle`] is the per-consumer facade that acquires a provider for a
//!   request and releases it once the consumer has been notified or the handle is
//!   closed.
//!
//! Secrets come from a [`SecretSource`], which produces a stream of secrets per key.
//! Outcomes are delivered through the [`Executor`] each [`Callback`] names, never while
//! an internal lock is held.
//!
//! # Example
//!
//! ```no_run
//! use credential_provider::{AcquisitionError, CredentialProviderRegistry, SecretSource, SecretStream};
//!
//! struct Sds;
//!
//! impl SecretSource for Sds {
//!     type Key = String;
//!     type Secret = Vec<u8>;
//!
//!     fn watch(&self, key: &String) -> SecretStream<Vec<u8>> {
//!         let resource = key.clone();
//!         Box::pin(futures::stream::once(async move {
//!             // Fetch, parse and validate the secret for `resource` here.
//!             Ok::<_, AcquisitionError>(resource.into_bytes())
//!         }))
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = CredentialProviderRegistry::new(Sds)?;
//!
//! let handle = registry.handle("client-cert".to_string());
//! let secret = handle.secret().await?;
//! assert_eq!(secret, b"client-cert");
//!
//! // Dropping or closing the handle releases anything it still holds.
//! handle.close();
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **`logging`** (default): diagnostics through the `log` crate
//! - **`tracing`**: diagnostics through the `tracing` crate (takes precedence)

mod observability;
mod prelude;

pub mod callback;
pub mod error;
pub mod executor;
pub mod handle;
pub mod metrics;
pub mod provider;
pub mod registry;
pub mod source;

// -----------------------
// Re-exports
// -----------------------

pub use crate::{
    callback::{Callback, Outcome, SecretWatcher},
    error::{AcquisitionError, BuildError, ProviderError, ReleaseImbalance, ShutdownError},
    executor::{DirectExecutor, Executor, SharedExecutor, Task},
    handle::ProviderHandle,
    metrics::{MetricsErrorKind, MetricsRecorder},
    provider::{CredentialProvider, ProviderStatus},
    registry::{CredentialProviderRegistry, RegistryBuilder},
    source::{SecretSource, SecretStream},
};
