//! The external producer of secrets.

use crate::error::AcquisitionError;
use futures::Stream;
use std::fmt::Debug;
use std::hash::Hash;
use std::pin::Pin;

/// Stream of secrets for one config key.
///
/// The first `Ok` item resolves the provider; every later `Ok` item rotates it.
pub type SecretStream<S> = Pin<Box<dyn Stream<Item = Result<S, AcquisitionError>> + Send + 'static>>;

/// Produces secrets for config keys, e.g. by subscribing to a secret-discovery service.
///
/// The registry calls [`SecretSource::watch`] once per provider it creates, outside of
/// any lock. Implementations should return a lazy stream and do their I/O while the
/// stream is polled.
///
/// # Example
///
/// ```
/// use credential_provider::{AcquisitionError, SecretSource, SecretStream};
///
/// struct Static;
///
/// impl SecretSource for Static {
///     type Key = String;
///     type Secret = Vec<u8>;
///
///     fn watch(&self, key: &String) -> SecretStream<Vec<u8>> {
///         let secret = key.as_bytes().to_vec();
///         Box::pin(futures::stream::once(async move { Ok::<_, AcquisitionError>(secret) }))
///     }
/// }
/// ```
pub trait SecretSource: Send + Sync + 'static {
    /// Identifies a trust configuration.
    type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// The credential material produced for a key.
    type Secret: Clone + Send + Sync + 'static;

    /// Starts producing secrets for `key`.
    fn watch(&self, key: &Self::Key) -> SecretStream<Self::Secret>;
}
