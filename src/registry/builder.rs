use super::cache::CredentialProviderRegistry;
use crate::error::BuildError;
use crate::metrics::MetricsRecorder;
use crate::source::SecretSource;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Default bound on how long a new provider waits for its first secret.
pub const DEFAULT_INITIAL_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for [`CredentialProviderRegistry`].
///
/// # Example
///
/// ```no_run
/// use credential_provider::{CredentialProviderRegistry, SecretSource, SecretStream};
/// use std::time::Duration;
///
/// # struct Sds;
/// # impl SecretSource for Sds {
/// #     type Key = String;
/// #     type Secret = Vec<u8>;
/// #     fn watch(&self, _key: &String) -> SecretStream<Vec<u8>> { unimplemented!() }
/// # }
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = CredentialProviderRegistry::builder(Sds)
///     .initial_fetch_timeout(Duration::from_secs(10))
///     .strict_release(true)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RegistryBuilder<Src> {
    source: Src,
    runtime: Option<Handle>,
    initial_fetch_timeout: Option<Duration>,
    strict_release: bool,
    metrics: Option<Arc<dyn MetricsRecorder>>,
}

impl<Src> Debug for RegistryBuilder<Src> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("source", &"<SecretSource>")
            .field("runtime", &self.runtime)
            .field("initial_fetch_timeout", &self.initial_fetch_timeout)
            .field("strict_release", &self.strict_release)
            .field(
                "metrics",
                &self.metrics.as_ref().map(|_| "<MetricsRecorder>"),
            )
            .finish()
    }
}

impl<Src: SecretSource> RegistryBuilder<Src> {
    /// Creates a builder with default settings.
    ///
    /// Defaults: the ambient tokio runtime, a
    /// [30 second](DEFAULT_INITIAL_FETCH_TIMEOUT) initial fetch timeout, strict release
    /// checking in debug builds only, and no metrics.
    pub fn new(source: Src) -> Self {
        Self {
            source,
            runtime: None,
            initial_fetch_timeout: Some(DEFAULT_INITIAL_FETCH_TIMEOUT),
            strict_release: cfg!(debug_assertions),
            metrics: None,
        }
    }

    /// Sets the runtime that drives secret sources.
    ///
    /// The runtime must have the time driver enabled when an initial fetch timeout is
    /// configured.
    #[must_use]
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Bounds how long a new provider waits for its first secret.
    ///
    /// When the bound is exceeded the provider fails with
    /// [`AcquisitionError::Timeout`](crate::AcquisitionError::Timeout).
    #[must_use]
    pub const fn initial_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.initial_fetch_timeout = Some(timeout);
        self
    }

    /// Lets new providers wait for their first secret indefinitely.
    #[must_use]
    pub const fn no_initial_fetch_timeout(mut self) -> Self {
        self.initial_fetch_timeout = None;
        self
    }

    /// Panics on unmatched `release` calls instead of only reporting them.
    ///
    /// Enabled by default in debug builds.
    #[must_use]
    pub const fn strict_release(mut self, strict: bool) -> Self {
        self.strict_release = strict;
        self
    }

    /// Sets a metrics recorder.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds the registry.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::NoRuntime`] if no runtime was configured and this is not
    /// called from within a tokio runtime.
    pub fn build(self) -> Result<CredentialProviderRegistry<Src>, BuildError> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(BuildError::NoRuntime)?,
        };

        Ok(CredentialProviderRegistry::from_parts(
            self.source,
            runtime,
            self.initial_fetch_timeout,
            self.strict_release,
            self.metrics,
        ))
    }
}
