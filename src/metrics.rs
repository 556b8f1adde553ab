//! Optional metrics hooks.

use std::fmt;

/// Error kinds for structured metrics reporting.
///
/// Use these stable, low-cardinality labels when recording metrics.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum MetricsErrorKind {
    /// The source failed before producing a first secret.
    AcquisitionFailed,
    /// No first secret arrived within the initial fetch timeout.
    InitialFetchTimeout,
    /// The source stream ended before producing a first secret.
    StreamEnded,
    /// The source reported an error after a secret was published; the secret was kept.
    UpdateRejected,
    /// `release` was called without a matching acquisition.
    ReleaseImbalance,
}

impl MetricsErrorKind {
    /// Returns a string representation of the error kind.
    ///
    /// This is useful for metrics systems that require string labels.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AcquisitionFailed => "acquisition_failed",
            Self::InitialFetchTimeout => "initial_fetch_timeout",
            Self::StreamEnded => "stream_ended",
            Self::UpdateRejected => "update_rejected",
            Self::ReleaseImbalance => "release_imbalance",
        }
    }
}

impl fmt::Display for MetricsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives registry and provider events.
///
/// Implementations must be cheap and must not call back into the registry.
///
/// # Example
///
/// ```
/// use credential_provider::{MetricsErrorKind, MetricsRecorder};
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// #[derive(Default)]
/// struct Counters {
///     live: AtomicU64,
/// }
///
/// impl MetricsRecorder for Counters {
///     fn record_provider_created(&self) {
///         self.live.fetch_add(1, Ordering::Relaxed);
///     }
///     fn record_provider_evicted(&self) {
///         self.live.fetch_sub(1, Ordering::Relaxed);
///     }
///     fn record_update(&self) {}
///     fn record_error(&self, _kind: MetricsErrorKind) {}
/// }
/// ```
pub trait MetricsRecorder: Send + Sync + 'static {
    /// A provider was created for a key with no live entry.
    fn record_provider_created(&self);

    /// A provider was evicted after its last reference was released.
    fn record_provider_evicted(&self);

    /// A provider published a secret (first resolution or rotation).
    fn record_update(&self);

    /// An error of the given kind occurred.
    fn record_error(&self, kind: MetricsErrorKind);
}
