//! Drives one provider from its secret stream.

use super::credential::{CredentialProvider, Update};
use crate::error::AcquisitionError;
use crate::metrics::{MetricsErrorKind, MetricsRecorder};
use crate::prelude::{debug, info, warn};
use crate::source::SecretStream;
use futures::StreamExt as _;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Consecutive rotation failures logged at WARN before downgrading to DEBUG.
pub(crate) const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Counts consecutive failures to keep repeated source errors from flooding the log.
#[derive(Debug)]
pub(crate) struct FailureTracker {
    consecutive: u32,
    max_consecutive: u32,
}

impl FailureTracker {
    pub(crate) fn new(max_consecutive: u32) -> Self {
        Self {
            consecutive: 0,
            max_consecutive,
        }
    }

    /// Records a failure; returns whether it should be logged at WARN.
    pub(crate) fn record(&mut self) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        self.consecutive <= self.max_consecutive
    }

    /// Clears the streak, returning its length.
    pub(crate) fn reset(&mut self) -> u32 {
        std::mem::take(&mut self.consecutive)
    }
}

pub(crate) struct Pipeline<K, S> {
    pub(crate) provider: Arc<CredentialProvider<K, S>>,
    pub(crate) stream: SecretStream<S>,
    pub(crate) initial_fetch_timeout: Option<Duration>,
    pub(crate) metrics: Option<Arc<dyn MetricsRecorder>>,
}

impl<K, S> Pipeline<K, S>
where
    K: Debug + Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
{
    pub(crate) async fn run(mut self) {
        let cancel = self.provider.cancellation().clone();
        let id = self.provider.id();
        debug!(
            "Starting secret pipeline: key={:?}, id={}",
            self.provider.key(),
            id
        );

        let first = tokio::select! {
            () = cancel.cancelled() => {
                debug!("Provider shut down before first secret: id={id}");
                return;
            }
            v = Self::first_item(&mut self.stream, self.initial_fetch_timeout) => v,
        };

        let failed = first.as_ref().err().cloned();
        if self.provider.apply(first) == Update::Discarded {
            debug!("Provider closed while fetching; first result dropped: id={id}");
            return;
        }
        if let Some(e) = failed {
            warn!(
                "Failed to acquire secret: key={:?}, id={}, error={}",
                self.provider.key(),
                id,
                e
            );
            self.record_error(match e {
                AcquisitionError::Timeout(_) => MetricsErrorKind::InitialFetchTimeout,
                AcquisitionError::StreamEnded => MetricsErrorKind::StreamEnded,
                _ => MetricsErrorKind::AcquisitionFailed,
            });
            return;
        }
        info!(
            "Secret acquired: key={:?}, id={}",
            self.provider.key(),
            id
        );
        self.record_update();

        self.watch_rotations(&cancel, id).await;
    }

    async fn first_item(
        stream: &mut SecretStream<S>,
        timeout: Option<Duration>,
    ) -> Result<S, AcquisitionError> {
        let next = match timeout {
            Some(limit) => tokio::time::timeout(limit, stream.next())
                .await
                .map_err(|_| AcquisitionError::Timeout(limit))?,
            None => stream.next().await,
        };
        next.unwrap_or(Err(AcquisitionError::StreamEnded))
    }

    async fn watch_rotations(&mut self, cancel: &tokio_util::sync::CancellationToken, id: u64) {
        let mut failures = FailureTracker::new(MAX_CONSECUTIVE_FAILURES);

        loop {
            let item = tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Provider shut down; stopping secret pipeline: id={id}");
                    return;
                }
                v = self.stream.next() => v,
            };

            match item {
                Some(Ok(secret)) => match self.provider.apply(Ok(secret)) {
                    Update::Rotated { generation } => {
                        let streak = failures.reset();
                        if streak > 0 {
                            info!("Secret source recovered after {streak} consecutive failures: id={id}");
                        }
                        info!("Secret rotated: id={id}, generation={generation}");
                        self.record_update();
                    }
                    Update::Discarded => {
                        debug!("Provider closed; rotated secret dropped: id={id}");
                        return;
                    }
                    Update::Resolved | Update::Kept => {}
                },
                Some(Err(e)) => {
                    if self.provider.apply(Err(e.clone())) == Update::Discarded {
                        debug!("Provider closed; failed update dropped: id={id}");
                        return;
                    }
                    if failures.record() {
                        warn!("Secret update failed; keeping current secret: id={id}, error={e}");
                    } else {
                        debug!(
                            "Secret update failed (repeated); keeping current secret: id={}, error={}, consecutive_failures={}",
                            id,
                            e,
                            failures.consecutive
                        );
                    }
                    self.record_error(MetricsErrorKind::UpdateRejected);
                }
                None => {
                    info!("Secret stream ended; keeping current secret: id={id}");
                    return;
                }
            }
        }
    }

    fn record_update(&self) {
        if let Some(m) = self.metrics.as_deref() {
            m.record_update();
        }
    }

    fn record_error(&self, kind: MetricsErrorKind) {
        if let Some(m) = self.metrics.as_deref() {
            m.record_error(kind);
        }
    }
}
