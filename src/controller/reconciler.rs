//! The side-effecting step run for each key.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::info;

use crate::error::{Error, Result};
use crate::model::{ObjectKey, Pod};

/// Brings the world in line with one observed object.
///
/// The worker decodes the cached object into [`Reconciler::Object`] before
/// calling [`reconcile`](Reconciler::reconcile); a cached object of another
/// kind fails with [`Error::KindMismatch`] without reaching the reconciler.
pub trait Reconciler: Send + Sync + 'static {
    type Object: DeserializeOwned + Send + 'static;

    /// Kind this reconciler accepts, e.g. `"Pod"`.
    const KIND: &'static str;

    fn reconcile(
        &self,
        key: &ObjectKey,
        obj: Self::Object,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Logs every pod it sees. Pods whose name contains `fail_on` fail after
/// `failure_delay`, which exercises the retry path.
#[derive(Debug, Clone, Default)]
pub struct PodLogger {
    fail_on: Option<String>,
    failure_delay: Duration,
}

impl PodLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(mut self, pattern: impl Into<String>) -> Self {
        self.fail_on = Some(pattern.into());
        self
    }

    pub fn failure_delay(mut self, delay: Duration) -> Self {
        self.failure_delay = delay;
        self
    }

    fn should_fail(&self, pod: &Pod) -> bool {
        self.fail_on
            .as_deref()
            .is_some_and(|pattern| pod.name().contains(pattern))
    }
}

impl Reconciler for PodLogger {
    type Object = Pod;
    const KIND: &'static str = Pod::KIND;

    async fn reconcile(&self, key: &ObjectKey, pod: Pod) -> Result<()> {
        let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
        info!(%key, pod = pod.name(), phase, "sync/add/update for pod");

        if self.should_fail(&pod) {
            tokio::time::sleep(self.failure_delay).await;
            return Err(Error::reconcile(format!(
                "simulated error for pod {}",
                pod.name()
            )));
        }
        Ok(())
    }
}
