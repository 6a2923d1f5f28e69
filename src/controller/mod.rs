//! Controller: worker pool, reconcile step and retry policy.

pub mod control;
pub mod reconciler;
pub mod retry;

pub use control::{Controller, ControllerHandle, SyncOutcome};
pub use reconciler::{PodLogger, Reconciler};
pub use retry::{DEFAULT_MAX_RETRIES, RetryDecision, RetryPolicy};
