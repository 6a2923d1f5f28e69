//! Reconcile span helpers.
//!
//! Provides span creation and outcome recording for keys flowing through the
//! worker loop.

use tracing::Span;

use crate::model::ObjectKey;

/// Start a span for one reconcile of `key`.
///
/// The `reconcile.outcome` field is declared empty and filled in via
/// [`record_outcome`].
pub fn start_reconcile_span(kind: &str, key: &ObjectKey, requeues: u32) -> Span {
    tracing::info_span!(
        "reconcile",
        "reconcile.kind" = kind,
        "reconcile.key" = %key,
        "reconcile.requeues" = requeues,
        "reconcile.outcome" = tracing::field::Empty,
    )
}

/// Record how a reconcile ended on its span.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("reconcile.outcome", outcome);
    span.in_scope(|| {
        tracing::debug!(outcome, "reconcile finished");
    });
}
