//! Metric instrument factories for keyq-controller.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"keyq-controller"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};

/// Returns the shared meter for keyq-controller instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("keyq-controller")
}

/// Counter: keys accepted into a queue (dedup hits are not counted).
/// Labels: `queue`.
pub fn queue_adds() -> Counter<u64> {
    meter()
        .u64_counter("keyq.queue.adds")
        .with_description("Number of keys added to the work queue")
        .build()
}

/// Up/down counter: keys waiting to be picked up by a worker.
/// Labels: `queue`.
pub fn queue_depth() -> UpDownCounter<i64> {
    meter()
        .i64_up_down_counter("keyq.queue.depth")
        .with_description("Number of keys pending in the work queue")
        .build()
}

/// Counter: rate-limited re-adds.
/// Labels: `queue`.
pub fn queue_retries() -> Counter<u64> {
    meter()
        .u64_counter("keyq.queue.retries")
        .with_description("Number of rate-limited requeues")
        .build()
}

/// Counter: keys dropped after exhausting their retries.
/// Labels: `queue`.
pub fn queue_drops() -> Counter<u64> {
    meter()
        .u64_counter("keyq.queue.drops")
        .with_description("Number of keys dropped after the retry ceiling")
        .build()
}

/// Histogram: reconcile duration in milliseconds.
/// Labels: `kind`, `result` ("ok" | "missing" | "error").
pub fn reconcile_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("keyq.reconcile.duration_ms")
        .with_description("Reconcile duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: watch events received by an informer.
/// Labels: `event` ("added" | "modified" | "deleted" | "restarted").
pub fn watch_events() -> Counter<u64> {
    meter()
        .u64_counter("keyq.watch.events")
        .with_description("Number of watch events applied to the local cache")
        .build()
}
