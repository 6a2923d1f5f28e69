//! # keyq-controller
//!
//! Event-driven reconciliation core: an informer keeps a local cache in sync
//! with a watch source and enqueues the key of every changed object; a pool
//! of workers drains the deduplicating queue, reconciles the current cached
//! object, and retries failures with bounded exponential backoff.

pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod informer;
pub mod model;
pub mod queue;
pub mod telemetry;
