//! Keyed work queue with rate-limited retries.

pub mod rate_limiter;
pub mod work_queue;

pub use rate_limiter::{
    ConstantDelay, ExponentialBackoff, MaxOf, RateLimiter, default_controller_rate_limiter,
};
pub use work_queue::WorkQueue;
