//! Error types for keyq-controller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid object key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("object has no name; cannot derive a key")]
    MissingName,

    #[error("kind mismatch: expected {expected}, found {found}")]
    KindMismatch { expected: String, found: String },

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("local cache lock poisoned")]
    CachePoisoned,

    #[error("reconcile failed: {0}")]
    Reconcile(String),

    #[error("reconcile panicked: {0}")]
    ReconcilePanic(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a reconcile failure carrying a message.
    pub fn reconcile(msg: impl Into<String>) -> Self {
        Self::Reconcile(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
