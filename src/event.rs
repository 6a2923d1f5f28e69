//! Watch events delivered by a watch source.
//!
//! The JSON form follows the Kubernetes watch stream, one event per line:
//! `{"type":"ADDED","object":{...}}`. A `SYNC` event carries the full list of
//! objects and replaces the local cache wholesale (initial list or relist).

use serde::{Deserialize, Serialize};

use crate::model::DynamicObject;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "object", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WatchEvent {
    Added(DynamicObject),
    Modified(DynamicObject),
    Deleted(DynamicObject),
    /// Full state of the watched collection.
    #[serde(rename = "SYNC")]
    Restarted(Vec<DynamicObject>),
    /// Resource-version checkpoint; carries no change.
    Bookmark(serde_json::Value),
    /// Error status reported by the watch source.
    Error(serde_json::Value),
}

impl WatchEvent {
    /// Short lowercase label, used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "added",
            WatchEvent::Modified(_) => "modified",
            WatchEvent::Deleted(_) => "deleted",
            WatchEvent::Restarted(_) => "restarted",
            WatchEvent::Bookmark(_) => "bookmark",
            WatchEvent::Error(_) => "error",
        }
    }

    /// Parse one line of a newline-delimited watch stream.
    pub fn from_json_line(line: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}
