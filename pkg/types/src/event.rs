use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::meta::ObjectReference;

/// Severity of a recorded cluster event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Normal,
    Warning,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSeverity::Normal => write!(f, "Normal"),
            EventSeverity::Warning => write!(f, "Warning"),
        }
    }
}

/// An informational event recorded against an object, consumed by
/// other controllers (e.g. the one that scales idled workloads back up).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterEvent {
    pub id: String,
    pub involved_object: ObjectReference,
    pub severity: EventSeverity,
    pub reason: String,
    pub message: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}
