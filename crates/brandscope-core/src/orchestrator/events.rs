//! Progress events streamed to the caller while a run executes.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::score::{QueryResult, RunSummary};

/// Event payloads. Serialized as `{"type": ..., "data": ...}` so consumers
/// can dispatch on the tag.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RunEventKind {
    /// Emitted once before any model call.
    Start {
        total_tests: usize,
        estimated_cost: f64,
    },
    /// A query was admitted and its model fan-out dispatched.
    QueryStart {
        query_id: String,
        text: String,
        model_ids: Vec<String>,
    },
    /// Every model of one query resolved; carries the full per-model result
    /// set plus query-level metrics.
    QueryComplete { result: QueryResult },
    /// Terminal: every admitted query resolved (or the run was cancelled).
    Complete { summary: RunSummary },
    /// Terminal: the request failed validation before any call was made.
    Error { message: String },
}

/// Envelope pairing a payload with its emission time.
#[derive(Debug, Clone, Serialize)]
pub struct RunEvent {
    #[serde(flatten)]
    pub kind: RunEventKind,
    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    pub(crate) fn now(kind: RunEventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_data_and_timestamp() {
        let event = RunEvent::now(RunEventKind::Start {
            total_tests: 6,
            estimated_cost: 0.01,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "start");
        assert_eq!(value["data"]["total_tests"], 6);
        assert!(value["timestamp"].is_string());
    }
}
