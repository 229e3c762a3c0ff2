//! StreamManager (§4.14): the three live feeds the API surface exposes as
//! SSE — `workflow-status`, `error-notifications`, `completion-notifications`
//! — built on top of the generic [`crate::stream::EventStream`] port.
//!
//! Error entries get their own lifecycle: each is identified by a UUID and
//! tracked through `open → in_progress → resolved|escalated`; resolution
//! updates publish under the *same* entry id rather than a new one, so
//! subscribers can fold updates onto the record they already have.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ErasureError, ErrorCategory};
use crate::stream::EventStream;

pub const TOPIC_WORKFLOW_STATUS: &str = "workflow-status";
pub const TOPIC_ERROR_NOTIFICATIONS: &str = "error-notifications";
pub const TOPIC_COMPLETION_NOTIFICATIONS: &str = "completion-notifications";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Open,
    InProgress,
    Resolved,
    Escalated,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Remediation {
    pub actions: Vec<String>,
    pub retryable: bool,
    pub escalation_required: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Impact {
    pub affected_systems: Vec<String>,
    pub data_at_risk: bool,
    pub compliance_impact: Option<String>,
}

/// One entry on the `error-notifications` feed. `error_id` is stable across
/// resolution updates to the same underlying problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_id: String,
    pub workflow_id: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    pub remediation: Remediation,
    pub impact: Impact,
    pub status: ResolutionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn from_error(workflow_id: impl Into<String>, error: &ErasureError, severity: Severity, remediation: Remediation, impact: Impact) -> Self {
        let now = Utc::now();
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            category: error.category,
            severity,
            message: error.message.clone(),
            remediation,
            impact,
            status: ResolutionStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn resolve(&mut self, status: ResolutionStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Publishes on the three canonical topics (§6). Thin by design: all the
/// domain logic (what counts as an error, what remediation applies) lives
/// in the orchestrator/handlers that call this; `StreamManager` only knows
/// how to shape and fan out the three feeds.
pub struct StreamManager {
    stream: Arc<dyn EventStream>,
}

impl StreamManager {
    pub fn new(stream: Arc<dyn EventStream>) -> Self {
        Self { stream }
    }

    pub fn publish_workflow_status(&self, workflow_id: &str, status_payload: serde_json::Value) {
        self.stream.publish(TOPIC_WORKFLOW_STATUS, Some(workflow_id), status_payload);
    }

    pub fn publish_error(&self, record: &ErrorRecord) {
        let payload = serde_json::to_value(record).expect("ErrorRecord must serialize");
        self.stream.publish(TOPIC_ERROR_NOTIFICATIONS, Some(record.workflow_id.as_str()), payload);
    }

    pub fn publish_completion(&self, workflow_id: &str, completion_payload: serde_json::Value) {
        self.stream.publish(TOPIC_COMPLETION_NOTIFICATIONS, Some(workflow_id), completion_payload);
    }

    pub fn subscribe_workflow_status(&self) -> crate::stream::Subscription {
        self.stream.subscribe(TOPIC_WORKFLOW_STATUS)
    }

    pub fn subscribe_errors(&self) -> crate::stream::Subscription {
        self.stream.subscribe(TOPIC_ERROR_NOTIFICATIONS)
    }

    pub fn subscribe_completions(&self) -> crate::stream::Subscription {
        self.stream.subscribe(TOPIC_COMPLETION_NOTIFICATIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::InMemoryEventStream;
    use serde_json::json;

    #[tokio::test]
    async fn error_record_round_trips_through_the_error_feed() {
        let stream = Arc::new(InMemoryEventStream::new());
        let manager = StreamManager::new(Arc::clone(&stream) as Arc<dyn EventStream>);
        let mut sub = manager.subscribe_errors();

        let underlying = ErasureError::new(ErrorCategory::ExternalSystem, "payments timed out");
        let mut record = ErrorRecord::from_error(
            "wf-1",
            &underlying,
            Severity::High,
            Remediation {
                actions: vec!["retry".to_string()],
                retryable: true,
                escalation_required: false,
            },
            Impact {
                affected_systems: vec!["payments".to_string()],
                data_at_risk: true,
                compliance_impact: Some("GDPR Art.17 deadline at risk".to_string()),
            },
        );
        manager.publish_error(&record);

        let received = sub.next().await.expect("event");
        let parsed: ErrorRecord = serde_json::from_value(received.payload).unwrap();
        assert_eq!(parsed.error_id, record.error_id);
        assert_eq!(parsed.status, ResolutionStatus::Open);

        record.resolve(ResolutionStatus::Resolved);
        manager.publish_error(&record);
        let received = sub.next().await.expect("event");
        let parsed: ErrorRecord = serde_json::from_value(received.payload).unwrap();
        assert_eq!(parsed.error_id, record.error_id);
        assert_eq!(parsed.status, ResolutionStatus::Resolved);
    }

    #[tokio::test]
    async fn workflow_status_and_completion_use_distinct_topics() {
        let stream = Arc::new(InMemoryEventStream::new());
        let manager = StreamManager::new(Arc::clone(&stream) as Arc<dyn EventStream>);
        let mut status_sub = manager.subscribe_workflow_status();
        let mut completion_sub = manager.subscribe_completions();

        manager.publish_workflow_status("wf-1", json!({"status": "IN_PROGRESS"}));
        manager.publish_completion("wf-1", json!({"status": "COMPLETED"}));

        assert_eq!(status_sub.next().await.unwrap().topic, TOPIC_WORKFLOW_STATUS);
        assert_eq!(completion_sub.next().await.unwrap().topic, TOPIC_COMPLETION_NOTIFICATIONS);
    }
}
