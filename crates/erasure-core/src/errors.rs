//! Structured error taxonomy (§7). Every variant tags one of the categories
//! the spec enumerates and carries enough metadata for the API boundary to
//! render a 4xx/5xx body without inspecting error text.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

/// Taxonomy tag. Equality on the tag replaces the duck-typed substring
/// matching the source system used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Validation,
    Auth,
    WorkflowLock,
    WorkflowState,
    ExternalSystem,
    BackgroundJob,
    PiiAgent,
    AuditIntegrity,
    Certificate,
    PolicyConfig,
    LegalHold,
}

impl ErrorCategory {
    /// Conventional HTTP status for this category, absent a more specific override.
    pub fn default_status(self) -> u16 {
        match self {
            ErrorCategory::Validation => 400,
            ErrorCategory::Auth => 403,
            ErrorCategory::WorkflowLock => 409,
            ErrorCategory::WorkflowState => 409,
            ErrorCategory::ExternalSystem => 502,
            ErrorCategory::BackgroundJob => 500,
            ErrorCategory::PiiAgent => 502,
            ErrorCategory::AuditIntegrity => 500,
            ErrorCategory::Certificate => 500,
            ErrorCategory::PolicyConfig => 400,
            ErrorCategory::LegalHold => 409,
        }
    }
}

/// Structured error carried across the whole engine. `source` is kept
/// separate from `message` so the taxonomy tag (`category`) stays the
/// stable thing callers match on, not string content.
#[derive(Debug, Error)]
#[error("{category:?}: {message}")]
pub struct ErasureError {
    pub category: ErrorCategory,
    pub message: String,
    pub status: u16,
    pub timestamp: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

impl ErasureError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            status: category.default_status(),
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn code(&self) -> &'static str {
        match self.category {
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::Auth => "AUTH",
            ErrorCategory::WorkflowLock => "WORKFLOW_LOCK",
            ErrorCategory::WorkflowState => "WORKFLOW_STATE",
            ErrorCategory::ExternalSystem => "EXTERNAL_SYSTEM",
            ErrorCategory::BackgroundJob => "BACKGROUND_JOB",
            ErrorCategory::PiiAgent => "PII_AGENT",
            ErrorCategory::AuditIntegrity => "AUDIT_INTEGRITY",
            ErrorCategory::Certificate => "CERTIFICATE",
            ErrorCategory::PolicyConfig => "POLICY_CONFIG",
            ErrorCategory::LegalHold => "LEGAL_HOLD",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, message)
    }

    pub fn workflow_lock(message: impl Into<String>, existing_workflow_id: impl Into<String>) -> Self {
        Self::new(ErrorCategory::WorkflowLock, message).with_meta("existingWorkflowId", existing_workflow_id.into())
    }

    pub fn workflow_state(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::WorkflowState, message)
    }

    pub fn audit_integrity(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::AuditIntegrity, message)
    }

    pub fn policy_config(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::PolicyConfig, message)
    }
}

pub type ErasureResult<T> = Result<T, ErasureError>;
