//! `ExternalSystem` contract (§4.4): the one seam every real connector
//! (Stripe, the primary database, CRM, SendGrid, Intercom, analytics, S3,
//! the warehouse) implements. The Engine knows only this contract; concrete
//! wire code for any vendor API is out of scope (§1) and lives, if at all,
//! in `erasure-connectors`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ErasureResult;
use crate::identifiers::UserIdentifiers;

/// Request-scoped context handed to every connector call: enough to log and
/// correlate without leaking the whole saga state across the adapter seam.
#[derive(Debug, Clone)]
pub struct DeletionContext {
    pub workflow_id: String,
    pub request_id: String,
    pub attempt: u32,
}

/// Outcome of one deletion attempt against an external system. `success`
/// drives the saga; `receipt`/`raw_response` are stored as step evidence;
/// `error` is surfaced to the audit log and, on exhaustion, to the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionOutcome {
    pub success: bool,
    pub receipt: Option<String>,
    pub raw_response: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl DeletionOutcome {
    pub fn succeeded(receipt: impl Into<String>) -> Self {
        Self {
            success: true,
            receipt: Some(receipt.into()),
            raw_response: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            receipt: None,
            raw_response: None,
            error: Some(error.into()),
        }
    }

    pub fn with_raw_response(mut self, raw: serde_json::Value) -> Self {
        self.raw_response = Some(raw);
        self
    }
}

/// One connector per external system. `delete` must be idempotent: calling
/// it twice for the same `identifiers` against a system that already
/// deleted the data succeeds again rather than erroring (§4.4), must be
/// side-effect-free on its input, and must complete within
/// `policy.externalSystemTimeout` or the dispatcher treats it as a timeout
/// failure.
#[async_trait]
pub trait ExternalSystem: Send + Sync {
    /// Stable name used as the step key (`"payments"`, `"database"`, …).
    fn name(&self) -> &str;

    async fn delete(&self, ctx: &DeletionContext, identifiers: &UserIdentifiers) -> ErasureResult<DeletionOutcome>;
}

pub type SharedExternalSystem = std::sync::Arc<dyn ExternalSystem>;
