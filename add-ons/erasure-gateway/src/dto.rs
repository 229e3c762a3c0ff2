//! Wire types for the HTTP surface (§6). Kept separate from the engine's
//! own `WorkflowState`/`UserIdentifiers` so the API's camelCase JSON shape
//! doesn't leak its field layout into the saga's internal model.

use chrono::{DateTime, Utc};
use erasure_core::identifiers::UserIdentifiers;
use erasure_core::policy::Jurisdiction;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentifiersDto {
    pub user_id: String,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub phones: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl UserIdentifiersDto {
    pub fn into_domain(self) -> Result<UserIdentifiers, erasure_core::errors::ErasureError> {
        UserIdentifiers::new(self.user_id, self.emails, self.phones, self.aliases)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegalProofType {
    SignedRequest,
    LegalForm,
    OtpVerified,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegalProofDto {
    #[serde(rename = "type")]
    pub proof_type: LegalProofType,
    pub evidence: String,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedByDto {
    pub user_id: String,
    pub role: String,
    pub organization: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateErasureRequestDto {
    pub user_identifiers: UserIdentifiersDto,
    pub legal_proof: LegalProofDto,
    pub jurisdiction: Jurisdiction,
    pub requested_by: RequestedByDto,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateErasureResponse {
    pub request_id: String,
    pub workflow_id: String,
    pub created_at: DateTime<Utc>,
    pub jurisdiction: Jurisdiction,
    pub user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub percentage: u8,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSummary {
    pub status: erasure_core::workflow::StepStatus,
    pub attempts: u32,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundJobSummary {
    #[serde(rename = "type")]
    pub job_type: erasure_core::workflow::BackgroundJobType,
    pub status: erasure_core::workflow::BackgroundJobStatus,
    pub progress: u8,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub workflow_id: String,
    pub request_id: String,
    pub status: erasure_core::workflow::WorkflowStatus,
    pub progress: Progress,
    pub steps: std::collections::BTreeMap<String, StepSummary>,
    pub background_jobs: std::collections::BTreeMap<String, BackgroundJobSummary>,
    pub legal_holds: Vec<erasure_core::workflow::LegalHold>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub estimated_completion: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideAction {
    LegalHold,
    ResumeDeletion,
    ForceComplete,
    CancelWorkflow,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedByDto {
    pub user_id: String,
    pub role: String,
    pub organization: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideRequestDto {
    pub action: OverrideAction,
    pub reason: String,
    pub legal_basis: String,
    #[serde(default)]
    pub systems: Option<Vec<String>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub evidence: Option<String>,
    pub approved_by: ApprovedByDto,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideResponse {
    pub workflow_id: String,
    pub action: &'static str,
    pub applied: bool,
    pub status: erasure_core::workflow::WorkflowStatus,
}

#[derive(Debug, Deserialize)]
pub struct ListWorkflowsQuery {
    pub status: Option<erasure_core::workflow::WorkflowStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub workflow_id: String,
    pub request_id: String,
    pub status: erasure_core::workflow::WorkflowStatus,
    pub current_phase: erasure_core::workflow::Phase,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListWorkflowsResponse {
    pub workflows: Vec<WorkflowSummary>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(rename = "workflowId")]
    pub workflow_id: Option<String>,
}
