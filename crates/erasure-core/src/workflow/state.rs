//! The `WorkflowState` aggregate and everything it owns (§3).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ErasureError;
use crate::identifiers::UserIdentifiers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    InProgress,
    Completed,
    CompletedWithExceptions,
    Failed,
    AwaitingManualReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Init,
    IdentityCritical,
    Checkpoint,
    Parallel,
    PiiScan,
    Background,
    Completion,
    Certificate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    NotStarted,
    InProgress,
    Deleted,
    Failed,
    LegalHold,
}

impl StepStatus {
    /// A step that has reached a terminal outcome for this run (§4.9: "every
    /// parallel step is terminal").
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Deleted | StepStatus::Failed | StepStatus::LegalHold)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepEvidence {
    pub receipt: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub raw_response: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub status: StepStatus,
    pub attempts: u32,
    pub evidence: StepEvidence,
    /// Highest attempt number the dispatcher has accepted for this step;
    /// used to reject stale/duplicate deliveries (§4.8).
    #[serde(default)]
    pub last_accepted_attempt: u32,
}

impl Default for StepRecord {
    fn default() -> Self {
        Self {
            status: StepStatus::NotStarted,
            attempts: 0,
            evidence: StepEvidence::default(),
            last_accepted_attempt: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackgroundJobType {
    S3Scan,
    WarehouseScan,
    BackupCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackgroundJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl BackgroundJobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BackgroundJobStatus::Completed | BackgroundJobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCheckpoint {
    pub checkpoint_id: String,
    pub processed_items: u64,
    pub last_key: Option<String>,
    pub meta: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PiiType {
    Email,
    Name,
    Phone,
    Address,
    Custom,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindingProvenance {
    pub timestamp: Option<DateTime<Utc>>,
    pub message_id: Option<String>,
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiFinding {
    pub match_id: String,
    pub system: String,
    pub location: String,
    pub pii_type: PiiType,
    pub confidence: f64,
    pub snippet: String,
    pub provenance: FindingProvenance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundJob {
    pub job_id: String,
    pub job_type: BackgroundJobType,
    pub workflow_id: String,
    pub status: BackgroundJobStatus,
    pub progress: u8,
    pub checkpoints: Vec<JobCheckpoint>,
    pub findings: Vec<PiiFinding>,
    pub attempts: u32,
    pub scan_target: String,
    pub batch_size: u32,
    pub checkpoint_interval: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegalHold {
    pub system: String,
    pub reason: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataLineageSnapshot {
    pub systems: Vec<String>,
    pub identifiers: UserIdentifiers,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub request_id: String,
    pub policy_version: String,
    pub user_identifiers: UserIdentifiers,
    pub status: WorkflowStatus,
    pub current_phase: Phase,
    pub steps: BTreeMap<String, StepRecord>,
    pub background_jobs: BTreeMap<String, BackgroundJob>,
    pub legal_holds: Vec<LegalHold>,
    pub audit_hashes: Vec<String>,
    pub pii_findings: Vec<PiiFinding>,
    pub data_lineage_snapshot: DataLineageSnapshot,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub certificate_id: Option<String>,
    /// Optimistic-concurrency version, bumped on every successful CAS write.
    #[serde(default)]
    pub version: u64,
}

impl WorkflowState {
    pub fn new(
        workflow_id: impl Into<String>,
        request_id: impl Into<String>,
        policy_version: impl Into<String>,
        user_identifiers: UserIdentifiers,
        required_systems: &[String],
        parallel_systems: &[String],
    ) -> Self {
        let now = Utc::now();
        let mut steps = BTreeMap::new();
        for s in required_systems.iter().chain(parallel_systems.iter()) {
            steps.entry(s.clone()).or_insert_with(StepRecord::default);
        }
        let mut systems: Vec<String> = required_systems.to_vec();
        systems.extend(parallel_systems.iter().cloned());
        Self {
            workflow_id: workflow_id.into(),
            request_id: request_id.into(),
            policy_version: policy_version.into(),
            status: WorkflowStatus::InProgress,
            current_phase: Phase::Init,
            steps,
            background_jobs: BTreeMap::new(),
            legal_holds: Vec::new(),
            audit_hashes: Vec::new(),
            pii_findings: Vec::new(),
            data_lineage_snapshot: DataLineageSnapshot {
                systems,
                identifiers: user_identifiers.clone(),
                captured_at: now,
            },
            user_identifiers,
            created_at: now,
            last_updated: now,
            completed_at: None,
            certificate_id: None,
            version: 0,
        }
    }

    /// `identityCriticalCompleted == true` iff every required system is `DELETED` (§3 invariant).
    pub fn identity_critical_completed(&self, required_systems: &[String]) -> bool {
        required_systems
            .iter()
            .all(|s| self.steps.get(s).map(|r| r.status == StepStatus::Deleted).unwrap_or(false))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            WorkflowStatus::Completed
                | WorkflowStatus::CompletedWithExceptions
                | WorkflowStatus::Failed
                | WorkflowStatus::AwaitingManualReview
        )
    }
}

impl BackgroundJob {
    pub fn new(job_id: impl Into<String>, job_type: BackgroundJobType, workflow_id: impl Into<String>, scan_target: impl Into<String>, batch_size: u32, checkpoint_interval: u32) -> Self {
        Self {
            job_id: job_id.into(),
            job_type,
            workflow_id: workflow_id.into(),
            status: BackgroundJobStatus::Pending,
            progress: 0,
            checkpoints: Vec::new(),
            findings: Vec::new(),
            attempts: 0,
            scan_target: scan_target.into(),
            batch_size,
            checkpoint_interval,
        }
    }

    /// Clamps `progress` to `max(prev, new)` (§4.10 monotonicity) and merges
    /// `findings` uniquely by `match_id`.
    pub fn merge_progress(&mut self, progress: u8, findings: Vec<PiiFinding>) {
        self.progress = self.progress.max(progress);
        for finding in findings {
            if !self.findings.iter().any(|f| f.match_id == finding.match_id) {
                self.findings.push(finding);
            }
        }
    }

    /// Appends a checkpoint, rejecting one whose `processed_items` does not
    /// strictly increase over the last (§3 invariant: checkpoints strictly increasing).
    pub fn push_checkpoint(&mut self, checkpoint: JobCheckpoint) -> Result<(), ErasureError> {
        if let Some(last) = self.checkpoints.last() {
            if checkpoint.processed_items <= last.processed_items {
                return Err(ErasureError::new(
                    crate::errors::ErrorCategory::BackgroundJob,
                    format!(
                        "checkpoint processedItems must strictly increase (last={}, new={})",
                        last.processed_items, checkpoint.processed_items
                    ),
                ));
            }
        }
        self.checkpoints.push(checkpoint);
        Ok(())
    }

    pub fn mark_completed(&mut self) {
        self.status = BackgroundJobStatus::Completed;
        self.progress = 100;
    }

    pub fn mark_failed(&mut self) {
        self.status = BackgroundJobStatus::Failed;
    }
}

impl WorkflowState {
    /// Guarded step transition: refuses to flip a `DELETED` step back to a
    /// non-terminal status (§4.7 invariant).
    pub fn transition_step(
        &mut self,
        step: &str,
        new_status: StepStatus,
        evidence: Option<StepEvidence>,
    ) -> Result<(), ErasureError> {
        let record = self.steps.entry(step.to_string()).or_default();
        if record.status == StepStatus::Deleted && new_status != StepStatus::Deleted {
            return Err(ErasureError::workflow_state(format!(
                "cannot regress step '{step}' from DELETED to {new_status:?}"
            )));
        }
        record.status = new_status;
        if let Some(ev) = evidence {
            record.evidence = ev;
        }
        self.last_updated = Utc::now();
        Ok(())
    }

    pub fn record_attempt(&mut self, step: &str) -> u32 {
        let record = self.steps.entry(step.to_string()).or_default();
        record.attempts += 1;
        self.last_updated = Utc::now();
        record.attempts
    }

    /// Rejects delivery of an event whose `attempt` is not greater than the
    /// last accepted attempt for this step (§4.8: at-least-once + idempotency).
    pub fn accept_attempt(&mut self, step: &str, attempt: u32) -> Result<(), ErasureError> {
        let record = self.steps.entry(step.to_string()).or_default();
        if attempt <= record.last_accepted_attempt {
            return Err(ErasureError::workflow_state(format!(
                "stale delivery for step '{step}': attempt {attempt} <= last accepted {}",
                record.last_accepted_attempt
            )));
        }
        record.last_accepted_attempt = attempt;
        Ok(())
    }

    /// Upserts a background job, refusing to regress its `progress` field
    /// (monotonicity is enforced inside `BackgroundJob::merge_progress`; this
    /// guards direct replacement of the stored record).
    pub fn upsert_background_job(&mut self, job: BackgroundJob) -> Result<(), ErasureError> {
        if let Some(existing) = self.background_jobs.get(&job.job_id) {
            if job.progress < existing.progress {
                return Err(ErasureError::new(
                    crate::errors::ErrorCategory::BackgroundJob,
                    format!(
                        "job '{}' progress cannot regress ({} -> {})",
                        job.job_id, existing.progress, job.progress
                    ),
                ));
            }
        }
        self.background_jobs.insert(job.job_id.clone(), job);
        self.last_updated = Utc::now();
        Ok(())
    }
}

pub fn workflow_key(workflow_id: &str) -> String {
    format!("workflow:{workflow_id}")
}
