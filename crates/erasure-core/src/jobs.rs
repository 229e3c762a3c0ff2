//! BackgroundJobManager (§4.10): lifecycle for the long-running scans (S3
//! object storage, the data warehouse, backup checks) that survive past the
//! synchronous saga steps. Jobs are stored inside `WorkflowState` so they
//! ride the same CAS/versioning machinery and resume across process
//! restarts (S5).

use std::sync::Arc;

use chrono::Utc;

use crate::errors::{ErasureError, ErasureResult};
use crate::workflow::{BackgroundJob, BackgroundJobStatus, BackgroundJobType, JobCheckpoint, PiiFinding, WorkflowStateManager};

pub struct BackgroundJobManager {
    state_manager: Arc<WorkflowStateManager>,
}

impl BackgroundJobManager {
    pub fn new(state_manager: Arc<WorkflowStateManager>) -> Self {
        Self { state_manager }
    }

    /// Creates a `PENDING` job and attaches it to the workflow.
    pub async fn create_job(
        &self,
        workflow_id: &str,
        job_id: &str,
        job_type: BackgroundJobType,
        scan_target: &str,
        batch_size: u32,
        checkpoint_interval: u32,
    ) -> ErasureResult<BackgroundJob> {
        let job = BackgroundJob::new(job_id, job_type, workflow_id, scan_target, batch_size, checkpoint_interval);
        let job_for_insert = job.clone();
        self.state_manager
            .mutate(workflow_id, move |state| state.upsert_background_job(job_for_insert.clone()))
            .await?;
        Ok(job)
    }

    /// Rejects if the job is already `RUNNING` or `COMPLETED` (§4.10).
    pub async fn start_job(&self, workflow_id: &str, job_id: &str) -> ErasureResult<()> {
        self.state_manager
            .mutate(workflow_id, |state| {
                let job = state
                    .background_jobs
                    .get_mut(job_id)
                    .ok_or_else(|| ErasureError::new(crate::errors::ErrorCategory::BackgroundJob, format!("job '{job_id}' not found")))?;
                if matches!(job.status, BackgroundJobStatus::Running | BackgroundJobStatus::Completed) {
                    return Err(ErasureError::new(
                        crate::errors::ErrorCategory::BackgroundJob,
                        format!("job '{job_id}' cannot be started from status {:?}", job.status),
                    ));
                }
                job.status = BackgroundJobStatus::Running;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Merges monotonic `progress` and `findings` into the job record
    /// (§3 invariant: progress never regresses).
    pub async fn update_progress(&self, workflow_id: &str, job_id: &str, progress: u8, findings: Vec<PiiFinding>) -> ErasureResult<()> {
        self.state_manager
            .mutate(workflow_id, |state| {
                let job = state
                    .background_jobs
                    .get_mut(job_id)
                    .ok_or_else(|| ErasureError::new(crate::errors::ErrorCategory::BackgroundJob, format!("job '{job_id}' not found")))?;
                job.merge_progress(progress, findings.clone());
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Appends a checkpoint, rejecting a non-strictly-increasing one.
    pub async fn create_checkpoint(&self, workflow_id: &str, job_id: &str, processed_items: u64, last_key: Option<String>, meta: Option<serde_json::Value>) -> ErasureResult<()> {
        self.state_manager
            .mutate(workflow_id, |state| {
                let job = state
                    .background_jobs
                    .get_mut(job_id)
                    .ok_or_else(|| ErasureError::new(crate::errors::ErrorCategory::BackgroundJob, format!("job '{job_id}' not found")))?;
                let checkpoint_id = format!("checkpoint_{}_{}", Utc::now().timestamp_millis(), processed_items);
                job.push_checkpoint(JobCheckpoint {
                    checkpoint_id,
                    processed_items,
                    last_key: last_key.clone(),
                    meta: meta.clone(),
                    created_at: Utc::now(),
                })
            })
            .await?;
        Ok(())
    }

    pub async fn mark_completed(&self, workflow_id: &str, job_id: &str) -> ErasureResult<()> {
        self.state_manager
            .mutate(workflow_id, |state| {
                let job = state
                    .background_jobs
                    .get_mut(job_id)
                    .ok_or_else(|| ErasureError::new(crate::errors::ErrorCategory::BackgroundJob, format!("job '{job_id}' not found")))?;
                job.mark_completed();
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, workflow_id: &str, job_id: &str) -> ErasureResult<()> {
        self.state_manager
            .mutate(workflow_id, |state| {
                let job = state
                    .background_jobs
                    .get_mut(job_id)
                    .ok_or_else(|| ErasureError::new(crate::errors::ErrorCategory::BackgroundJob, format!("job '{job_id}' not found")))?;
                job.mark_failed();
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Resumes a job after a restart: returns its last checkpoint (if any)
    /// so the caller can continue from `last_key`/`processed_items` instead
    /// of rescanning from the start.
    pub async fn resume(&self, workflow_id: &str, job_id: &str) -> ErasureResult<Option<JobCheckpoint>> {
        let state = self.state_manager.load(workflow_id).await?;
        let job = state
            .background_jobs
            .get(job_id)
            .ok_or_else(|| ErasureError::new(crate::errors::ErrorCategory::BackgroundJob, format!("job '{job_id}' not found")))?;
        Ok(job.checkpoints.last().cloned())
    }

    /// `true` iff every background job attached to the workflow has reached
    /// a terminal status (§4.10 gate for entering `COMPLETION`).
    pub async fn are_all_jobs_complete(&self, workflow_id: &str) -> ErasureResult<bool> {
        let state = self.state_manager.load(workflow_id).await?;
        Ok(state.background_jobs.values().all(|j| j.status.is_terminal()))
    }

    /// All findings across every background job attached to the workflow,
    /// for handing to the classifier once scanning finishes.
    pub async fn get_all_findings(&self, workflow_id: &str) -> ErasureResult<Vec<PiiFinding>> {
        let state = self.state_manager.load(workflow_id).await?;
        Ok(state.background_jobs.values().flat_map(|j| j.findings.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::UserIdentifiers;
    use crate::kv::InMemoryKvStore;
    use crate::workflow::WorkflowState;

    async fn setup() -> (Arc<WorkflowStateManager>, BackgroundJobManager) {
        let manager = Arc::new(WorkflowStateManager::new(Arc::new(InMemoryKvStore::new())));
        let ids = UserIdentifiers::new("u1", vec![], vec![], vec![]).unwrap();
        let state = WorkflowState::new("wf-1", "req-1", "v1", ids, &["payments".to_string()], &[]);
        manager.create(state).await.unwrap();
        let jobs = BackgroundJobManager::new(Arc::clone(&manager));
        (manager, jobs)
    }

    #[tokio::test]
    async fn job_lifecycle_progress_and_completion() {
        let (_manager, jobs) = setup().await;
        jobs.create_job("wf-1", "job-1", BackgroundJobType::S3Scan, "bucket/prefix", 100, 10).await.unwrap();
        jobs.start_job("wf-1", "job-1").await.unwrap();
        jobs.update_progress("wf-1", "job-1", 40, vec![]).await.unwrap();
        jobs.create_checkpoint("wf-1", "job-1", 400, Some("key-400".to_string()), None).await.unwrap();
        assert!(!jobs.are_all_jobs_complete("wf-1").await.unwrap());
        jobs.mark_completed("wf-1", "job-1").await.unwrap();
        assert!(jobs.are_all_jobs_complete("wf-1").await.unwrap());
    }

    #[tokio::test]
    async fn checkpoint_must_strictly_increase() {
        let (_manager, jobs) = setup().await;
        jobs.create_job("wf-1", "job-1", BackgroundJobType::S3Scan, "bucket/prefix", 100, 10).await.unwrap();
        jobs.create_checkpoint("wf-1", "job-1", 100, None, None).await.unwrap();
        let err = jobs.create_checkpoint("wf-1", "job-1", 100, None, None).await.unwrap_err();
        assert_eq!(err.code(), "BACKGROUND_JOB");
    }

    #[tokio::test]
    async fn resume_returns_last_checkpoint() {
        let (_manager, jobs) = setup().await;
        jobs.create_job("wf-1", "job-1", BackgroundJobType::S3Scan, "bucket/prefix", 100, 10).await.unwrap();
        jobs.create_checkpoint("wf-1", "job-1", 100, Some("k1".to_string()), None).await.unwrap();
        jobs.create_checkpoint("wf-1", "job-1", 250, Some("k2".to_string()), None).await.unwrap();
        let resumed = jobs.resume("wf-1", "job-1").await.unwrap().unwrap();
        assert_eq!(resumed.processed_items, 250);
        assert_eq!(resumed.last_key.as_deref(), Some("k2"));
    }
}
