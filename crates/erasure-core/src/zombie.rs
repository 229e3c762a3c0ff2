//! ZombieScheduler (§4.13): periodic re-verification of deleted data. Wired
//! to a [`Scheduler`] rather than a real cron daemon so tests can drive it
//! deterministically; the gateway binary's `main` is the only place that
//! ever constructs a `RealTimeScheduler` and loops this on an interval.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::audit_store::AuditStore;
use crate::errors::ErasureResult;
use crate::external_system::SharedExternalSystem;
use crate::policy::Policy;
use crate::scheduler::SharedScheduler;
use crate::streams::StreamManager;
use crate::workflow::{StepStatus, WorkflowState, WorkflowStateManager, WorkflowStatus};

/// One workflow's zombie re-check result: which systems re-reported
/// personal data after a confirmed deletion.
#[derive(Debug, Clone, Default)]
pub struct ZombieCheckResult {
    pub offending_systems: Vec<String>,
}

impl ZombieCheckResult {
    pub fn is_clean(&self) -> bool {
        self.offending_systems.is_empty()
    }
}

/// A new, narrower workflow spawned in response to a zombie re-detection:
/// same user identifiers, `required_systems` restricted to the systems that
/// re-reported data.
pub struct ZombieChildWorkflow {
    pub parent_workflow_id: String,
    pub child: WorkflowState,
}

pub struct ZombieScheduler {
    state_manager: Arc<WorkflowStateManager>,
    audit: Arc<AuditStore>,
    streams: Arc<StreamManager>,
    scheduler: SharedScheduler,
    systems: HashMap<String, SharedExternalSystem>,
    zombies_detected: std::sync::atomic::AtomicU64,
}

impl ZombieScheduler {
    pub fn new(
        state_manager: Arc<WorkflowStateManager>,
        audit: Arc<AuditStore>,
        streams: Arc<StreamManager>,
        scheduler: SharedScheduler,
        systems: HashMap<String, SharedExternalSystem>,
    ) -> Self {
        Self {
            state_manager,
            audit,
            streams,
            scheduler,
            systems,
            zombies_detected: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn zombies_detected_count(&self) -> u64 {
        self.zombies_detected.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// `true` iff this workflow is due for a zombie check: terminal in a
    /// completed state, and at least `policy.zombieCheckIntervalDays` have
    /// elapsed since `completedAt`.
    pub fn is_due(state: &WorkflowState, policy: &Policy) -> bool {
        let eligible_status = matches!(state.status, WorkflowStatus::Completed | WorkflowStatus::CompletedWithExceptions);
        let Some(completed_at) = state.completed_at else {
            return false;
        };
        eligible_status && (Utc::now() - completed_at).num_days() >= policy.zombie_check_interval_days() as i64
    }

    /// Re-invokes `ExternalSystem::delete` for every terminal (DELETED)
    /// step, recording which systems report a positive finding (i.e. data
    /// reappeared). Systems without a registered connector are skipped.
    pub async fn check(&self, state: &WorkflowState) -> ErasureResult<ZombieCheckResult> {
        let mut offending = Vec::new();
        for (system, record) in &state.steps {
            if record.status != StepStatus::Deleted {
                continue;
            }
            let Some(connector) = self.systems.get(system) else {
                continue;
            };
            let ctx = crate::external_system::DeletionContext {
                workflow_id: state.workflow_id.clone(),
                request_id: state.request_id.clone(),
                attempt: 1,
            };
            let outcome = connector.delete(&ctx, &state.user_identifiers).await?;
            // A zombie re-check that reports anything other than a clean
            // "already deleted" success is treated as a positive finding.
            if !outcome.success {
                offending.push(system.clone());
            }
        }
        Ok(ZombieCheckResult { offending_systems: offending })
    }

    /// Runs a single zombie check for `workflow_id`. On a positive finding,
    /// audits `ZOMBIE_DATA_DETECTED`, bumps the metric, publishes an error
    /// notification, and returns a narrowed child workflow for the
    /// orchestrator to enqueue.
    pub async fn run_once(&self, workflow_id: &str, policy: &Policy) -> ErasureResult<Option<ZombieChildWorkflow>> {
        let state = self.state_manager.load(workflow_id).await?;
        if !Self::is_due(&state, policy) {
            return Ok(None);
        }

        let result = self.check(&state).await?;
        if result.is_clean() {
            return Ok(None);
        }

        self.zombies_detected.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.audit
            .append(
                workflow_id,
                "ZOMBIE_DATA_DETECTED",
                json!({"offendingSystems": result.offending_systems}),
            )
            .await?;
        self.streams.publish_error(&crate::streams::ErrorRecord::from_error(
            workflow_id,
            &crate::errors::ErasureError::new(
                crate::errors::ErrorCategory::ExternalSystem,
                format!("zombie data detected in {:?}", result.offending_systems),
            ),
            crate::streams::Severity::High,
            crate::streams::Remediation {
                actions: vec!["re-run deletion for offending systems".to_string()],
                retryable: true,
                escalation_required: true,
            },
            crate::streams::Impact {
                affected_systems: result.offending_systems.clone(),
                data_at_risk: true,
                compliance_impact: Some("zombie data may breach the original erasure deadline".to_string()),
            },
        ));

        let child_id = uuid::Uuid::new_v4().to_string();
        let child = WorkflowState::new(
            child_id,
            format!("zombie-recheck-of-{}", state.request_id),
            state.policy_version.clone(),
            state.user_identifiers.clone(),
            &result.offending_systems,
            &[],
        );
        Ok(Some(ZombieChildWorkflow { parent_workflow_id: workflow_id.to_string(), child }))
    }

    /// Schedules the next check for `workflow_id` after the policy's
    /// interval, firing `run_once` when it elapses. Production callers
    /// spawn this as a background task per completed workflow.
    pub async fn arm(self: &Arc<Self>, workflow_id: String, policy: Policy) {
        let interval = std::time::Duration::from_secs(policy.zombie_check_interval_days() as u64 * 86_400);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.scheduler.after(interval).await;
            let _ = this.run_once(&workflow_id, &policy).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::UserIdentifiers;
    use crate::kv::InMemoryKvStore;
    use crate::policy::Jurisdiction;
    use crate::scheduler::RealTimeScheduler;
    use crate::stream::InMemoryEventStream;
    use crate::workflow::StepEvidence;

    async fn completed_workflow(completed_at: chrono::DateTime<Utc>) -> (Arc<WorkflowStateManager>, String) {
        let manager = Arc::new(WorkflowStateManager::new(Arc::new(InMemoryKvStore::new())));
        let ids = UserIdentifiers::new("u1", vec![], vec![], vec![]).unwrap();
        let mut state = WorkflowState::new("wf-1", "req-1", "v1", ids, &["payments".to_string()], &[]);
        state.transition_step("payments", StepStatus::Deleted, Some(StepEvidence::default())).unwrap();
        state.status = WorkflowStatus::Completed;
        state.completed_at = Some(completed_at);
        manager.create(state).await.unwrap();
        (manager, "wf-1".to_string())
    }

    fn harness(state_manager: Arc<WorkflowStateManager>, systems: HashMap<String, SharedExternalSystem>) -> ZombieScheduler {
        let kv = Arc::new(InMemoryKvStore::new());
        ZombieScheduler::new(
            state_manager,
            Arc::new(AuditStore::new(kv)),
            Arc::new(StreamManager::new(Arc::new(InMemoryEventStream::new()))),
            Arc::new(RealTimeScheduler),
            systems,
        )
    }

    #[tokio::test]
    async fn not_due_before_the_interval_elapses() {
        let (manager, id) = completed_workflow(Utc::now()).await;
        let policy = Policy::for_jurisdiction(Jurisdiction::Eu).unwrap();
        let scheduler = harness(Arc::clone(&manager), HashMap::new());
        let result = scheduler.run_once(&id, &policy).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn positive_finding_spawns_a_narrowed_child_and_bumps_metric() {
        let (manager, id) = completed_workflow(Utc::now() - chrono::Duration::days(40)).await;
        let policy = Policy::for_jurisdiction(Jurisdiction::Eu).unwrap();
        let mut systems: HashMap<String, SharedExternalSystem> = HashMap::new();
        systems.insert(
            "payments".to_string(),
            Arc::new(erasure_test_support::AlwaysFindsZombieData) as SharedExternalSystem,
        );
        let scheduler = harness(Arc::clone(&manager), systems);
        let result = scheduler.run_once(&id, &policy).await.unwrap().expect("zombie detected");
        assert_eq!(result.child.data_lineage_snapshot.systems, vec!["payments".to_string()]);
        assert_eq!(scheduler.zombies_detected_count(), 1);
    }

    mod erasure_test_support {
        use super::*;
        use async_trait::async_trait;
        use crate::external_system::{DeletionContext, DeletionOutcome, ExternalSystem};

        pub struct AlwaysFindsZombieData;

        #[async_trait]
        impl ExternalSystem for AlwaysFindsZombieData {
            fn name(&self) -> &str {
                "payments"
            }

            async fn delete(&self, _ctx: &DeletionContext, _identifiers: &UserIdentifiers) -> ErasureResult<DeletionOutcome> {
                Ok(DeletionOutcome::failed("data reappeared"))
            }
        }
    }
}
