//! SagaOrchestrator (§4.9, §4.15): the phase machine driving one erasure
//! workflow from `INIT` through `CERTIFICATE`. Each phase transition is
//! implemented as an async method that reads the current state, does its
//! I/O (connector calls, audit appends, stream publishes), and leaves the
//! workflow in a well-defined next phase — the "coroutine chains → state
//! machine" mapping from the Design Notes, just without a separate pure
//! `(state, event) -> (state, effects)` data type, since every transition
//! here already *is* that function plus its effects inlined.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use crate::audit_store::AuditStore;
use crate::bus::topics;
use crate::certificate::{Certificate, CertificateGenerator};
use crate::classifier;
use crate::content_analyzer::{ScanChunk, SharedContentAnalyzer};
use crate::errors::{ErasureError, ErasureResult, ErrorCategory};
use crate::external_system::{DeletionContext, SharedExternalSystem};
use crate::jobs::BackgroundJobManager;
use crate::kv::KvStore;
use crate::policy::Policy;
use crate::retry;
use crate::scheduler::SharedScheduler;
use crate::streams::{ErrorRecord, Impact, Remediation, Severity, StreamManager};
use crate::workflow::{Phase, PiiFinding, StepEvidence, StepStatus, WorkflowState, WorkflowStateManager, WorkflowStatus};

fn certificate_key(certificate_id: &str) -> String {
    format!("certificate:{certificate_id}")
}

/// Outcome of running one step (required or parallel) to its terminal
/// state, including however many retries it took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Deleted,
    /// Exhausted retries; the saga halts (required step).
    FailedHalting,
    /// Exhausted retries; the saga continues (non-required step).
    FailedContinuing,
}

/// Pure evaluation of the checkpoint gate (§4.9, §8 property 3): passes iff
/// every required system has reached `DELETED`. Exposed standalone (no I/O)
/// so tests can construct an arbitrary `WorkflowState` and assert S4
/// directly, independent of how that state was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointResult {
    pub success: bool,
    pub checkpoint_status: &'static str,
}

pub fn evaluate_checkpoint(state: &WorkflowState, policy: &Policy) -> CheckpointResult {
    if state.identity_critical_completed(&policy.required_systems) {
        CheckpointResult { success: true, checkpoint_status: "PASSED" }
    } else {
        CheckpointResult { success: false, checkpoint_status: "FAILED" }
    }
}

pub struct SagaOrchestrator {
    state_manager: Arc<WorkflowStateManager>,
    audit: Arc<AuditStore>,
    streams: Arc<StreamManager>,
    jobs: Arc<BackgroundJobManager>,
    certs: Arc<CertificateGenerator>,
    cert_kv: Arc<dyn KvStore>,
    systems: HashMap<String, SharedExternalSystem>,
    analyzer: Option<SharedContentAnalyzer>,
    scheduler: SharedScheduler,
}

impl SagaOrchestrator {
    pub fn new(
        state_manager: Arc<WorkflowStateManager>,
        audit: Arc<AuditStore>,
        streams: Arc<StreamManager>,
        jobs: Arc<BackgroundJobManager>,
        certs: Arc<CertificateGenerator>,
        cert_kv: Arc<dyn KvStore>,
        systems: HashMap<String, SharedExternalSystem>,
        analyzer: Option<SharedContentAnalyzer>,
        scheduler: SharedScheduler,
    ) -> Self {
        Self {
            state_manager,
            audit,
            streams,
            jobs,
            certs,
            cert_kv,
            systems,
            analyzer,
            scheduler,
        }
    }

    fn publish_status(&self, state: &WorkflowState) {
        self.streams.publish_workflow_status(
            &state.workflow_id,
            json!({
                "workflowId": state.workflow_id,
                "status": state.status,
                "currentPhase": state.current_phase,
            }),
        );
    }

    /// INIT → IDENTITY_CRITICAL (§4.9): persists the new workflow, audits
    /// `workflow-created`, and starts the required-system sequence.
    pub async fn start_workflow(&self, state: WorkflowState, policy: &Policy) -> ErasureResult<()> {
        let workflow_id = state.workflow_id.clone();
        self.state_manager.create(state).await?;
        self.audit
            .append(&workflow_id, topics::WORKFLOW_CREATED, json!({"workflowId": workflow_id}))
            .await?;
        let state = self
            .state_manager
            .mutate(&workflow_id, |s| {
                s.current_phase = Phase::IdentityCritical;
                Ok(())
            })
            .await?;
        self.publish_status(&state);
        self.run_required_sequence(&workflow_id, policy).await
    }

    /// Runs every `policy.requiredSystems` step strictly in order (§4.9,
    /// §4.15 Property 4). A later step is only ever invoked once its
    /// predecessor's handler has recorded `DELETED`; each step handler also
    /// re-reads state and refuses to proceed otherwise (the "no-bypass"
    /// hard dependency check, §8 property 2), so calling this function out
    /// of its own sequence (e.g. directly invoking step N) is still safe.
    pub async fn run_required_sequence(&self, workflow_id: &str, policy: &Policy) -> ErasureResult<()> {
        for (index, step) in policy.required_systems.iter().enumerate() {
            match self.execute_required_step(workflow_id, step, index, policy).await? {
                StepOutcome::Deleted => continue,
                StepOutcome::FailedHalting => return Ok(()),
                StepOutcome::FailedContinuing => unreachable!("required steps never continue past exhaustion"),
            }
        }
        self.run_checkpoint(workflow_id, policy).await?;
        Ok(())
    }

    /// Executes one required step, enforcing the hard predecessor
    /// dependency (§4.15) before doing any work.
    async fn execute_required_step(&self, workflow_id: &str, step: &str, index: usize, policy: &Policy) -> ErasureResult<StepOutcome> {
        if index > 0 {
            let predecessor = &policy.required_systems[index - 1];
            let state = self.state_manager.load(workflow_id).await?;
            let predecessor_done = state.steps.get(predecessor).map(|r| r.status == StepStatus::Deleted).unwrap_or(false);
            if !predecessor_done {
                return Err(ErasureError::new(
                    ErrorCategory::WorkflowState,
                    format!("Sequential-order-violation: cannot proceed: {predecessor} not completed"),
                ));
            }
        }
        self.run_step_with_retry(workflow_id, step, policy, true).await
    }

    /// CHECKPOINT → PARALLEL (§4.9): verifies every required system is
    /// `DELETED`. On failure the workflow halts to `AWAITING_MANUAL_REVIEW`
    /// and the saga does not proceed to the parallel phase.
    pub async fn run_checkpoint(&self, workflow_id: &str, policy: &Policy) -> ErasureResult<CheckpointResult> {
        self.state_manager
            .mutate(workflow_id, |s| {
                s.current_phase = Phase::Checkpoint;
                Ok(())
            })
            .await?;
        let state = self.state_manager.load(workflow_id).await?;
        let result = evaluate_checkpoint(&state, policy);
        if result.success {
            let state = self
                .state_manager
                .mutate(workflow_id, |s| {
                    s.current_phase = Phase::Parallel;
                    Ok(())
                })
                .await?;
            self.audit.append(workflow_id, topics::CHECKPOINT_VALIDATION, json!({"status": "PASSED"})).await?;
            self.publish_status(&state);
            self.run_parallel_phase(workflow_id, policy).await?;
        } else {
            let state = self
                .state_manager
                .mutate(workflow_id, |s| {
                    s.status = WorkflowStatus::AwaitingManualReview;
                    Ok(())
                })
                .await?;
            self.audit
                .append(
                    workflow_id,
                    topics::CHECKPOINT_FAILED,
                    json!({"status": "FAILED", "requiresManualIntervention": true}),
                )
                .await?;
            self.streams.publish_error(&ErrorRecord::from_error(
                workflow_id,
                &ErasureError::new(ErrorCategory::WorkflowState, "checkpoint failed: not all required systems are DELETED"),
                Severity::Critical,
                Remediation {
                    actions: vec!["manually verify required-system deletions".to_string()],
                    retryable: false,
                    escalation_required: true,
                },
                Impact {
                    affected_systems: policy.required_systems.clone(),
                    data_at_risk: true,
                    compliance_impact: Some("erasure cannot be certified until resolved".to_string()),
                },
            ));
            self.publish_status(&state);
        }
        Ok(result)
    }

    /// CHECKPOINT → PARALLEL fan-out (§4.9): every `policy.parallelSystems`
    /// step runs independently; partial failures are tolerated. Proceeds to
    /// the PII scan once every parallel step is terminal.
    pub async fn run_parallel_phase(&self, workflow_id: &str, policy: &Policy) -> ErasureResult<()> {
        let futures = policy.parallel_systems.iter().map(|step| self.run_step_with_retry(workflow_id, step, policy, false));
        let outcomes = futures_util::future::join_all(futures).await;
        for outcome in outcomes {
            outcome?;
        }
        let state = self
            .state_manager
            .mutate(workflow_id, |s| {
                s.current_phase = Phase::PiiScan;
                Ok(())
            })
            .await?;
        self.audit.append(workflow_id, topics::PARALLEL_STEP_COMPLETED, json!({"parallelSystems": policy.parallel_systems})).await?;
        self.publish_status(&state);
        Ok(())
    }

    /// Runs `step` to a terminal state with exponential backoff (§4.6). For
    /// a required step, exhaustion halts the saga (`AWAITING_MANUAL_REVIEW`);
    /// for a non-required (parallel) step it marks `FAILED` and lets the
    /// saga continue toward `COMPLETED_WITH_EXCEPTIONS` (§7).
    async fn run_step_with_retry(&self, workflow_id: &str, step: &str, policy: &Policy, required: bool) -> ErasureResult<StepOutcome> {
        let connector = self.systems.get(step).cloned();
        self.state_manager
            .mutate(workflow_id, |s| s.transition_step(step, StepStatus::InProgress, None))
            .await?;

        let mut attempts_so_far = 0u32;
        loop {
            let attempt = attempts_so_far + 1;
            let state = self.state_manager.load(workflow_id).await?;
            let outcome = match &connector {
                Some(connector) => {
                    let ctx = DeletionContext {
                        workflow_id: workflow_id.to_string(),
                        request_id: state.request_id.clone(),
                        attempt,
                    };
                    connector.delete(&ctx, &state.user_identifiers).await
                }
                None => Err(ErasureError::new(ErrorCategory::ExternalSystem, format!("no connector registered for system '{step}'"))),
            };

            self.state_manager
                .mutate(workflow_id, |s| {
                    s.record_attempt(step);
                    Ok(())
                })
                .await?;
            attempts_so_far += 1;

            match outcome {
                Ok(deletion) if deletion.success => {
                    let state = self
                        .state_manager
                        .mutate(workflow_id, |s| {
                            s.transition_step(
                                step,
                                StepStatus::Deleted,
                                Some(StepEvidence {
                                    receipt: deletion.receipt.clone(),
                                    timestamp: Some(chrono::Utc::now()),
                                    raw_response: deletion.raw_response.clone(),
                                }),
                            )
                        })
                        .await?;
                    self.audit
                        .append(workflow_id, topics::STEP_COMPLETED, json!({"step": step, "attempts": attempts_so_far}))
                        .await?;
                    self.publish_status(&state);
                    return Ok(StepOutcome::Deleted);
                }
                Ok(_) | Err(_) => {
                    let decision = retry::decide(policy, attempts_so_far);
                    if decision.should_retry {
                        let delay = retry::backoff_delay(policy, attempts_so_far);
                        self.scheduler.after(delay).await;
                        continue;
                    }
                    let halting = required;
                    self.state_manager
                        .mutate(workflow_id, |s| {
                            s.transition_step(step, StepStatus::Failed, None)?;
                            if halting {
                                s.status = WorkflowStatus::AwaitingManualReview;
                            }
                            Ok(())
                        })
                        .await?;
                    self.audit
                        .append(
                            workflow_id,
                            topics::STEP_FAILED,
                            json!({"step": step, "attempts": attempts_so_far, "requiresManualIntervention": halting}),
                        )
                        .await?;
                    self.streams.publish_error(&ErrorRecord::from_error(
                        workflow_id,
                        &ErasureError::new(ErrorCategory::ExternalSystem, format!("step '{step}' exhausted retries")),
                        if halting { Severity::Critical } else { Severity::Medium },
                        Remediation {
                            actions: vec![format!("investigate '{step}' connector failures")],
                            retryable: !halting,
                            escalation_required: halting,
                        },
                        Impact {
                            affected_systems: vec![step.to_string()],
                            data_at_risk: halting,
                            compliance_impact: if halting { Some("required-system deletion unconfirmed".to_string()) } else { None },
                        },
                    ));
                    return Ok(if halting { StepOutcome::FailedHalting } else { StepOutcome::FailedContinuing });
                }
            }
        }
    }

    /// PARALLEL → PII_SCAN (§4.9): analyzes `chunks`, classifies findings,
    /// auto-deletes high-confidence findings from their source system, and
    /// records manual-review findings for operator triage.
    pub async fn run_pii_scan(&self, workflow_id: &str, policy: &Policy, chunks: &[ScanChunk]) -> ErasureResult<()> {
        let Some(analyzer) = &self.analyzer else {
            let state = self
                .state_manager
                .mutate(workflow_id, |s| {
                    s.current_phase = Phase::Background;
                    Ok(())
                })
                .await?;
            self.publish_status(&state);
            return Ok(());
        };

        let analysis = analyzer.analyze(chunks).await?;
        let partition = classifier::partition(analysis.findings.clone(), policy);

        for finding in &partition.auto_delete {
            if let Some(connector) = self.systems.get(finding.system.as_str()) {
                let state = self.state_manager.load(workflow_id).await?;
                let ctx = DeletionContext {
                    workflow_id: workflow_id.to_string(),
                    request_id: state.request_id.clone(),
                    attempt: 1,
                };
                let _ = connector.delete(&ctx, &state.user_identifiers).await;
            }
        }

        let mut all_findings: Vec<PiiFinding> = Vec::with_capacity(analysis.findings.len());
        all_findings.extend(partition.auto_delete.iter().cloned());
        all_findings.extend(partition.manual_review.iter().cloned());
        all_findings.extend(partition.ignore.iter().cloned());

        let state = self
            .state_manager
            .mutate(workflow_id, |s| {
                s.pii_findings.extend(all_findings.iter().cloned());
                s.current_phase = Phase::Background;
                Ok(())
            })
            .await?;
        self.audit
            .append(
                workflow_id,
                topics::PII_DETECTED,
                json!({
                    "autoDelete": partition.auto_delete.len(),
                    "manualReview": partition.manual_review.len(),
                    "ignored": partition.ignore.len(),
                }),
            )
            .await?;
        self.publish_status(&state);
        Ok(())
    }

    /// BACKGROUND → COMPLETION (§4.9): gates on every attached background
    /// job reaching a terminal status. Returns `false` (no-op) if jobs are
    /// still running.
    pub async fn try_advance_to_completion(&self, workflow_id: &str, policy: &Policy) -> ErasureResult<bool> {
        if !self.jobs.are_all_jobs_complete(workflow_id).await? {
            return Ok(false);
        }
        let state = self
            .state_manager
            .mutate(workflow_id, |s| {
                s.current_phase = Phase::Completion;
                Ok(())
            })
            .await?;
        self.publish_status(&state);
        self.finalize(workflow_id, policy).await?;
        Ok(true)
    }

    /// COMPLETION → CERTIFICATE (§4.9, §4.12): verifies the audit trail,
    /// settles the terminal workflow status, issues and persists the signed
    /// certificate. Refuses (leaving the workflow state untouched) if the
    /// audit trail doesn't verify.
    pub async fn finalize(&self, workflow_id: &str, policy: &Policy) -> ErasureResult<Certificate> {
        if !self.audit.verify(workflow_id).await? {
            return Err(ErasureError::audit_integrity(format!("audit trail for '{workflow_id}' failed verification; refusing to issue certificate")));
        }

        let state = self.state_manager.load(workflow_id).await?;
        if state.status == WorkflowStatus::AwaitingManualReview || state.status == WorkflowStatus::Failed {
            return Err(ErasureError::new(ErrorCategory::Certificate, "cannot issue certificate while workflow is not in a completed state"));
        }
        let any_failed = state.steps.values().any(|r| r.status == StepStatus::Failed);
        let final_status = if any_failed { WorkflowStatus::CompletedWithExceptions } else { WorkflowStatus::Completed };

        let state = self
            .state_manager
            .mutate(workflow_id, |s| {
                s.status = final_status;
                s.current_phase = Phase::Certificate;
                s.completed_at = Some(chrono::Utc::now());
                Ok(())
            })
            .await?;

        let trail = self.audit.load(workflow_id).await?;
        let certificate = self.certs.generate(&state, policy, trail.root())?;

        self.cert_kv
            .set(&certificate_key(&certificate.body.certificate_id), serde_json::to_vec(&certificate).expect("certificate must serialize"), None)
            .await;
        let state = self
            .state_manager
            .mutate(workflow_id, |s| {
                s.certificate_id = Some(certificate.body.certificate_id.clone());
                Ok(())
            })
            .await?;

        self.audit
            .append(workflow_id, topics::CERTIFICATE_GENERATED, json!({"certificateId": certificate.body.certificate_id}))
            .await?;
        self.streams.publish_completion(workflow_id, json!({"status": state.status, "certificateId": certificate.body.certificate_id}));
        Ok(certificate)
    }

    pub async fn load_certificate(&self, certificate_id: &str) -> Option<Certificate> {
        let bytes = self.cert_kv.get(&certificate_key(certificate_id)).await?;
        serde_json::from_slice(&bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::UserIdentifiers;
    use crate::kv::InMemoryKvStore;
    use crate::policy::Jurisdiction;
    use crate::scheduler::VirtualScheduler;
    use crate::stream::InMemoryEventStream;
    use erasure_test_doubles::*;

    mod erasure_test_doubles {
        use super::*;
        use async_trait::async_trait;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Mutex;

        pub struct ScriptedSystem {
            pub name: String,
            pub script: Mutex<Vec<bool>>,
            pub calls: AtomicUsize,
        }

        impl ScriptedSystem {
            pub fn always_succeeds(name: &str) -> Arc<Self> {
                Arc::new(Self { name: name.to_string(), script: Mutex::new(vec![true]), calls: AtomicUsize::new(0) })
            }
            pub fn fails_then_succeeds(name: &str, failures: usize) -> Arc<Self> {
                let mut script = vec![false; failures];
                script.push(true);
                Arc::new(Self { name: name.to_string(), script: Mutex::new(script), calls: AtomicUsize::new(0) })
            }
            pub fn always_fails(name: &str) -> Arc<Self> {
                Arc::new(Self { name: name.to_string(), script: Mutex::new(vec![false]), calls: AtomicUsize::new(0) })
            }
            pub fn call_count(&self) -> usize {
                self.calls.load(Ordering::SeqCst)
            }
        }

        #[async_trait]
        impl crate::external_system::ExternalSystem for ScriptedSystem {
            fn name(&self) -> &str {
                &self.name
            }
            async fn delete(&self, _ctx: &DeletionContext, _identifiers: &UserIdentifiers) -> ErasureResult<crate::external_system::DeletionOutcome> {
                let idx = self.calls.fetch_add(1, Ordering::SeqCst);
                let script = self.script.lock().unwrap();
                let succeeded = *script.get(idx).or_else(|| script.last()).unwrap();
                Ok(if succeeded {
                    crate::external_system::DeletionOutcome::succeeded("receipt")
                } else {
                    crate::external_system::DeletionOutcome::failed("transient")
                })
            }
        }
    }

    fn policy() -> Policy {
        let mut p = Policy::for_jurisdiction(Jurisdiction::Eu).unwrap();
        p.required_systems = vec!["payments".to_string(), "database".to_string()];
        p.parallel_systems = vec!["crm".to_string()];
        p.max_retry_attempts = 3;
        p.initial_retry_delay_ms = 1;
        p.redact_certificates = false;
        p
    }

    fn harness(systems: HashMap<String, SharedExternalSystem>) -> (Arc<WorkflowStateManager>, SagaOrchestrator) {
        let kv = Arc::new(InMemoryKvStore::new());
        let state_manager = Arc::new(WorkflowStateManager::new(Arc::clone(&kv) as Arc<dyn KvStore>));
        let audit = Arc::new(AuditStore::new(Arc::clone(&kv) as Arc<dyn KvStore>));
        let streams = Arc::new(StreamManager::new(Arc::new(InMemoryEventStream::new())));
        let jobs = Arc::new(BackgroundJobManager::new(Arc::clone(&state_manager)));
        let certs = Arc::new(CertificateGenerator::new(b"test-key".to_vec()));
        let orchestrator = SagaOrchestrator::new(
            Arc::clone(&state_manager),
            audit,
            streams,
            jobs,
            certs,
            Arc::clone(&kv) as Arc<dyn KvStore>,
            systems,
            None,
            Arc::new(VirtualScheduler),
        );
        (state_manager, orchestrator)
    }

    fn ids() -> UserIdentifiers {
        UserIdentifiers::new("gdpr_test_001", vec!["gdpr.test@example.dev".to_string()], vec!["+15551234567".to_string()], vec!["Test User".to_string()]).unwrap()
    }

    #[tokio::test]
    async fn s1_happy_path_runs_sequentially_and_issues_a_verified_certificate() {
        let policy = policy();
        let mut systems: HashMap<String, SharedExternalSystem> = HashMap::new();
        systems.insert("payments".to_string(), ScriptedSystem::always_succeeds("payments"));
        systems.insert("database".to_string(), ScriptedSystem::always_succeeds("database"));
        systems.insert("crm".to_string(), ScriptedSystem::always_succeeds("crm"));
        let (state_manager, orchestrator) = harness(systems);

        let state = WorkflowState::new("wf-1", "req-1", &policy.policy_version, ids(), &policy.required_systems, &policy.parallel_systems);
        orchestrator.start_workflow(state, &policy).await.unwrap();
        orchestrator.try_advance_to_completion("wf-1", &policy).await.unwrap();

        let final_state = state_manager.load("wf-1").await.unwrap();
        assert_eq!(final_state.status, WorkflowStatus::Completed);
        assert!(final_state.certificate_id.is_some());
        let cert = orchestrator.load_certificate(final_state.certificate_id.as_ref().unwrap()).await.unwrap();
        assert!(orchestrator.certs.verify(&cert));
        assert_eq!(cert.body.user_identifiers.user_id, "gdpr_test_001");
        assert_eq!(cert.body.receipts.len(), 3);
    }

    #[tokio::test]
    async fn s2_retry_then_succeed_emits_successor_exactly_once() {
        let policy = policy();
        let payments = ScriptedSystem::fails_then_succeeds("payments", 2);
        let mut systems: HashMap<String, SharedExternalSystem> = HashMap::new();
        systems.insert("payments".to_string(), Arc::clone(&payments));
        systems.insert("database".to_string(), ScriptedSystem::always_succeeds("database"));
        systems.insert("crm".to_string(), ScriptedSystem::always_succeeds("crm"));
        let (state_manager, orchestrator) = harness(systems);

        let state = WorkflowState::new("wf-1", "req-1", &policy.policy_version, ids(), &policy.required_systems, &policy.parallel_systems);
        orchestrator.start_workflow(state, &policy).await.unwrap();

        let final_state = state_manager.load("wf-1").await.unwrap();
        assert_eq!(final_state.steps["payments"].status, StepStatus::Deleted);
        assert_eq!(final_state.steps["payments"].attempts, 3);
        assert_eq!(payments.call_count(), 3);
        assert_eq!(final_state.steps["database"].status, StepStatus::Deleted);
    }

    #[tokio::test]
    async fn s3_required_exhaustion_halts_before_database_or_checkpoint() {
        let policy = policy();
        let payments = ScriptedSystem::always_fails("payments");
        let database = ScriptedSystem::always_succeeds("database");
        let mut systems: HashMap<String, SharedExternalSystem> = HashMap::new();
        systems.insert("payments".to_string(), Arc::clone(&payments));
        systems.insert("database".to_string(), Arc::clone(&database));
        let (state_manager, orchestrator) = harness(systems);

        let state = WorkflowState::new("wf-1", "req-1", &policy.policy_version, ids(), &policy.required_systems, &policy.parallel_systems);
        orchestrator.start_workflow(state, &policy).await.unwrap();

        let final_state = state_manager.load("wf-1").await.unwrap();
        assert_eq!(final_state.status, WorkflowStatus::AwaitingManualReview);
        assert_eq!(final_state.steps["payments"].status, StepStatus::Failed);
        assert_eq!(final_state.steps["payments"].attempts, 3);
        assert_eq!(final_state.steps["database"].status, StepStatus::NotStarted);
        assert_eq!(database.call_count(), 0);
    }

    #[test]
    fn s4_checkpoint_fails_when_a_required_step_is_not_deleted() {
        let policy = policy();
        let mut state = WorkflowState::new("wf-1", "req-1", &policy.policy_version, ids(), &policy.required_systems, &policy.parallel_systems);
        state.transition_step("payments", StepStatus::Deleted, None).unwrap();
        state.transition_step("database", StepStatus::InProgress, None).unwrap();

        let result = evaluate_checkpoint(&state, &policy);
        assert!(!result.success);
        assert_eq!(result.checkpoint_status, "FAILED");
    }

    #[tokio::test]
    async fn no_bypass_running_database_before_payments_fails() {
        let policy = policy();
        let mut systems: HashMap<String, SharedExternalSystem> = HashMap::new();
        systems.insert("payments".to_string(), ScriptedSystem::always_succeeds("payments"));
        systems.insert("database".to_string(), ScriptedSystem::always_succeeds("database"));
        let (state_manager, orchestrator) = harness(systems);

        let state = WorkflowState::new("wf-1", "req-1", &policy.policy_version, ids(), &policy.required_systems, &policy.parallel_systems);
        state_manager.create(state).await.unwrap();

        let err = orchestrator.execute_required_step("wf-1", "database", 1, &policy).await.unwrap_err();
        assert!(err.message.contains("not completed"));
    }
}
