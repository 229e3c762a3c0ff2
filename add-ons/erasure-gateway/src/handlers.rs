//! Route handlers for the HTTP surface (§6). Each one does just enough
//! validation/authorization to shape a 4xx before touching the engine, then
//! delegates the actual work to `erasure-core` services.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::stream::{Stream, StreamExt};
use serde_json::json;

use erasure_core::errors::{ErasureError, ErrorCategory};
use erasure_core::identifiers::UserIdentifiers;
use erasure_core::policy::Policy;
use erasure_core::workflow::{Phase, StepEvidence, StepStatus, WorkflowState, WorkflowStatus};

use crate::auth::{Principal, Role};
use crate::dto::*;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn health() -> &'static str {
    "OK"
}

/// Runs the saga to whatever point it can reach unattended: the required
/// sequence through the checkpoint and parallel phase, then (since this
/// reference gateway has no real content source to feed the PII scanner
/// and registers no background jobs) an empty scan pass and an immediate
/// completion check. A deployment with real S3/warehouse scanners would
/// call `run_pii_scan`/`try_advance_to_completion` from its own job
/// completion callbacks instead of here.
async fn drive_saga_to_completion(state: Arc<AppState>, workflow_id: String, policy: Policy) {
    state.store_policy(&workflow_id, &policy).await;
    if let Err(e) = state.orchestrator.run_pii_scan(&workflow_id, &policy, &[]).await {
        tracing::warn!(%workflow_id, error = %e, "pii scan phase failed");
    }
    if let Err(e) = state.orchestrator.try_advance_to_completion(&workflow_id, &policy).await {
        tracing::warn!(%workflow_id, error = %e, "completion phase failed");
    }
}

pub async fn create_erasure_request(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(body): Json<CreateErasureRequestDto>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    principal.require_role(Role::ComplianceOfficer)?;

    let identifiers: UserIdentifiers = body.user_identifiers.into_domain()?;
    let policy = Policy::for_jurisdiction(body.jurisdiction)?;

    let workflow_id = uuid::Uuid::new_v4().to_string();
    let request_id = uuid::Uuid::new_v4().to_string();

    state
        .locks
        .acquire_user_lock(&identifiers.user_id, &workflow_id)
        .await
        .map_err(|e| ApiError(e.with_status(409)))?;

    if let Err(e) = state.dedup.dedupe_request(&request_id, &workflow_id).await {
        state.locks.release_user_lock(&identifiers.user_id, &workflow_id).await;
        return Err(ApiError(e.with_status(409)));
    }

    let saga_state = WorkflowState::new(
        workflow_id.clone(),
        request_id.clone(),
        policy.policy_version.clone(),
        identifiers.clone(),
        &policy.required_systems,
        &policy.parallel_systems,
    );
    let created_at = saga_state.created_at;

    let background_state = Arc::clone(&state);
    let background_policy = policy.clone();
    let user_id = identifiers.user_id.clone();
    let wf_for_task = workflow_id.clone();
    tokio::spawn(async move {
        let orchestrator = Arc::clone(&background_state.orchestrator);
        if let Err(e) = orchestrator.start_workflow(saga_state, &background_policy).await {
            tracing::error!(workflow_id = %wf_for_task, error = %e, "saga failed to start");
            background_state.locks.release_user_lock(&user_id, &wf_for_task).await;
            return;
        }
        if let Ok(current) = background_state.state_manager.load(&wf_for_task).await {
            if current.status == WorkflowStatus::InProgress {
                drive_saga_to_completion(Arc::clone(&background_state), wf_for_task.clone(), background_policy).await;
            }
        }
        background_state.locks.release_user_lock(&user_id, &wf_for_task).await;
    });

    let response = CreateErasureResponse {
        request_id,
        workflow_id,
        created_at,
        jurisdiction: body.jurisdiction,
        user_id: identifiers.user_id,
    };
    Ok((StatusCode::CREATED, Json(serde_json::to_value(response).expect("response must serialize"))))
}

fn not_found(workflow_id: &str) -> ApiError {
    ApiError(ErasureError::new(ErrorCategory::WorkflowState, format!("workflow '{workflow_id}' not found")).with_status(404))
}

pub async fn get_status(State(state): State<Arc<AppState>>, Path(workflow_id): Path<String>) -> Result<Json<StatusResponse>, ApiError> {
    let saga_state = state.state_manager.load(&workflow_id).await.map_err(|_| not_found(&workflow_id))?;

    let total_steps = saga_state.steps.len();
    let completed_steps = saga_state.steps.values().filter(|r| r.status == StepStatus::Deleted).count();
    let failed_steps = saga_state.steps.values().filter(|r| r.status == StepStatus::Failed).count();
    let percentage = if total_steps == 0 {
        0
    } else {
        ((completed_steps as f64 / total_steps as f64) * 100.0).round() as u8
    };

    let steps = saga_state
        .steps
        .iter()
        .map(|(name, record)| {
            (
                name.clone(),
                StepSummary {
                    status: record.status,
                    attempts: record.attempts,
                    last_updated: record.evidence.timestamp,
                },
            )
        })
        .collect();

    let background_jobs = saga_state
        .background_jobs
        .iter()
        .map(|(id, job)| {
            (
                id.clone(),
                BackgroundJobSummary {
                    job_type: job.job_type,
                    status: job.status,
                    progress: job.progress,
                },
            )
        })
        .collect();

    Ok(Json(StatusResponse {
        workflow_id: saga_state.workflow_id,
        request_id: saga_state.request_id,
        status: saga_state.status,
        progress: Progress { total_steps, completed_steps, failed_steps, percentage },
        steps,
        background_jobs,
        legal_holds: saga_state.legal_holds,
        created_at: saga_state.created_at,
        last_updated: saga_state.last_updated,
        estimated_completion: None,
    }))
}

pub async fn get_certificate(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(workflow_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !principal.can_read_certificate() {
        return Err(ApiError(ErasureError::new(ErrorCategory::Auth, "certificate access requires Legal, ComplianceAdmin, Auditor, or SystemAdmin")));
    }

    let saga_state = state.state_manager.load(&workflow_id).await.map_err(|_| not_found(&workflow_id))?;
    if !matches!(saga_state.status, WorkflowStatus::Completed | WorkflowStatus::CompletedWithExceptions) {
        return Err(ApiError(
            ErasureError::new(
                ErrorCategory::Certificate,
                format!("workflow '{workflow_id}' has status {:?}, no certificate has been issued", saga_state.status),
            )
            .with_status(409),
        ));
    }
    let certificate_id = saga_state.certificate_id.ok_or_else(|| {
        ApiError(ErasureError::new(ErrorCategory::Certificate, "workflow completed without issuing a certificate").with_status(500))
    })?;
    let certificate = state
        .orchestrator
        .load_certificate(&certificate_id)
        .await
        .ok_or_else(|| ApiError(ErasureError::new(ErrorCategory::Certificate, "certificate record missing").with_status(500)))?;

    Ok(Json(serde_json::to_value(certificate).expect("certificate must serialize")))
}

pub async fn override_workflow(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(workflow_id): Path<String>,
    Json(body): Json<OverrideRequestDto>,
) -> Result<Json<OverrideResponse>, ApiError> {
    principal.require_role(Role::LegalCounsel)?;

    let action_name = match body.action {
        OverrideAction::LegalHold => "LEGAL_HOLD",
        OverrideAction::ResumeDeletion => "RESUME_DELETION",
        OverrideAction::ForceComplete => "FORCE_COMPLETE",
        OverrideAction::CancelWorkflow => "CANCEL_WORKFLOW",
    };

    state
        .audit
        .append(
            &workflow_id,
            "override-requested",
            json!({
                "action": action_name,
                "reason": body.reason,
                "legalBasis": body.legal_basis,
                "approvedBy": body.approved_by.user_id,
            }),
        )
        .await?;

    let final_state = match body.action {
        OverrideAction::LegalHold => apply_legal_hold(&state, &workflow_id, &body).await?,
        OverrideAction::ResumeDeletion => apply_resume_deletion(&state, &workflow_id).await?,
        OverrideAction::ForceComplete => apply_force_complete(&state, &workflow_id).await?,
        OverrideAction::CancelWorkflow => apply_cancel(&state, &workflow_id).await?,
    };

    state.streams.publish_workflow_status(
        &workflow_id,
        json!({"workflowId": workflow_id, "status": final_state.status, "currentPhase": final_state.current_phase, "override": action_name}),
    );

    Ok(Json(OverrideResponse {
        workflow_id,
        action: action_name,
        applied: true,
        status: final_state.status,
    }))
}

async fn apply_legal_hold(state: &Arc<AppState>, workflow_id: &str, body: &OverrideRequestDto) -> Result<WorkflowState, ApiError> {
    let systems = body.systems.clone().unwrap_or_default();
    let reason = body.reason.clone();
    let expires_at = body.expires_at;
    let final_state = state
        .state_manager
        .mutate(workflow_id, move |s| {
            for system in &systems {
                let already_deleted = s.steps.get(system).map(|r| r.status == StepStatus::Deleted).unwrap_or(false);
                if !already_deleted {
                    s.transition_step(system, StepStatus::LegalHold, None)?;
                    s.legal_holds.push(erasure_core::workflow::LegalHold {
                        system: system.clone(),
                        reason: reason.clone(),
                        expires_at,
                    });
                }
            }
            Ok(())
        })
        .await?;
    Ok(final_state)
}

/// Resets any `FAILED` required/parallel steps back to `NOT_STARTED` and
/// re-runs the required sequence, the same entry point
/// `run_required_sequence` uses after a fresh `start_workflow` (§4.15: the
/// hard predecessor check makes this safe to re-enter mid-sequence).
async fn apply_resume_deletion(state: &Arc<AppState>, workflow_id: &str) -> Result<WorkflowState, ApiError> {
    let reset_state = state
        .state_manager
        .mutate(workflow_id, |s| {
            s.status = WorkflowStatus::InProgress;
            let stuck: Vec<String> = s.steps.iter().filter(|(_, r)| r.status == StepStatus::Failed).map(|(name, _)| name.clone()).collect();
            for step in stuck {
                s.steps.get_mut(&step).unwrap().status = StepStatus::NotStarted;
            }
            Ok(())
        })
        .await?;

    let policy = state.load_policy(workflow_id).await;
    let orchestrator = Arc::clone(&state.orchestrator);
    let background_state = Arc::clone(state);
    let wf = workflow_id.to_string();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run_required_sequence(&wf, &policy).await {
            tracing::error!(workflow_id = %wf, error = %e, "resume-deletion override failed");
            return;
        }
        if let Ok(current) = background_state.state_manager.load(&wf).await {
            if current.status == WorkflowStatus::InProgress {
                drive_saga_to_completion(background_state, wf, policy).await;
            }
        }
    });
    Ok(reset_state)
}

/// Marks every outstanding step `DELETED` with an evidence receipt naming
/// the override as its justification, then finalizes. `CertificateGenerator`
/// refuses to issue unless every tracked step is `DELETED` (§4.12), so
/// forcing completion means forcing that precondition, not bypassing it.
async fn apply_force_complete(state: &Arc<AppState>, workflow_id: &str) -> Result<WorkflowState, ApiError> {
    state
        .state_manager
        .mutate(workflow_id, |s| {
            let names: Vec<String> = s.steps.keys().cloned().collect();
            for name in names {
                let status = s.steps.get(&name).expect("key from own iteration").status;
                if status != StepStatus::Deleted {
                    s.transition_step(
                        &name,
                        StepStatus::Deleted,
                        Some(StepEvidence {
                            receipt: Some("force-completed-by-legal-override".to_string()),
                            timestamp: Some(chrono::Utc::now()),
                            raw_response: None,
                        }),
                    )?;
                }
            }
            s.current_phase = Phase::Completion;
            Ok(())
        })
        .await?;

    let policy = state.load_policy(workflow_id).await;
    if let Err(e) = state.orchestrator.finalize(workflow_id, &policy).await {
        tracing::warn!(%workflow_id, error = %e, "force-complete finalize failed");
    }
    let current = state.state_manager.load(workflow_id).await?;
    Ok(current)
}

async fn apply_cancel(state: &Arc<AppState>, workflow_id: &str) -> Result<WorkflowState, ApiError> {
    let final_state = state
        .state_manager
        .mutate(workflow_id, |s| {
            s.status = WorkflowStatus::Failed;
            Ok(())
        })
        .await?;
    state.locks.release_user_lock(&final_state.user_identifiers.user_id, workflow_id).await;
    Ok(final_state)
}

pub async fn list_workflows(State(state): State<Arc<AppState>>, Query(query): Query<ListWorkflowsQuery>) -> Result<Json<ListWorkflowsResponse>, ApiError> {
    let limit = query.limit.unwrap_or(20).min(200);
    let offset = query.offset.unwrap_or(0);

    let rows = state.workflow_kv.scan_prefix("workflow:").await;
    let mut all: Vec<WorkflowSummary> = Vec::with_capacity(rows.len());
    for (_, bytes) in rows {
        let Ok(s) = serde_json::from_slice::<WorkflowState>(&bytes) else {
            continue;
        };
        if let Some(filter) = query.status {
            if s.status != filter {
                continue;
            }
        }
        all.push(WorkflowSummary {
            workflow_id: s.workflow_id,
            request_id: s.request_id,
            status: s.status,
            current_phase: s.current_phase,
            created_at: s.created_at,
        });
    }
    all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let total = all.len();
    let page = all.into_iter().skip(offset).take(limit).collect();

    Ok(Json(ListWorkflowsResponse { workflows: page, total, limit, offset }))
}

/// Turns a topic [`Subscription`](erasure_core::stream::Subscription) into
/// an SSE byte stream, dropping events for a workflow the caller didn't ask
/// about when `workflow_filter` is set (§6: "filterable by workflowId").
fn sse_stream(sub: erasure_core::stream::Subscription, workflow_filter: Option<String>) -> impl Stream<Item = Result<Event, Infallible>> {
    futures_util::stream::unfold((sub, workflow_filter), |(mut sub, filter)| async move {
        loop {
            let event = sub.next().await?;
            if let Some(ref wanted) = filter {
                if event.group_id.as_deref() != Some(wanted.as_str()) {
                    continue;
                }
            }
            let sse_event = Event::default().json_data(&event.payload).unwrap_or_else(|_| Event::default().data("{}"));
            return Some((Ok(sse_event), (sub, filter)));
        }
    })
}

pub async fn stream_workflow_status(
    State(state): State<Arc<AppState>>,
    _principal: Principal,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let sub = state.streams.subscribe_workflow_status();
    Sse::new(sse_stream(sub, query.workflow_id).boxed()).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

pub async fn stream_errors(
    State(state): State<Arc<AppState>>,
    _principal: Principal,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let sub = state.streams.subscribe_errors();
    Sse::new(sse_stream(sub, query.workflow_id).boxed()).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

pub async fn stream_completions(
    State(state): State<Arc<AppState>>,
    _principal: Principal,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let sub = state.streams.subscribe_completions();
    Sse::new(sse_stream(sub, query.workflow_id).boxed()).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn create_request_body() -> serde_json::Value {
        json!({
            "userIdentifiers": {
                "userId": "user-42",
                "emails": ["user42@example.com"],
                "phones": [],
                "aliases": []
            },
            "legalProof": {
                "type": "SIGNED_REQUEST",
                "evidence": "signed-pdf-hash",
                "verifiedAt": "2026-01-01T00:00:00Z"
            },
            "jurisdiction": "EU",
            "requestedBy": {
                "userId": "officer-1",
                "role": "COMPLIANCE_OFFICER",
                "organization": "acme"
            }
        })
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let state = AppState::build();
        let app = crate::build_app(state);
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_erasure_request_rejects_wrong_role() {
        let state = AppState::build();
        let app = crate::build_app(state);
        let req = Request::builder()
            .method("POST")
            .uri("/erasure-request")
            .header("content-type", "application/json")
            .header("x-erasure-role", "AUDITOR")
            .header("x-erasure-user-id", "someone")
            .body(Body::from(create_request_body().to_string()))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn create_erasure_request_rejects_missing_role_header() {
        let state = AppState::build();
        let app = crate::build_app(state);
        let req = Request::builder()
            .method("POST")
            .uri("/erasure-request")
            .header("content-type", "application/json")
            .body(Body::from(create_request_body().to_string()))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn create_erasure_request_then_status_round_trip() {
        let state = AppState::build();
        let app = crate::build_app(state);

        let create_req = Request::builder()
            .method("POST")
            .uri("/erasure-request")
            .header("content-type", "application/json")
            .header("x-erasure-role", "COMPLIANCE_OFFICER")
            .header("x-erasure-user-id", "officer-1")
            .body(Body::from(create_request_body().to_string()))
            .unwrap();
        let create_res = app.clone().oneshot(create_req).await.unwrap();
        assert_eq!(create_res.status(), StatusCode::CREATED);
        let bytes = axum::body::to_bytes(create_res.into_body(), usize::MAX).await.unwrap();
        let created: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let workflow_id = created["workflowId"].as_str().unwrap().to_string();

        // Give the spawned saga task a moment to run before checking status.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status_req = Request::builder()
            .method("GET")
            .uri(format!("/erasure-request/{workflow_id}/status"))
            .body(Body::empty())
            .unwrap();
        let status_res = app.oneshot(status_req).await.unwrap();
        assert_eq!(status_res.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(status_res.into_body(), usize::MAX).await.unwrap();
        let status: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(status["workflowId"], workflow_id);
    }

    #[tokio::test]
    async fn get_status_for_unknown_workflow_is_404() {
        let state = AppState::build();
        let app = crate::build_app(state);
        let req = Request::builder()
            .method("GET")
            .uri("/erasure-request/does-not-exist/status")
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_certificate_requires_privileged_role() {
        let state = AppState::build();
        let app = crate::build_app(state);
        let req = Request::builder()
            .method("GET")
            .uri("/erasure-request/some-workflow/certificate")
            .header("x-erasure-role", "COMPLIANCE_OFFICER")
            .header("x-erasure-user-id", "officer-1")
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn list_workflows_empty_store_returns_empty_page() {
        let state = AppState::build();
        let app = crate::build_app(state);
        let req = Request::builder().uri("/erasure-request/workflows").body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["total"], 0);
        assert!(body["workflows"].as_array().unwrap().is_empty());
    }
}
