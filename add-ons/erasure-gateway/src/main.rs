//! Erasure Engine gateway — HTTP surface over the saga orchestrator (§6).
//! Single source of truth for compliance officers, legal counsel, and
//! auditors driving/inspecting GDPR/CCPA erasure workflows.

mod auth;
mod dto;
mod error;
mod handlers;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use erasure_core::workflow::WorkflowStatus;
use state::AppState;

fn build_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &axum::http::HeaderValue, _| {
            let s = origin.to_str().unwrap_or("");
            s == "http://localhost:3000" || s == "http://127.0.0.1:3000"
        }))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/erasure-request", post(handlers::create_erasure_request))
        .route("/erasure-request/workflows", get(handlers::list_workflows))
        .route("/erasure-request/:id/status", get(handlers::get_status))
        .route("/erasure-request/:id/certificate", get(handlers::get_certificate))
        .route("/erasure-request/:id/override", post(handlers::override_workflow))
        .route("/streams/workflow-status", get(handlers::stream_workflow_status))
        .route("/streams/errors", get(handlers::stream_errors))
        .route("/streams/completions", get(handlers::stream_completions))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Periodically sweeps every non-terminal workflow for zombie children
/// (§4.16: a workflow that's gone quiet past its jurisdiction's re-check
/// interval gets a narrowed child workflow spun up against the systems
/// that never confirmed deletion). Runs forever in its own task; a missed
/// tick just means the next one catches up, since `is_due` compares
/// against wall-clock timestamps rather than counting ticks.
async fn run_zombie_sweep(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(3600));
    loop {
        interval.tick().await;
        let rows = state.workflow_kv.scan_prefix("workflow:").await;
        for (_, bytes) in rows {
            let Ok(saga_state) = serde_json::from_slice::<erasure_core::workflow::WorkflowState>(&bytes) else {
                continue;
            };
            if !matches!(saga_state.status, WorkflowStatus::Completed | WorkflowStatus::CompletedWithExceptions) {
                continue;
            }
            let policy = state.load_policy(&saga_state.workflow_id).await;
            match state.zombies.run_once(&saga_state.workflow_id, &policy).await {
                Ok(Some(child)) => {
                    tracing::info!(
                        parent = %child.parent_workflow_id,
                        child = %child.child.workflow_id,
                        "zombie sweep spawned a narrowed child workflow"
                    );
                    state.store_policy(&child.child.workflow_id, &policy).await;
                    let orchestrator = Arc::clone(&state.orchestrator);
                    let child_state = child.child;
                    let child_policy = policy.clone();
                    let background_state = Arc::clone(&state);
                    tokio::spawn(async move {
                        let child_id = child_state.workflow_id.clone();
                        if let Err(e) = orchestrator.start_workflow(child_state, &child_policy).await {
                            tracing::error!(workflow_id = %child_id, error = %e, "zombie child workflow failed to start");
                            return;
                        }
                        if let Ok(current) = background_state.state_manager.load(&child_id).await {
                            if current.status == WorkflowStatus::InProgress {
                                if let Err(e) = background_state.orchestrator.run_pii_scan(&child_id, &child_policy, &[]).await {
                                    tracing::warn!(workflow_id = %child_id, error = %e, "zombie child pii scan failed");
                                }
                                if let Err(e) = background_state.orchestrator.try_advance_to_completion(&child_id, &child_policy).await {
                                    tracing::warn!(workflow_id = %child_id, error = %e, "zombie child completion failed");
                                }
                            }
                        }
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(workflow_id = %saga_state.workflow_id, error = %e, "zombie check failed");
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = AppState::build();

    tokio::spawn(run_zombie_sweep(Arc::clone(&state)));

    let app = build_app(Arc::clone(&state));

    let addr_raw = std::env::var("ERASURE_GATEWAY_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr_raw).await.unwrap_or_else(|e| panic!("failed to bind {addr_raw}: {e}"));
    tracing::info!(addr = %addr_raw, "erasure gateway listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .unwrap();
}
