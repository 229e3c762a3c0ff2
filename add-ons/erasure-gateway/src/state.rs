//! `AppState`: wires every engine service together behind the HTTP surface.
//! One instance per process, shared via `Arc` across all handlers and the
//! zombie-scheduler background loop, the same shape as the teacher's
//! `AppState` wrapping its KB path and API key.

use std::collections::HashMap;
use std::sync::Arc;

use erasure_connectors::{MockExternalSystem, RegexContentAnalyzer};
use erasure_core::audit_store::AuditStore;
use erasure_core::certificate::CertificateGenerator;
use erasure_core::external_system::SharedExternalSystem;
use erasure_core::jobs::BackgroundJobManager;
use erasure_core::kv::{InMemoryKvStore, KvStore, SledKvStore};
use erasure_core::locks::{Deduper, LockService};
use erasure_core::orchestrator::SagaOrchestrator;
use erasure_core::policy::{Jurisdiction, Policy};
use erasure_core::scheduler::{RealTimeScheduler, SharedScheduler};
use erasure_core::streams::StreamManager;
use erasure_core::stream::InMemoryEventStream;
use erasure_core::workflow::WorkflowStateManager;
use erasure_core::zombie::ZombieScheduler;

pub struct AppState {
    pub state_manager: Arc<WorkflowStateManager>,
    pub orchestrator: Arc<SagaOrchestrator>,
    pub zombies: Arc<ZombieScheduler>,
    pub locks: Arc<LockService>,
    pub dedup: Arc<Deduper>,
    pub audit: Arc<AuditStore>,
    pub streams: Arc<StreamManager>,
    pub workflow_kv: Arc<dyn KvStore>,
}

/// Registers the out-of-the-box connectors this binary ships with (§1: the
/// Engine knows only the `ExternalSystem` contract; concrete vendor wiring
/// is out of scope, so every system in `policy.requiredSystems` /
/// `parallel_systems` gets a `MockExternalSystem` that always succeeds
/// unless a deployment swaps it for a real adapter).
fn default_systems(policy: &Policy) -> HashMap<String, SharedExternalSystem> {
    let mut systems: HashMap<String, SharedExternalSystem> = HashMap::new();
    for name in policy.required_systems.iter().chain(policy.parallel_systems.iter()) {
        systems.insert(name.clone(), Arc::new(MockExternalSystem::always_succeeds(name.clone())));
    }
    systems
}

fn policy_key(workflow_id: &str) -> String {
    format!("policy:{workflow_id}")
}

fn signing_key() -> Vec<u8> {
    std::env::var("ERASURE_CERT_SIGNING_KEY")
        .unwrap_or_else(|_| "dev-signing-key-do-not-use-in-production".to_string())
        .into_bytes()
}

fn workflow_kv_store() -> Arc<dyn KvStore> {
    match std::env::var("ERASURE_SLED_PATH") {
        Ok(path) => match SledKvStore::open_path(std::path::Path::new(&path)) {
            Ok(db) => Arc::new(db),
            Err(e) => {
                tracing::warn!(error = %e, "falling back to in-memory KV store");
                Arc::new(InMemoryKvStore::new())
            }
        },
        Err(_) => Arc::new(InMemoryKvStore::new()),
    }
}

impl AppState {
    /// Builds every service with the default jurisdiction's system list
    /// (required/parallel system *names* are jurisdiction-independent;
    /// per-request policy values are computed from the request's own
    /// jurisdiction and persisted per-workflow via [`Self::store_policy`]).
    pub fn build() -> Arc<Self> {
        let policy = Policy::for_jurisdiction(Jurisdiction::Eu).expect("eu defaults always valid");
        let kv = workflow_kv_store();
        let state_manager = Arc::new(WorkflowStateManager::new(Arc::clone(&kv)));
        let audit = Arc::new(AuditStore::new(Arc::clone(&kv)));
        let event_stream = Arc::new(InMemoryEventStream::new());
        let streams = Arc::new(StreamManager::new(event_stream));
        let jobs = Arc::new(BackgroundJobManager::new(Arc::clone(&state_manager)));
        let certs = Arc::new(CertificateGenerator::new(signing_key()));
        let scheduler: SharedScheduler = Arc::new(RealTimeScheduler);
        let systems = default_systems(&policy);
        let analyzer = Some(Arc::new(RegexContentAnalyzer::new()) as erasure_core::content_analyzer::SharedContentAnalyzer);

        let orchestrator = Arc::new(SagaOrchestrator::new(
            Arc::clone(&state_manager),
            Arc::clone(&audit),
            Arc::clone(&streams),
            jobs,
            certs,
            Arc::clone(&kv),
            systems.clone(),
            analyzer,
            Arc::clone(&scheduler),
        ));
        let zombies = Arc::new(ZombieScheduler::new(
            Arc::clone(&state_manager),
            Arc::clone(&audit),
            Arc::clone(&streams),
            scheduler,
            systems,
        ));
        let locks = Arc::new(LockService::new(Arc::clone(&kv)));
        let dedup = Arc::new(Deduper::new(Arc::clone(&kv)));

        Arc::new(Self {
            state_manager,
            orchestrator,
            zombies,
            locks,
            dedup,
            audit,
            streams,
            workflow_kv: kv,
        })
    }

    /// Persists the exact policy a workflow was created under, since
    /// `WorkflowState.policyVersion` is a label, not the policy value
    /// itself. Overrides and the zombie sweep reload it by workflow id
    /// rather than re-deriving a jurisdiction default that might not match.
    pub async fn store_policy(&self, workflow_id: &str, policy: &Policy) {
        let bytes = serde_json::to_vec(policy).expect("policy must serialize");
        self.workflow_kv.set(&policy_key(workflow_id), bytes, None).await;
    }

    pub async fn load_policy(&self, workflow_id: &str) -> Policy {
        match self.workflow_kv.get(&policy_key(workflow_id)).await {
            Some(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|_| Self::fallback_policy()),
            None => Self::fallback_policy(),
        }
    }

    fn fallback_policy() -> Policy {
        Policy::for_jurisdiction(Jurisdiction::Eu).expect("eu defaults always valid")
    }
}
