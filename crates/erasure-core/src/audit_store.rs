//! Persists each workflow's [`AuditTrail`] under its own KV key, separate
//! from the `workflow:{id}` record itself — the trail can grow without
//! bloating every CAS round-trip on the saga state, and `CertificateGenerator`
//! can load+verify it independently of the workflow aggregate (§4.3, §4.12).

use std::sync::Arc;

use serde_json::Value;

use crate::audit::AuditTrail;
use crate::errors::{ErasureError, ErasureResult};
use crate::kv::KvStore;

fn audit_key(workflow_id: &str) -> String {
    format!("audit:{workflow_id}")
}

/// Thin persistence wrapper around [`AuditTrail`]. Every `append` is a full
/// read-modify-write of the trail (no CAS — a single workflow's audit
/// appends are expected to be serialized by the orchestrator that owns the
/// workflow's step sequencing, matching "AuditTrail is owned by the
/// workflow" in §5).
pub struct AuditStore {
    kv: Arc<dyn KvStore>,
}

impl AuditStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Loads and re-verifies the trail for `workflow_id`, or an empty trail
    /// if none has been persisted yet (`fromState` for a brand-new saga).
    pub async fn load(&self, workflow_id: &str) -> ErasureResult<AuditTrail> {
        match self.kv.get(&audit_key(workflow_id)).await {
            Some(bytes) => {
                let events = serde_json::from_slice(&bytes)
                    .map_err(|e| ErasureError::audit_integrity(format!("corrupt audit trail: {e}")))?;
                AuditTrail::from_events(workflow_id, events)
            }
            None => Ok(AuditTrail::new(workflow_id)),
        }
    }

    /// Appends one event to the workflow's trail and persists the result.
    pub async fn append(&self, workflow_id: &str, event_type: impl Into<String>, payload: Value) -> ErasureResult<AuditTrail> {
        let mut trail = self.load(workflow_id).await?;
        trail.append(event_type, payload);
        let bytes = serde_json::to_vec(trail.events()).expect("audit events must serialize");
        self.kv.set(&audit_key(workflow_id), bytes, None).await;
        Ok(trail)
    }

    /// Re-verifies a previously loaded trail; `CertificateGenerator` must
    /// call this (indirectly, via `load`) and refuse to issue on failure.
    pub async fn verify(&self, workflow_id: &str) -> ErasureResult<bool> {
        Ok(self.load(workflow_id).await?.verify())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKvStore;
    use serde_json::json;

    #[tokio::test]
    async fn append_persists_and_reloads_verified_trail() {
        let store = AuditStore::new(Arc::new(InMemoryKvStore::new()));
        store.append("wf-1", "workflow-created", json!({"a": 1})).await.unwrap();
        store.append("wf-1", "step-completed", json!({"step": "payments"})).await.unwrap();

        let reloaded = store.load("wf-1").await.unwrap();
        assert_eq!(reloaded.events().len(), 2);
        assert!(reloaded.verify());
    }

    #[tokio::test]
    async fn missing_trail_loads_as_empty() {
        let store = AuditStore::new(Arc::new(InMemoryKvStore::new()));
        let trail = store.load("wf-none").await.unwrap();
        assert!(trail.events().is_empty());
    }

    #[tokio::test]
    async fn tampered_persisted_bytes_fail_to_load() {
        let kv = Arc::new(InMemoryKvStore::new());
        let store = AuditStore::new(Arc::clone(&kv) as Arc<dyn KvStore>);
        store.append("wf-1", "workflow-created", json!({"a": 1})).await.unwrap();

        let mut trail = store.load("wf-1").await.unwrap();
        trail.append("step-completed", json!({"step": "payments"}));
        let mut events = trail.events().to_vec();
        events[0].payload = json!({"a": 999});
        kv.set("audit:wf-1", serde_json::to_vec(&events).unwrap(), None).await;

        let err = store.load("wf-1").await.unwrap_err();
        assert_eq!(err.code(), "AUDIT_INTEGRITY");
    }
}
