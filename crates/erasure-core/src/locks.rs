//! LockService + Deduper (§4.16): one in-flight erasure workflow per user,
//! and request-id deduplication so a retried HTTP POST doesn't spawn a
//! second workflow.

use std::sync::Arc;
use std::time::Duration;

use crate::errors::{ErasureError, ErrorCategory};
use crate::errors::ErasureResult;
use crate::kv::{CasOutcome, KvStore};

const REQUEST_DEDUP_TTL: Duration = Duration::from_secs(24 * 60 * 60);

fn lock_key(user_id: &str) -> String {
    format!("lock:user:{user_id}")
}

fn request_key(request_id: &str) -> String {
    format!("request:{request_id}")
}

/// Per-user workflow lock, backed by a CAS-guarded KV entry holding the
/// owning `workflowId`.
pub struct LockService {
    kv: Arc<dyn KvStore>,
}

impl LockService {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Acquires the lock for `user_id`, tagging it with `workflow_id`. Fails
    /// with `WorkflowLock` (carrying the existing workflow id) if another
    /// workflow already holds it.
    pub async fn acquire_user_lock(&self, user_id: &str, workflow_id: &str) -> ErasureResult<()> {
        let key = lock_key(user_id);
        match self.kv.compare_and_swap(&key, None, workflow_id.as_bytes().to_vec(), None).await {
            CasOutcome::Swapped => Ok(()),
            CasOutcome::Conflict { actual } => {
                let existing = actual.and_then(|b| String::from_utf8(b).ok()).unwrap_or_default();
                Err(ErasureError::workflow_lock(
                    format!("user '{user_id}' already has an in-flight erasure workflow"),
                    existing,
                ))
            }
        }
    }

    /// Releases the lock iff it is still held by `workflow_id` (avoids a
    /// late release from a stale caller clobbering a newer lock holder).
    pub async fn release_user_lock(&self, user_id: &str, workflow_id: &str) {
        let key = lock_key(user_id);
        if let Some(current) = self.kv.get(&key).await {
            if current == workflow_id.as_bytes() {
                self.kv.delete(&key).await;
            }
        }
    }

    pub async fn is_locked(&self, user_id: &str) -> bool {
        self.kv.get(&lock_key(user_id)).await.is_some()
    }
}

/// Request-id deduplication: the first caller to dedupe a given
/// `request_id` wins and gets told so it can proceed; every other caller
/// within the TTL window is told the id was already seen.
pub struct Deduper {
    kv: Arc<dyn KvStore>,
}

impl Deduper {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Returns `Ok(())` if this is the first time `request_id` has been
    /// seen (and records it); errors with `Validation` if it's a duplicate.
    pub async fn dedupe_request(&self, request_id: &str, workflow_id: &str) -> ErasureResult<()> {
        let key = request_key(request_id);
        match self
            .kv
            .compare_and_swap(&key, None, workflow_id.as_bytes().to_vec(), Some(REQUEST_DEDUP_TTL))
            .await
        {
            CasOutcome::Swapped => Ok(()),
            CasOutcome::Conflict { actual } => {
                let existing = actual.and_then(|b| String::from_utf8(b).ok()).unwrap_or_default();
                Err(ErasureError::new(
                    ErrorCategory::Validation,
                    format!("requestId '{request_id}' was already submitted (workflow '{existing}')"),
                )
                .with_meta("existingWorkflowId", existing))
            }
        }
    }
}
