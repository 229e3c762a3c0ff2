//! Scriptable `ExternalSystem` mock used by integration tests to exercise
//! retry-then-succeed (S2) and required-system exhaustion (S3) scenarios
//! without a real connector.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use erasure_core::errors::ErasureResult;
use erasure_core::identifiers::UserIdentifiers;

use crate::external_system::{DeletionContext, DeletionOutcome, ExternalSystem};

/// A scripted sequence of outcomes, replayed one per call; the last entry
/// repeats once the script is exhausted.
pub struct MockExternalSystem {
    name: String,
    script: Mutex<Vec<DeletionOutcome>>,
    call_count: AtomicUsize,
}

impl MockExternalSystem {
    pub fn new(name: impl Into<String>, script: Vec<DeletionOutcome>) -> Self {
        assert!(!script.is_empty(), "mock external system needs at least one scripted outcome");
        Self {
            name: name.into(),
            script: Mutex::new(script),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Always succeeds on the first call.
    pub fn always_succeeds(name: impl Into<String>) -> Self {
        Self::new(name, vec![DeletionOutcome::succeeded("mock-receipt")])
    }

    /// Fails `failures` times, then succeeds (S2: retry then succeed).
    pub fn fails_then_succeeds(name: impl Into<String>, failures: usize) -> Self {
        let mut script: Vec<DeletionOutcome> = (0..failures).map(|_| DeletionOutcome::failed("mock transient failure")).collect();
        script.push(DeletionOutcome::succeeded("mock-receipt-after-retry"));
        Self::new(name, script)
    }

    /// Always fails (S3: required-system exhaustion).
    pub fn always_fails(name: impl Into<String>) -> Self {
        Self::new(name, vec![DeletionOutcome::failed("mock permanent failure")])
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExternalSystem for MockExternalSystem {
    fn name(&self) -> &str {
        &self.name
    }

    async fn delete(&self, _ctx: &DeletionContext, _identifiers: &UserIdentifiers) -> ErasureResult<DeletionOutcome> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().expect("mock script lock poisoned");
        let outcome = script.get(idx).or_else(|| script.last()).cloned().expect("non-empty script");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fails_then_succeeds_replays_script_in_order() {
        let mock = MockExternalSystem::fails_then_succeeds("payments", 2);
        let ctx = DeletionContext {
            workflow_id: "wf-1".to_string(),
            request_id: "req-1".to_string(),
            attempt: 1,
        };
        let ids = UserIdentifiers::new("u1", vec![], vec![], vec![]).unwrap();

        let r1 = mock.delete(&ctx, &ids).await.unwrap();
        assert!(!r1.success);
        let r2 = mock.delete(&ctx, &ids).await.unwrap();
        assert!(!r2.success);
        let r3 = mock.delete(&ctx, &ids).await.unwrap();
        assert!(r3.success);
        assert_eq!(mock.call_count(), 3);
    }
}
