//! EventBus + StepDispatcher (§4.8). A topic-based pub/sub where each topic
//! is backed by a durable (at-least-once) queue; handlers are idempotent,
//! keyed by `(workflowId, stepName, attempt)`, and the dispatcher rejects
//! any delivery whose attempt does not exceed the last recorded successful
//! attempt for that step.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::errors::ErasureResult;
use crate::scheduler::SharedScheduler;
use crate::workflow::WorkflowStateManager;

/// One unit of work flowing through the bus: a step invocation for a given
/// workflow, tagged with the attempt number that is driving it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StepEvent {
    pub workflow_id: String,
    pub step_name: String,
    pub attempt: u32,
    pub payload: Value,
}

impl StepEvent {
    pub fn new(workflow_id: impl Into<String>, step_name: impl Into<String>, attempt: u32, payload: Value) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            step_name: step_name.into(),
            attempt,
            payload,
        }
    }
}

/// Outcome a handler hands back to the dispatcher: zero or more outgoing
/// events to emit on other topics (output chaining, §9 Design Notes).
pub type HandlerOutcome = ErasureResult<Vec<(String, StepEvent)>>;

#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn handle(&self, event: StepEvent) -> HandlerOutcome;
}

/// Topic-keyed mpsc queues. `emit` is a no-op (with a warning) if nothing
/// has subscribed to the topic yet — topics are wired up at startup by
/// `StepDispatcher::register`, mirroring "handlers declare subscribed and
/// emitted topics up-front, checked at startup" (§9).
pub struct EventBus {
    queues: DashMap<String, mpsc::UnboundedSender<StepEvent>>,
    scheduler: SharedScheduler,
}

impl EventBus {
    pub fn new(scheduler: SharedScheduler) -> Self {
        Self {
            queues: DashMap::new(),
            scheduler,
        }
    }

    fn register_queue(&self, topic: &str) -> mpsc::UnboundedReceiver<StepEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.queues.insert(topic.to_string(), tx);
        rx
    }

    pub fn emit(&self, topic: &str, event: StepEvent) {
        match self.queues.get(topic) {
            Some(sender) => {
                if sender.send(event).is_err() {
                    warn!(topic, "event bus: receiver for topic dropped");
                }
            }
            None => warn!(topic, "event bus: no handler registered for topic, dropping event"),
        }
    }

    /// `retry(attempt+1, after:d)` primitive (§9): schedules re-emission of
    /// the same topic after `delay` instead of a handler sleeping inline.
    pub fn retry_after(self: &Arc<Self>, topic: String, mut event: StepEvent, delay: Duration) {
        event.attempt += 1;
        let bus = Arc::clone(self);
        let scheduler = Arc::clone(&bus.scheduler);
        tokio::spawn(async move {
            scheduler.after(delay).await;
            bus.emit(&topic, event);
        });
    }
}

/// Dispatches events to registered handlers, enforcing per-step idempotency
/// via `WorkflowStateManager::accept_attempt` before invoking the handler.
pub struct StepDispatcher {
    bus: Arc<EventBus>,
    state_manager: Arc<WorkflowStateManager>,
}

impl StepDispatcher {
    pub fn new(bus: Arc<EventBus>, state_manager: Arc<WorkflowStateManager>) -> Self {
        Self { bus, state_manager }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Subscribes `handler` to `topic` and spawns its worker loop. Returns
    /// immediately; the loop runs until the bus (and thus its sender) is
    /// dropped.
    pub fn register(&self, topic: impl Into<String>, handler: Arc<dyn StepHandler>) {
        let topic = topic.into();
        let mut receiver = self.bus.register_queue(&topic);
        let bus = Arc::clone(&self.bus);
        let state_manager = Arc::clone(&self.state_manager);
        let topic_for_task = topic.clone();
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let accept = state_manager
                    .mutate(&event.workflow_id, {
                        let step = event.step_name.clone();
                        let attempt = event.attempt;
                        move |state| state.accept_attempt(&step, attempt)
                    })
                    .await;
                if let Err(err) = accept {
                    info!(
                        topic = %topic_for_task,
                        workflow_id = %event.workflow_id,
                        step = %event.step_name,
                        attempt = event.attempt,
                        error = %err,
                        "dispatcher: rejecting stale or duplicate delivery"
                    );
                    continue;
                }

                match handler.handle(event.clone()).await {
                    Ok(outgoing) => {
                        for (next_topic, next_event) in outgoing {
                            bus.emit(&next_topic, next_event);
                        }
                    }
                    Err(err) => {
                        warn!(
                            topic = %topic_for_task,
                            workflow_id = %event.workflow_id,
                            step = %event.step_name,
                            error = %err,
                            "dispatcher: handler returned an error"
                        );
                    }
                }
            }
        });
    }
}

/// Canonical topic identifiers (§6).
pub mod topics {
    pub const WORKFLOW_CREATED: &str = "workflow-created";
    pub const STRIPE_DELETION: &str = "stripe-deletion";
    pub const DATABASE_DELETION: &str = "database-deletion";
    pub const CHECKPOINT_VALIDATION: &str = "checkpoint-validation";
    pub const PARALLEL_DELETION_ORCHESTRATOR: &str = "parallel-deletion-orchestrator";
    pub const STEP_COMPLETED: &str = "step-completed";
    pub const STEP_FAILED: &str = "step-failed";
    pub const PARALLEL_STEP_COMPLETED: &str = "parallel-step-completed";
    pub const CHECKPOINT_FAILED: &str = "checkpoint-failed";
    pub const BACKGROUND_JOB_PROGRESS: &str = "background-job-progress";
    pub const PII_DETECTED: &str = "pii-detected";
    pub const AUDIT_LOG: &str = "audit-log";
    pub const WORKFLOW_COMPLETION: &str = "workflow-completion";
    pub const CERTIFICATE_GENERATED: &str = "certificate-generated";
    pub const ZOMBIE_CHECK_SCHEDULED: &str = "zombie-check-scheduled";

    pub fn parallel_deletion_topic(system: &str) -> String {
        format!("{system}-deletion")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKvStore;
    use crate::identifiers::UserIdentifiers;
    use crate::scheduler::RealTimeScheduler;
    use crate::workflow::WorkflowState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StepHandler for CountingHandler {
        async fn handle(&self, _event: StepEvent) -> HandlerOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn rejects_stale_attempt_and_invokes_handler_once_for_fresh_attempt() {
        let kv = Arc::new(InMemoryKvStore::new());
        let manager = Arc::new(WorkflowStateManager::new(kv));
        let ids = UserIdentifiers::new("u1", vec![], vec![], vec![]).unwrap();
        let state = WorkflowState::new("wf-1", "req-1", "v1", ids, &["payments".to_string()], &[]);
        manager.create(state).await.unwrap();

        let bus = Arc::new(EventBus::new(Arc::new(RealTimeScheduler)));
        let dispatcher = StepDispatcher::new(Arc::clone(&bus), Arc::clone(&manager));
        let calls = Arc::new(AtomicUsize::new(0));
        dispatcher.register("test-topic", Arc::new(CountingHandler { calls: Arc::clone(&calls) }));

        bus.emit("test-topic", StepEvent::new("wf-1", "payments", 1, serde_json::json!({})));
        bus.emit("test-topic", StepEvent::new("wf-1", "payments", 1, serde_json::json!({})));
        bus.emit("test-topic", StepEvent::new("wf-1", "payments", 2, serde_json::json!({})));

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
