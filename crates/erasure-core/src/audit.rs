//! AuditTrail (§4.3): a per-workflow append-only hash chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto;
use crate::errors::ErasureError;

pub const GENESIS_HASH: &str = "genesis";

/// One link in the chain. `hash = H(prevHash ‖ canonicalize(payload ‖ eventType ‖ timestamp))`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub workflow_id: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    pub prev_hash: String,
    pub hash: String,
}

/// The exact fields that get hashed together for one event. Kept separate
/// from `AuditEvent` so the hash input is explicit and doesn't silently
/// change shape if `AuditEvent` grows new fields later.
#[derive(Serialize)]
struct AuditEventHashInput<'a> {
    payload: &'a Value,
    event_type: &'a str,
    timestamp: DateTime<Utc>,
}

/// Append-only hash-chained audit log for a single workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditTrail {
    workflow_id: String,
    events: Vec<AuditEvent>,
}

impl AuditTrail {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            events: Vec::new(),
        }
    }

    /// Reconstructs a trail from persisted events and re-verifies it,
    /// refusing to hand back a trail that doesn't check out.
    pub fn from_events(workflow_id: impl Into<String>, events: Vec<AuditEvent>) -> Result<Self, ErasureError> {
        let trail = Self {
            workflow_id: workflow_id.into(),
            events,
        };
        if !trail.verify() {
            return Err(ErasureError::audit_integrity("audit chain failed verification on load"));
        }
        Ok(trail)
    }

    /// Extends the chain using the current tip as `prevHash`.
    pub fn append(&mut self, event_type: impl Into<String>, payload: Value) -> &AuditEvent {
        let event_type = event_type.into();
        let timestamp = Utc::now();
        let prev_hash = self.root().to_string();
        let hash_input = AuditEventHashInput {
            payload: &payload,
            event_type: &event_type,
            timestamp,
        };
        let hash = crypto::chain(&prev_hash, &hash_input);
        self.events.push(AuditEvent {
            workflow_id: self.workflow_id.clone(),
            event_type,
            timestamp,
            payload,
            prev_hash,
            hash,
        });
        self.events.last().expect("just pushed")
    }

    /// The current tip hash, or `GENESIS_HASH` if the trail is empty.
    pub fn root(&self) -> &str {
        self.events.last().map(|e| e.hash.as_str()).unwrap_or(GENESIS_HASH)
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    /// Replays every hop and compares; any payload mutation breaks this.
    pub fn verify(&self) -> bool {
        let mut prev = GENESIS_HASH.to_string();
        for event in &self.events {
            if event.prev_hash != prev {
                return false;
            }
            let hash_input = AuditEventHashInput {
                payload: &event.payload,
                event_type: &event.event_type,
                timestamp: event.timestamp,
            };
            let computed = crypto::chain(&prev, &hash_input);
            if computed != event.hash {
                return false;
            }
            prev = event.hash.clone();
        }
        true
    }
}
