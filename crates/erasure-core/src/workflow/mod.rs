pub mod manager;
pub mod state;

pub use manager::WorkflowStateManager;
pub use state::{
    BackgroundJob, BackgroundJobStatus, BackgroundJobType, DataLineageSnapshot, FindingProvenance,
    JobCheckpoint, LegalHold, Phase, PiiFinding, PiiType, StepEvidence, StepRecord, StepStatus,
    WorkflowState, WorkflowStatus, workflow_key,
};
