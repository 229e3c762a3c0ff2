pub mod content_analyzer;
pub mod external_system;
pub mod mock;

pub use content_analyzer::{AnalysisMetadata, AnalysisResult, ContentAnalyzer, RegexContentAnalyzer, ScanChunk, SharedContentAnalyzer};
pub use external_system::{DeletionContext, DeletionOutcome, ExternalSystem, SharedExternalSystem};
pub use mock::MockExternalSystem;
