//! `ContentAnalyzer` contract (§4.5 input, §8 property 13): the seam the
//! PII-scan phase calls into. The real implementation is an LLM-backed
//! scanner; that integration is out of scope (§1). This module ships only
//! the contract and the value types its response must carry — reference
//! implementations live in `erasure-connectors`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ErasureResult;
use crate::workflow::{FindingProvenance, PiiFinding};

/// One unit of content submitted for scanning: a system, a location within
/// it (channel, table row, object key, …), and the raw text.
#[derive(Debug, Clone)]
pub struct ScanChunk {
    pub system: String,
    pub location: String,
    pub text: String,
    pub provenance: FindingProvenance,
}

/// Metadata the scanner must report alongside its findings (§8 property
/// 13): how much pre-filtering happened before the expensive model call,
/// how many chunks were processed, and the sum of finding confidences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub pre_filter_matches: u32,
    pub chunk_count: u32,
    pub total_confidence_score: f64,
}

/// Structured output of one analysis call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub findings: Vec<PiiFinding>,
    pub processed_at: DateTime<Utc>,
    pub content_hash: String,
    pub metadata: AnalysisMetadata,
}

#[async_trait]
pub trait ContentAnalyzer: Send + Sync {
    async fn analyze(&self, chunks: &[ScanChunk]) -> ErasureResult<AnalysisResult>;
}

pub type SharedContentAnalyzer = std::sync::Arc<dyn ContentAnalyzer>;
