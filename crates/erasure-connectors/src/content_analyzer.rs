//! `ContentAnalyzer` reference implementation. The contract itself
//! (`ContentAnalyzer`, `ScanChunk`, `AnalysisResult`, `AnalysisMetadata`)
//! is owned by `erasure-core` (§4.5); the real implementation is an
//! LLM-backed scanner, which is out of scope (§1). This crate ships a
//! deterministic regex-based reference analyzer good enough for tests and
//! local runs.

pub use erasure_core::content_analyzer::{AnalysisMetadata, AnalysisResult, ContentAnalyzer, ScanChunk, SharedContentAnalyzer};

use async_trait::async_trait;
use chrono::Utc;
use erasure_core::errors::ErasureResult;
use erasure_core::workflow::PiiType;

/// Regex-based reference analyzer: enough structure to exercise the PII
/// scan phase end to end without calling out to a real model. Matches are
/// pre-filtered by a cheap regex pass (`preFilterMatches`) before being
/// scored, mirroring a real scanner's cheap-filter-then-classify shape.
pub struct RegexContentAnalyzer {
    email: regex::Regex,
    phone: regex::Regex,
}

impl Default for RegexContentAnalyzer {
    fn default() -> Self {
        Self {
            email: regex::Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").expect("static regex"),
            phone: regex::Regex::new(r"\+?\d[\d\-. ]{7,}\d").expect("static regex"),
        }
    }
}

impl RegexContentAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentAnalyzer for RegexContentAnalyzer {
    async fn analyze(&self, chunks: &[ScanChunk]) -> ErasureResult<AnalysisResult> {
        let mut findings = Vec::new();
        let mut pre_filter_matches = 0u32;
        let mut total_confidence_score = 0.0f64;

        for (idx, chunk) in chunks.iter().enumerate() {
            for (match_idx, m) in self.email.find_iter(&chunk.text).enumerate() {
                pre_filter_matches += 1;
                let confidence = 0.95;
                total_confidence_score += confidence;
                findings.push(erasure_core::workflow::PiiFinding {
                    match_id: format!("{}-{idx}-email-{match_idx}", chunk.system),
                    system: chunk.system.clone(),
                    location: chunk.location.clone(),
                    pii_type: PiiType::Email,
                    confidence,
                    snippet: m.as_str().to_string(),
                    provenance: chunk.provenance.clone(),
                });
            }
            for (match_idx, m) in self.phone.find_iter(&chunk.text).enumerate() {
                pre_filter_matches += 1;
                let digit_count = m.as_str().chars().filter(|c| c.is_ascii_digit()).count();
                let confidence = if digit_count >= 10 { 0.7 } else { 0.4 };
                total_confidence_score += confidence;
                findings.push(erasure_core::workflow::PiiFinding {
                    match_id: format!("{}-{idx}-phone-{match_idx}", chunk.system),
                    system: chunk.system.clone(),
                    location: chunk.location.clone(),
                    pii_type: PiiType::Phone,
                    confidence,
                    snippet: m.as_str().to_string(),
                    provenance: chunk.provenance.clone(),
                });
            }
        }

        let concatenated: String = chunks.iter().map(|c| c.text.as_str()).collect();
        Ok(AnalysisResult {
            content_hash: erasure_core::crypto::hash(concatenated.as_bytes()),
            processed_at: Utc::now(),
            findings,
            metadata: AnalysisMetadata {
                pre_filter_matches,
                chunk_count: chunks.len().max(1) as u32,
                total_confidence_score,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use erasure_core::workflow::FindingProvenance;

    #[tokio::test]
    async fn finds_emails_and_phones_with_distinct_confidences() {
        let analyzer = RegexContentAnalyzer::new();
        let chunks = vec![ScanChunk {
            system: "slack".to_string(),
            location: "#general".to_string(),
            text: "reach me at a@b.com or +1-555-123-4567".to_string(),
            provenance: FindingProvenance::default(),
        }];
        let result = analyzer.analyze(&chunks).await.unwrap();
        assert_eq!(result.findings.len(), 2);
        assert_eq!(result.metadata.chunk_count, 1);
        assert_eq!(result.metadata.pre_filter_matches, 2);
        assert!(result.metadata.total_confidence_score > 0.0);
    }

    #[tokio::test]
    async fn empty_chunks_produce_empty_findings_with_stable_hash() {
        let analyzer = RegexContentAnalyzer::new();
        let result = analyzer.analyze(&[]).await.unwrap();
        assert!(result.findings.is_empty());
        assert_eq!(result.content_hash, erasure_core::crypto::hash(b""));
    }
}
