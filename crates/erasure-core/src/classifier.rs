//! PIIClassifier (§4.5): a pure threshold router over PII findings.

use crate::policy::Policy;
use crate::workflow::PiiFinding;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    AutoDelete,
    ManualReview,
    Ignore,
}

/// Classifies one finding against policy thresholds.
///
/// - `confidence >= autoDeleteThreshold` → `AutoDelete`
/// - `manualReviewThreshold <= confidence < autoDeleteThreshold` → `ManualReview`
/// - else → `Ignore`
pub fn classify(finding: &PiiFinding, policy: &Policy) -> Disposition {
    if finding.confidence >= policy.auto_delete_threshold {
        Disposition::AutoDelete
    } else if finding.confidence >= policy.manual_review_threshold {
        Disposition::ManualReview
    } else {
        Disposition::Ignore
    }
}

/// Result of partitioning a batch of findings. Order within each bucket
/// matches the order of `findings` (order-stable).
#[derive(Debug, Default)]
pub struct Partition {
    pub auto_delete: Vec<PiiFinding>,
    pub manual_review: Vec<PiiFinding>,
    pub ignore: Vec<PiiFinding>,
}

/// Partitions `findings` into the three disposition buckets. Exactly
/// partitions the input (every finding lands in exactly one bucket,
/// `|auto| + |review| + |ignore| == |findings|`), deterministic, and
/// preserves all finding fields (findings are moved, not rebuilt).
pub fn partition(findings: Vec<PiiFinding>, policy: &Policy) -> Partition {
    let mut out = Partition::default();
    for finding in findings {
        match classify(&finding, policy) {
            Disposition::AutoDelete => out.auto_delete.push(finding),
            Disposition::ManualReview => out.manual_review.push(finding),
            Disposition::Ignore => out.ignore.push(finding),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Jurisdiction;
    use crate::workflow::{FindingProvenance, PiiType};

    fn finding(confidence: f64) -> PiiFinding {
        PiiFinding {
            match_id: "m1".to_string(),
            system: "slack".to_string(),
            location: "#general".to_string(),
            pii_type: PiiType::Email,
            confidence,
            snippet: "a@b.com".to_string(),
            provenance: FindingProvenance::default(),
        }
    }

    #[test]
    fn confidence_boundaries_s6() {
        let policy = Policy::for_jurisdiction(Jurisdiction::Eu).unwrap();
        assert_eq!(classify(&finding(0.49999), &policy), Disposition::Ignore);
        assert_eq!(classify(&finding(0.5), &policy), Disposition::ManualReview);
        assert_eq!(classify(&finding(0.79999), &policy), Disposition::ManualReview);
        assert_eq!(classify(&finding(0.8), &policy), Disposition::AutoDelete);
    }

    #[test]
    fn partition_is_exact_and_disjoint() {
        let policy = Policy::for_jurisdiction(Jurisdiction::Eu).unwrap();
        let findings = vec![finding(0.1), finding(0.6), finding(0.9), finding(0.5)];
        let total = findings.len();
        let result = partition(findings, &policy);
        assert_eq!(result.auto_delete.len() + result.manual_review.len() + result.ignore.len(), total);
        assert_eq!(result.auto_delete.len(), 1);
        assert_eq!(result.manual_review.len(), 2);
        assert_eq!(result.ignore.len(), 1);
    }

    #[test]
    fn partition_is_order_stable_within_buckets() {
        let policy = Policy::for_jurisdiction(Jurisdiction::Eu).unwrap();
        let mut a = finding(0.9);
        a.match_id = "first".to_string();
        let mut b = finding(0.95);
        b.match_id = "second".to_string();
        let result = partition(vec![a, b], &policy);
        assert_eq!(result.auto_delete[0].match_id, "first");
        assert_eq!(result.auto_delete[1].match_id, "second");
    }
}
