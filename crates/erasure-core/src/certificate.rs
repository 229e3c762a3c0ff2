//! CertificateGenerator (§4.12, §6): builds a signed Certificate of
//! Destruction once every required and parallel step is `DELETED` and the
//! PII scan/background jobs have settled. Identifiers are redacted before
//! signing when `Policy.redactCertificates` is set, but the signature
//! itself always covers exactly what's on the wire.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::errors::{ErasureError, ErasureResult};
use crate::identifiers::UserIdentifiers;
use crate::policy::Policy;
use crate::workflow::{StepStatus, WorkflowState};

/// Evidence for one system's deletion, as it appears on the certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateReceipt {
    pub system: String,
    pub status: String,
    pub receipt: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The certificate body with everything except `signature` — this is
/// exactly what gets hashed/signed, so adding a field here changes what the
/// signature covers (intentionally; see `crypto::sign`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignableCertificate {
    pub certificate_id: String,
    pub workflow_id: String,
    pub request_id: String,
    pub user_identifiers: RedactedIdentifiers,
    pub policy_version: String,
    pub receipts: Vec<CertificateReceipt>,
    pub pii_findings_count: usize,
    pub audit_root_hash: String,
    pub issued_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub hash_algorithm: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    #[serde(flatten)]
    pub body: SignableCertificate,
    pub signature: String,
}

/// Identifiers as they appear on an issued certificate: either verbatim or
/// redacted, per `Policy.redactCertificates` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactedIdentifiers {
    pub user_id: String,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub aliases: Vec<String>,
}

const CERTIFICATE_VALIDITY_DAYS: i64 = 365;
const HASH_ALGORITHM: &str = "sha256";

fn redact_user_id(user_id: &str) -> String {
    let chars: Vec<char> = user_id.chars().collect();
    if chars.len() <= 2 {
        return "*".repeat(chars.len());
    }
    format!("{}***{}", chars[0], chars[chars.len() - 1])
}

fn redact_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let chars: Vec<char> = local.chars().collect();
            let redacted_local = if chars.len() <= 2 {
                "*".repeat(chars.len())
            } else {
                format!("{}***{}", chars[0], chars[chars.len() - 1])
            };
            format!("{redacted_local}@{domain}")
        }
        None => "***".to_string(),
    }
}

fn redact_phone(phone: &str) -> String {
    let leading_plus = phone.starts_with('+');
    let prefix = if leading_plus { "+" } else { "" };
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 2 {
        return format!("{prefix}{}", "*".repeat(digits.len()));
    }
    let tail: String = digits[digits.len() - 2..].iter().collect();
    format!("{prefix}{}{tail}", "*".repeat(digits.len() - 2))
}

fn redact_alias(alias: &str) -> String {
    if alias.len() <= 2 {
        "*".repeat(alias.len())
    } else {
        format!("{}{}", &alias[..1], "*".repeat(alias.len() - 1))
    }
}

fn redacted_identifiers(identifiers: &UserIdentifiers, redact: bool) -> RedactedIdentifiers {
    if !redact {
        return RedactedIdentifiers {
            user_id: identifiers.user_id.clone(),
            emails: identifiers.emails.iter().cloned().collect(),
            phones: identifiers.phones.iter().cloned().collect(),
            aliases: identifiers.aliases.iter().cloned().collect(),
        };
    }
    RedactedIdentifiers {
        user_id: redact_user_id(&identifiers.user_id),
        emails: identifiers.emails.iter().map(|e| redact_email(e)).collect(),
        phones: identifiers.phones.iter().map(|p| redact_phone(p)).collect(),
        aliases: identifiers.aliases.iter().map(|a| redact_alias(a)).collect(),
    }
}

pub struct CertificateGenerator {
    signing_key: Vec<u8>,
}

impl CertificateGenerator {
    pub fn new(signing_key: Vec<u8>) -> Self {
        Self { signing_key }
    }

    /// Verifies every required/parallel step is `DELETED`, builds the
    /// receipts list, redacts identifiers per policy, signs, and returns
    /// the certificate. Errors (does not issue a partial certificate) if
    /// any tracked step hasn't reached `DELETED`.
    pub fn generate(&self, state: &WorkflowState, policy: &Policy, audit_root_hash: &str) -> ErasureResult<Certificate> {
        let mut receipts = Vec::new();
        for (system, record) in &state.steps {
            if record.status != StepStatus::Deleted {
                return Err(ErasureError::new(
                    crate::errors::ErrorCategory::Certificate,
                    format!("cannot issue certificate: step '{system}' is {:?}, not DELETED", record.status),
                ));
            }
            receipts.push(CertificateReceipt {
                system: system.clone(),
                status: "DELETED".to_string(),
                receipt: record.evidence.receipt.clone(),
                completed_at: record.evidence.timestamp,
            });
        }
        receipts.sort_by(|a, b| a.system.cmp(&b.system));

        let issued_at = Utc::now();
        let body = SignableCertificate {
            certificate_id: crypto::certificate_id(),
            workflow_id: state.workflow_id.clone(),
            request_id: state.request_id.clone(),
            user_identifiers: redacted_identifiers(&state.user_identifiers, policy.redact_certificates),
            policy_version: state.policy_version.clone(),
            receipts,
            pii_findings_count: state.pii_findings.len(),
            audit_root_hash: audit_root_hash.to_string(),
            issued_at,
            valid_until: issued_at + ChronoDuration::days(CERTIFICATE_VALIDITY_DAYS),
            hash_algorithm: HASH_ALGORITHM.to_string(),
        };
        let signature = crypto::sign(&body, &self.signing_key);
        Ok(Certificate { body, signature })
    }

    /// Re-verifies a certificate's signature against this generator's key.
    pub fn verify(&self, certificate: &Certificate) -> bool {
        crypto::verify(&certificate.body, &self.signing_key, &certificate.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Jurisdiction;
    use crate::workflow::StepEvidence;

    fn completed_state() -> WorkflowState {
        let ids = UserIdentifiers::new("user-12345", vec!["person@example.com".to_string()], vec!["+1 555 123 4567".to_string()], vec!["alias1".to_string()]).unwrap();
        let mut state = WorkflowState::new("wf-1", "req-1", "v1", ids, &["payments".to_string(), "database".to_string()], &[]);
        for system in ["payments", "database"] {
            state
                .transition_step(
                    system,
                    StepStatus::Deleted,
                    Some(StepEvidence {
                        receipt: Some(format!("{system}-receipt")),
                        timestamp: Some(Utc::now()),
                        raw_response: None,
                    }),
                )
                .unwrap();
        }
        state
    }

    #[test]
    fn issues_and_verifies_a_signed_certificate() {
        let policy = Policy::for_jurisdiction(Jurisdiction::Eu).unwrap();
        let generator = CertificateGenerator::new(b"test-signing-key".to_vec());
        let cert = generator.generate(&completed_state(), &policy, "root-hash").unwrap();
        assert_eq!(cert.body.receipts.len(), 2);
        assert!(generator.verify(&cert));
    }

    #[test]
    fn refuses_to_issue_when_a_step_is_not_deleted() {
        let policy = Policy::for_jurisdiction(Jurisdiction::Eu).unwrap();
        let generator = CertificateGenerator::new(b"test-signing-key".to_vec());
        let mut state = completed_state();
        state.transition_step("payments", StepStatus::Deleted, None).unwrap();
        state.steps.get_mut("database").unwrap().status = StepStatus::Failed;
        let err = generator.generate(&state, &policy, "root-hash").unwrap_err();
        assert_eq!(err.code(), "CERTIFICATE");
    }

    #[test]
    fn redaction_masks_identifiers_when_enabled() {
        let mut policy = Policy::for_jurisdiction(Jurisdiction::Eu).unwrap();
        policy.redact_certificates = true;
        let generator = CertificateGenerator::new(b"k".to_vec());
        let cert = generator.generate(&completed_state(), &policy, "root-hash").unwrap();
        assert_ne!(cert.body.user_identifiers.user_id, "user-12345");
        assert!(cert.body.user_identifiers.emails[0].contains('@'));
        assert_ne!(cert.body.user_identifiers.emails[0], "person@example.com");
    }

    #[test]
    fn redact_user_id_keeps_first_and_last_char() {
        let redacted = redact_user_id("gdpr_test_001");
        assert!(redacted.starts_with('g'));
        assert!(redacted.ends_with('1'));
        assert!(redacted.contains("***"));
    }

    #[test]
    fn redact_phone_keeps_leading_plus_and_last_two_digits() {
        let redacted = redact_phone("+15551234567");
        assert!(redacted.starts_with('+'));
        assert!(redacted.ends_with("67"));
        assert!(redacted.contains("*********"));
    }

    #[test]
    fn tampered_certificate_fails_verification() {
        let policy = Policy::for_jurisdiction(Jurisdiction::Eu).unwrap();
        let generator = CertificateGenerator::new(b"k".to_vec());
        let mut cert = generator.generate(&completed_state(), &policy, "root-hash").unwrap();
        cert.body.pii_findings_count = 999;
        assert!(!generator.verify(&cert));
    }
}
