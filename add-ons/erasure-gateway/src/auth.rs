//! Principal extraction (§1 non-goal: "auth/JWT issuance ... out of scope").
//!
//! The Engine consumes a role on every request but does not mint or verify
//! tokens itself — that is the job of whatever sits in front of this
//! gateway in production (an API gateway, a service mesh sidecar, a JWT
//! verifier). Here a principal is read straight off three headers set by
//! that upstream layer; this binary trusts them as-is, the same way the
//! teacher's gateway trusts `X-API-Key` without itself implementing OAuth.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use async_trait::async_trait;
use erasure_core::errors::{ErasureError, ErrorCategory};

const HEADER_ROLE: &str = "x-erasure-role";
const HEADER_USER_ID: &str = "x-erasure-user-id";
const HEADER_ORGANIZATION: &str = "x-erasure-organization";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    ComplianceOfficer,
    LegalCounsel,
    Legal,
    ComplianceAdmin,
    Auditor,
    SystemAdmin,
}

impl Role {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().replace('-', "_").as_str() {
            "COMPLIANCE_OFFICER" => Some(Role::ComplianceOfficer),
            "LEGAL_COUNSEL" => Some(Role::LegalCounsel),
            "LEGAL" => Some(Role::Legal),
            "COMPLIANCE_ADMIN" => Some(Role::ComplianceAdmin),
            "AUDITOR" => Some(Role::Auditor),
            "SYSTEM_ADMIN" => Some(Role::SystemAdmin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
    pub organization: String,
}

impl Principal {
    /// §6 role checks: POST /erasure-request/:id/certificate is readable by
    /// Legal, ComplianceAdmin, Auditor, or SystemAdmin.
    pub fn can_read_certificate(&self) -> bool {
        matches!(self.role, Role::Legal | Role::ComplianceAdmin | Role::Auditor | Role::SystemAdmin)
    }

    pub fn require_role(&self, role: Role) -> Result<(), ErasureError> {
        if self.role == role {
            Ok(())
        } else {
            Err(ErasureError::new(ErrorCategory::Auth, format!("this action requires role {role:?}")))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = crate::error::ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);

        let role_raw = header(HEADER_ROLE)
            .ok_or_else(|| ErasureError::new(ErrorCategory::Auth, format!("missing {HEADER_ROLE} header")))?;
        let role = Role::parse(&role_raw)
            .ok_or_else(|| ErasureError::new(ErrorCategory::Auth, format!("unrecognised role '{role_raw}'")))?;
        let user_id = header(HEADER_USER_ID)
            .ok_or_else(|| ErasureError::new(ErrorCategory::Auth, format!("missing {HEADER_USER_ID} header")))?;
        let organization = header(HEADER_ORGANIZATION).unwrap_or_default();

        Ok(Principal { user_id, role, organization })
    }
}
