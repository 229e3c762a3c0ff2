//! Policy loader (§4.17 / jurisdiction-parameterised config).
//!
//! Mirrors the teacher's `SovereignConfig::from_env` shape: a typed struct
//! with `#[serde(default = "...")]` per field, one env var per field, and a
//! post-load validation pass rather than scattering `env::var` calls across
//! the codebase.

use serde::{Deserialize, Serialize};

use crate::errors::ErasureError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Jurisdiction {
    Eu,
    Us,
    Other,
}

impl Jurisdiction {
    /// Default zombie re-check interval in days, used when the policy does
    /// not explicitly override `zombie_check_interval_days`.
    pub fn default_zombie_interval_days(self) -> u32 {
        match self {
            Jurisdiction::Eu => 30,
            Jurisdiction::Us => 45,
            Jurisdiction::Other => 60,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_required_systems() -> Vec<String> {
    vec!["payments".to_string(), "database".to_string()]
}

fn default_parallel_systems() -> Vec<String> {
    vec![
        "intercom".to_string(),
        "sendgrid".to_string(),
        "crm".to_string(),
        "analytics".to_string(),
    ]
}

fn default_external_system_timeout_ms() -> u64 {
    30_000
}

/// Read-only configuration frozen into `WorkflowState.policyVersion` at
/// workflow creation (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub jurisdiction: Jurisdiction,
    #[serde(default = "Policy::default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "Policy::default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "Policy::default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: f64,
    #[serde(default)]
    pub zombie_check_interval_days: Option<u32>,
    #[serde(default = "Policy::default_auto_delete_threshold")]
    pub auto_delete_threshold: f64,
    #[serde(default = "Policy::default_manual_review_threshold")]
    pub manual_review_threshold: f64,
    #[serde(default = "default_required_systems")]
    pub required_systems: Vec<String>,
    #[serde(default = "default_parallel_systems")]
    pub parallel_systems: Vec<String>,
    #[serde(default = "Policy::default_policy_version")]
    pub policy_version: String,
    #[serde(default = "default_external_system_timeout_ms")]
    pub external_system_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub redact_certificates: bool,
}

impl Policy {
    fn default_max_retry_attempts() -> u32 {
        3
    }
    fn default_initial_retry_delay_ms() -> u64 {
        1000
    }
    fn default_retry_backoff_multiplier() -> f64 {
        2.0
    }
    fn default_auto_delete_threshold() -> f64 {
        0.8
    }
    fn default_manual_review_threshold() -> f64 {
        0.5
    }
    fn default_policy_version() -> String {
        "v1".to_string()
    }

    /// Resolved zombie check interval: explicit override, else the
    /// jurisdiction's statutory default (EU 30d / US 45d / OTHER 60d).
    pub fn zombie_check_interval_days(&self) -> u32 {
        self.zombie_check_interval_days
            .unwrap_or_else(|| self.jurisdiction.default_zombie_interval_days())
    }

    /// Validates the cross-field invariants the spec requires:
    /// `0 <= manualReview < autoDelete <= 1`, positive retry parameters.
    pub fn validate(&self) -> Result<(), ErasureError> {
        if self.max_retry_attempts < 1 {
            return Err(ErasureError::policy_config("maxRetryAttempts must be >= 1"));
        }
        if self.initial_retry_delay_ms == 0 {
            return Err(ErasureError::policy_config("initialRetryDelayMs must be > 0"));
        }
        if self.retry_backoff_multiplier <= 1.0 {
            return Err(ErasureError::policy_config("retryBackoffMultiplier must be > 1"));
        }
        if self.zombie_check_interval_days().eq(&0) {
            return Err(ErasureError::policy_config("zombieCheckIntervalDays must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.manual_review_threshold)
            || !(0.0..=1.0).contains(&self.auto_delete_threshold)
            || !(self.manual_review_threshold < self.auto_delete_threshold)
        {
            return Err(ErasureError::policy_config(
                "thresholds must satisfy 0 <= manualReview < autoDelete <= 1",
            ));
        }
        if self.required_systems.is_empty() {
            return Err(ErasureError::policy_config("requiredSystems must not be empty"));
        }
        Ok(())
    }

    /// Loads defaults for a jurisdiction, then validates.
    pub fn for_jurisdiction(jurisdiction: Jurisdiction) -> Result<Self, ErasureError> {
        let policy = Self {
            jurisdiction,
            max_retry_attempts: Self::default_max_retry_attempts(),
            initial_retry_delay_ms: Self::default_initial_retry_delay_ms(),
            retry_backoff_multiplier: Self::default_retry_backoff_multiplier(),
            zombie_check_interval_days: None,
            auto_delete_threshold: Self::default_auto_delete_threshold(),
            manual_review_threshold: Self::default_manual_review_threshold(),
            required_systems: default_required_systems(),
            parallel_systems: default_parallel_systems(),
            policy_version: Self::default_policy_version(),
            external_system_timeout_ms: default_external_system_timeout_ms(),
            redact_certificates: true,
        };
        policy.validate()?;
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_valid() {
        Policy::for_jurisdiction(Jurisdiction::Eu).unwrap();
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut p = Policy::for_jurisdiction(Jurisdiction::Eu).unwrap();
        p.manual_review_threshold = 0.9;
        p.auto_delete_threshold = 0.5;
        assert!(p.validate().is_err());
    }

    #[test]
    fn jurisdiction_default_intervals() {
        assert_eq!(Jurisdiction::Eu.default_zombie_interval_days(), 30);
        assert_eq!(Jurisdiction::Us.default_zombie_interval_days(), 45);
        assert_eq!(Jurisdiction::Other.default_zombie_interval_days(), 60);
    }
}
