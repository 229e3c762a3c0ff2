//! `UserIdentifiers` — the immutable bundle captured at request time (§3).

use serde::{Deserialize, Serialize};

use crate::errors::ErasureError;

/// Ordered, de-duplicated set of strings, preserving first-seen order.
/// Small enough for these bundles that a `Vec` with a membership check on
/// insert is clearer than pulling in an indexset crate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedUniqueSet(Vec<String>);

impl OrderedUniqueSet {
    pub fn from_iter_dedup(values: impl IntoIterator<Item = String>) -> Self {
        let mut out = Vec::new();
        for v in values {
            if !out.contains(&v) {
                out.push(v);
            }
        }
        Self(out)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }
}

/// Immutable identity bundle for the end-user subject to the erasure request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentifiers {
    pub user_id: String,
    #[serde(default)]
    pub emails: OrderedUniqueSet,
    #[serde(default)]
    pub phones: OrderedUniqueSet,
    #[serde(default)]
    pub aliases: OrderedUniqueSet,
}

impl UserIdentifiers {
    pub fn new(
        user_id: impl Into<String>,
        emails: Vec<String>,
        phones: Vec<String>,
        aliases: Vec<String>,
    ) -> Result<Self, ErasureError> {
        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return Err(ErasureError::validation("userId must not be empty"));
        }
        Ok(Self {
            user_id,
            emails: OrderedUniqueSet::from_iter_dedup(emails),
            phones: OrderedUniqueSet::from_iter_dedup(phones),
            aliases: OrderedUniqueSet::from_iter_dedup(aliases),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupes_preserving_first_seen_order() {
        let s = OrderedUniqueSet::from_iter_dedup(vec![
            "a@x.com".to_string(),
            "b@x.com".to_string(),
            "a@x.com".to_string(),
        ]);
        assert_eq!(s.as_slice(), &["a@x.com".to_string(), "b@x.com".to_string()]);
    }

    #[test]
    fn rejects_empty_user_id() {
        let err = UserIdentifiers::new("   ", vec![], vec![], vec![]).unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }
}
