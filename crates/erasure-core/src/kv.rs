//! KVStore port (§4.1): `get`, `set`, `compareAndSwap`, `scanPrefix`.
//!
//! `InMemoryKvStore` binds the contract to a `DashMap` with linearisable
//! CAS per key for tests and local runs, exactly the "mocked global mutable
//! maps for state in tests" → "DashMap + CAS" mapping from the Design
//! Notes. `SledKvStore` is the persistent counterpart, grounded on
//! `pagi-core::shadow_store::ShadowStore`'s use of `sled::Db`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

/// Opaque value stored under a key, plus an optional expiry.
#[derive(Debug, Clone)]
pub struct StoredValue {
    pub bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    pub fn new(bytes: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            bytes,
            expires_at: ttl.map(|d| Instant::now() + d),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.map(|t| Instant::now() >= t).unwrap_or(false)
    }
}

/// Result of a compare-and-swap attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The swap succeeded; the key now holds `new`.
    Swapped,
    /// The swap failed; callers get back what was actually stored (`None`
    /// if the key is now absent/expired) so they can retry.
    Conflict { actual: Option<Vec<u8>> },
}

/// Persistence port. A single CAS on a given key is linearisable.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>);
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new: Vec<u8>,
        ttl: Option<Duration>,
    ) -> CasOutcome;
    async fn delete(&self, key: &str);
    async fn scan_prefix(&self, prefix: &str) -> Vec<(String, Vec<u8>)>;
}

/// In-memory `KvStore` for tests and default local runs.
#[derive(Default)]
pub struct InMemoryKvStore {
    map: DashMap<String, StoredValue>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_live(&self, key: &str) -> Option<Vec<u8>> {
        match self.map.get(key) {
            Some(entry) if !entry.is_expired() => Some(entry.bytes.clone()),
            Some(_) => None,
            None => None,
        }
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.read_live(key)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        self.map.insert(key.to_string(), StoredValue::new(value, ttl));
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new: Vec<u8>,
        ttl: Option<Duration>,
    ) -> CasOutcome {
        // `DashMap::entry` holds the shard lock for the whole closure, so the
        // read-compare-write below is atomic with respect to other callers.
        use dashmap::mapref::entry::Entry;
        match self.map.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = if occupied.get().is_expired() { None } else { Some(occupied.get().bytes.clone()) };
                if current == expected {
                    occupied.insert(StoredValue::new(new, ttl));
                    CasOutcome::Swapped
                } else {
                    CasOutcome::Conflict { actual: current }
                }
            }
            Entry::Vacant(vacant) => {
                if expected.is_none() {
                    vacant.insert(StoredValue::new(new, ttl));
                    CasOutcome::Swapped
                } else {
                    CasOutcome::Conflict { actual: None }
                }
            }
        }
    }

    async fn delete(&self, key: &str) {
        self.map.remove(key);
    }

    async fn scan_prefix(&self, prefix: &str) -> Vec<(String, Vec<u8>)> {
        self.map
            .iter()
            .filter(|e| e.key().starts_with(prefix) && !e.value().is_expired())
            .map(|e| (e.key().clone(), e.value().bytes.clone()))
            .collect()
    }
}

/// `sled`-backed persistent `KvStore`. TTLs are enforced lazily on read
/// (sled has no native expiry), recording the deadline alongside the value.
pub struct SledKvStore {
    db: sled::Db,
}

impl SledKvStore {
    pub fn open_path(path: &std::path::Path) -> Result<Self, String> {
        let db = sled::open(path).map_err(|e| format!("sled open: {e}"))?;
        Ok(Self { db })
    }

    fn encode(value: &[u8], ttl: Option<Duration>) -> Vec<u8> {
        let deadline_ms: i64 = ttl
            .map(|d| chrono::Utc::now().timestamp_millis() + d.as_millis() as i64)
            .unwrap_or(-1);
        let mut out = deadline_ms.to_be_bytes().to_vec();
        out.extend_from_slice(value);
        out
    }

    fn decode(raw: &[u8]) -> Option<Vec<u8>> {
        if raw.len() < 8 {
            return None;
        }
        let (head, body) = raw.split_at(8);
        let deadline_ms = i64::from_be_bytes(head.try_into().ok()?);
        if deadline_ms >= 0 && chrono::Utc::now().timestamp_millis() >= deadline_ms {
            return None;
        }
        Some(body.to_vec())
    }
}

#[async_trait]
impl KvStore for SledKvStore {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let raw = self.db.get(key.as_bytes()).ok().flatten()?;
        Self::decode(&raw)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let _ = self.db.insert(key.as_bytes(), Self::encode(&value, ttl));
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new: Vec<u8>,
        ttl: Option<Duration>,
    ) -> CasOutcome {
        let current_raw = self.db.get(key.as_bytes()).ok().flatten();
        let current = current_raw.as_deref().and_then(Self::decode);
        if current != expected {
            return CasOutcome::Conflict { actual: current };
        }
        let old_ivec = current_raw;
        let new_encoded = Self::encode(&new, ttl);
        match self.db.compare_and_swap(key.as_bytes(), old_ivec, Some(new_encoded)) {
            Ok(Ok(())) => CasOutcome::Swapped,
            _ => {
                let actual = self.db.get(key.as_bytes()).ok().flatten().as_deref().and_then(Self::decode);
                CasOutcome::Conflict { actual }
            }
        }
    }

    async fn delete(&self, key: &str) {
        let _ = self.db.remove(key.as_bytes());
    }

    async fn scan_prefix(&self, prefix: &str) -> Vec<(String, Vec<u8>)> {
        self.db
            .scan_prefix(prefix.as_bytes())
            .filter_map(|r| r.ok())
            .filter_map(|(k, v)| {
                let key = String::from_utf8(k.to_vec()).ok()?;
                let value = Self::decode(&v)?;
                Some((key, value))
            })
            .collect()
    }
}
