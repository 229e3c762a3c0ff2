//! CryptoUtils (§4.2): hashing, the hash chain, certificate ids, and
//! certificate signing. Canonical JSON relies on `serde_json::Value`'s
//! default `Map` being a `BTreeMap` (keys sorted) and `serde_json::to_vec`
//! producing compact output with no insignificant whitespace, so
//! "canonicalize" is just "serialize the sorted value".

use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 of `bytes`, lower-hex encoded (64 hex chars).
pub fn hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

/// Serializes `value` to canonical JSON: sorted keys, no insignificant
/// whitespace, UTF-8. Panics only if `T`'s `Serialize` impl itself fails,
/// which would indicate a programmer error (non-string map keys, etc.).
pub fn canonicalize<T: Serialize>(value: &T) -> Vec<u8> {
    let as_value: serde_json::Value = serde_json::to_value(value).expect("canonicalize: value must serialize to JSON");
    serde_json::to_vec(&as_value).expect("canonicalize: JSON value must serialize")
}

/// `hash(prevHash ‖ canonicalJSON(payload))` — one hop in the audit chain.
pub fn chain<T: Serialize>(prev_hash: &str, payload: &T) -> String {
    let mut buf = prev_hash.as_bytes().to_vec();
    buf.extend_from_slice(&canonicalize(payload));
    hash(&buf)
}

/// Replays a chain of `(hash, payload)` pairs starting from `genesis_prev`
/// and returns whether every hash matches `chain(prev, payload)`.
pub fn verify_chain<T: Serialize>(genesis_prev: &str, hashes: &[String], payloads: &[T]) -> bool {
    if hashes.len() != payloads.len() {
        return false;
    }
    let mut prev = genesis_prev.to_string();
    for (expected_hash, payload) in hashes.iter().zip(payloads.iter()) {
        let computed = chain(&prev, payload);
        if &computed != expected_hash {
            return false;
        }
        prev = expected_hash.clone();
    }
    true
}

/// 16 hex uppercase characters, cryptographically random (8 random bytes).
pub fn certificate_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode_upper(bytes)
}

/// HMAC-SHA256 signature over `canonicalize(value)`, hex-encoded.
/// Deterministic for a fixed `key` and a fixed serialized value — callers
/// must exclude the signature field itself from `T` before calling this
/// (the certificate module enforces that by signing a `SignableCertificate`
/// view that has no `signature` field).
pub fn sign<T: Serialize>(value: &T, key: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(&canonicalize(value));
    hex::encode(mac.finalize().into_bytes())
}

/// Recomputes the signature over `value` and compares against `signature`.
pub fn verify<T: Serialize>(value: &T, key: &[u8], signature: &str) -> bool {
    sign(value, key) == signature
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chain_is_deterministic_and_order_sensitive() {
        let payload = json!({"b": 2, "a": 1});
        let h1 = chain("genesis", &payload);
        let h2 = chain("genesis", &payload);
        assert_eq!(h1, h2);
        assert_ne!(h1, chain("other-genesis", &payload));
    }

    #[test]
    fn key_order_does_not_affect_canonical_hash() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert_eq!(chain("x", &a), chain("x", &b));
    }

    #[test]
    fn verify_chain_detects_payload_tampering() {
        let payloads = vec![json!({"step": 1}), json!({"step": 2})];
        let mut hashes = Vec::new();
        let mut prev = "genesis".to_string();
        for p in &payloads {
            let h = chain(&prev, p);
            hashes.push(h.clone());
            prev = h;
        }
        assert!(verify_chain("genesis", &hashes, &payloads));

        let tampered = vec![json!({"step": 1}), json!({"step": 999})];
        assert!(!verify_chain("genesis", &hashes, &tampered));
    }

    #[test]
    fn certificate_id_is_16_uppercase_hex_chars() {
        let id = certificate_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn sign_and_verify_round_trip_and_detect_mutation() {
        let key = b"test-signing-key";
        let cert = json!({"certificateId": "ABC123", "workflowId": "wf-1"});
        let sig = sign(&cert, key);
        assert!(verify(&cert, key, &sig));

        let mutated = json!({"certificateId": "ABC123", "workflowId": "wf-2"});
        assert!(!verify(&mutated, key, &sig));
    }
}
