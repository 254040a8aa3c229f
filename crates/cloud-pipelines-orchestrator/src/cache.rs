// cloud-pipelines-orchestrator/src/cache.rs
// ============================================================================
// Module: Cache Index
// Description: Deterministic cache-key computation over a container spec and
// its resolved input hashes.
// Purpose: Compute cache keys byte-for-byte identically, so two
// cache-equivalent nodes always compute the identical key regardless of
// process or map insertion order.
// Dependencies: cloud-pipelines-core, serde
// ============================================================================

//! ## Overview
//! The key input is a small object carrying the container spec and a sorted
//! map of input name to content hash; canonical JSON (RFC 8785) plus MD5
//! gives the reproducible fingerprint this requires.

use std::collections::BTreeMap;

use cloud_pipelines_core::ContainerSpec;
use cloud_pipelines_core::hashing::CacheKey;
use cloud_pipelines_core::hashing::md5_hex_of_canonical_json;
use serde::Serialize;

use crate::error::OrchestratorError;

#[derive(Serialize)]
struct CacheKeyInput<'a> {
    container_spec: &'a ContainerSpec,
    input_hashes: &'a BTreeMap<String, String>,
}

/// Computes the cache key for a container invocation: the canonical-JSON
/// MD5 of `{"container_spec": ..., "input_hashes": {...}}`.
///
/// # Errors
///
/// Returns [`OrchestratorError::CacheKey`] if canonicalization fails.
pub fn compute_cache_key(
    container_spec: &ContainerSpec,
    input_hashes: &BTreeMap<String, String>,
) -> Result<CacheKey, OrchestratorError> {
    let payload = CacheKeyInput { container_spec, input_hashes };
    Ok(md5_hex_of_canonical_json(&payload)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test assertions")]
mod tests {
    use std::collections::BTreeMap;

    use cloud_pipelines_core::ContainerSpec;

    use super::compute_cache_key;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            image: "busybox".to_string(),
            command: vec!["run".to_string()],
            args: vec![],
            env: BTreeMap::new(),
        }
    }

    #[test]
    fn identical_inputs_produce_identical_keys() {
        let mut a = BTreeMap::new();
        a.insert("x".to_string(), "md5=deadbeef".to_string());
        let mut b = BTreeMap::new();
        b.insert("x".to_string(), "md5=deadbeef".to_string());
        assert_eq!(compute_cache_key(&spec(), &a).unwrap(), compute_cache_key(&spec(), &b).unwrap());
    }

    #[test]
    fn differing_inputs_produce_differing_keys() {
        let mut a = BTreeMap::new();
        a.insert("x".to_string(), "md5=deadbeef".to_string());
        let mut b = BTreeMap::new();
        b.insert("x".to_string(), "md5=cafef00d".to_string());
        assert_ne!(compute_cache_key(&spec(), &a).unwrap(), compute_cache_key(&spec(), &b).unwrap());
    }
}
