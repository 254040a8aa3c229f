// cloud-pipelines-core/src/hashing.rs
// ============================================================================
// Module: Canonical Hashing
// Description: RFC 8785 JSON canonicalization and MD5 content hashing.
// Purpose: Provide the deterministic digests artifact data and cache keys
// depend on for reproducibility.
// Dependencies: serde, serde_jcs, md-5
// ============================================================================

//! ## Overview
//! Hashes are **not** algorithm-pluggable: MD5 is required specifically, with
//! digests always rendered as `md5=<lowercase-hex>`, because the cache key
//! and artifact data hash must reproduce byte-for-byte against the existing
//! deployed fleet's expectations. JSON canonicalization still follows RFC
//! 8785 (JCS) via `serde_jcs`, giving sorted keys and tight separators before
//! the bytes are hashed.

use md5::Digest;
use md5::Md5;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while computing canonical hashes.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

/// An MD5 content digest rendered in the `md5=<hex>` form used throughout
/// the cache key and artifact data hash fields.
pub type CacheKey = String;

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Hashes raw bytes with MD5 and renders the digest as `md5=<hex>`.
#[must_use]
pub fn md5_hex(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    format!("md5={}", hex_encode(&digest))
}

/// Hashes canonical JSON of a serializable value with MD5.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn md5_hex_of_canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, HashError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(md5_hex(&bytes))
}

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test assertions")]
mod tests {
    use super::md5_hex;
    use super::md5_hex_of_canonical_json;

    #[test]
    fn md5_of_known_string_matches_reference() {
        assert_eq!(md5_hex(b"0.5"), "md5=d310cb367d993fb6fb584b198a2fd72c");
    }

    #[test]
    fn canonical_json_sorts_keys_before_hashing() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(
            md5_hex_of_canonical_json(&a).unwrap(),
            md5_hex_of_canonical_json(&b).unwrap()
        );
    }
}
