// cloud-pipelines-core/src/uri.rs
// ============================================================================
// Module: URI Layout
// Description: Execution-scoped URI construction and name sanitization.
// Purpose: Implement the layout rules identically for every caller.
// Dependencies: rand, time
// ============================================================================

//! ## Overview
//! Every input, output, and log URI the orchestrator hands to a
//! [`crate::interfaces::StorageProvider`] or
//! [`crate::interfaces::ContainerLauncher`] is scoped under a random
//! execution UUID minted once per launch attempt, never reused across
//! retries (there are none) or cache hits (cache hits reuse the
//! *producer's* URIs via its `ArtifactData`, not fresh ones).

use rand::RngCore;

/// Generates a fresh execution UUID: 12 hex digits of milliseconds-since-epoch
/// concatenated with 8 hex digits of random bytes.
#[must_use]
pub fn generate_execution_uuid() -> String {
    let millis = now_millis();
    let mut random_bytes = [0_u8; 4];
    rand::thread_rng().fill_bytes(&mut random_bytes);
    format!("{millis:012x}{:08x}", u32::from_be_bytes(random_bytes))
}

fn now_millis() -> u64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let millis = now.as_millis();
    // Truncating to 48 bits (12 hex digits) matches the layout's fixed width;
    // this only loses precision after the year 10889.
    (millis & 0xFFFF_FFFF_FFFF) as u64
}

/// Sanitizes an input or output name for use as a URI path component: lowercase,
/// `[^a-z0-9-]` replaced with `-`, repeated `-` collapsed, and leading/trailing
/// `-` trimmed.
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut last_was_dash = false;
    for ch in lowered.chars() {
        let mapped = if ch.is_ascii_lowercase() || ch.is_ascii_digit() { ch } else { '-' };
        if mapped == '-' {
            if !last_was_dash {
                out.push('-');
            }
            last_was_dash = true;
        } else {
            out.push(mapped);
            last_was_dash = false;
        }
    }
    out.trim_matches('-').to_string()
}

/// Builds the input data URI for `input_name` under `exec_uuid`.
#[must_use]
pub fn input_data_uri(data_root_uri: &str, exec_uuid: &str, input_name: &str) -> String {
    format!(
        "{}/by_execution/{exec_uuid}/inputs/{}/data",
        data_root_uri.trim_end_matches('/'),
        sanitize_name(input_name)
    )
}

/// Builds the output data URI for `output_name` under `exec_uuid`.
#[must_use]
pub fn output_data_uri(data_root_uri: &str, exec_uuid: &str, output_name: &str) -> String {
    format!(
        "{}/by_execution/{exec_uuid}/outputs/{}/data",
        data_root_uri.trim_end_matches('/'),
        sanitize_name(output_name)
    )
}

/// Builds the log URI for `exec_uuid`.
#[must_use]
pub fn log_uri(logs_root_uri: &str, exec_uuid: &str) -> String {
    format!("{}/by_execution/{exec_uuid}/log.txt", logs_root_uri.trim_end_matches('/'))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test assertions")]
mod tests {
    use super::input_data_uri;
    use super::log_uri;
    use super::output_data_uri;
    use super::sanitize_name;

    #[test]
    fn sanitize_lowercases_and_collapses() {
        assert_eq!(sanitize_name("  My Input!! Name--2  "), "my-input-name-2");
    }

    #[test]
    fn sanitize_trims_leading_and_trailing_dashes() {
        assert_eq!(sanitize_name("--weird--"), "weird");
    }

    #[test]
    fn uris_follow_layout() {
        assert_eq!(
            input_data_uri("gs://bucket/data", "abc123", "My Input"),
            "gs://bucket/data/by_execution/abc123/inputs/my-input/data"
        );
        assert_eq!(
            output_data_uri("gs://bucket/data", "abc123", "Out"),
            "gs://bucket/data/by_execution/abc123/outputs/out/data"
        );
        assert_eq!(
            log_uri("gs://bucket/logs", "abc123"),
            "gs://bucket/logs/by_execution/abc123/log.txt"
        );
    }
}
