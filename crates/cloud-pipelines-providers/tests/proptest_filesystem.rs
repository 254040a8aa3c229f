// crates/cloud-pipelines-providers/tests/proptest_filesystem.rs
// ============================================================================
// Module: Filesystem Storage Provider Property-Based Tests
// Description: Fuzzes arbitrary byte payloads through upload/download.
// Purpose: Ensure the provider round-trips any byte content without panics,
// independent of the md5 hash it reports alongside.
// ============================================================================

#![allow(clippy::unwrap_used, reason = "test assertions")]

use cloud_pipelines_core::StorageProvider;
use cloud_pipelines_providers::FilesystemStorageProvider;
use proptest::prelude::*;

proptest! {
    #[test]
    fn arbitrary_bytes_round_trip(bytes in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("file://{}", dir.path().join("blob").display());
        let provider = FilesystemStorageProvider::new();

        provider.upload_from_bytes(&uri, &bytes).unwrap();
        let round_tripped = provider.download_as_bytes(&uri).unwrap();
        prop_assert_eq!(round_tripped, bytes.clone());

        let info = provider.get_info(&uri).unwrap();
        prop_assert_eq!(info.total_size, bytes.len() as u64);
        prop_assert!(!info.is_dir);
    }

    #[test]
    fn nested_relative_names_never_panic(segments in proptest::collection::vec("[a-zA-Z0-9_-]{1,12}", 1..5)) {
        let dir = tempfile::tempdir().unwrap();
        let relative = segments.join("/");
        let uri = format!("file://{}", dir.path().join(&relative).display());
        let provider = FilesystemStorageProvider::new();

        provider.upload_from_text(&uri, "payload").unwrap();
        prop_assert_eq!(provider.download_as_text(&uri).unwrap(), "payload");
    }
}
