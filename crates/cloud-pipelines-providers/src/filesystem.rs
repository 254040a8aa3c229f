// cloud-pipelines-providers/src/filesystem.rs
// ============================================================================
// Module: Filesystem Storage Provider
// Description: A `file://`-rooted StorageProvider over the local filesystem.
// Purpose: Give the orchestrator and CLI a concrete storage-provider implementation
// without depending on an external object store.
// Dependencies: cloud-pipelines-core
// ============================================================================

//! ## Overview
//! URIs handled by this provider are `file://<absolute-path>`; anything else
//! is rejected as [`StorageError::UnsupportedScheme`]. Directories are
//! supported as a convenience for directory-valued artifacts: `get_info`
//! reports `is_dir` and a hash over the sorted recursive listing, and
//! `download_as_bytes`/`download_as_text` refuse to read a directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use cloud_pipelines_core::StorageError;
use cloud_pipelines_core::StorageInfo;
use cloud_pipelines_core::StorageProvider;
use cloud_pipelines_core::md5_hex;

const SCHEME_PREFIX: &str = "file://";

/// A [`StorageProvider`] backed by the local filesystem, addressed by
/// `file://` URIs.
#[derive(Debug, Clone, Default)]
pub struct FilesystemStorageProvider;

impl FilesystemStorageProvider {
    /// Creates a new filesystem storage provider.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl StorageProvider for FilesystemStorageProvider {
    fn download_as_text(&self, uri: &str) -> Result<String, StorageError> {
        let path = resolve_path(uri)?;
        fs::read_to_string(&path).map_err(|err| io_error(&path, &err))
    }

    fn download_as_bytes(&self, uri: &str) -> Result<Vec<u8>, StorageError> {
        let path = resolve_path(uri)?;
        fs::read(&path).map_err(|err| io_error(&path, &err))
    }

    fn get_info(&self, uri: &str) -> Result<StorageInfo, StorageError> {
        let path = resolve_path(uri)?;
        let metadata = fs::metadata(&path).map_err(|err| io_error(&path, &err))?;
        if metadata.is_dir() {
            let (total_size, hash) = hash_directory(&path)?;
            let mut hashes = BTreeMap::new();
            hashes.insert("md5".to_string(), hash);
            Ok(StorageInfo {
                total_size,
                is_dir: true,
                hashes,
            })
        } else {
            let bytes = fs::read(&path).map_err(|err| io_error(&path, &err))?;
            let mut hashes = BTreeMap::new();
            hashes.insert("md5".to_string(), md5_hex(&bytes));
            Ok(StorageInfo {
                total_size: bytes.len() as u64,
                is_dir: false,
                hashes,
            })
        }
    }

    fn upload_from_text(&self, uri: &str, text: &str) -> Result<(), StorageError> {
        self.upload_from_bytes(uri, text.as_bytes())
    }

    fn upload_from_bytes(&self, uri: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = resolve_path(uri)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| io_error(parent, &err))?;
        }
        fs::write(&path, bytes).map_err(|err| io_error(&path, &err))
    }
}

/// Resolves a `file://` URI to a local path, rejecting any other scheme.
fn resolve_path(uri: &str) -> Result<PathBuf, StorageError> {
    uri.strip_prefix(SCHEME_PREFIX)
        .map(PathBuf::from)
        .ok_or_else(|| StorageError::UnsupportedScheme(uri.to_string()))
}

/// Builds an error from an I/O failure, distinguishing a missing path.
fn io_error(path: &Path, err: &std::io::Error) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(path.display().to_string())
    } else {
        StorageError::Io(format!("{}: {err}", path.display()))
    }
}

/// Hashes a directory's recursive contents, combining the sorted relative
/// paths and file bytes so the digest is stable across traversal order.
fn hash_directory(root: &Path) -> Result<(u64, String), StorageError> {
    let mut entries = Vec::new();
    collect_files(root, root, &mut entries)?;
    entries.sort();

    let mut total_size = 0_u64;
    let mut manifest = Vec::new();
    for relative in &entries {
        let full_path = root.join(relative);
        let bytes = fs::read(&full_path).map_err(|err| io_error(&full_path, &err))?;
        total_size += bytes.len() as u64;
        manifest.extend_from_slice(relative.as_bytes());
        manifest.push(0);
        manifest.extend_from_slice(md5_hex(&bytes).as_bytes());
        manifest.push(0);
    }
    Ok((total_size, md5_hex(&manifest)))
}

/// Recursively collects file paths under `dir`, relative to `root`, using
/// forward slashes so the manifest is platform-independent.
fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), StorageError> {
    let read_dir = fs::read_dir(dir).map_err(|err| io_error(dir, &err))?;
    for entry in read_dir {
        let entry = entry.map_err(|err| io_error(dir, &err))?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let relative = path.strip_prefix(root).unwrap_or(&path);
            out.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test assertions")]
mod tests {
    use super::FilesystemStorageProvider;
    use cloud_pipelines_core::StorageError;
    use cloud_pipelines_core::StorageProvider;

    fn file_uri(path: &std::path::Path) -> String {
        format!("file://{}", path.display())
    }

    #[test]
    fn round_trips_text() {
        let dir = tempfile::tempdir().unwrap();
        let uri = file_uri(&dir.path().join("a/b/data"));
        let provider = FilesystemStorageProvider::new();
        provider.upload_from_text(&uri, "hello").unwrap();
        assert_eq!(provider.download_as_text(&uri).unwrap(), "hello");
    }

    #[test]
    fn get_info_reports_size_and_hash() {
        let dir = tempfile::tempdir().unwrap();
        let uri = file_uri(&dir.path().join("data"));
        let provider = FilesystemStorageProvider::new();
        provider.upload_from_bytes(&uri, b"0.5").unwrap();
        let info = provider.get_info(&uri).unwrap();
        assert_eq!(info.total_size, 3);
        assert!(!info.is_dir);
        assert_eq!(info.hashes.get("md5").map(String::as_str), Some("d310cb367d993fb6fb584b198a2fd72c"));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let uri = file_uri(&dir.path().join("missing"));
        let provider = FilesystemStorageProvider::new();
        assert!(matches!(provider.download_as_text(&uri), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn non_file_scheme_is_rejected() {
        let provider = FilesystemStorageProvider::new();
        assert!(matches!(
            provider.download_as_text("gs://bucket/key"),
            Err(StorageError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn directory_hash_is_stable_across_traversal_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("artifact");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("a.txt"), b"alpha").unwrap();
        std::fs::write(root.join("sub/b.txt"), b"beta").unwrap();

        let provider = FilesystemStorageProvider::new();
        let uri = file_uri(&root);
        let first = provider.get_info(&uri).unwrap();
        assert!(first.total_size > 0);

        let second = provider.get_info(&uri).unwrap();
        assert_eq!(first.hashes, second.hashes);
        assert_eq!(first.total_size, second.total_size);
    }
}
