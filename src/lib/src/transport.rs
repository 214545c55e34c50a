//! Fetching repository files over HTTP or from a local directory.

use crate::error::TrustError;
use std::path::PathBuf;

/// Read-only access to a repository's `metadata/` and `targets/` trees.
///
/// `Ok(None)` means the remote definitively does not have the path, which
/// callers rely on to end the root version probe. Every other failure is an
/// error.
pub trait Transport: Send + Sync {
    fn fetch(&self, path: &str) -> Result<Option<Vec<u8>>, TrustError>;
}

/// Fetches over HTTP(S) with one GET per file.
pub struct HttpTransport {
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        HttpTransport { base_url }
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, path: &str) -> Result<Option<Vec<u8>>, TrustError> {
        let url = format!("{}/{}", self.base_url, path);
        log::debug!("Fetching [{url}]");
        let response = match ureq::get(&url).call() {
            Ok(response) => response,
            Err(ureq::Error::StatusCode(404)) | Err(ureq::Error::StatusCode(410)) => {
                return Ok(None);
            }
            Err(e) => {
                return Err(TrustError::TransportError {
                    path: path.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        let body = response
            .into_body()
            .read_to_vec()
            .map_err(|e| TrustError::TransportError {
                path: path.to_string(),
                reason: format!("Failed to read response body: {e}"),
            })?;
        Ok(Some(body))
    }
}

/// Serves a repository directory on local disk, mainly for air-gapped
/// mirrors and tests.
pub struct FileTransport {
    base_dir: PathBuf,
}

impl FileTransport {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        FileTransport {
            base_dir: base_dir.into(),
        }
    }
}

impl Transport for FileTransport {
    fn fetch(&self, path: &str) -> Result<Option<Vec<u8>>, TrustError> {
        // The path comes from metadata contents, so it gets the same
        // traversal rules as target paths.
        if !crate::metadata::is_safe_relative_path(path) {
            return Err(TrustError::TransportError {
                path: path.to_string(),
                reason: "Unsafe repository path".to_string(),
            });
        }
        let full = self.base_dir.join(path);
        match std::fs::read(&full) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TrustError::TransportError {
                path: path.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Pick a transport from a repository URL scheme.
pub fn transport_for_url(url: &str) -> Result<Box<dyn Transport>, TrustError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(Box::new(HttpTransport::new(url)))
    } else if let Some(dir) = url.strip_prefix("file://") {
        Ok(Box::new(FileTransport::new(dir)))
    } else {
        Err(TrustError::UsageError(
            "repository URL must start with http://, https://, or file://",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_transport_roundtrip() {
        let dir = std::env::temp_dir().join("upseal_test_file_transport");
        std::fs::create_dir_all(dir.join("metadata")).unwrap();
        std::fs::write(dir.join("metadata/root.json"), b"{}").unwrap();

        let transport = FileTransport::new(&dir);
        assert_eq!(
            transport.fetch("metadata/root.json").unwrap(),
            Some(b"{}".to_vec())
        );
        assert_eq!(transport.fetch("metadata/2.root.json").unwrap(), None);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_file_transport_rejects_traversal() {
        let transport = FileTransport::new("/nonexistent");
        assert!(transport.fetch("../etc/passwd").is_err());
        assert!(transport.fetch("/etc/passwd").is_err());
    }

    #[test]
    fn test_transport_for_url_schemes() {
        assert!(transport_for_url("https://updates.example/repo").is_ok());
        assert!(transport_for_url("http://localhost:8000").is_ok());
        assert!(transport_for_url("file:///tmp/repo").is_ok());
        assert!(matches!(
            transport_for_url("ftp://mirror.example"),
            Err(TrustError::UsageError(_))
        ));
    }

    #[test]
    fn test_http_transport_trims_trailing_slash() {
        let transport = HttpTransport::new("https://updates.example/repo/");
        assert_eq!(transport.base_url, "https://updates.example/repo");
    }
}
