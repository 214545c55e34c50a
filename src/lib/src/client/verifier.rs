//! Byte-exact verification of downloaded targets.
//!
//! A target is only ever written to the local targets directory after its
//! fetched bytes match the length and every supported digest declared in
//! trusted targets metadata. A failed download leaves no file behind.

use super::TrustState;
use crate::audit;
use crate::error::TrustError;
use crate::metadata::{
    consistent_target_name, is_safe_relative_path, sha256_hex, TargetFileInfo, SHA256_ALGORITHM,
};
use crate::secure_file;
use crate::transport::Transport;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A target fetched, verified, and installed locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedTarget {
    pub target_path: String,
    pub local_path: PathBuf,
    pub length: u64,
    pub hashes: BTreeMap<String, String>,
}

pub(crate) struct TargetVerifier<'a> {
    state: &'a TrustState,
    transport: &'a dyn Transport,
    targets_dir: &'a Path,
}

impl<'a> TargetVerifier<'a> {
    pub fn new(
        state: &'a TrustState,
        transport: &'a dyn Transport,
        targets_dir: &'a Path,
    ) -> Self {
        TargetVerifier {
            state,
            transport,
            targets_dir,
        }
    }

    /// Fetch `target_path`, verify its bytes against trusted targets
    /// metadata, and install it under the targets directory.
    pub fn download(&self, target_path: &str) -> Result<DownloadedTarget, TrustError> {
        let correlation_id = audit::new_correlation_id();
        match self.fetch_and_verify(target_path) {
            Ok(target) => {
                audit::log_target_verified(&correlation_id, target_path, target.length);
                Ok(target)
            }
            Err(e) => {
                audit::log_target_rejected(&correlation_id, target_path, e.kind(), &e.to_string());
                Err(e)
            }
        }
    }

    fn fetch_and_verify(&self, target_path: &str) -> Result<DownloadedTarget, TrustError> {
        let targets = self
            .state
            .targets()
            .ok_or_else(|| TrustError::TargetNotFound(target_path.to_string()))?;
        let info = targets
            .targets
            .get(target_path)
            .ok_or_else(|| TrustError::TargetNotFound(target_path.to_string()))?;

        // The catalog itself is attacker-influenced input: a declared path
        // must still be a clean relative path before it names a local file.
        if !is_safe_relative_path(target_path) {
            return Err(TrustError::VerificationFailed {
                path: target_path.to_string(),
                reason: "Unsafe target path".to_string(),
            });
        }

        let bytes = self.fetch_target(target_path, info)?;
        verify_target_bytes(target_path, &bytes, info)?;

        let local_path = self.targets_dir.join(target_path);
        secure_file::atomic_replace(&local_path, &bytes)?;
        log::debug!(
            "Verified target [{}] installed at [{}]",
            target_path,
            local_path.display()
        );

        Ok(DownloadedTarget {
            target_path: target_path.to_string(),
            local_path,
            length: info.length,
            hashes: info.hashes.clone(),
        })
    }

    /// Consistent repositories serve an immutable digest-named copy next to
    /// the plain name; prefer it, and fall back to the plain name when the
    /// copy is absent.
    fn fetch_target(
        &self,
        target_path: &str,
        info: &TargetFileInfo,
    ) -> Result<Vec<u8>, TrustError> {
        if self.state.root().consistent_snapshot {
            if let Some(sha256) = info.hashes.get(SHA256_ALGORITHM) {
                let hashed = format!("targets/{}", consistent_target_name(target_path, sha256));
                if let Some(bytes) = self.transport.fetch(&hashed)? {
                    return Ok(bytes);
                }
                log::debug!(
                    "No digest-named copy at [{}]; falling back to the plain name",
                    hashed
                );
            }
        }
        let plain = format!("targets/{target_path}");
        self.transport
            .fetch(&plain)?
            .ok_or_else(|| TrustError::TransportError {
                path: plain,
                reason: "Not found".to_string(),
            })
    }
}

/// Check fetched bytes against the declared length and digests. Length goes
/// first so an oversized response is rejected before being hashed. Unknown
/// digest algorithms are skipped, but at least one supported algorithm must
/// be declared and match.
fn verify_target_bytes(
    target_path: &str,
    bytes: &[u8],
    info: &TargetFileInfo,
) -> Result<(), TrustError> {
    let length = bytes.len() as u64;
    if length != info.length {
        return Err(TrustError::VerificationFailed {
            path: target_path.to_string(),
            reason: format!(
                "Length {} does not match declared length {}",
                length, info.length
            ),
        });
    }

    let mut checked = 0usize;
    for (algorithm, declared) in &info.hashes {
        match algorithm.as_str() {
            SHA256_ALGORITHM => {
                let actual = sha256_hex(bytes);
                if actual != *declared {
                    return Err(TrustError::VerificationFailed {
                        path: target_path.to_string(),
                        reason: format!(
                            "sha256 digest {actual} does not match declared {declared}"
                        ),
                    });
                }
                checked += 1;
            }
            other => {
                log::debug!(
                    "Skipping unsupported hash algorithm [{}] for [{}]",
                    other,
                    target_path
                );
            }
        }
    }
    if checked == 0 {
        return Err(TrustError::VerificationFailed {
            path: target_path.to_string(),
            reason: "No supported hash algorithm declared".to_string(),
        });
    }
    Ok(())
}
