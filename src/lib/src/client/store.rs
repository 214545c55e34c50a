//! Durable storage for accepted metadata.

use crate::error::TrustError;
use crate::metadata::{RoleType, SignedMetadata};
use crate::secure_file;
use std::path::{Path, PathBuf};

/// The client's metadata directory: one latest file per role plus a
/// version-addressed archive of everything ever accepted.
///
/// ```text
/// metadata_dir/
///   root.json          latest accepted per role
///   {version}.root.json  write-once archive copies
///   ...
/// ```
pub struct TrustStore {
    metadata_dir: PathBuf,
}

impl TrustStore {
    pub fn new(metadata_dir: impl Into<PathBuf>) -> Self {
        TrustStore {
            metadata_dir: metadata_dir.into(),
        }
    }

    pub fn metadata_dir(&self) -> &Path {
        &self.metadata_dir
    }

    pub fn ensure_layout(&self) -> Result<(), TrustError> {
        std::fs::create_dir_all(&self.metadata_dir)?;
        Ok(())
    }

    pub fn latest_path(&self, role: RoleType) -> PathBuf {
        self.metadata_dir.join(role.file_name())
    }

    pub fn archive_path(&self, role: RoleType, version: u64) -> PathBuf {
        self.metadata_dir.join(role.versioned_file_name(version))
    }

    /// Load the latest accepted metadata for a role, or `None` if the role
    /// has never been persisted.
    pub fn load(&self, role: RoleType) -> Result<Option<SignedMetadata>, TrustError> {
        let path = self.latest_path(role);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        SignedMetadata::from_bytes(&bytes, role).map(Some)
    }

    /// Persist accepted metadata: archive the versioned copy, then atomically
    /// replace the latest file.
    ///
    /// The latest file is never replaced by an older version, so a stale
    /// writer racing a newer one cannot regress the store. Archive copies are
    /// write-once and keep whatever bytes were accepted first for a version.
    pub fn persist(&self, role: RoleType, envelope: &SignedMetadata) -> Result<(), TrustError> {
        let version = envelope
            .signed_version()
            .ok_or_else(|| TrustError::InternalError(format!("{role} metadata has no version")))?;

        self.ensure_layout()?;
        let bytes = envelope.to_file_bytes()?;
        secure_file::write_if_absent(&self.archive_path(role, version), &bytes)?;

        if let Ok(Some(existing)) = self.load(role) {
            if let Some(on_disk) = existing.signed_version() {
                if on_disk > version {
                    log::warn!(
                        "Keeping on-disk {role} version [{on_disk}], not replacing with older version [{version}]"
                    );
                    return Ok(());
                }
            }
        }

        secure_file::atomic_replace(&self.latest_path(role), &bytes)?;
        Ok(())
    }
}
