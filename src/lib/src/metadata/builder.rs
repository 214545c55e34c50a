//! Repository-side construction of the signed metadata hierarchy and the
//! on-disk repository layout clients fetch from.

use super::{
    consistent_target_name, is_safe_relative_path, sha256_hex, MetaFileInfo, RoleDocument, RoleKeys,
    RoleType, Root, SignedMetadata, Snapshot, TargetFileInfo, Targets, Timestamp,
    SNAPSHOT_META_NAME, SPEC_VERSION, TARGETS_META_NAME,
};
use crate::error::TrustError;
use crate::keys::KeySet;
use crate::secure_file;
use crate::time::{format_timestamp, SystemTimeSource, TimeSource};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const DAY_SECS: u64 = 86_400;

/// How long each role document stays valid, measured from build time.
///
/// The defaults step down with refresh frequency: the timestamp rotates
/// daily while the root is reissued quarterly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirySchedule {
    pub root_secs: u64,
    pub targets_secs: u64,
    pub snapshot_secs: u64,
    pub timestamp_secs: u64,
}

impl Default for ExpirySchedule {
    fn default() -> Self {
        ExpirySchedule {
            root_secs: 90 * DAY_SECS,
            targets_secs: 30 * DAY_SECS,
            snapshot_secs: 14 * DAY_SECS,
            timestamp_secs: DAY_SECS,
        }
    }
}

enum TargetSource {
    Bytes(Vec<u8>),
    File(PathBuf),
}

impl TargetSource {
    fn info(&self) -> Result<TargetFileInfo, TrustError> {
        match self {
            TargetSource::Bytes(bytes) => Ok(TargetFileInfo::from_bytes(bytes)),
            TargetSource::File(path) => TargetFileInfo::from_file(path),
        }
    }

    fn load(&self) -> Result<Vec<u8>, TrustError> {
        match self {
            TargetSource::Bytes(bytes) => Ok(bytes.clone()),
            TargetSource::File(path) => Ok(std::fs::read(path)?),
        }
    }
}

struct BuiltDocument {
    envelope: SignedMetadata,
    file_bytes: Vec<u8>,
    version: u64,
}

/// Builds and signs the four role documents bottom-up, then publishes them
/// as a repository directory.
///
/// Parents embed digests of their children's exact file bytes, so the build
/// order is fixed: root, targets, snapshot, timestamp. Requesting a document
/// before its child exists is an error rather than a silently wrong tree.
pub struct MetadataBuilder<'a> {
    keys: &'a KeySet,
    time: Box<dyn TimeSource>,
    expiry: ExpirySchedule,
    version: u64,
    consistent_snapshot: bool,
    base_url: Option<String>,
    target_sources: BTreeMap<String, TargetSource>,
    root: Option<BuiltDocument>,
    targets: Option<BuiltDocument>,
    snapshot: Option<BuiltDocument>,
    timestamp: Option<BuiltDocument>,
}

impl<'a> MetadataBuilder<'a> {
    pub fn new(keys: &'a KeySet) -> Self {
        MetadataBuilder {
            keys,
            time: Box::new(SystemTimeSource),
            expiry: ExpirySchedule::default(),
            version: 1,
            consistent_snapshot: true,
            base_url: None,
            target_sources: BTreeMap::new(),
            root: None,
            targets: None,
            snapshot: None,
            timestamp: None,
        }
    }

    /// Version stamped into all four documents. Defaults to 1.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn with_expiry_schedule(mut self, expiry: ExpirySchedule) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn with_consistent_snapshot(mut self, enabled: bool) -> Self {
        self.consistent_snapshot = enabled;
        self
    }

    /// Advertised base URL, recorded in the repository info file.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_time_source(mut self, time: Box<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    /// Stage an in-memory artifact under a repository-relative path.
    pub fn add_target_bytes(
        &mut self,
        path: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<(), TrustError> {
        let path = path.into();
        if !is_safe_relative_path(&path) {
            return Err(TrustError::UsageError(
                "target path must be relative with no parent traversal",
            ));
        }
        self.target_sources.insert(path, TargetSource::Bytes(bytes));
        Ok(())
    }

    /// Stage a file from disk under a repository-relative path.
    pub fn add_target_file(
        &mut self,
        path: impl Into<String>,
        file: impl Into<PathBuf>,
    ) -> Result<(), TrustError> {
        let path = path.into();
        if !is_safe_relative_path(&path) {
            return Err(TrustError::UsageError(
                "target path must be relative with no parent traversal",
            ));
        }
        self.target_sources
            .insert(path, TargetSource::File(file.into()));
        Ok(())
    }

    pub fn build_root(&mut self) -> Result<(), TrustError> {
        let now = self.time.now_unix()?;
        let mut roles = BTreeMap::new();
        for role in RoleType::ALL {
            roles.insert(
                role,
                RoleKeys {
                    keyids: self.keys.key_ids(role)?,
                    threshold: 1,
                },
            );
        }
        let root = Root {
            doc_type: RoleType::Root,
            spec_version: SPEC_VERSION.to_string(),
            consistent_snapshot: self.consistent_snapshot,
            version: self.version,
            expires: format_timestamp(now.saturating_add(self.expiry.root_secs)),
            keys: self.keys.public_keys(),
            roles,
        };
        root.validate()?;
        self.root = Some(self.finish_document(&root)?);
        Ok(())
    }

    pub fn build_targets(&mut self) -> Result<(), TrustError> {
        let now = self.time.now_unix()?;
        let mut targets = BTreeMap::new();
        for (path, source) in &self.target_sources {
            targets.insert(path.clone(), source.info()?);
        }
        let doc = Targets {
            doc_type: RoleType::Targets,
            spec_version: SPEC_VERSION.to_string(),
            version: self.version,
            expires: format_timestamp(now.saturating_add(self.expiry.targets_secs)),
            targets,
        };
        self.targets = Some(self.finish_document(&doc)?);
        Ok(())
    }

    pub fn build_snapshot(&mut self) -> Result<(), TrustError> {
        let targets = self
            .targets
            .as_ref()
            .ok_or(TrustError::UsageError("snapshot requires built targets metadata"))?;
        let mut meta = BTreeMap::new();
        meta.insert(
            TARGETS_META_NAME.to_string(),
            MetaFileInfo::for_bytes(targets.version, &targets.file_bytes),
        );
        let now = self.time.now_unix()?;
        let doc = Snapshot {
            doc_type: RoleType::Snapshot,
            spec_version: SPEC_VERSION.to_string(),
            version: self.version,
            expires: format_timestamp(now.saturating_add(self.expiry.snapshot_secs)),
            meta,
        };
        self.snapshot = Some(self.finish_document(&doc)?);
        Ok(())
    }

    pub fn build_timestamp(&mut self) -> Result<(), TrustError> {
        let snapshot = self
            .snapshot
            .as_ref()
            .ok_or(TrustError::UsageError("timestamp requires built snapshot metadata"))?;
        let mut meta = BTreeMap::new();
        meta.insert(
            SNAPSHOT_META_NAME.to_string(),
            MetaFileInfo::for_bytes(snapshot.version, &snapshot.file_bytes),
        );
        let now = self.time.now_unix()?;
        let doc = Timestamp {
            doc_type: RoleType::Timestamp,
            spec_version: SPEC_VERSION.to_string(),
            version: self.version,
            expires: format_timestamp(now.saturating_add(self.expiry.timestamp_secs)),
            meta,
        };
        self.timestamp = Some(self.finish_document(&doc)?);
        Ok(())
    }

    /// Build the whole hierarchy in dependency order.
    pub fn build_all(&mut self) -> Result<(), TrustError> {
        self.build_root()?;
        self.build_targets()?;
        self.build_snapshot()?;
        self.build_timestamp()?;
        Ok(())
    }

    pub fn root_envelope(&self) -> Option<&SignedMetadata> {
        self.root.as_ref().map(|built| &built.envelope)
    }

    pub fn targets_envelope(&self) -> Option<&SignedMetadata> {
        self.targets.as_ref().map(|built| &built.envelope)
    }

    pub fn snapshot_envelope(&self) -> Option<&SignedMetadata> {
        self.snapshot.as_ref().map(|built| &built.envelope)
    }

    pub fn timestamp_envelope(&self) -> Option<&SignedMetadata> {
        self.timestamp.as_ref().map(|built| &built.envelope)
    }

    /// Write the built hierarchy and all staged targets under `repo_dir`.
    ///
    /// Layout:
    ///
    /// ```text
    /// repo_dir/
    ///   repository-info.json
    ///   metadata/{role}.json
    ///   metadata/{version}.{role}.json
    ///   targets/{path}
    ///   targets/{dir}/{sha256}.{name}     (consistent snapshots only)
    /// ```
    pub fn publish(&self, repo_dir: &Path) -> Result<(), TrustError> {
        let built = [
            (RoleType::Root, self.root.as_ref()),
            (RoleType::Targets, self.targets.as_ref()),
            (RoleType::Snapshot, self.snapshot.as_ref()),
            (RoleType::Timestamp, self.timestamp.as_ref()),
        ];
        if built.iter().any(|(_, doc)| doc.is_none()) {
            return Err(TrustError::UsageError(
                "publish requires all four documents to be built",
            ));
        }

        let metadata_dir = repo_dir.join("metadata");
        for (role, doc) in built {
            let doc = doc.ok_or(TrustError::UsageError(
                "publish requires all four documents to be built",
            ))?;
            secure_file::atomic_replace(&metadata_dir.join(role.file_name()), &doc.file_bytes)?;
            secure_file::atomic_replace(
                &metadata_dir.join(role.versioned_file_name(doc.version)),
                &doc.file_bytes,
            )?;
        }

        let targets_dir = repo_dir.join("targets");
        for (path, source) in &self.target_sources {
            let bytes = source.load()?;
            secure_file::atomic_replace(&targets_dir.join(path), &bytes)?;
            if self.consistent_snapshot {
                let addressed = consistent_target_name(path, &sha256_hex(&bytes));
                secure_file::atomic_replace(&targets_dir.join(addressed), &bytes)?;
            }
        }

        let info = RepositoryInfo {
            base_url: self.base_url.clone(),
            consistent_snapshot: self.consistent_snapshot,
            metadata_version: self.version,
            generated: format_timestamp(self.time.now_unix()?),
        };
        let info_bytes = serde_json::to_vec_pretty(&info)
            .map_err(|e| TrustError::InternalError(format!("Serialize repository info: {e}")))?;
        secure_file::atomic_replace(&repo_dir.join("repository-info.json"), &info_bytes)?;

        log::debug!(
            "Published metadata version [{}] with [{}] targets to [{}]",
            self.version,
            self.target_sources.len(),
            repo_dir.display()
        );
        Ok(())
    }

    fn finish_document<T: RoleDocument>(&self, doc: &T) -> Result<BuiltDocument, TrustError> {
        let signed = serde_json::to_value(doc).map_err(|e| {
            TrustError::InternalError(format!("Serialize {} metadata: {e}", T::TYPE))
        })?;
        let canonical = serde_json::to_vec(&signed).map_err(|e| {
            TrustError::InternalError(format!("Serialize {} metadata: {e}", T::TYPE))
        })?;
        let signature = self.keys.sign(T::TYPE, &canonical)?;
        let envelope = SignedMetadata {
            signed,
            signatures: vec![signature],
        };
        let file_bytes = envelope.to_file_bytes()?;
        Ok(BuiltDocument {
            envelope,
            file_bytes,
            version: doc.version(),
        })
    }
}

#[derive(Serialize)]
struct RepositoryInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    base_url: Option<String>,
    consistent_snapshot: bool,
    metadata_version: u64,
    generated: String,
}
