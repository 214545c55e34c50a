//! Client-side trust: bootstrap, refresh, and verified downloads.
//!
//! Every operation is stateless across invocations. In-memory trust is
//! rebuilt from the metadata directory each time, advanced against the
//! repository, persisted, and dropped.

mod bootstrap;
mod refresh;
mod store;
mod verifier;

pub use refresh::RefreshOutcome;
pub use store::TrustStore;
pub use verifier::DownloadedTarget;

use crate::audit;
use crate::error::TrustError;
use crate::metadata::{
    verify_signatures, RoleDocument, Root, SignedMetadata, Snapshot, Targets, Timestamp,
};
use crate::time::{SystemTimeSource, TimeSource};
use crate::transport::{transport_for_url, Transport};
use refresh::RefreshEngine;
use verifier::TargetVerifier;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A role document together with the envelope it arrived in. The envelope is
/// kept because persisting and re-serving metadata must preserve the exact
/// signed bytes.
#[derive(Debug, Clone)]
pub struct TrustedDoc<T> {
    pub doc: T,
    pub envelope: SignedMetadata,
}

/// Everything the client currently trusts: a verified root plus whichever
/// lower roles have been accepted.
#[derive(Debug)]
pub struct TrustState {
    pub(crate) root: TrustedDoc<Root>,
    pub(crate) timestamp: Option<TrustedDoc<Timestamp>>,
    pub(crate) snapshot: Option<TrustedDoc<Snapshot>>,
    pub(crate) targets: Option<TrustedDoc<Targets>>,
}

impl TrustState {
    pub(crate) fn new(root: TrustedDoc<Root>) -> Self {
        TrustState {
            root,
            timestamp: None,
            snapshot: None,
            targets: None,
        }
    }

    /// Rebuild trust from the metadata directory.
    ///
    /// Returns `None` when no usable root is stored. Non-root metadata that no
    /// longer verifies under the stored root, for example after a key
    /// rotation, is discarded rather than treated as an error: the next
    /// refresh simply fetches replacements.
    pub(crate) fn load(store: &TrustStore) -> Option<TrustState> {
        let envelope = match store.load(crate::metadata::RoleType::Root) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("Ignoring unreadable stored root metadata: {e}");
                return None;
            }
        };
        let doc = match bootstrap::verify_root(&envelope) {
            Ok(doc) => doc,
            Err(e) => {
                log::warn!("Ignoring stored root metadata that fails verification: {e}");
                return None;
            }
        };
        let mut state = TrustState::new(TrustedDoc { doc, envelope });
        state.timestamp = load_verified(store, &state.root.doc);
        state.snapshot = load_verified(store, &state.root.doc);
        state.targets = load_verified(store, &state.root.doc);
        Some(state)
    }

    pub fn root(&self) -> &Root {
        &self.root.doc
    }

    pub fn root_version(&self) -> u64 {
        self.root.doc.version
    }

    pub fn timestamp_version(&self) -> Option<u64> {
        self.timestamp.as_ref().map(|t| t.doc.version)
    }

    pub fn snapshot_version(&self) -> Option<u64> {
        self.snapshot.as_ref().map(|s| s.doc.version)
    }

    pub fn targets_version(&self) -> Option<u64> {
        self.targets.as_ref().map(|t| t.doc.version)
    }

    pub fn targets(&self) -> Option<&Targets> {
        self.targets.as_ref().map(|t| &t.doc)
    }
}

fn load_verified<T: RoleDocument>(store: &TrustStore, root: &Root) -> Option<TrustedDoc<T>> {
    let envelope = match store.load(T::TYPE) {
        Ok(Some(envelope)) => envelope,
        Ok(None) => return None,
        Err(e) => {
            log::warn!("Ignoring unreadable stored {} metadata: {e}", T::TYPE);
            return None;
        }
    };
    let verified = verify_signatures(&envelope, T::TYPE, root).and_then(|()| envelope.parse::<T>());
    match verified {
        Ok(doc) => Some(TrustedDoc { doc, envelope }),
        Err(e) => {
            log::warn!("Discarding stored {} metadata: {e}", T::TYPE);
            None
        }
    }
}

/// Where the client finds the repository and keeps its local state.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Repository base URL (`http://`, `https://`, or `file://`).
    pub repo_url: String,
    /// Directory for accepted metadata.
    pub metadata_dir: PathBuf,
    /// Directory verified artifacts are written into.
    pub targets_dir: PathBuf,
    /// Pinned root metadata file used when no root is stored yet.
    pub trusted_root: PathBuf,
}

impl ClientConfig {
    pub fn new(
        repo_url: impl Into<String>,
        metadata_dir: impl Into<PathBuf>,
        targets_dir: impl Into<PathBuf>,
        trusted_root: impl Into<PathBuf>,
    ) -> Self {
        ClientConfig {
            repo_url: repo_url.into(),
            metadata_dir: metadata_dir.into(),
            targets_dir: targets_dir.into(),
            trusted_root: trusted_root.into(),
        }
    }
}

/// Result of a successful bootstrap.
#[derive(Debug, Clone, Copy)]
pub struct BootstrapReport {
    pub root_version: u64,
}

/// One catalog entry, as reported by `list`.
#[derive(Debug, Clone)]
pub struct TargetListing {
    pub path: String,
    pub length: u64,
    pub hashes: BTreeMap<String, String>,
}

/// The client facade: one method per protocol operation.
pub struct TrustClient {
    config: ClientConfig,
    store: TrustStore,
    transport: Box<dyn Transport>,
    time: Box<dyn TimeSource>,
}

impl TrustClient {
    pub fn new(config: ClientConfig) -> Result<Self, TrustError> {
        let transport = transport_for_url(&config.repo_url)?;
        Ok(TrustClient {
            store: TrustStore::new(&config.metadata_dir),
            transport,
            time: Box::new(SystemTimeSource),
            config,
        })
    }

    /// Swap the repository transport, mainly for tests and mirrors.
    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_time_source(mut self, time: Box<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Establish local trust from the stored root or the pinned root file.
    /// Idempotent: an already bootstrapped client reports its stored root.
    pub fn bootstrap(&self) -> Result<BootstrapReport, TrustError> {
        let correlation_id = audit::new_correlation_id();
        std::fs::create_dir_all(&self.config.targets_dir)?;
        match bootstrap::establish_trust(&self.store, &self.config.trusted_root) {
            Ok(trusted) => {
                audit::log_bootstrap_success(&correlation_id, trusted.doc.version);
                Ok(BootstrapReport {
                    root_version: trusted.doc.version,
                })
            }
            Err(e) => {
                audit::log_bootstrap_failure(&correlation_id, e.kind(), &e.to_string());
                Err(e)
            }
        }
    }

    /// Advance trust against the repository: timestamp, snapshot, targets,
    /// then any newer roots.
    pub fn refresh(&self) -> Result<RefreshOutcome, TrustError> {
        self.refresh_state().map(|(_, outcome)| outcome)
    }

    /// Refresh, then fetch one target and verify it byte-for-byte against
    /// the trusted catalog before it touches the targets directory.
    pub fn download(&self, target_path: &str) -> Result<DownloadedTarget, TrustError> {
        let (state, _) = self.refresh_state()?;
        TargetVerifier::new(&state, self.transport.as_ref(), &self.config.targets_dir)
            .download(target_path)
    }

    /// Fetch and verify one target against the trust state already on disk,
    /// without contacting the repository for metadata first. Callers that
    /// report refresh failures separately run [`Self::refresh`] before this.
    pub fn download_trusted(&self, target_path: &str) -> Result<DownloadedTarget, TrustError> {
        let state = self.trusted_state()?;
        TargetVerifier::new(&state, self.transport.as_ref(), &self.config.targets_dir)
            .download(target_path)
    }

    /// Refresh, then report the trusted catalog.
    pub fn list_targets(&self) -> Result<Vec<TargetListing>, TrustError> {
        let (state, _) = self.refresh_state()?;
        Self::catalog(&state)
    }

    /// Report the catalog from the trust state already on disk, without
    /// refreshing first.
    pub fn list_trusted(&self) -> Result<Vec<TargetListing>, TrustError> {
        let state = self.trusted_state()?;
        Self::catalog(&state)
    }

    fn catalog(state: &TrustState) -> Result<Vec<TargetListing>, TrustError> {
        let targets = state.targets().ok_or(TrustError::UsageError(
            "No trusted targets metadata; refresh first",
        ))?;
        Ok(targets
            .targets
            .iter()
            .map(|(path, info)| TargetListing {
                path: path.clone(),
                length: info.length,
                hashes: info.hashes.clone(),
            })
            .collect())
    }

    fn trusted_state(&self) -> Result<TrustState, TrustError> {
        TrustState::load(&self.store).ok_or(TrustError::UsageError(
            "No trusted root on disk; bootstrap and refresh first",
        ))
    }

    fn refresh_state(&self) -> Result<(TrustState, RefreshOutcome), TrustError> {
        let state = match TrustState::load(&self.store) {
            Some(state) => state,
            None => {
                let trusted = bootstrap::establish_trust(&self.store, &self.config.trusted_root)?;
                TrustState::new(trusted)
            }
        };
        RefreshEngine::new(self.transport.as_ref(), &self.store, self.time.as_ref(), state).run()
    }
}
