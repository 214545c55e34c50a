//! The refresh state machine: advance local trust against a repository.
//!
//! Steps run in a fixed order: timestamp, snapshot, targets, then newer
//! roots. Each step verifies signatures against the trusted root, enforces
//! version monotonicity and expiry, and checks fetched bytes against the
//! length and digests declared by the parent role. Verified documents are
//! staged in a pending set and nothing is persisted until every step has
//! passed, so a failure at any point leaves both disk and memory exactly as
//! they were.

use super::bootstrap;
use super::store::TrustStore;
use super::{TrustState, TrustedDoc};
use crate::audit;
use crate::error::TrustError;
use crate::metadata::{
    check_expiry, verify_meta_bytes, verify_signatures, RoleType, Root, SignedMetadata, Snapshot,
    Targets, Timestamp, SNAPSHOT_META_NAME, TARGETS_META_NAME,
};
use crate::time::TimeSource;
use crate::transport::Transport;

/// Versions of everything trusted after a successful refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub root_version: u64,
    pub timestamp_version: u64,
    pub snapshot_version: u64,
    pub targets_version: u64,
}

/// Upper bound on root rotations adopted in one refresh. The probe stops
/// here and picks up where it left off on the next run.
const MAX_ROOT_ROTATIONS: u64 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshStep {
    Timestamp,
    Snapshot,
    Targets,
    Root,
    Commit,
}

/// Documents verified this run but not yet persisted.
#[derive(Default)]
struct PendingUpdate {
    timestamp: Option<TrustedDoc<Timestamp>>,
    snapshot: Option<TrustedDoc<Snapshot>>,
    targets: Option<TrustedDoc<Targets>>,
    roots: Vec<TrustedDoc<Root>>,
}

pub(crate) struct RefreshEngine<'a> {
    transport: &'a dyn Transport,
    store: &'a TrustStore,
    time: &'a dyn TimeSource,
    state: TrustState,
    pending: PendingUpdate,
    correlation_id: String,
}

impl<'a> RefreshEngine<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        store: &'a TrustStore,
        time: &'a dyn TimeSource,
        state: TrustState,
    ) -> Self {
        RefreshEngine {
            transport,
            store,
            time,
            state,
            pending: PendingUpdate::default(),
            correlation_id: audit::new_correlation_id(),
        }
    }

    pub fn run(mut self) -> Result<(TrustState, RefreshOutcome), TrustError> {
        audit::log_refresh_attempt(&self.correlation_id);
        if let Err(e) = self.advance_all() {
            audit::log_refresh_failure(&self.correlation_id, e.kind(), &e.to_string());
            return Err(e);
        }
        let correlation_id = self.correlation_id.clone();
        match self.commit() {
            Ok((state, outcome)) => {
                audit::log_refresh_success(
                    &correlation_id,
                    outcome.root_version,
                    outcome.timestamp_version,
                    outcome.snapshot_version,
                    outcome.targets_version,
                );
                Ok((state, outcome))
            }
            Err(e) => {
                audit::log_refresh_failure(&correlation_id, e.kind(), &e.to_string());
                Err(e)
            }
        }
    }

    fn advance_all(&mut self) -> Result<(), TrustError> {
        let mut step = RefreshStep::Timestamp;
        loop {
            step = match step {
                RefreshStep::Timestamp => {
                    self.refresh_timestamp()?;
                    RefreshStep::Snapshot
                }
                RefreshStep::Snapshot => {
                    self.refresh_snapshot()?;
                    RefreshStep::Targets
                }
                RefreshStep::Targets => {
                    self.refresh_targets()?;
                    RefreshStep::Root
                }
                RefreshStep::Root => {
                    self.refresh_root()?;
                    RefreshStep::Commit
                }
                RefreshStep::Commit => return Ok(()),
            };
        }
    }

    /// Step 1: the timestamp is fetched by its plain name, since its version
    /// cannot be known in advance. It proves repository freshness.
    fn refresh_timestamp(&mut self) -> Result<(), TrustError> {
        let bytes = self.fetch_required(&metadata_path(RoleType::Timestamp, None))?;
        let envelope = SignedMetadata::from_bytes(&bytes, RoleType::Timestamp)?;
        verify_signatures(&envelope, RoleType::Timestamp, self.state.root())?;
        let doc: Timestamp = envelope.parse()?;
        self.check_monotonic(RoleType::Timestamp, doc.version, self.state.timestamp_version())?;
        check_expiry(&doc, self.time.now_unix()?)?;

        audit::log_refresh_step(&self.correlation_id, "timestamp", doc.version);
        log::debug!("Timestamp metadata version [{}] verified", doc.version);
        self.pending.timestamp = Some(TrustedDoc { doc, envelope });
        Ok(())
    }

    /// Step 2: fetch the snapshot the timestamp points at. Raw bytes are
    /// checked against the timestamp's length and digests before parsing.
    fn refresh_snapshot(&mut self) -> Result<(), TrustError> {
        let meta = self
            .pending
            .timestamp
            .as_ref()
            .ok_or_else(|| {
                TrustError::InternalError(
                    "Snapshot step reached without a verified timestamp".to_string(),
                )
            })?
            .doc
            .snapshot_meta()?
            .clone();

        let path = if self.state.root().consistent_snapshot {
            metadata_path(RoleType::Snapshot, Some(meta.version))
        } else {
            metadata_path(RoleType::Snapshot, None)
        };
        let bytes = self.fetch_required(&path)?;
        verify_meta_bytes(&bytes, SNAPSHOT_META_NAME, &meta)?;

        let envelope = SignedMetadata::from_bytes(&bytes, RoleType::Snapshot)?;
        verify_signatures(&envelope, RoleType::Snapshot, self.state.root())?;
        let doc: Snapshot = envelope.parse()?;
        if doc.version != meta.version {
            return Err(TrustError::InconsistentMetadata {
                meta: SNAPSHOT_META_NAME.to_string(),
                reason: format!(
                    "Version {} does not match version {} declared by timestamp",
                    doc.version, meta.version
                ),
            });
        }
        self.check_monotonic(RoleType::Snapshot, doc.version, self.state.snapshot_version())?;
        check_expiry(&doc, self.time.now_unix()?)?;

        audit::log_refresh_step(&self.correlation_id, "snapshot", doc.version);
        log::debug!("Snapshot metadata version [{}] verified", doc.version);
        self.pending.snapshot = Some(TrustedDoc { doc, envelope });
        Ok(())
    }

    /// Step 3: fetch the targets document the snapshot pins.
    fn refresh_targets(&mut self) -> Result<(), TrustError> {
        let meta = self
            .pending
            .snapshot
            .as_ref()
            .ok_or_else(|| {
                TrustError::InternalError(
                    "Targets step reached without a verified snapshot".to_string(),
                )
            })?
            .doc
            .targets_meta()?
            .clone();

        let path = if self.state.root().consistent_snapshot {
            metadata_path(RoleType::Targets, Some(meta.version))
        } else {
            metadata_path(RoleType::Targets, None)
        };
        let bytes = self.fetch_required(&path)?;
        verify_meta_bytes(&bytes, TARGETS_META_NAME, &meta)?;

        let envelope = SignedMetadata::from_bytes(&bytes, RoleType::Targets)?;
        verify_signatures(&envelope, RoleType::Targets, self.state.root())?;
        let doc: Targets = envelope.parse()?;
        if doc.version != meta.version {
            return Err(TrustError::InconsistentMetadata {
                meta: TARGETS_META_NAME.to_string(),
                reason: format!(
                    "Version {} does not match version {} declared by snapshot",
                    doc.version, meta.version
                ),
            });
        }
        self.check_monotonic(RoleType::Targets, doc.version, self.state.targets_version())?;
        check_expiry(&doc, self.time.now_unix()?)?;

        audit::log_refresh_step(&self.correlation_id, "targets", doc.version);
        log::debug!("Targets metadata version [{}] verified", doc.version);
        self.pending.targets = Some(TrustedDoc { doc, envelope });
        Ok(())
    }

    /// Step 4: probe for newer roots one version at a time. Each candidate
    /// must satisfy the threshold of the root it replaces and its own, and
    /// carry exactly the version its file name advertises. A missing next
    /// version ends the probe.
    ///
    /// Root expiry is not checked here: adopting the newest authorized root
    /// is what lets a long-offline client recover.
    fn refresh_root(&mut self) -> Result<(), TrustError> {
        let mut current = self.state.root().clone();
        let mut rotations = 0u64;
        loop {
            if rotations >= MAX_ROOT_ROTATIONS {
                log::warn!(
                    "Stopping root probe after [{MAX_ROOT_ROTATIONS}] rotations in one refresh"
                );
                break;
            }
            let next_version = match current.version.checked_add(1) {
                Some(version) => version,
                None => break,
            };
            let path = metadata_path(RoleType::Root, Some(next_version));
            let bytes = match self.transport.fetch(&path)? {
                Some(bytes) => bytes,
                None => break,
            };

            let envelope = SignedMetadata::from_bytes(&bytes, RoleType::Root)?;
            // The outgoing root must authorize its successor.
            verify_signatures(&envelope, RoleType::Root, &current)?;
            // And the successor must stand on its own.
            let candidate = bootstrap::verify_root(&envelope)?;
            if candidate.version != next_version {
                return Err(TrustError::InconsistentMetadata {
                    meta: RoleType::Root.versioned_file_name(next_version),
                    reason: format!(
                        "Version {} does not match addressed version {next_version}",
                        candidate.version
                    ),
                });
            }

            audit::log_root_rotation(&self.correlation_id, current.version, candidate.version);
            log::debug!(
                "Root metadata rotated from version [{}] to [{}]",
                current.version,
                candidate.version
            );
            current = candidate.clone();
            self.pending.roots.push(TrustedDoc {
                doc: candidate,
                envelope,
            });
            rotations += 1;
        }
        Ok(())
    }

    /// Persist the pending set and fold it into the state. Lower roles go
    /// first so that a crash mid-commit leaves every file on disk verifiable
    /// under the root that accepted it.
    fn commit(mut self) -> Result<(TrustState, RefreshOutcome), TrustError> {
        if let Some(timestamp) = self.pending.timestamp.take() {
            self.store.persist(RoleType::Timestamp, &timestamp.envelope)?;
            self.state.timestamp = Some(timestamp);
        }
        if let Some(snapshot) = self.pending.snapshot.take() {
            self.store.persist(RoleType::Snapshot, &snapshot.envelope)?;
            self.state.snapshot = Some(snapshot);
        }
        if let Some(targets) = self.pending.targets.take() {
            self.store.persist(RoleType::Targets, &targets.envelope)?;
            self.state.targets = Some(targets);
        }
        for root in std::mem::take(&mut self.pending.roots) {
            self.store.persist(RoleType::Root, &root.envelope)?;
            self.state.root = root;
        }

        let outcome = RefreshOutcome {
            root_version: self.state.root_version(),
            timestamp_version: self.state.timestamp_version().ok_or_else(|| {
                TrustError::InternalError("Refresh finished without timestamp metadata".to_string())
            })?,
            snapshot_version: self.state.snapshot_version().ok_or_else(|| {
                TrustError::InternalError("Refresh finished without snapshot metadata".to_string())
            })?,
            targets_version: self.state.targets_version().ok_or_else(|| {
                TrustError::InternalError("Refresh finished without targets metadata".to_string())
            })?,
        };
        Ok((self.state, outcome))
    }

    fn fetch_required(&self, path: &str) -> Result<Vec<u8>, TrustError> {
        self.transport
            .fetch(path)?
            .ok_or_else(|| TrustError::TransportError {
                path: path.to_string(),
                reason: "Not found".to_string(),
            })
    }

    fn check_monotonic(
        &self,
        role: RoleType,
        offered: u64,
        trusted: Option<u64>,
    ) -> Result<(), TrustError> {
        if let Some(trusted) = trusted {
            if offered < trusted {
                audit::log_rollback_detected(
                    &self.correlation_id,
                    &role.to_string(),
                    offered,
                    trusted,
                );
                return Err(TrustError::RollbackAttack {
                    role: role.to_string(),
                    offered,
                    trusted,
                });
            }
        }
        Ok(())
    }
}

fn metadata_path(role: RoleType, version: Option<u64>) -> String {
    match version {
        Some(version) => format!("metadata/{}", role.versioned_file_name(version)),
        None => format!("metadata/{}", role.file_name()),
    }
}
