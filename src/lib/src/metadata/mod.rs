//! Signed role metadata: the four document types, the envelope that carries
//! their signatures, and the checks a client runs before trusting any of them.
//!
//! A metadata file is a JSON envelope `{"signed": {...}, "signatures": [...]}`.
//! Signatures cover the canonical form of the `signed` object (compact JSON
//! with lexicographically sorted keys), never the file bytes. File bytes are
//! pinned separately by the length and digests a parent role declares.

mod builder;
mod hash;

pub use builder::{ExpirySchedule, MetadataBuilder};
pub(crate) use hash::sha256_hex;

use crate::error::TrustError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Metadata format version stamped into every document.
pub const SPEC_VERSION: &str = "1.0.0";

/// Key type and scheme for the only signing algorithm in use.
pub const ED25519_KEY_TYPE: &str = "ed25519";
pub const ED25519_SCHEME: &str = "ed25519";

/// Digest algorithm name used in `hashes` maps.
pub const SHA256_ALGORITHM: &str = "sha256";

/// Snapshot entry name for the targets document.
pub const TARGETS_META_NAME: &str = "targets.json";
/// Timestamp entry name for the snapshot document.
pub const SNAPSHOT_META_NAME: &str = "snapshot.json";

/// The four metadata roles, ordered root first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleType {
    Root,
    Targets,
    Snapshot,
    Timestamp,
}

impl RoleType {
    pub const ALL: [RoleType; 4] = [
        RoleType::Root,
        RoleType::Targets,
        RoleType::Snapshot,
        RoleType::Timestamp,
    ];

    /// Unversioned metadata file name, e.g. `root.json`.
    pub fn file_name(self) -> &'static str {
        match self {
            RoleType::Root => "root.json",
            RoleType::Targets => "targets.json",
            RoleType::Snapshot => "snapshot.json",
            RoleType::Timestamp => "timestamp.json",
        }
    }

    /// Version-addressed file name, e.g. `3.root.json`.
    pub fn versioned_file_name(self, version: u64) -> String {
        format!("{}.{}", version, self.file_name())
    }
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoleType::Root => "root",
            RoleType::Targets => "targets",
            RoleType::Snapshot => "snapshot",
            RoleType::Timestamp => "timestamp",
        };
        write!(f, "{name}")
    }
}

impl FromStr for RoleType {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" => Ok(RoleType::Root),
            "targets" => Ok(RoleType::Targets),
            "snapshot" => Ok(RoleType::Snapshot),
            "timestamp" => Ok(RoleType::Timestamp),
            _ => Err(TrustError::UsageError(
                "role must be one of: root, targets, snapshot, timestamp",
            )),
        }
    }
}

/// One signature over the canonical form of a `signed` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Identifier of the signing key as declared in root metadata.
    pub keyid: String,
    /// Hex-encoded Ed25519 signature.
    pub sig: String,
}

/// Public key material inside a [`Key`] record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVal {
    /// Hex-encoded Ed25519 public key.
    pub public: String,
}

/// A public key record as carried in the root document's `keys` map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub keytype: String,
    pub scheme: String,
    pub keyval: KeyVal,
}

impl Key {
    /// Build an Ed25519 key record from a hex-encoded public key.
    pub fn ed25519(public_hex: impl Into<String>) -> Self {
        Key {
            keytype: ED25519_KEY_TYPE.to_string(),
            scheme: ED25519_SCHEME.to_string(),
            keyval: KeyVal {
                public: public_hex.into(),
            },
        }
    }

    /// Key identifier: hex SHA-256 of the canonical form of this record.
    ///
    /// Derived from content, so the same public key always gets the same id
    /// on every machine that computes it.
    pub fn key_id(&self) -> Result<String, TrustError> {
        let canonical = canonical_json(self)?;
        Ok(sha256_hex(&canonical))
    }

    /// Check one hex-encoded signature over `message`.
    ///
    /// Any decode or verification failure counts as an invalid signature
    /// rather than an error, so one garbled entry can never abort threshold
    /// counting.
    pub fn verify(&self, message: &[u8], sig_hex: &str) -> bool {
        if self.keytype != ED25519_KEY_TYPE || self.scheme != ED25519_SCHEME {
            log::debug!(
                "Ignoring signature from unsupported key type [{}/{}]",
                self.keytype,
                self.scheme
            );
            return false;
        }
        let pk_bytes = match hex::decode(&self.keyval.public) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let public_key = match ed25519_compact::PublicKey::from_slice(&pk_bytes) {
            Ok(pk) => pk,
            Err(_) => return false,
        };
        let sig_bytes = match hex::decode(sig_hex) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let signature = match ed25519_compact::Signature::from_slice(&sig_bytes) {
            Ok(sig) => sig,
            Err(_) => return false,
        };
        public_key.verify(message, &signature).is_ok()
    }
}

/// Key ids authorized for a role, and how many must sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleKeys {
    pub keyids: Vec<String>,
    pub threshold: u64,
}

/// Version, length and digests a parent role declares for a child file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaFileInfo {
    pub version: u64,
    pub length: u64,
    pub hashes: BTreeMap<String, String>,
}

impl MetaFileInfo {
    /// Describe the exact bytes of a serialized metadata file.
    pub fn for_bytes(version: u64, bytes: &[u8]) -> Self {
        let mut hashes = BTreeMap::new();
        hashes.insert(SHA256_ALGORITHM.to_string(), sha256_hex(bytes));
        MetaFileInfo {
            version,
            length: bytes.len() as u64,
            hashes,
        }
    }
}

/// Length and digests recorded for one artifact in the targets document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFileInfo {
    pub length: u64,
    pub hashes: BTreeMap<String, String>,
}

impl TargetFileInfo {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut hashes = BTreeMap::new();
        hashes.insert(SHA256_ALGORITHM.to_string(), sha256_hex(bytes));
        TargetFileInfo {
            length: bytes.len() as u64,
            hashes,
        }
    }

    /// Stream a file from disk without loading it whole.
    pub fn from_file(path: &Path) -> Result<Self, TrustError> {
        let mut file = std::fs::File::open(path)?;
        let mut digest = hash::Hash::new();
        let length = std::io::copy(&mut file, &mut digest)?;
        let mut hashes = BTreeMap::new();
        hashes.insert(SHA256_ALGORITHM.to_string(), digest.hex_digest());
        Ok(TargetFileInfo { length, hashes })
    }

    pub fn sha256(&self) -> Option<&str> {
        self.hashes.get(SHA256_ALGORITHM).map(String::as_str)
    }
}

/// Common shape of the four role payloads.
pub trait RoleDocument: Serialize + serde::de::DeserializeOwned {
    const TYPE: RoleType;

    fn doc_type(&self) -> RoleType;
    fn version(&self) -> u64;
    fn expires(&self) -> &str;
}

macro_rules! impl_role_document {
    ($doc:ty, $role:expr) => {
        impl RoleDocument for $doc {
            const TYPE: RoleType = $role;

            fn doc_type(&self) -> RoleType {
                self.doc_type
            }

            fn version(&self) -> u64 {
                self.version
            }

            fn expires(&self) -> &str {
                &self.expires
            }
        }
    };
}

/// The root document: trust anchor declaring keys and thresholds for all roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    #[serde(rename = "_type")]
    pub doc_type: RoleType,
    pub spec_version: String,
    pub consistent_snapshot: bool,
    pub version: u64,
    pub expires: String,
    pub keys: BTreeMap<String, Key>,
    pub roles: BTreeMap<RoleType, RoleKeys>,
}

impl_role_document!(Root, RoleType::Root);

impl Root {
    /// Structural validation, run before any root document is trusted.
    ///
    /// Checks the fields signatures cannot: every role is declared, every
    /// declared key id resolves, and thresholds are satisfiable.
    pub fn validate(&self) -> Result<(), TrustError> {
        if !self.spec_version.starts_with("1.") {
            return Err(TrustError::MalformedRoot(format!(
                "Unsupported spec_version [{}]",
                self.spec_version
            )));
        }
        if self.version < 1 {
            return Err(TrustError::MalformedRoot(
                "Root version must be at least 1".to_string(),
            ));
        }
        for role in RoleType::ALL {
            let role_keys = self.roles.get(&role).ok_or_else(|| {
                TrustError::MalformedRoot(format!("Missing role declaration for [{role}]"))
            })?;
            if role_keys.threshold < 1 {
                return Err(TrustError::MalformedRoot(format!(
                    "Threshold for [{role}] must be at least 1"
                )));
            }
            let distinct: BTreeSet<&String> = role_keys.keyids.iter().collect();
            if (distinct.len() as u64) < role_keys.threshold {
                return Err(TrustError::MalformedRoot(format!(
                    "Role [{role}] declares {} distinct keys for threshold {}",
                    distinct.len(),
                    role_keys.threshold
                )));
            }
            for keyid in &role_keys.keyids {
                if !self.keys.contains_key(keyid) {
                    return Err(TrustError::MalformedRoot(format!(
                        "Role [{role}] references unknown key id [{keyid}]"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn role_keys(&self, role: RoleType) -> Result<&RoleKeys, TrustError> {
        self.roles.get(&role).ok_or_else(|| {
            TrustError::MalformedRoot(format!("Missing role declaration for [{role}]"))
        })
    }
}

/// The targets document: the artifact catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Targets {
    #[serde(rename = "_type")]
    pub doc_type: RoleType,
    pub spec_version: String,
    pub version: u64,
    pub expires: String,
    pub targets: BTreeMap<String, TargetFileInfo>,
}

impl_role_document!(Targets, RoleType::Targets);

/// The snapshot document: pins the exact targets file in circulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "_type")]
    pub doc_type: RoleType,
    pub spec_version: String,
    pub version: u64,
    pub expires: String,
    pub meta: BTreeMap<String, MetaFileInfo>,
}

impl_role_document!(Snapshot, RoleType::Snapshot);

impl Snapshot {
    pub fn targets_meta(&self) -> Result<&MetaFileInfo, TrustError> {
        self.meta
            .get(TARGETS_META_NAME)
            .ok_or_else(|| TrustError::InconsistentMetadata {
                meta: SNAPSHOT_META_NAME.to_string(),
                reason: format!("No meta entry for [{TARGETS_META_NAME}]"),
            })
    }
}

/// The timestamp document: short-lived freshness proof over the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    #[serde(rename = "_type")]
    pub doc_type: RoleType,
    pub spec_version: String,
    pub version: u64,
    pub expires: String,
    pub meta: BTreeMap<String, MetaFileInfo>,
}

impl_role_document!(Timestamp, RoleType::Timestamp);

impl Timestamp {
    pub fn snapshot_meta(&self) -> Result<&MetaFileInfo, TrustError> {
        self.meta
            .get(SNAPSHOT_META_NAME)
            .ok_or_else(|| TrustError::InconsistentMetadata {
                meta: "timestamp.json".to_string(),
                reason: format!("No meta entry for [{SNAPSHOT_META_NAME}]"),
            })
    }
}

/// The envelope stored on disk and fetched from repositories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedMetadata {
    pub signed: serde_json::Value,
    pub signatures: Vec<Signature>,
}

impl SignedMetadata {
    /// Parse an envelope from raw file bytes.
    ///
    /// Parse failures on root map to [`TrustError::MalformedRoot`]; every
    /// other role maps to an internal error.
    pub fn from_bytes(bytes: &[u8], role: RoleType) -> Result<Self, TrustError> {
        serde_json::from_slice(bytes).map_err(|e| envelope_error(role, &e.to_string()))
    }

    /// Canonical bytes of the `signed` payload, the exact input to signing
    /// and signature verification.
    pub fn canonical_signed_bytes(&self) -> Result<Vec<u8>, TrustError> {
        serde_json::to_vec(&self.signed)
            .map_err(|e| TrustError::InternalError(format!("Canonical serialization: {e}")))
    }

    /// The exact bytes written to metadata files. Parents hash these.
    pub fn to_file_bytes(&self) -> Result<Vec<u8>, TrustError> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| TrustError::InternalError(format!("Metadata serialization: {e}")))
    }

    /// Extract the typed payload, checking its `_type` tag against the role
    /// the caller expects.
    pub fn parse<T: RoleDocument>(&self) -> Result<T, TrustError> {
        let doc: T = serde_json::from_value(self.signed.clone())
            .map_err(|e| envelope_error(T::TYPE, &e.to_string()))?;
        if doc.doc_type() != T::TYPE {
            return Err(envelope_error(
                T::TYPE,
                &format!("Document type [{}] does not match role", doc.doc_type()),
            ));
        }
        if doc.version() < 1 {
            return Err(envelope_error(T::TYPE, "Version must be at least 1"));
        }
        Ok(doc)
    }

    /// Version field of the payload, without a full typed parse.
    pub fn signed_version(&self) -> Option<u64> {
        self.signed.get("version").and_then(serde_json::Value::as_u64)
    }

    /// Expiry field of the payload, without a full typed parse.
    pub fn signed_expires(&self) -> Option<&str> {
        self.signed.get("expires").and_then(serde_json::Value::as_str)
    }
}

fn envelope_error(role: RoleType, detail: &str) -> TrustError {
    match role {
        RoleType::Root => TrustError::MalformedRoot(detail.to_string()),
        other => TrustError::InternalError(format!("Malformed {other} metadata: {detail}")),
    }
}

/// Canonical form of any serializable value: compact JSON with object keys
/// in lexicographic order. Round-tripping through `serde_json::Value` sorts
/// the keys because its map preserves ordering.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, TrustError> {
    let value = serde_json::to_value(value)
        .map_err(|e| TrustError::InternalError(format!("Canonical serialization: {e}")))?;
    serde_json::to_vec(&value)
        .map_err(|e| TrustError::InternalError(format!("Canonical serialization: {e}")))
}

/// Count valid signatures from keys the root authorizes for `role` and
/// require that count to reach the role's threshold.
///
/// A key id is counted at most once no matter how many signature entries
/// carry it. Signatures from keys outside the role's declaration are ignored,
/// not errors.
pub fn verify_signatures(
    envelope: &SignedMetadata,
    role: RoleType,
    root: &Root,
) -> Result<(), TrustError> {
    let role_keys = root.role_keys(role)?;
    let canonical = envelope.canonical_signed_bytes()?;
    let mut valid: BTreeSet<&str> = BTreeSet::new();
    for signature in &envelope.signatures {
        if !role_keys.keyids.contains(&signature.keyid) {
            log::debug!(
                "Ignoring signature for [{role}] from undeclared key [{}]",
                signature.keyid
            );
            continue;
        }
        if valid.contains(signature.keyid.as_str()) {
            continue;
        }
        let key = match root.keys.get(&signature.keyid) {
            Some(key) => key,
            None => continue,
        };
        if key.verify(&canonical, &signature.sig) {
            valid.insert(&signature.keyid);
        } else {
            log::debug!(
                "Invalid signature for [{role}] from key [{}]",
                signature.keyid
            );
        }
    }
    if (valid.len() as u64) < role_keys.threshold {
        return Err(TrustError::InvalidSignature {
            role: role.to_string(),
            valid: valid.len(),
            threshold: role_keys.threshold,
        });
    }
    Ok(())
}

/// Reject a document whose expiry is at or before `now_unix`.
pub fn check_expiry<T: RoleDocument>(doc: &T, now_unix: u64) -> Result<(), TrustError> {
    let expires_unix = crate::time::parse_timestamp(doc.expires())?;
    if expires_unix <= now_unix {
        return Err(TrustError::ExpiredMetadata {
            role: T::TYPE.to_string(),
            expires: doc.expires().to_string(),
        });
    }
    Ok(())
}

/// Check raw fetched bytes against the length and digests a parent declared.
/// Runs before parsing, so tampered bytes never reach the JSON layer.
pub fn verify_meta_bytes(
    bytes: &[u8],
    meta_name: &str,
    info: &MetaFileInfo,
) -> Result<(), TrustError> {
    if bytes.len() as u64 != info.length {
        return Err(TrustError::InconsistentMetadata {
            meta: meta_name.to_string(),
            reason: format!(
                "Length {} does not match declared length {}",
                bytes.len(),
                info.length
            ),
        });
    }
    let declared = info.hashes.get(SHA256_ALGORITHM).ok_or_else(|| {
        TrustError::InconsistentMetadata {
            meta: meta_name.to_string(),
            reason: "No sha256 digest declared".to_string(),
        }
    })?;
    let actual = sha256_hex(bytes);
    if &actual != declared {
        return Err(TrustError::InconsistentMetadata {
            meta: meta_name.to_string(),
            reason: "Digest does not match declared sha256".to_string(),
        });
    }
    Ok(())
}

/// True when a repository-relative path is safe to join under a local
/// directory: relative, no parent traversal, no empty segments.
pub(crate) fn is_safe_relative_path(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.contains('\\') {
        return false;
    }
    path.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

/// Content-addressed name for a target under consistent snapshots:
/// `dir/file` becomes `dir/{sha256}.file`.
pub(crate) fn consistent_target_name(path: &str, sha256: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/{sha256}.{file}"),
        None => format!("{sha256}.{path}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> (ed25519_compact::KeyPair, Key) {
        let keypair = ed25519_compact::KeyPair::generate();
        let key = Key::ed25519(hex::encode(keypair.pk.as_ref()));
        (keypair, key)
    }

    fn signed_envelope(doc: &Root, keypair: &ed25519_compact::KeyPair, keyid: &str) -> SignedMetadata {
        let signed = serde_json::to_value(doc).unwrap();
        let canonical = serde_json::to_vec(&signed).unwrap();
        let sig = keypair.sk.sign(canonical, None);
        SignedMetadata {
            signed,
            signatures: vec![Signature {
                keyid: keyid.to_string(),
                sig: hex::encode(sig.as_ref()),
            }],
        }
    }

    fn sample_root(key: &Key, keyid: &str) -> Root {
        let mut keys = BTreeMap::new();
        keys.insert(keyid.to_string(), key.clone());
        let mut roles = BTreeMap::new();
        for role in RoleType::ALL {
            roles.insert(
                role,
                RoleKeys {
                    keyids: vec![keyid.to_string()],
                    threshold: 1,
                },
            );
        }
        Root {
            doc_type: RoleType::Root,
            spec_version: SPEC_VERSION.to_string(),
            consistent_snapshot: true,
            version: 1,
            expires: "2030-01-01T00:00:00Z".to_string(),
            keys,
            roles,
        }
    }

    #[test]
    fn test_role_names_round_trip() {
        for role in RoleType::ALL {
            let parsed: RoleType = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("delegated".parse::<RoleType>().is_err());
        assert_eq!(RoleType::Root.versioned_file_name(3), "3.root.json");
    }

    #[test]
    fn test_key_id_is_content_derived() {
        let (_, key) = test_key();
        assert_eq!(key.key_id().unwrap(), key.key_id().unwrap());
        let (_, other) = test_key();
        assert_ne!(key.key_id().unwrap(), other.key_id().unwrap());
    }

    #[test]
    fn test_key_verify_round_trip() {
        let (keypair, key) = test_key();
        let message = b"canonical payload";
        let sig = keypair.sk.sign(message, None);
        let sig_hex = hex::encode(sig.as_ref());
        assert!(key.verify(message, &sig_hex));
        assert!(!key.verify(b"different payload", &sig_hex));
        assert!(!key.verify(message, "not-hex"));
        assert!(!key.verify(message, &hex::encode([0u8; 64])));
    }

    #[test]
    fn test_canonical_form_sorts_keys() {
        let envelope = SignedMetadata {
            signed: serde_json::from_str(r#"{"zeta": 1, "alpha": {"b": 2, "a": 3}}"#).unwrap(),
            signatures: vec![],
        };
        let canonical = envelope.canonical_signed_bytes().unwrap();
        assert_eq!(
            String::from_utf8(canonical).unwrap(),
            r#"{"alpha":{"a":3,"b":2},"zeta":1}"#
        );
    }

    #[test]
    fn test_root_validate_accepts_sample() {
        let (_, key) = test_key();
        let keyid = key.key_id().unwrap();
        sample_root(&key, &keyid).validate().unwrap();
    }

    #[test]
    fn test_root_validate_rejects_missing_role() {
        let (_, key) = test_key();
        let keyid = key.key_id().unwrap();
        let mut root = sample_root(&key, &keyid);
        root.roles.remove(&RoleType::Snapshot);
        assert!(matches!(
            root.validate(),
            Err(TrustError::MalformedRoot(_))
        ));
    }

    #[test]
    fn test_root_validate_rejects_zero_threshold() {
        let (_, key) = test_key();
        let keyid = key.key_id().unwrap();
        let mut root = sample_root(&key, &keyid);
        root.roles.get_mut(&RoleType::Timestamp).unwrap().threshold = 0;
        assert!(root.validate().is_err());
    }

    #[test]
    fn test_root_validate_rejects_unknown_keyid() {
        let (_, key) = test_key();
        let keyid = key.key_id().unwrap();
        let mut root = sample_root(&key, &keyid);
        root.roles
            .get_mut(&RoleType::Targets)
            .unwrap()
            .keyids
            .push("deadbeef".to_string());
        assert!(root.validate().is_err());
    }

    #[test]
    fn test_root_validate_rejects_unsatisfiable_threshold() {
        let (_, key) = test_key();
        let keyid = key.key_id().unwrap();
        let mut root = sample_root(&key, &keyid);
        root.roles.get_mut(&RoleType::Root).unwrap().threshold = 2;
        assert!(root.validate().is_err());
    }

    #[test]
    fn test_parse_checks_type_tag() {
        let (keypair, key) = test_key();
        let keyid = key.key_id().unwrap();
        let root = sample_root(&key, &keyid);
        let envelope = signed_envelope(&root, &keypair, &keyid);
        assert!(envelope.parse::<Root>().is_ok());
        assert!(envelope.parse::<Timestamp>().is_err());
    }

    #[test]
    fn test_threshold_met_by_valid_signature() {
        let (keypair, key) = test_key();
        let keyid = key.key_id().unwrap();
        let root = sample_root(&key, &keyid);
        let envelope = signed_envelope(&root, &keypair, &keyid);
        verify_signatures(&envelope, RoleType::Root, &root).unwrap();
    }

    #[test]
    fn test_tampered_payload_fails_threshold() {
        let (keypair, key) = test_key();
        let keyid = key.key_id().unwrap();
        let root = sample_root(&key, &keyid);
        let mut envelope = signed_envelope(&root, &keypair, &keyid);
        envelope.signed["version"] = serde_json::json!(9);
        assert!(matches!(
            verify_signatures(&envelope, RoleType::Root, &root),
            Err(TrustError::InvalidSignature { valid: 0, .. })
        ));
    }

    #[test]
    fn test_duplicate_keyid_counted_once() {
        let (keypair, key) = test_key();
        let keyid = key.key_id().unwrap();
        let mut root = sample_root(&key, &keyid);
        root.roles.get_mut(&RoleType::Root).unwrap().threshold = 2;
        // Satisfiability needs a second declared key even though it never signs.
        let (_, spare) = test_key();
        let spare_id = spare.key_id().unwrap();
        root.keys.insert(spare_id.clone(), spare);
        root.roles
            .get_mut(&RoleType::Root)
            .unwrap()
            .keyids
            .push(spare_id);
        let mut envelope = signed_envelope(&root, &keypair, &keyid);
        let duplicate = envelope.signatures[0].clone();
        envelope.signatures.push(duplicate);
        let result = verify_signatures(&envelope, RoleType::Root, &root);
        assert!(matches!(
            result,
            Err(TrustError::InvalidSignature {
                valid: 1,
                threshold: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_undeclared_key_is_ignored() {
        let (keypair, key) = test_key();
        let keyid = key.key_id().unwrap();
        let root = sample_root(&key, &keyid);
        let mut envelope = signed_envelope(&root, &keypair, &keyid);
        envelope.signatures.push(Signature {
            keyid: "unknown".to_string(),
            sig: "ff".to_string(),
        });
        verify_signatures(&envelope, RoleType::Root, &root).unwrap();
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let (_, key) = test_key();
        let keyid = key.key_id().unwrap();
        let mut root = sample_root(&key, &keyid);
        root.expires = "2026-01-01T00:00:00Z".to_string();
        let boundary = crate::time::parse_timestamp(&root.expires).unwrap();
        assert!(check_expiry(&root, boundary - 1).is_ok());
        assert!(matches!(
            check_expiry(&root, boundary),
            Err(TrustError::ExpiredMetadata { .. })
        ));
        assert!(check_expiry(&root, boundary + 1).is_err());
    }

    #[test]
    fn test_meta_bytes_checks_run_on_raw_bytes() {
        let bytes = b"{\"signed\": {}}";
        let info = MetaFileInfo::for_bytes(1, bytes);
        verify_meta_bytes(bytes, "snapshot.json", &info).unwrap();

        let mut truncated = info.clone();
        truncated.length = 3;
        assert!(matches!(
            verify_meta_bytes(bytes, "snapshot.json", &truncated),
            Err(TrustError::InconsistentMetadata { .. })
        ));

        let mut wrong_hash = info.clone();
        wrong_hash
            .hashes
            .insert(SHA256_ALGORITHM.to_string(), sha256_hex(b"other"));
        assert!(verify_meta_bytes(bytes, "snapshot.json", &wrong_hash).is_err());

        let mut no_sha = info;
        no_sha.hashes.clear();
        assert!(verify_meta_bytes(bytes, "snapshot.json", &no_sha).is_err());
    }

    #[test]
    fn test_file_bytes_round_trip() {
        let (keypair, key) = test_key();
        let keyid = key.key_id().unwrap();
        let root = sample_root(&key, &keyid);
        let envelope = signed_envelope(&root, &keypair, &keyid);
        let bytes = envelope.to_file_bytes().unwrap();
        let reparsed = SignedMetadata::from_bytes(&bytes, RoleType::Root).unwrap();
        assert_eq!(reparsed, envelope);
        // Signatures still verify after the disk round trip.
        verify_signatures(&reparsed, RoleType::Root, &root).unwrap();
    }

    #[test]
    fn test_malformed_root_error_class() {
        let result = SignedMetadata::from_bytes(b"not json", RoleType::Root);
        assert!(matches!(result, Err(TrustError::MalformedRoot(_))));
        let result = SignedMetadata::from_bytes(b"not json", RoleType::Snapshot);
        assert!(matches!(result, Err(TrustError::InternalError(_))));
    }

    #[test]
    fn test_safe_target_paths() {
        assert!(is_safe_relative_path("plugins/demo/index.js"));
        assert!(is_safe_relative_path("top-level.bin"));
        assert!(!is_safe_relative_path("/etc/passwd"));
        assert!(!is_safe_relative_path("../escape"));
        assert!(!is_safe_relative_path("a/../b"));
        assert!(!is_safe_relative_path("a//b"));
        assert!(!is_safe_relative_path("a/./b"));
        assert!(!is_safe_relative_path(""));
        assert!(!is_safe_relative_path("a\\b"));
    }

    #[test]
    fn test_consistent_target_names() {
        assert_eq!(
            consistent_target_name("plugins/demo/index.js", "abc123"),
            "plugins/demo/abc123.index.js"
        );
        assert_eq!(consistent_target_name("top.bin", "abc123"), "abc123.top.bin");
    }

    #[test]
    fn test_meta_entry_lookups() {
        let snapshot = Snapshot {
            doc_type: RoleType::Snapshot,
            spec_version: SPEC_VERSION.to_string(),
            version: 1,
            expires: "2030-01-01T00:00:00Z".to_string(),
            meta: BTreeMap::new(),
        };
        assert!(matches!(
            snapshot.targets_meta(),
            Err(TrustError::InconsistentMetadata { .. })
        ));
    }
}
