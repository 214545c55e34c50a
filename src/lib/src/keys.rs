//! Repository signing keys: one Ed25519 keypair per metadata role.

use crate::error::TrustError;
use crate::metadata::{Key, RoleType, Signature};
use crate::secure_file;
use ct_codecs::{Encoder, Hex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// On-disk form of a signing key. Secret material never appears anywhere
/// else in serialized form.
#[derive(Serialize, Deserialize)]
struct KeyFile {
    keytype: String,
    scheme: String,
    keyid: String,
    keyval: KeyFileVal,
}

#[derive(Serialize, Deserialize)]
struct KeyFileVal {
    public: String,
    private: String,
}

/// A signing key bound to one metadata role.
#[derive(Clone)]
pub struct SigningKey {
    role: RoleType,
    key_id: String,
    public: Key,
    keypair: ed25519_compact::KeyPair,
}

impl SigningKey {
    /// Generate a fresh key for a role.
    pub fn generate(role: RoleType) -> Result<Self, TrustError> {
        let keypair = ed25519_compact::KeyPair::from_seed(ed25519_compact::Seed::generate());
        Self::from_keypair(role, keypair)
    }

    fn from_keypair(role: RoleType, keypair: ed25519_compact::KeyPair) -> Result<Self, TrustError> {
        let public = Key::ed25519(hex::encode(keypair.pk.as_ref()));
        let key_id = public.key_id()?;
        Ok(SigningKey {
            role,
            key_id,
            public,
            keypair,
        })
    }

    pub fn role(&self) -> RoleType {
        self.role
    }

    /// Content-derived key identifier, as referenced from root metadata.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// The public half in metadata wire form.
    pub fn public_key(&self) -> &Key {
        &self.public
    }

    /// Sign a message. Ed25519 signing is deterministic, so the same message
    /// always yields the same signature entry.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let raw = self.keypair.sk.sign(message, None);
        Signature {
            keyid: self.key_id.clone(),
            sig: hex::encode(raw.as_ref()),
        }
    }

    /// Save the key as a JSON file readable only by the owner.
    pub fn to_file(&self, file: impl AsRef<Path>) -> Result<(), TrustError> {
        let record = KeyFile {
            keytype: self.public.keytype.clone(),
            scheme: self.public.scheme.clone(),
            keyid: self.key_id.clone(),
            keyval: KeyFileVal {
                public: self.public.keyval.public.clone(),
                private: hex::encode(self.keypair.sk.as_ref()),
            },
        };
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| TrustError::InternalError(format!("Serialize key file: {e}")))?;
        secure_file::write_secure(file.as_ref(), &json)?;
        Ok(())
    }

    /// Load a key from a JSON file and check it is internally consistent.
    pub fn from_file(role: RoleType, file: impl AsRef<Path>) -> Result<Self, TrustError> {
        let bytes = secure_file::read_secure(file.as_ref())?;
        let record: KeyFile = serde_json::from_slice(&bytes)
            .map_err(|e| TrustError::InternalError(format!("Parse key file: {e}")))?;
        let sk_bytes = hex::decode(&record.keyval.private)
            .map_err(|e| TrustError::InternalError(format!("Decode secret key: {e}")))?;
        let sk = ed25519_compact::SecretKey::from_slice(&sk_bytes)?;
        let keypair = ed25519_compact::KeyPair {
            pk: sk.public_key(),
            sk,
        };
        let key = Self::from_keypair(role, keypair)?;
        if key.public.keyval.public != record.keyval.public {
            return Err(TrustError::InternalError(
                "Key file public key does not match secret key".to_string(),
            ));
        }
        if key.key_id != record.keyid {
            return Err(TrustError::InternalError(
                "Key file keyid does not match derived key id".to_string(),
            ));
        }
        Ok(key)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SigningKey {{ role: {}, key_id: [{}], pk: [{}] }}",
            self.role,
            self.key_id,
            Hex::encode_to_string(self.keypair.pk.as_ref()).map_err(|_| fmt::Error)?,
        )
    }
}

/// Signing keys for all four roles.
pub struct KeySet {
    keys: BTreeMap<RoleType, SigningKey>,
}

impl KeySet {
    /// Generate a full set of fresh role keys.
    pub fn generate() -> Result<Self, TrustError> {
        let mut keys = BTreeMap::new();
        for role in RoleType::ALL {
            keys.insert(role, SigningKey::generate(role)?);
        }
        Ok(KeySet { keys })
    }

    pub fn key(&self, role: RoleType) -> Result<&SigningKey, TrustError> {
        self.keys
            .get(&role)
            .ok_or_else(|| TrustError::InternalError(format!("No signing key for role [{role}]")))
    }

    /// Sign a message with the key for `role`.
    pub fn sign(&self, role: RoleType, message: &[u8]) -> Result<Signature, TrustError> {
        Ok(self.key(role)?.sign(message))
    }

    /// All public keys, keyed by key id, ready for a root document.
    pub fn public_keys(&self) -> BTreeMap<String, Key> {
        self.keys
            .values()
            .map(|key| (key.key_id().to_string(), key.public_key().clone()))
            .collect()
    }

    pub fn key_ids(&self, role: RoleType) -> Result<Vec<String>, TrustError> {
        Ok(vec![self.key(role)?.key_id().to_string()])
    }

    /// Save every role key as `<dir>/<role>.json`.
    pub fn save_to_dir(&self, dir: impl AsRef<Path>) -> Result<(), TrustError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        for key in self.keys.values() {
            key.to_file(dir.join(format!("{}.json", key.role())))?;
        }
        Ok(())
    }

    /// Load all four role keys from a directory written by [`save_to_dir`].
    ///
    /// [`save_to_dir`]: KeySet::save_to_dir
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self, TrustError> {
        let dir = dir.as_ref();
        let mut keys = BTreeMap::new();
        for role in RoleType::ALL {
            let file = dir.join(format!("{role}.json"));
            keys.insert(role, SigningKey::from_file(role, &file)?);
        }
        Ok(KeySet { keys })
    }
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.keys.iter().map(|(role, key)| (role, key.key_id())))
            .finish()
    }
}
