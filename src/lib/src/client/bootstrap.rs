//! Trust bootstrap from a pinned root document.

use super::store::TrustStore;
use super::TrustedDoc;
use crate::error::TrustError;
use crate::metadata::{verify_signatures, RoleType, Root, SignedMetadata};
use std::path::Path;

/// Establish the local trust anchor.
///
/// A root already accepted into the store wins over the pinned file, so
/// re-running bootstrap never undoes a root rotation the client has verified.
/// The pinned file is only read on first use or when the stored root is
/// unusable.
///
/// Expiry is deliberately not checked here. An expired but authentic root
/// must still anchor the client, otherwise a long-offline client could never
/// refresh its way back to a current one.
pub fn establish_trust(
    store: &TrustStore,
    trusted_root: &Path,
) -> Result<TrustedDoc<Root>, TrustError> {
    match store.load(RoleType::Root) {
        Ok(Some(envelope)) => match verify_root(&envelope) {
            Ok(doc) => {
                log::debug!("Using stored root metadata version [{}]", doc.version);
                return Ok(TrustedDoc { doc, envelope });
            }
            Err(e) => {
                log::warn!("Stored root metadata fails verification, falling back to pinned root: {e}");
            }
        },
        Ok(None) => {}
        Err(e) => {
            log::warn!("Stored root metadata unreadable, falling back to pinned root: {e}");
        }
    }

    let bytes = std::fs::read(trusted_root).map_err(|e| {
        TrustError::InternalError(format!(
            "Cannot read pinned root [{}]: {e}",
            trusted_root.display()
        ))
    })?;
    let envelope = SignedMetadata::from_bytes(&bytes, RoleType::Root)?;
    let doc = verify_root(&envelope)?;

    store.ensure_layout()?;
    store.persist(RoleType::Root, &envelope)?;
    log::debug!("Pinned root metadata version [{}] accepted", doc.version);
    Ok(TrustedDoc { doc, envelope })
}

/// Full root acceptance check: parse, structural validation, and the root's
/// own signature threshold. Used for pinned files, stored roots, and each
/// step of a rotation chain.
pub(crate) fn verify_root(envelope: &SignedMetadata) -> Result<Root, TrustError> {
    let doc: Root = envelope.parse()?;
    doc.validate()?;
    match verify_signatures(envelope, RoleType::Root, &doc) {
        Ok(()) => Ok(doc),
        Err(TrustError::InvalidSignature {
            valid, threshold, ..
        }) => Err(TrustError::UntrustedRoot(format!(
            "{valid} of {threshold} required root signatures are valid"
        ))),
        Err(e) => Err(e),
    }
}
