//! Fuzz target for signed metadata parsing
//!
//! This target tests envelope deserialization for all four roles:
//! - Envelope shape validation (signed payload + signatures array)
//! - Role document parsing (type tag, version, expires, role fields)
//! - Canonical re-serialization of accepted envelopes
//!
//! Security concerns:
//! - Panics on malformed, truncated, or deeply nested JSON
//! - Integer handling in version and length fields
//! - Divergence between file bytes and the canonical signing form
//! - Root documents that parse but carry unusable key tables

#![no_main]

use libfuzzer_sys::fuzz_target;
use upseal::metadata::{RoleType, Root, SignedMetadata, Snapshot, Targets, Timestamp};

fuzz_target!(|data: &[u8]| {
    for role in RoleType::ALL {
        if let Ok(envelope) = SignedMetadata::from_bytes(data, role) {
            // An accepted envelope must keep producing stable bytes.
            let _ = envelope.canonical_signed_bytes();
            let _ = envelope.to_file_bytes();
            let _ = envelope.signed_version();
            let _ = envelope.signed_expires();

            match role {
                RoleType::Root => {
                    if let Ok(root) = envelope.parse::<Root>() {
                        let _ = root.validate();
                        for lookup in RoleType::ALL {
                            let _ = root.role_keys(lookup);
                        }
                    }
                }
                RoleType::Targets => {
                    if let Ok(targets) = envelope.parse::<Targets>() {
                        // Limit iterations to keep the run bounded
                        for info in targets.targets.values().take(100) {
                            let _ = info.sha256();
                        }
                    }
                }
                RoleType::Snapshot => {
                    if let Ok(snapshot) = envelope.parse::<Snapshot>() {
                        let _ = snapshot.targets_meta();
                    }
                }
                RoleType::Timestamp => {
                    if let Ok(timestamp) = envelope.parse::<Timestamp>() {
                        let _ = timestamp.snapshot_meta();
                    }
                }
            }
        }
    }
});
