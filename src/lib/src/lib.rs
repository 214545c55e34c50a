//! Signed-metadata trust protocol for secure content distribution.
//!
//! The repository side builds a four-role signed metadata hierarchy (root,
//! targets, snapshot, timestamp) describing available artifacts. The client
//! side bootstraps trust from one pinned root document, refreshes metadata
//! while detecting forgery, rollback, mix-and-match, and expiry, and verifies
//! every artifact byte-for-byte before it is handed to the caller.

#![forbid(unsafe_code)]

mod error;
mod keys;
mod transport;

/// Secure file operations with restrictive permissions
///
/// Provides utilities for securely reading and writing sensitive files such
/// as private signing keys, plus the atomic-replace and write-once
/// primitives persisted trust state depends on.
pub mod secure_file;

/// Time sources and timestamp handling
///
/// Provides a time source abstraction so expiry checks can run against a
/// pinned clock in tests, plus RFC 3339 parsing/formatting for the
/// `expires` fields metadata documents carry.
pub mod time;

/// Role metadata documents and the repository-side builder
///
/// The four role documents, the signed envelope that carries them, canonical
/// serialization, threshold signature verification, and the builder that
/// assembles and publishes a complete signed hierarchy.
pub mod metadata;

/// Client-side trust: bootstrap, refresh, download
///
/// Establishes trust from a pinned root, brings it up to date against a
/// repository with rollback/expiry/consistency enforcement at every step,
/// and installs byte-verified artifacts.
pub mod client;

/// Line-based command dispatcher
///
/// One JSON request line in, one JSON response line out, with a stable
/// error-code and exit-code contract for embedding callers.
pub mod dispatch;

/// Structured audit logging
///
/// Emits machine-readable events for bootstrap, refresh, rollback
/// detection, root rotation, and target verification outcomes.
pub mod audit;

#[allow(unused_imports)]
pub use error::*;
#[allow(unused_imports)]
pub use keys::*;
#[allow(unused_imports)]
pub use transport::*;

pub mod reexports {
    pub use {ct_codecs, hex, hmac_sha256, log, serde_json, thiserror};
}
