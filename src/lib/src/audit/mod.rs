//! Audit logging for trust bootstrap, refresh, and artifact verification.
//!
//! This module provides structured audit logging for security-sensitive
//! operations, so that an operator can reconstruct afterwards which metadata
//! was accepted, which was rejected, and why.
//!
//! # Usage
//!
//! ```rust,ignore
//! use upseal::audit::{self, AuditConfig, LogDestination};
//!
//! // Initialize audit logging (typically once at program start)
//! audit::init(AuditConfig {
//!     enabled: true,
//!     destination: LogDestination::Stderr,
//!     json_format: true,
//!     ..AuditConfig::default()
//! });
//!
//! // Audit events are automatically logged during bootstrap/refresh/download
//! ```
//!
//! # Event Types
//!
//! - `bootstrap.success` / `bootstrap.failure` - Trust anchor establishment
//! - `refresh.attempt` / `refresh.step` / `refresh.success` / `refresh.failure`
//! - `rollback.detected` - A served version older than the trusted one
//! - `root.rotated` - A newer root was adopted
//! - `target.verified` / `target.rejected` - Artifact verification outcome
//! - `key.generated` - Repository signing key created
//!
//! # JSON Output Example
//!
//! ```json
//! {
//!   "timestamp": "2026-08-22T20:00:00Z",
//!   "level": "WARN",
//!   "target": "upseal::audit",
//!   "event_type": "rollback.detected",
//!   "role": "timestamp",
//!   "offered_version": 2,
//!   "trusted_version": 3
//! }
//! ```

use std::sync::OnceLock;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    prelude::*,
    EnvFilter,
};

/// Global audit configuration state
static AUDIT_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Audit log configuration
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Enable audit logging (default: true)
    pub enabled: bool,
    /// Log destination
    pub destination: LogDestination,
    /// Use JSON format (default: true for production)
    pub json_format: bool,
    /// Log level filter (default: "upseal::audit=info")
    pub filter: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            destination: LogDestination::Stderr,
            json_format: true,
            filter: "upseal::audit=info".to_string(),
        }
    }
}

/// Audit log destination
#[derive(Debug, Clone, Default)]
pub enum LogDestination {
    /// Write to stdout
    Stdout,
    /// Write to stderr (default)
    #[default]
    Stderr,
    /// Write to a file (path)
    File(String),
}

/// Initialize the audit logging subsystem.
///
/// This should be called once at program startup. Subsequent calls are ignored.
///
/// # Example
///
/// ```rust,ignore
/// upseal::audit::init(AuditConfig::default());
/// ```
pub fn init(config: AuditConfig) {
    // Only initialize once
    if AUDIT_INITIALIZED.get().is_some() {
        return;
    }

    if !config.enabled {
        let _ = AUDIT_INITIALIZED.set(true);
        return;
    }

    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let writer = match config.destination {
        LogDestination::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogDestination::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogDestination::File(path) => {
            let opened = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path);
            match opened {
                Ok(file) => BoxMakeWriter::new(std::sync::Mutex::new(file)),
                // An unopenable log file must not silence the audit trail.
                Err(_) => BoxMakeWriter::new(std::io::stderr),
            }
        }
    };

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_span_events(FmtSpan::NONE)
                    .with_writer(writer),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(writer))
            .init();
    }

    let _ = AUDIT_INITIALIZED.set(true);
}

/// Generate a new correlation ID for tracking related audit events.
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// Audit Event Functions
// ============================================================================

/// Log a successful trust bootstrap.
pub fn log_bootstrap_success(correlation_id: &str, root_version: u64) {
    tracing::info!(
        target: "upseal::audit",
        event_type = "bootstrap.success",
        correlation_id = correlation_id,
        root_version = root_version,
        "Trust anchor established"
    );
}

/// Log a failed trust bootstrap.
pub fn log_bootstrap_failure(correlation_id: &str, error_type: &str, error_message: &str) {
    let safe_message = sanitize_error_message(error_message);

    tracing::warn!(
        target: "upseal::audit",
        event_type = "bootstrap.failure",
        correlation_id = correlation_id,
        error_type = error_type,
        error_message = %safe_message,
        "Trust anchor could not be established"
    );
}

/// Log the start of a metadata refresh.
pub fn log_refresh_attempt(correlation_id: &str) {
    tracing::info!(
        target: "upseal::audit",
        event_type = "refresh.attempt",
        correlation_id = correlation_id,
        "Metadata refresh initiated"
    );
}

/// Log acceptance of one role document during a refresh.
pub fn log_refresh_step(correlation_id: &str, role: &str, version: u64) {
    tracing::info!(
        target: "upseal::audit",
        event_type = "refresh.step",
        correlation_id = correlation_id,
        role = role,
        version = version,
        "Role metadata verified"
    );
}

/// Log a fully committed refresh with the versions now trusted.
pub fn log_refresh_success(
    correlation_id: &str,
    root_version: u64,
    timestamp_version: u64,
    snapshot_version: u64,
    targets_version: u64,
) {
    tracing::info!(
        target: "upseal::audit",
        event_type = "refresh.success",
        correlation_id = correlation_id,
        root_version = root_version,
        timestamp_version = timestamp_version,
        snapshot_version = snapshot_version,
        targets_version = targets_version,
        "Metadata refresh committed"
    );
}

/// Log an aborted refresh. Persisted trust is unchanged when this fires.
pub fn log_refresh_failure(correlation_id: &str, error_type: &str, error_message: &str) {
    let safe_message = sanitize_error_message(error_message);

    tracing::warn!(
        target: "upseal::audit",
        event_type = "refresh.failure",
        correlation_id = correlation_id,
        error_type = error_type,
        error_message = %safe_message,
        "Metadata refresh aborted"
    );
}

/// Log a detected rollback: a served version older than the trusted one.
pub fn log_rollback_detected(correlation_id: &str, role: &str, offered: u64, trusted: u64) {
    tracing::warn!(
        target: "upseal::audit",
        event_type = "rollback.detected",
        correlation_id = correlation_id,
        role = role,
        offered_version = offered,
        trusted_version = trusted,
        "Repository offered an older version than the trusted one"
    );
}

/// Log adoption of a newer root during the rotation probe.
pub fn log_root_rotation(correlation_id: &str, from_version: u64, to_version: u64) {
    tracing::info!(
        target: "upseal::audit",
        event_type = "root.rotated",
        correlation_id = correlation_id,
        from_version = from_version,
        to_version = to_version,
        "Newer root metadata adopted"
    );
}

/// Log a successfully verified and installed target.
pub fn log_target_verified(correlation_id: &str, target_path: &str, length: u64) {
    tracing::info!(
        target: "upseal::audit",
        event_type = "target.verified",
        correlation_id = correlation_id,
        target_path = target_path,
        length = length,
        "Target verified byte-for-byte against trusted metadata"
    );
}

/// Log a rejected target. The artifact was discarded, never installed.
pub fn log_target_rejected(
    correlation_id: &str,
    target_path: &str,
    error_type: &str,
    error_message: &str,
) {
    let safe_message = sanitize_error_message(error_message);

    tracing::warn!(
        target: "upseal::audit",
        event_type = "target.rejected",
        correlation_id = correlation_id,
        target_path = target_path,
        error_type = error_type,
        error_message = %safe_message,
        "Target failed verification and was discarded"
    );
}

/// Log a key generation event.
pub fn log_key_generation(correlation_id: &str, role: &str, key_id: &str) {
    tracing::info!(
        target: "upseal::audit",
        event_type = "key.generated",
        correlation_id = correlation_id,
        role = role,
        key_id = key_id,
        "Signing key generated"
    );
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Sanitize error messages to avoid leaking sensitive information.
fn sanitize_error_message(message: &str) -> String {
    const MAX_LEN: usize = 500;

    // Unbroken alphanumeric runs over 40 chars are treated as tokens,
    // key ids, or digests; the structured fields carry those instead.
    let looks_like_secret = |word: &str| {
        word.len() > 40 && word.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    };

    let mut sanitized = message
        .split_whitespace()
        .map(|word| if looks_like_secret(word) { "[REDACTED]" } else { word })
        .collect::<Vec<_>>()
        .join(" ");

    if sanitized.len() > MAX_LEN {
        let mut cut = MAX_LEN - 3;
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str("...");
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_error_message() {
        assert_eq!(
            sanitize_error_message("Connection failed"),
            "Connection failed"
        );

        // Long token-like strings should be redacted
        let with_token = "Failed with token eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9eyJzdWIiOiIxMjM0NTY3ODkwIn0";
        assert!(sanitize_error_message(with_token).contains("[REDACTED]"));

        // Hex digests in rejection messages are exactly 64 chars and get
        // redacted too; the event carries them in structured fields instead.
        let with_digest = format!("sha256 digest {} does not match", "ab".repeat(32));
        assert!(sanitize_error_message(&with_digest).contains("[REDACTED]"));
    }

    #[test]
    fn test_sanitize_truncates_long_messages() {
        let long = "word ".repeat(200);
        let sanitized = sanitize_error_message(&long);
        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("..."));
    }

    #[test]
    fn test_correlation_id_format() {
        let id = new_correlation_id();
        // Hyphenated UUID, 8-4-4-4-12
        assert_eq!(id.len(), 36);
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }
}
