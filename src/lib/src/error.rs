/// The upseal error type.
///
/// Every fallible operation in the crate returns this closed enumeration;
/// trust decisions are never signaled through panics or logging alone.
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    #[error("Untrusted root: [{0}]")]
    UntrustedRoot(String),

    #[error("Malformed root: [{0}]")]
    MalformedRoot(String),

    #[error("Expired {role} metadata: expired at [{expires}]")]
    ExpiredMetadata { role: String, expires: String },

    #[error("Signature threshold not met for {role}: {valid} of {threshold} required")]
    InvalidSignature {
        role: String,
        valid: usize,
        threshold: u64,
    },

    #[error("Rollback detected for {role}: offered version {offered} is older than trusted version {trusted}")]
    RollbackAttack {
        role: String,
        offered: u64,
        trusted: u64,
    },

    #[error("Inconsistent metadata for [{meta}]: {reason}")]
    InconsistentMetadata { meta: String, reason: String },

    #[error("Target not found in trusted metadata: [{0}]")]
    TargetNotFound(String),

    #[error("Verification failed for [{path}]: {reason}")]
    VerificationFailed { path: String, reason: String },

    #[error("Transport error fetching [{path}]: {reason}")]
    TransportError { path: String, reason: String },

    #[error("Internal error: [{0}]")]
    InternalError(String),

    #[error("I/O error")]
    IOError(#[from] std::io::Error),

    #[error("Ed25519 signature function error")]
    CryptoError(#[from] ed25519_compact::Error),

    #[error("Time error: {0}")]
    TimeError(String),

    #[error("Usage error: {0}")]
    UsageError(&'static str),
}

impl TrustError {
    /// Stable taxonomy name of this error kind, for audit events and
    /// structured reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            TrustError::UntrustedRoot(_) => "UntrustedRoot",
            TrustError::MalformedRoot(_) => "MalformedRoot",
            TrustError::ExpiredMetadata { .. } => "ExpiredMetadata",
            TrustError::InvalidSignature { .. } => "InvalidSignature",
            TrustError::RollbackAttack { .. } => "RollbackAttack",
            TrustError::InconsistentMetadata { .. } => "InconsistentMetadata",
            TrustError::TargetNotFound(_) => "TargetNotFound",
            TrustError::VerificationFailed { .. } => "VerificationFailed",
            TrustError::TransportError { .. } => "TransportError",
            TrustError::InternalError(_) => "InternalError",
            TrustError::IOError(_) => "IOError",
            TrustError::CryptoError(_) => "CryptoError",
            TrustError::TimeError(_) => "TimeError",
            TrustError::UsageError(_) => "UsageError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrustError::UntrustedRoot("threshold not met".to_string());
        assert_eq!(err.to_string(), "Untrusted root: [threshold not met]");

        let err = TrustError::MalformedRoot("missing roles".to_string());
        assert_eq!(err.to_string(), "Malformed root: [missing roles]");

        let err = TrustError::TargetNotFound("plugins/a/index.js".to_string());
        assert_eq!(
            err.to_string(),
            "Target not found in trusted metadata: [plugins/a/index.js]"
        );

        let err = TrustError::InternalError("test error".to_string());
        assert_eq!(err.to_string(), "Internal error: [test error]");

        let err = TrustError::UsageError("missing argument");
        assert_eq!(err.to_string(), "Usage error: missing argument");
    }

    #[test]
    fn test_error_with_params() {
        let err = TrustError::InvalidSignature {
            role: "timestamp".to_string(),
            valid: 0,
            threshold: 1,
        };
        assert_eq!(
            err.to_string(),
            "Signature threshold not met for timestamp: 0 of 1 required"
        );

        let err = TrustError::RollbackAttack {
            role: "timestamp".to_string(),
            offered: 0,
            trusted: 1,
        };
        assert_eq!(
            err.to_string(),
            "Rollback detected for timestamp: offered version 0 is older than trusted version 1"
        );

        let err = TrustError::ExpiredMetadata {
            role: "snapshot".to_string(),
            expires: "2024-01-01T00:00:00Z".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Expired snapshot metadata: expired at [2024-01-01T00:00:00Z]"
        );

        let err = TrustError::InconsistentMetadata {
            meta: "snapshot.json".to_string(),
            reason: "length 120 does not match declared 119".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Inconsistent metadata for [snapshot.json]: length 120 does not match declared 119"
        );
    }

    #[test]
    fn test_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TrustError = io_err.into();
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_error_kind_names() {
        let err = TrustError::RollbackAttack {
            role: "snapshot".to_string(),
            offered: 1,
            trusted: 2,
        };
        assert_eq!(err.kind(), "RollbackAttack");

        let err = TrustError::TransportError {
            path: "metadata/timestamp.json".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(err.kind(), "TransportError");
    }

    #[test]
    fn test_error_debug() {
        let err = TrustError::TargetNotFound("a/b".to_string());
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("TargetNotFound"));
    }
}
