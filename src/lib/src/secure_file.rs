//! File primitives for key material and persisted trust state
//!
//! Two concerns live here. Signing-key files must never be readable by other
//! users, so key writes go through [`write_secure`] (mode 0600 on Unix from
//! the moment of creation) and key reads warn on permissive modes. Persisted
//! metadata must never be observable half-written, so metadata writes go
//! through [`atomic_replace`] (same-directory temp file + rename) and the
//! version-addressed archive goes through [`write_if_absent`] so an accepted
//! document is never rewritten.
//!
//! # Example
//!
//! ```no_run
//! use upseal::secure_file;
//! use std::path::Path;
//!
//! secure_file::write_secure(Path::new("/tmp/role.key"), b"secret data")?;
//! let data = secure_file::read_secure(Path::new("/tmp/role.key"))?;
//! # Ok::<(), upseal::TrustError>(())
//! ```

use crate::error::TrustError;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// The restrictive permission mode for sensitive files (owner read/write only)
#[cfg(unix)]
pub const SECURE_FILE_MODE: u32 = 0o600;

/// Check if file permissions are secure (Unix only)
///
/// Logs a warning when group or world bits are set; always returns `Ok(())`
/// so callers can still read legacy files with bad modes.
#[cfg(unix)]
pub fn check_permissions(path: &Path) -> Result<(), TrustError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path)?;
    let perm_bits = metadata.permissions().mode() & 0o777;

    if perm_bits & 0o077 != 0 {
        log::warn!(
            "Key file '{}' is readable by other users (mode {:o}); \
             expected mode 0600. Fix with: chmod 600 '{}'",
            path.display(),
            perm_bits,
            path.display()
        );
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn check_permissions(path: &Path) -> Result<(), TrustError> {
    log::debug!(
        "Permission check skipped for '{}': not supported on this platform. \
         On Windows, ensure proper ACLs are set for key files.",
        path.display()
    );
    Ok(())
}

/// Create a file with secure permissions from the start (Unix only)
///
/// On Unix the file is created with mode 0600 before any data is written,
/// so there is no window where the content is briefly world-readable.
#[cfg(unix)]
pub fn create_secure_file(path: &Path) -> Result<File, TrustError> {
    use std::os::unix::fs::OpenOptionsExt;

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(SECURE_FILE_MODE)
        .open(path)?;

    Ok(file)
}

#[cfg(not(unix))]
pub fn create_secure_file(path: &Path) -> Result<File, TrustError> {
    log::warn!(
        "Creating file '{}' without restrictive permissions: not supported on this platform. \
         Ensure proper access controls are configured for key files.",
        path.display()
    );

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;

    Ok(file)
}

/// Write data to a file with secure permissions.
pub fn write_secure(path: &Path, data: &[u8]) -> Result<(), TrustError> {
    let mut file = create_secure_file(path)?;
    file.write_all(data)?;
    file.sync_all()?;

    Ok(())
}

/// Read a file, warning first if its permissions are too permissive.
pub fn read_secure(path: &Path) -> Result<Vec<u8>, TrustError> {
    check_permissions(path)?;
    Ok(fs::read(path)?)
}

/// Atomically replace the contents of `path` with `data`.
///
/// Writes to a temp file in the same directory (so the rename cannot cross
/// filesystems), syncs it, then renames over the destination. A crash at any
/// point leaves either the old complete file or the new complete file,
/// never a torn one. Parent directories are created as needed.
pub fn atomic_replace(path: &Path, data: &[u8]) -> Result<(), TrustError> {
    let dir = path.parent().ok_or_else(|| {
        TrustError::InternalError(format!("No parent directory for '{}'", path.display()))
    })?;
    if !dir.as_os_str().is_empty() {
        fs::create_dir_all(dir)?;
    }

    let file_name = path.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
        TrustError::InternalError(format!("Invalid file name in '{}'", path.display()))
    })?;
    let tmp_path = dir.join(format!(".{}.{}.tmp", file_name, std::process::id()));

    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    Ok(())
}

/// Write a file only if it does not already exist. Returns `true` when the
/// file was written, `false` when an existing copy was left untouched.
///
/// The write itself goes through [`atomic_replace`], so a crash never leaves
/// a partial file that would later mask the real content.
pub fn write_if_absent(path: &Path, data: &[u8]) -> Result<bool, TrustError> {
    if path.exists() {
        log::debug!("Leaving existing file '{}' untouched", path.display());
        return Ok(false);
    }
    atomic_replace(path, data)?;
    Ok(true)
}
