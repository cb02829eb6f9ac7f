use anyhow::Context;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::crypto::AccountEnvelope;
use crate::error::VaultError;

/// Environment variable overriding the data directory.
pub const HOME_ENV: &str = "HMVAULT_HOME";

/// Resolve the data directory: `$HMVAULT_HOME`, else `~/.hmvault`.
pub fn data_dir() -> anyhow::Result<PathBuf> {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let home = dirs::home_dir().ok_or(VaultError::HomeDirNotFound)?;
    Ok(home.join(".hmvault"))
}

pub fn account_path() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join("account.json"))
}

pub fn sessions_dir() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join("sessions"))
}

pub fn ensure_data_dir() -> anyhow::Result<()> {
    let dir = data_dir()?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {} directory", dir.display()))?;
    Ok(())
}

/// Write bytes to disk atomically (write to temp then rename) with 0600 permissions.
///
/// The temp file lives in the destination directory so the rename replaces the
/// record in one step; readers never observe a partial write.
pub fn write_atomic(bytes: &[u8], dest: &Path) -> Result<(), VaultError> {
    let tmp = temp_path_for(dest)?;
    let mut file = create_private_file(&tmp).map_err(VaultError::AtomicWriteFailed)?;

    let written = file.write_all(bytes).and_then(|()| file.sync_all());
    drop(file);
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(VaultError::AtomicWriteFailed(e));
    }

    if let Err(e) = std::fs::rename(&tmp, dest) {
        let _ = std::fs::remove_file(&tmp);
        return Err(VaultError::AtomicWriteFailed(e));
    }

    Ok(())
}

fn temp_path_for(dest: &Path) -> Result<PathBuf, VaultError> {
    let parent = dest.parent().ok_or_else(|| {
        VaultError::AtomicWriteFailed(std::io::Error::other("destination has no parent directory"))
    })?;
    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(parent.join(format!(".{}.tmp", file_name)))
}

/// Create a new file that is 0600 from the moment it exists.
///
/// A temp file left behind by an interrupted write is removed first.
fn create_private_file(path: &Path) -> std::io::Result<File> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

/// Persist the sealed account envelope.
pub fn write_account(envelope: &AccountEnvelope) -> anyhow::Result<PathBuf> {
    ensure_data_dir()?;
    let path = account_path()?;
    let json = serde_json::to_vec_pretty(envelope)?;
    write_atomic(&json, &path).context("Failed to write account file")?;
    tracing::debug!(path = %path.display(), "wrote account envelope");
    Ok(path)
}

/// Load the sealed account envelope, refusing files readable by other users.
pub fn load_account() -> anyhow::Result<AccountEnvelope> {
    let path = account_path()?;
    if !path.exists() {
        return Err(VaultError::NoAccountFound.into());
    }
    check_permissions(&path)?;
    let raw = std::fs::read(&path)
        .with_context(|| format!("Failed to read account from {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("Corrupted account file {}", path.display()))
}

pub fn account_exists() -> anyhow::Result<bool> {
    Ok(account_path()?.exists())
}

/// Check that a secret file has exactly 0600 permissions (Unix only).
///
/// The error message includes the remediation command so users can fix it.
#[cfg(unix)]
pub fn check_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to read metadata for {}", path.display()))?;
    let mode = metadata.permissions().mode() & 0o777;
    if mode != 0o600 {
        anyhow::bail!(
            "File {} has insecure permissions {:04o} (expected 0600). Fix with: chmod 600 {}",
            path.display(),
            mode,
            path.display()
        );
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn check_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_check_permissions_rejects_0644() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("account.json");
        std::fs::write(&path, b"{}").expect("Failed to write file");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))
            .expect("Failed to set permissions");
        let result = check_permissions(&path);
        assert!(result.is_err(), "Expected error for 0644 permissions");
        let err_msg = result.unwrap_err().to_string();
        assert!(
            err_msg.contains("permissions"),
            "Error message should contain 'permissions', got: {}",
            err_msg
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_write_atomic_sets_0600() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("account.json");
        write_atomic(b"first", &path).expect("Failed to write atomically");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "Expected 0600 permissions, got {:04o}", mode);
        check_permissions(&path).expect("0600 file must pass the permission check");
    }

    #[cfg(unix)]
    #[test]
    fn test_temp_file_is_0600_before_any_bytes_are_written() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dest = dir.path().join("record.json");
        let tmp = temp_path_for(&dest).unwrap();

        let file = create_private_file(&tmp).expect("Failed to create temp file");
        let mode = file.metadata().unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "temp file must start at 0600, got {:04o}", mode);
        assert!(!dest.exists(), "nothing is renamed into place yet");
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_world_readable_temp_file_is_replaced() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dest = dir.path().join("record.json");
        let tmp = temp_path_for(&dest).unwrap();
        std::fs::write(&tmp, b"stale").unwrap();
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644)).unwrap();

        let file = create_private_file(&tmp).expect("stale temp file must not block writes");
        let mode = file.metadata().unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "recreated temp file must be 0600, got {:04o}", mode);
        assert_eq!(file.metadata().unwrap().len(), 0, "stale contents must be gone");
    }

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("record.json");
        write_atomic(b"first", &path).unwrap();
        write_atomic(b"second", &path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp file must be renamed away");
    }
}
