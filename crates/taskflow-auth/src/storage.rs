//! Token file I/O.
//!
//! Reads and writes `~/.taskflow/auth.json` with 0o600 permissions.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::AuthError;

const AUTH_FILE_NAME: &str = "auth.json";
const STORAGE_VERSION: u32 = 1;

/// On-disk token record.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStorage {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub last_updated: String,
}

pub fn auth_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(AUTH_FILE_NAME)
}

/// Returns `None` if the file is missing, unreadable or of another version.
pub fn load_auth_storage(path: &Path) -> Option<AuthStorage> {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), "failed to read auth file: {e}");
            return None;
        }
    };

    match serde_json::from_str::<AuthStorage>(&data) {
        Ok(storage) if storage.version == STORAGE_VERSION => Some(storage),
        Ok(storage) => {
            tracing::warn!(version = storage.version, "unsupported auth storage version");
            None
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), "failed to parse auth file: {e}");
            None
        }
    }
}

/// Creates parent directories if needed; stamps `lastUpdated`.
pub fn save_auth_storage(path: &Path, storage: &mut AuthStorage) -> Result<(), AuthError> {
    storage.version = STORAGE_VERSION;
    storage.last_updated = chrono::Utc::now().to_rfc3339();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| AuthError::write(path, e))?;
    }

    let json = serde_json::to_string_pretty(storage)?;
    std::fs::write(path, &json).map_err(|e| AuthError::write(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        let _ = std::fs::set_permissions(path, perms);
    }

    Ok(())
}

pub fn save_token(path: &Path, token: &str) -> Result<(), AuthError> {
    let mut storage = load_auth_storage(path).unwrap_or_default();
    storage.token = Some(token.to_string());
    save_auth_storage(path, &mut storage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_auth_storage(&dir.path().join("auth.json")).is_none());
    }

    #[test]
    fn save_then_load_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = auth_file_path(&dir.path().join("nested"));
        save_token(&path, "tok-123").unwrap();

        let storage = load_auth_storage(&path).unwrap();
        assert_eq!(storage.version, 1);
        assert_eq!(storage.token.as_deref(), Some("tok-123"));
        assert!(!storage.last_updated.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = auth_file_path(dir.path());
        save_token(&path, "tok").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn wrong_version_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = auth_file_path(dir.path());
        std::fs::write(&path, r#"{"version": 2, "token": "x"}"#).unwrap();
        assert!(load_auth_storage(&path).is_none());
    }

    #[test]
    fn garbage_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = auth_file_path(dir.path());
        std::fs::write(&path, "{{{").unwrap();
        assert!(load_auth_storage(&path).is_none());
    }
}
