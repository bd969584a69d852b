//! Persisted bearer credential.
//!
//! File format: `{ "access_token": string, "saved_at": unix-epoch-seconds }`.
//! Writes go through a temp file + rename so a concurrent reader never sees
//! a partial file. A missing or unreadable file means "no credential".

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::core::models::{Credential, DEFAULT_CREDENTIAL_VALIDITY};
use crate::error::Result;

#[derive(Debug, Serialize, Deserialize)]
struct CredentialFile {
    access_token: String,
    saved_at: f64,
}

impl CredentialFile {
    fn from_credential(credential: &Credential) -> Self {
        #[allow(clippy::cast_precision_loss)] // millisecond precision is plenty
        let saved_at = credential.acquired_at().timestamp_millis() as f64 / 1000.0;
        Self {
            access_token: credential.access_token().to_string(),
            saved_at,
        }
    }

    fn into_credential(self) -> Option<Credential> {
        if self.access_token.trim().is_empty() || !self.saved_at.is_finite() {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        let millis = (self.saved_at * 1000.0).round() as i64;
        let acquired_at = DateTime::<Utc>::from_timestamp_millis(millis)?;
        Some(Credential::new(self.access_token, acquired_at))
    }
}

/// File-backed credential store.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    validity: TimeDelta,
}

impl CredentialStore {
    /// Store at `path` with the default 12 hour validity window.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            validity: DEFAULT_CREDENTIAL_VALIDITY,
        }
    }

    #[must_use]
    pub const fn with_validity(mut self, validity: TimeDelta) -> Self {
        self.validity = validity;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn validity(&self) -> TimeDelta {
        self.validity
    }

    /// Read the persisted credential, if any.
    ///
    /// Parse and I/O failures are logged and reported as `None`.
    #[must_use]
    pub fn load(&self) -> Option<Credential> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Could not read saved token");
                return None;
            }
        };

        match serde_json::from_str::<CredentialFile>(&content) {
            Ok(file) => file.into_credential(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Saved token is unreadable, ignoring");
                None
            }
        }
    }

    /// `now - acquired_at < validity`.
    #[must_use]
    pub fn is_valid(&self, credential: &Credential, now: DateTime<Utc>) -> bool {
        credential.is_valid_at(now, self.validity)
    }

    /// Load the persisted credential only if it is still valid at `now`.
    #[must_use]
    pub fn load_valid(&self, now: DateTime<Utc>) -> Option<Credential> {
        let credential = self.load()?;
        if self.is_valid(&credential, now) {
            Some(credential)
        } else {
            tracing::info!(
                acquired_at = %credential.acquired_at(),
                "Saved token is too old, will refresh"
            );
            None
        }
    }

    /// Persist a credential atomically.
    ///
    /// # Errors
    /// Returns an error if the parent directory cannot be created or the
    /// temp file cannot be written and renamed into place.
    pub fn save(&self, credential: &Credential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string(&CredentialFile::from_credential(credential))?;
        write_atomic(&self.path, content.as_bytes())?;
        tracing::debug!(path = %self.path.display(), token = %credential.redacted(), "Access token saved");
        Ok(())
    }

    /// Remove the persisted credential so the next `load` returns `None`.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be removed.
    pub fn invalidate(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "Saved token invalidated");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write bytes atomically using temp file + rename.
fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    // Temp file must live in the same directory for rename to be atomic.
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("token"),
        std::process::id()
    ));

    {
        let mut file = open_private(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    Ok(())
}

/// Create (or truncate) a file readable only by its owner.
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    // A leftover temp file keeps its old mode; start from scratch.
    let _ = std::fs::remove_file(path);
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> CredentialStore {
        CredentialStore::new(dir.path().join("token.json"))
    }

    #[test]
    fn missing_file_is_no_credential() {
        let tmp = TempDir::new().unwrap();
        assert!(store_in(&tmp).load().is_none());
    }

    #[test]
    fn corrupt_file_is_no_credential() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        std::fs::write(store.path(), "{\"access_token\": ").unwrap();
        assert!(store.load().is_none());

        std::fs::write(store.path(), r#"{"access_token": "", "saved_at": 1}"#).unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn save_then_load() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let cred = Credential::new(
            "tok-123",
            DateTime::<Utc>::from_timestamp_millis(1_760_000_000_250).unwrap(),
        );

        store.save(&cred).unwrap();
        let loaded = store.load().expect("credential");
        assert_eq!(loaded, cred);
    }

    #[test]
    fn reads_fractional_seconds_written_by_other_tools() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        std::fs::write(
            store.path(),
            r#"{"access_token": "abc", "saved_at": 1760000000.5}"#,
        )
        .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.access_token(), "abc");
        assert_eq!(loaded.acquired_at().timestamp_millis(), 1_760_000_000_500);
    }

    #[test]
    fn save_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        store.save(&Credential::fresh("abc")).unwrap();

        let entries: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].as_ref().unwrap().file_name(), "token.json");
    }

    #[cfg(unix)]
    #[test]
    fn saved_token_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        store.save(&Credential::fresh("abc")).unwrap();
        // Overwriting keeps the restriction.
        store.save(&Credential::fresh("def")).unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn invalidate_clears_and_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        store.save(&Credential::fresh("abc")).unwrap();

        store.invalidate().unwrap();
        assert!(store.load().is_none());
        store.invalidate().unwrap();
    }

    #[test]
    fn validity_boundary() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let t = Utc::now();
        let cred = Credential::new("abc", t);
        let eps = TimeDelta::milliseconds(1);

        assert!(store.is_valid(&cred, t + store.validity() - eps));
        assert!(!store.is_valid(&cred, t + store.validity() + eps));
    }

    #[test]
    fn load_valid_discards_expired() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp).with_validity(TimeDelta::hours(1));
        let old = Credential::new("abc", Utc::now() - TimeDelta::hours(2));
        store.save(&old).unwrap();

        assert!(store.load().is_some());
        assert!(store.load_valid(Utc::now()).is_none());
    }
}
