//! Persisted "monitoring enabled" flag.
//!
//! Read once at daemon start to decide whether to resume monitoring
//! automatically (after a reboot, say); written when monitoring is started
//! or stopped through the API. The monitoring session itself never touches
//! it.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::tracing::prelude::*;

#[derive(Debug, thiserror::Error)]
pub enum PrefsError {
    #[error("preference file I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed preference file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringPreference {
    #[serde(default)]
    pub fall_detection_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
}

impl PreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file means monitoring was never enabled.
    pub async fn load(&self) -> Result<MonitoringPreference, PrefsError> {
        match fs::read_to_string(&self.path).await {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(MonitoringPreference::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Like [`load`](Self::load), but an unreadable file counts as disabled.
    pub async fn is_enabled(&self) -> bool {
        match self.load().await {
            Ok(prefs) => prefs.fall_detection_enabled,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot read preferences, assuming disabled");
                false
            }
        }
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<(), PrefsError> {
        let prefs = MonitoringPreference {
            fall_detection_enabled: enabled,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write then rename so a crash never leaves a truncated file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&prefs)?).await?;
        fs::rename(&tmp, &self.path).await?;

        debug!(enabled, path = %self.path.display(), "Saved monitoring preference");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_means_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::new(dir.path().join("prefs.json"));

        assert_eq!(store.load().await.unwrap(), MonitoringPreference::default());
        assert!(!store.is_enabled().await);
    }

    #[tokio::test]
    async fn round_trips_through_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::new(dir.path().join("state/safenest/prefs.json"));

        store.set_enabled(true).await.unwrap();
        assert!(store.is_enabled().await);

        store.set_enabled(false).await.unwrap();
        assert!(!store.is_enabled().await);
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn malformed_file_counts_as_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = PreferenceStore::new(&path);

        assert!(matches!(store.load().await, Err(PrefsError::Parse(_))));
        assert!(!store.is_enabled().await);
    }

    #[tokio::test]
    async fn tolerates_missing_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "{}").unwrap();

        assert!(!PreferenceStore::new(&path).is_enabled().await);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn saving_yields_to_other_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::new(dir.path().join("prefs.json"));

        // On a single-threaded runtime this only runs if saving suspends.
        let other = tokio::spawn(async {});
        store.set_enabled(true).await.unwrap();

        assert!(other.is_finished());
    }
}
