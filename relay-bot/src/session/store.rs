//! JSON snapshot persistence for session histories.
//!
//! The whole registry lives in one file:
//!
//! ```json
//! { "<user-id>": { "<session>": [ {"role": "user", "content": "..."} ] } }
//! ```
//!
//! Every save rewrites the file in full. Writes go to a sibling temp file
//! first and are renamed into place, so readers never observe a partial
//! snapshot.

use super::types::Histories;
use relay_common::{Error, Result, ResultExt};
use std::path::{Path, PathBuf};

/// Snapshot file reader/writer.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot.
    ///
    /// A missing file yields an empty registry. Unreadable or malformed
    /// content also yields an empty registry, after logging the error.
    pub fn load(&self) -> Histories {
        match self.try_load() {
            Ok(Some(histories)) => {
                tracing::info!(
                    path = %self.path.display(),
                    users = histories.len(),
                    "Loaded session histories"
                );
                histories
            }
            Ok(None) => {
                tracing::info!(
                    path = %self.path.display(),
                    "History file not found, starting empty"
                );
                Histories::new()
            }
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "Error loading user histories, starting empty"
                );
                Histories::new()
            }
        }
    }

    /// Read the snapshot, surfacing errors instead of recovering.
    pub fn try_load(&self) -> Result<Option<Histories>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path)
            .context(format!("Failed to read {}", self.path.display()))?;

        let histories = serde_json::from_str(&content)
            .map_err(|e| Error::Persistence(format!("{}: {e}", self.path.display())))?;

        Ok(Some(histories))
    }

    /// Replace the snapshot with `histories`.
    pub async fn save(&self, histories: &Histories) -> Result<()> {
        tracing::debug!(path = %self.path.display(), "Saving user histories to file");

        let content = serde_json::to_string_pretty(histories)?;

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .context(format!("Failed to create {}", dir.display()))?;
            }
        }

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, content)
            .await
            .context(format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .context(format!("Failed to replace {}", self.path.display()))?;

        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "histories.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
