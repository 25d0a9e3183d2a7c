use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::storage::FileStore;

pub const BACKUP_PREFIX: &str = "backup-";
pub const DEFAULT_BACKUP_NAME: &str = "config.bak";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Active,
    Backup,
    Stored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum FileStatus {
    Valid,
    Invalid(String),
    Unknown,
}

/// One kubeconfig file known to the store. Identity is the path.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigFile {
    pub file_name: String,
    pub path: PathBuf,
    pub file_type: FileType,
    pub status: FileStatus,
    #[serde(skip)]
    pub content: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl PartialEq for ConfigFile {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.file_type == other.file_type
    }
}

impl ConfigFile {
    /// Builds an entry from disk. Unreadable content or metadata is left as
    /// `None`.
    pub fn load(store: &FileStore, path: &Path, file_type: FileType) -> Self {
        let times = store.metadata_times(path).unwrap_or_default();
        let content = match store.read(path) {
            Ok(content) => Some(content),
            Err(e) => {
                log::warn!("Could not read {}: {}", path.display(), e);
                None
            }
        };

        Self {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: path.to_path_buf(),
            file_type,
            status: FileStatus::Unknown,
            content,
            created: times.created,
            modified: times.modified,
            is_active: false,
        }
    }

    /// File name without its extension.
    pub fn display_name(&self) -> &str {
        Path::new(&self.file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.file_name)
    }

    pub fn is_backup(&self) -> bool {
        match self.file_type {
            FileType::Backup => true,
            FileType::Stored => self.file_name.starts_with(BACKUP_PREFIX),
            FileType::Active => false,
        }
    }

    /// Replaces the content; the status must be re-established afterwards.
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = Some(content.into());
        self.status = FileStatus::Unknown;
        self.modified = Some(Utc::now());
    }

    pub fn mark_invalid(&mut self, reason: impl Into<String>) {
        self.status = FileStatus::Invalid(reason.into());
    }

    pub fn is_valid(&self) -> bool {
        self.status == FileStatus::Valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_reads_content_and_times() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("dev.yaml");
        std::fs::write(&path, "kind: Config\n").unwrap();

        let file = ConfigFile::load(&FileStore::new(), &path, FileType::Stored);
        assert_eq!(file.file_name, "dev.yaml");
        assert_eq!(file.display_name(), "dev");
        assert_eq!(file.content.as_deref(), Some("kind: Config\n"));
        assert_eq!(file.status, FileStatus::Unknown);
        assert!(file.modified.is_some());
    }

    #[test]
    fn test_load_missing_file_has_no_content() {
        let temp = TempDir::new().unwrap();
        let file = ConfigFile::load(
            &FileStore::new(),
            &temp.path().join("gone.yaml"),
            FileType::Stored,
        );
        assert!(file.content.is_none());
        assert!(file.created.is_none());
    }

    #[test]
    fn test_set_content_resets_status() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.yaml");
        std::fs::write(&path, "").unwrap();
        let mut file = ConfigFile::load(&FileStore::new(), &path, FileType::Stored);
        file.status = FileStatus::Valid;

        file.set_content("kind: Config");
        assert_eq!(file.status, FileStatus::Unknown);
    }

    #[test]
    fn test_is_backup() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new();
        let stored = ConfigFile::load(&store, &temp.path().join("dev.yaml"), FileType::Stored);
        let custom = ConfigFile::load(
            &store,
            &temp.path().join("backup-nightly.yaml"),
            FileType::Stored,
        );
        let default = ConfigFile::load(&store, &temp.path().join("config.bak"), FileType::Backup);

        assert!(!stored.is_backup());
        assert!(custom.is_backup());
        assert!(default.is_backup());
    }
}
