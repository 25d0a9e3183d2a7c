use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use log::{info, warn};
use uuid::Uuid;

use super::entry::{Directives, HostEntry};
use super::parser::{self, validate_entry};
use crate::error::{ForgeError, Result};
use crate::storage::FileStore;

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

/// Fills the basic directives, treating an empty port as the default one.
fn apply_defaults(directives: &mut Directives) {
    if directives.get("Port").is_some_and(|p| p.trim().is_empty()) {
        directives.set("Port", "22");
    }
    directives.ensure_basic();
}

/// Reads and edits a single OpenSSH client config file.
pub struct SshConfigManager {
    path: PathBuf,
    store: Arc<FileStore>,
}

impl SshConfigManager {
    pub fn new(path: impl Into<PathBuf>, store: Arc<FileStore>) -> Self {
        Self {
            path: path.into(),
            store,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates an empty config file (and its directory) when missing.
    fn ensure_exists(&self) -> Result<()> {
        if self.store.exists(&self.path) {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            self.store.ensure_directory(parent)?;
        }
        self.store.write_atomic(&self.path, "", false)?;
        info!("Created empty ssh config at {}", self.path.display());
        Ok(())
    }

    /// Reads the host entries, creating an empty file when none exists.
    ///
    /// Only `Host` blocks survive: `Match` blocks and global directives such
    /// as `Include` are dropped, and a later [`save`](Self::save) removes them
    /// from disk.
    pub fn load(&self) -> Result<Vec<HostEntry>> {
        self.ensure_exists()?;
        let content = self.store.read(&self.path)?;
        Ok(parser::parse(&content))
    }

    pub fn get_all_hosts(&self) -> Result<Vec<HostEntry>> {
        self.load()
    }

    pub fn find_host(&self, host: &str) -> Result<Option<HostEntry>> {
        Ok(self.load()?.into_iter().find(|e| e.host == host))
    }

    pub fn add_host(&self, host: &str, mut directives: Directives) -> Result<HostEntry> {
        let mut entries = self.load()?;
        apply_defaults(&mut directives);
        let entry = HostEntry::new(host.trim(), directives);
        validate_entry(&entry, &entries)?;

        entries.push(entry.clone());
        self.save(&entries)?;
        info!("Added ssh host '{}'", entry.host);
        Ok(entry)
    }

    /// Replaces the entry with `id`. Ids are process-local, so `id` must come
    /// from `entries` passed in or from a prior [`Self::load`] on this value.
    pub fn update_host(
        &self,
        entries: &[HostEntry],
        id: Uuid,
        host: &str,
        mut directives: Directives,
    ) -> Result<HostEntry> {
        let mut entries = entries.to_vec();
        let index = entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| ForgeError::HostNotFound(host.to_string()))?;

        apply_defaults(&mut directives);
        let updated = HostEntry {
            id,
            host: host.trim().to_string(),
            directives,
        };
        validate_entry(&updated, &entries)?;

        entries[index] = updated.clone();
        self.save(&entries)?;
        info!("Updated ssh host '{}'", updated.host);
        Ok(updated)
    }

    pub fn delete_host(&self, entries: &[HostEntry], id: Uuid) -> Result<HostEntry> {
        let mut entries = entries.to_vec();
        let index = entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| ForgeError::HostNotFound(id.to_string()))?;
        let removed = entries.remove(index);
        self.save(&entries)?;
        info!("Deleted ssh host '{}'", removed.host);
        Ok(removed)
    }

    /// Removes the host named `host` from the file on disk.
    pub fn delete_host_named(&self, host: &str) -> Result<HostEntry> {
        let entries = self.load()?;
        let id = entries
            .iter()
            .find(|e| e.host == host)
            .map(|e| e.id)
            .ok_or_else(|| ForgeError::HostNotFound(host.to_string()))?;
        self.delete_host(&entries, id)
    }

    /// Serialises and writes the whole document, keeping `<path>.bak` until
    /// the write succeeds.
    pub fn save(&self, entries: &[HostEntry]) -> Result<()> {
        let content = parser::serialize(entries);
        let backup = sibling_with_suffix(&self.path, ".bak");
        let had_file = self.store.exists(&self.path);

        if had_file {
            self.store.copy(&self.path, &backup, true)?;
        }

        match self.store.write_atomic(&self.path, &content, false) {
            Ok(()) => {
                if had_file {
                    self.store.delete(&backup)?;
                }
                Ok(())
            }
            Err(err) => {
                if had_file {
                    if let Err(restore_err) = self.store.copy(&backup, &self.path, true) {
                        warn!(
                            "Failed to restore {} from backup: {}",
                            self.path.display(),
                            restore_err
                        );
                    } else if let Err(cleanup_err) = self.store.delete(&backup) {
                        warn!("Failed to remove {}: {}", backup.display(), cleanup_err);
                    }
                }
                Err(err)
            }
        }
    }

    /// Copies the config into `dir` as `config_backup_<YYYYMMDD_HHMMSS>`.
    pub fn backup_to(&self, dir: &Path) -> Result<PathBuf> {
        self.ensure_exists()?;
        self.store.ensure_directory(dir)?;
        let name = format!("config_backup_{}", Local::now().format("%Y%m%d_%H%M%S"));
        let target = dir.join(name);
        self.store.copy(&self.path, &target, false)?;
        info!("Backed up ssh config to {}", target.display());
        Ok(target)
    }

    /// Replaces the config with `source`, restoring the previous content if
    /// the copy fails.
    pub fn restore_from(&self, source: &Path) -> Result<()> {
        if !self.store.exists(source) {
            return Err(ForgeError::access(source, "backup file does not exist"));
        }

        let safety = sibling_with_suffix(&self.path, ".restore_bak");
        let had_file = self.store.exists(&self.path);
        if had_file {
            self.store.copy(&self.path, &safety, true)?;
        }

        let result = self
            .store
            .read(source)
            .and_then(|content| self.store.write_atomic(&self.path, &content, false));

        match result {
            Ok(()) => {
                if had_file {
                    self.store.delete(&safety)?;
                }
                info!("Restored ssh config from {}", source.display());
                Ok(())
            }
            Err(err) => {
                if had_file {
                    if let Err(restore_err) = self.store.copy(&safety, &self.path, true) {
                        warn!("Failed to roll back ssh config restore: {}", restore_err);
                    } else if let Err(cleanup_err) = self.store.delete(&safety) {
                        warn!("Failed to remove {}: {}", safety.display(), cleanup_err);
                    }
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn manager(temp: &TempDir) -> SshConfigManager {
        SshConfigManager::new(
            temp.path().join(".ssh").join("config"),
            Arc::new(FileStore::new()),
        )
    }

    #[test]
    fn test_load_creates_missing_file() {
        let temp = TempDir::new().unwrap();
        let m = manager(&temp);

        assert!(m.load().unwrap().is_empty());
        assert!(m.path().exists());
    }

    #[test]
    fn test_add_host_applies_defaults_and_persists() {
        let temp = TempDir::new().unwrap();
        let m = manager(&temp);

        let directives: Directives = [("HostName", "example.com"), ("Port", "")]
            .into_iter()
            .collect();
        m.add_host("web", directives).unwrap();

        let text = std::fs::read_to_string(m.path()).unwrap();
        assert_eq!(text, "Host web\n    HostName example.com\n    Port 22\n\n");
        assert!(!sibling_with_suffix(m.path(), ".bak").exists());
    }

    #[test]
    fn test_add_duplicate_host_rejected() {
        let temp = TempDir::new().unwrap();
        let m = manager(&temp);
        m.add_host("web", Directives::new()).unwrap();

        let err = m.add_host("web", Directives::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(m.load().unwrap().len(), 1);
    }

    #[test]
    fn test_update_and_delete_by_id() {
        let temp = TempDir::new().unwrap();
        let m = manager(&temp);
        m.add_host("a", Directives::new()).unwrap();
        m.add_host("b", Directives::new()).unwrap();

        let entries = m.load().unwrap();
        let a = entries.iter().find(|e| e.host == "a").unwrap().clone();

        let directives: Directives = [("User", "root")].into_iter().collect();
        m.update_host(&entries, a.id, "a2", directives).unwrap();

        let entries = m.load().unwrap();
        let hosts: Vec<_> = entries.iter().map(|e| e.host.as_str()).collect();
        assert_eq!(hosts, vec!["a2", "b"]);
        assert_eq!(entries[0].user(), Some("root"));

        let err = m
            .update_host(&entries, entries[0].id, "b", Directives::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        m.delete_host(&entries, entries[1].id).unwrap();
        assert_eq!(m.load().unwrap().len(), 1);
    }

    #[test]
    fn test_delete_host_named_missing() {
        let temp = TempDir::new().unwrap();
        let m = manager(&temp);
        assert!(matches!(
            m.delete_host_named("ghost"),
            Err(ForgeError::HostNotFound(_))
        ));
    }

    #[test]
    fn test_backup_and_restore() {
        let temp = TempDir::new().unwrap();
        let m = manager(&temp);
        m.add_host("keep", Directives::new()).unwrap();

        let backup_dir = temp.path().join("backups");
        let backup = m.backup_to(&backup_dir).unwrap();
        let name = backup.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("config_backup_"));
        assert_eq!(name.len(), "config_backup_".len() + 15);

        m.add_host("extra", Directives::new()).unwrap();
        assert_eq!(m.load().unwrap().len(), 2);

        m.restore_from(&backup).unwrap();
        let hosts: Vec<_> = m.load().unwrap().into_iter().map(|e| e.host).collect();
        assert_eq!(hosts, vec!["keep"]);
        assert!(!sibling_with_suffix(m.path(), ".restore_bak").exists());
    }

    #[test]
    fn test_restore_from_missing_source() {
        let temp = TempDir::new().unwrap();
        let m = manager(&temp);
        m.add_host("keep", Directives::new()).unwrap();

        let err = m.restore_from(&temp.path().join("missing")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileAccess);
        assert_eq!(m.load().unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_save_failure_keeps_previous_content() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let m = manager(&temp);
        m.add_host("orig", Directives::new()).unwrap();
        let before = std::fs::read_to_string(m.path()).unwrap();

        // A read-only directory makes the temp file creation fail. Root
        // ignores directory permissions, so only assert when it took effect.
        let dir = m.path().parent().unwrap().to_path_buf();
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o500)).unwrap();
        let result = m.save(&[]);
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).unwrap();

        if result.is_err() {
            assert_eq!(std::fs::read_to_string(m.path()).unwrap(), before);
        }
    }
}
