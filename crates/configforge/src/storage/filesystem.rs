use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use walkdir::WalkDir;

use crate::error::{ForgeError, Result};

/// Move a file from `src` to `dst`. Uses `rename` first and falls back to
/// copy + delete when rename fails (cross-device moves).
fn rename_or_copy(src: &Path, dst: &Path) -> Result<()> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    std::fs::copy(src, dst).map_err(|e| ForgeError::write(dst, e))?;
    std::fs::remove_file(src).map_err(|e| ForgeError::write(src, e))?;
    Ok(())
}

/// Dot-files are hidden.
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// Hidden sibling used as the safety copy by [`FileStore::write_atomic`].
pub fn hidden_backup_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.bak", name))
}

/// Creation and modification times of a file, when the platform reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileTimes {
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

/// Primitive file operations shared by the SSH and Kubernetes stores.
///
/// Writes and deletes of the same path are serialised; different paths
/// proceed in parallel.
#[derive(Default)]
pub struct FileStore {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_path_lock<T>(&self, path: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(path.to_path_buf()).or_default().clone()
        };
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(lock);
        // Only the map's reference left means no caller is waiting on it.
        if locks.get(path).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(path);
        }
        result
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    pub fn read(&self, path: &Path) -> Result<String> {
        if !path.exists() {
            return Err(ForgeError::access(path, "file does not exist"));
        }
        std::fs::read_to_string(path).map_err(|e| ForgeError::read(path, e))
    }

    /// Writes `content` through a temporary file in the same directory and
    /// renames it over `path`.
    ///
    /// With `backup`, an existing file is first copied to its hidden
    /// `.<name>.bak` sibling.
    pub fn write_atomic(&self, path: &Path, content: &str, backup: bool) -> Result<()> {
        self.with_path_lock(path, || {
            let parent = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            };
            self.ensure_directory(&parent)?;

            if backup && path.exists() {
                let backup_path = hidden_backup_path(path);
                std::fs::copy(path, &backup_path).map_err(|e| ForgeError::write(&backup_path, e))?;
                debug!("Backed up {} to {}", path.display(), backup_path.display());
            }

            let mut temp =
                tempfile::NamedTempFile::new_in(&parent).map_err(|e| ForgeError::write(path, e))?;
            temp.write_all(content.as_bytes())
                .map_err(|e| ForgeError::write(path, e))?;
            temp.as_file()
                .sync_all()
                .map_err(|e| ForgeError::write(path, e))?;
            temp.persist(path)
                .map_err(|e| ForgeError::write(path, e.error))?;

            self.set_owner_only(path)
        })
    }

    pub fn copy(&self, src: &Path, dst: &Path, overwrite: bool) -> Result<()> {
        if !src.exists() {
            return Err(ForgeError::access(src, "source does not exist"));
        }
        self.with_path_lock(dst, || {
            if dst.exists() && !overwrite {
                return Err(ForgeError::Conflict(dst.to_path_buf()));
            }
            if let Some(parent) = dst.parent() {
                self.ensure_directory(parent)?;
            }
            std::fs::copy(src, dst).map_err(|e| ForgeError::write(dst, e))?;
            Ok(())
        })
    }

    pub fn move_file(&self, src: &Path, dst: &Path) -> Result<()> {
        if !src.exists() {
            return Err(ForgeError::access(src, "source does not exist"));
        }
        self.with_path_lock(dst, || {
            if dst.exists() {
                return Err(ForgeError::Conflict(dst.to_path_buf()));
            }
            rename_or_copy(src, dst)
        })
    }

    /// Removes `path`. A missing path is not an error.
    pub fn delete(&self, path: &Path) -> Result<()> {
        self.with_path_lock(path, || match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ForgeError::write(path, e)),
        })
    }

    /// Top-level entries of `path`, sorted.
    pub fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        if !path.is_dir() {
            return Err(ForgeError::access(path, "not a directory"));
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(path).min_depth(1).max_depth(1) {
            match entry {
                Ok(entry) => entries.push(entry.into_path()),
                Err(e) => warn!("Skipping unreadable entry in {}: {}", path.display(), e),
            }
        }
        entries.sort();
        Ok(entries)
    }

    pub fn ensure_directory(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| ForgeError::write(path, e))?;
        }
        Ok(())
    }

    /// Restricts `path` to owner read/write. No-op off Unix.
    pub fn set_owner_only(&self, path: &Path) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| ForgeError::write(path, e))?;
        }
        #[cfg(not(unix))]
        let _ = path;
        Ok(())
    }

    pub fn metadata_times(&self, path: &Path) -> Result<FileTimes> {
        let metadata = std::fs::metadata(path).map_err(|e| ForgeError::read(path, e))?;
        Ok(FileTimes {
            created: metadata.created().ok().map(DateTime::<Utc>::from),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }
}
