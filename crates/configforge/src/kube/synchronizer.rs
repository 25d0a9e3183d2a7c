//! Multi-file kubeconfig store.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/config        active config read by kubectl
//! <root>/config.bak    copy of the previous active config
//! <root>/configs/      stored configs (*.yaml, *.yml)
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use log::{debug, info, warn};

use super::codec;
use super::file::{ConfigFile, FileStatus, FileType, BACKUP_PREFIX, DEFAULT_BACKUP_NAME};
use super::marker::{ActiveConfigTracker, CommentMarker};
use super::model::KubeConfig;
use crate::broadcast::EventBus;
use crate::error::{ForgeError, Result};
use crate::storage::{is_hidden, FileStore};

pub const ACTIVE_FILE_NAME: &str = "config";
pub const CONFIGS_DIR_NAME: &str = "configs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    pub root: PathBuf,
    pub active_path: PathBuf,
    pub backup_path: PathBuf,
    pub configs_dir: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            active_path: root.join(ACTIVE_FILE_NAME),
            backup_path: root.join(DEFAULT_BACKUP_NAME),
            configs_dir: root.join(CONFIGS_DIR_NAME),
            root,
        }
    }

    /// `~/.kube`, when a home directory is known.
    pub fn default_root() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".kube"))
    }

    pub fn is_stored_path(&self, path: &Path) -> bool {
        path.parent() == Some(self.configs_dir.as_path())
    }
}

fn is_yaml_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".yaml") || lower.ends_with(".yml")
}

/// Validates a user-supplied stored file name and appends `.yaml` when no
/// YAML extension is present.
pub fn normalize_file_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ForgeError::Validation("file name must not be empty".into()));
    }
    if name.starts_with('.') {
        return Err(ForgeError::Validation(format!(
            "file name '{}' must not be hidden",
            name
        )));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(ForgeError::Validation(format!(
            "file name '{}' must not contain path separators",
            name
        )));
    }

    if is_yaml_name(name) {
        Ok(name.to_string())
    } else {
        Ok(format!("{}.yaml", name))
    }
}

fn sanitize_backup_name(name: &str) -> String {
    name.trim().replace(['/', '\\'], "-")
}

pub struct ConfigSynchronizer {
    layout: StoreLayout,
    store: Arc<FileStore>,
    tracker: Box<dyn ActiveConfigTracker>,
    activation: Mutex<()>,
    bus: Option<EventBus>,
}

impl ConfigSynchronizer {
    pub fn new(layout: StoreLayout, store: Arc<FileStore>) -> Self {
        Self {
            layout,
            store,
            tracker: Box::new(CommentMarker),
            activation: Mutex::new(()),
            bus: None,
        }
    }

    pub fn with_tracker(mut self, tracker: Box<dyn ActiveConfigTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn store(&self) -> &Arc<FileStore> {
        &self.store
    }

    fn ensure_stored(&self, file: &ConfigFile) -> Result<()> {
        if file.file_type != FileType::Stored || !self.layout.is_stored_path(&file.path) {
            return Err(ForgeError::NotPermitted {
                path: file.path.clone(),
                reason: "only files in the configs directory can be changed this way".into(),
            });
        }
        Ok(())
    }

    fn stored_path(&self, name: &str) -> Result<PathBuf> {
        let name = normalize_file_name(name)?;
        let path = self.layout.configs_dir.join(name);
        if self.store.exists(&path) {
            return Err(ForgeError::Conflict(path));
        }
        Ok(path)
    }

    fn content_of(&self, file: &ConfigFile) -> Result<String> {
        match &file.content {
            Some(content) => Ok(content.clone()),
            None => self.store.read(&file.path),
        }
    }

    /// Name recorded in the active file, if any.
    pub fn active_marker(&self) -> Result<Option<String>> {
        if !self.store.exists(&self.layout.active_path) {
            return Ok(None);
        }
        let content = self.store.read(&self.layout.active_path)?;
        Ok(self.tracker.current(&content))
    }

    /// Lists stored configs, flagging the one the active marker names.
    pub fn discover(&self) -> Result<Vec<ConfigFile>> {
        let _span = tracing::info_span!("discover", root = %self.layout.root.display()).entered();

        self.store.ensure_directory(&self.layout.configs_dir)?;
        let marker = self.active_marker()?;

        let mut files = Vec::new();
        for path in self.store.list_directory(&self.layout.configs_dir)? {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !path.is_file() || is_hidden(&path) || !is_yaml_name(&name) {
                continue;
            }

            let mut file = ConfigFile::load(&self.store, &path, FileType::Stored);
            file.is_active = marker.as_deref() == Some(file.file_name.as_str());
            files.push(file);
        }
        files.sort_by(|a, b| a.file_name.cmp(&b.file_name));

        if let Some(marker) = &marker {
            if !files.iter().any(|f| f.is_active) {
                debug!("Active marker names untracked file '{}'", marker);
            }
        }
        debug!("Discovered {} stored configs", files.len());
        Ok(files)
    }

    /// [`Self::discover`] followed by validation of every file.
    pub fn discover_validated(&self) -> Result<Vec<ConfigFile>> {
        let mut files = self.discover()?;
        for file in &mut files {
            self.validate(file);
        }
        Ok(files)
    }

    pub fn active_config_file(&self) -> Result<Option<ConfigFile>> {
        Ok(self.discover()?.into_iter().find(|f| f.is_active))
    }

    pub fn load_active(&self) -> Result<String> {
        if !self.store.exists(&self.layout.active_path) {
            return Ok(String::new());
        }
        self.store.read(&self.layout.active_path)
    }

    pub fn save_active(&self, content: &str) -> Result<()> {
        self.store
            .write_atomic(&self.layout.active_path, content, true)?;
        info!("Saved active config");
        Ok(())
    }

    /// Makes `file` the active config.
    ///
    /// The source is validated before anything is touched. The previous
    /// active config is copied to `config.bak` before it is replaced.
    pub fn activate(&self, file: &ConfigFile) -> Result<KubeConfig> {
        let _span = tracing::info_span!("activate", file = %file.file_name).entered();
        let _guard = self.activation.lock().unwrap_or_else(PoisonError::into_inner);

        self.ensure_stored(file)?;
        let content = self.store.read(&file.path)?;
        if content.trim().is_empty() {
            return Err(ForgeError::Validation(format!(
                "'{}' is empty",
                file.file_name
            )));
        }
        let config = codec::decode_validated(&content)?;

        if self.store.exists(&self.layout.active_path) {
            self.store
                .copy(&self.layout.active_path, &self.layout.backup_path, true)?;
        }

        let stamped = self.tracker.stamp(&content, &file.file_name);
        self.store
            .write_atomic(&self.layout.active_path, &stamped, false)?;
        info!("Activated {}", file.file_name);

        if let Some(bus) = &self.bus {
            bus.notify_active_config_changed(Some(config.clone()));
        }
        Ok(config)
    }

    /// Sets `file.status` from its content and returns the new status.
    pub fn validate(&self, file: &mut ConfigFile) -> FileStatus {
        let status = match self.content_of(file) {
            Ok(content) if content.trim().is_empty() => FileStatus::Invalid("file is empty".into()),
            Ok(content) => match codec::decode_validated(&content) {
                Ok(_) => FileStatus::Valid,
                Err(e) => FileStatus::Invalid(e.to_string()),
            },
            Err(e) => FileStatus::Invalid(e.to_string()),
        };
        file.status = status.clone();
        status
    }

    pub fn create_config_file(&self, name: &str, content: &str) -> Result<ConfigFile> {
        let path = self.stored_path(name)?;
        self.store.write_atomic(&path, content, false)?;
        info!("Created {}", path.display());
        Ok(ConfigFile::load(&self.store, &path, FileType::Stored))
    }

    pub fn duplicate_config_file(&self, file: &ConfigFile, new_name: &str) -> Result<ConfigFile> {
        self.ensure_stored(file)?;
        let content = self.content_of(file)?;
        let path = self.stored_path(new_name)?;
        self.store.write_atomic(&path, &content, false)?;
        info!("Duplicated {} as {}", file.file_name, path.display());
        Ok(ConfigFile::load(&self.store, &path, FileType::Stored))
    }

    /// Renames a stored config. When it is the active one, the marker in the
    /// active file follows the new name.
    pub fn rename_config_file(&self, file: &ConfigFile, new_name: &str) -> Result<ConfigFile> {
        self.ensure_stored(file)?;

        let _guard = self.activation.lock().unwrap_or_else(PoisonError::into_inner);
        let path = self.stored_path(new_name)?;
        let was_active = self.active_marker()?.as_deref() == Some(file.file_name.as_str());
        self.store.move_file(&file.path, &path)?;

        let mut renamed = ConfigFile::load(&self.store, &path, FileType::Stored);
        if was_active {
            let restamp = self.store.read(&self.layout.active_path).and_then(|active| {
                let restamped = self.tracker.stamp(&active, &renamed.file_name);
                self.store
                    .write_atomic(&self.layout.active_path, &restamped, false)
            });
            if let Err(e) = restamp {
                warn!("Marker update failed, moving {} back", file.file_name);
                if let Err(undo) = self.store.move_file(&path, &file.path) {
                    warn!("Could not move {} back: {}", path.display(), undo);
                }
                return Err(e);
            }
            renamed.is_active = true;
        }

        info!("Renamed {} to {}", file.file_name, renamed.file_name);
        Ok(renamed)
    }

    pub fn delete_config_file(&self, file: &ConfigFile) -> Result<()> {
        self.ensure_stored(file)?;
        if self.active_marker()?.as_deref() == Some(file.file_name.as_str()) {
            warn!("Deleting {} which is currently active", file.file_name);
        }
        self.store.delete(&file.path)?;
        info!("Deleted {}", file.path.display());
        Ok(())
    }

    /// Writes new content to a stored or the active config. The active
    /// config is backed up to `config.bak` first.
    pub fn update_config_file(&self, file: &ConfigFile, content: &str) -> Result<ConfigFile> {
        let is_active_path = file.path == self.layout.active_path;
        let _guard = match file.file_type {
            FileType::Active if is_active_path => {
                let guard = self.activation.lock().unwrap_or_else(PoisonError::into_inner);
                if self.store.exists(&self.layout.active_path) {
                    self.store
                        .copy(&self.layout.active_path, &self.layout.backup_path, true)?;
                }
                Some(guard)
            }
            FileType::Stored => {
                self.ensure_stored(file)?;
                None
            }
            _ => {
                return Err(ForgeError::NotPermitted {
                    path: file.path.clone(),
                    reason: "backups cannot be edited".into(),
                })
            }
        };

        self.store.write_atomic(&file.path, content, false)?;
        let mut updated = file.clone();
        updated.set_content(content);
        info!("Updated {}", file.path.display());
        Ok(updated)
    }

    /// The active config as a [`ConfigFile`], if present.
    pub fn active_file(&self) -> Option<ConfigFile> {
        if !self.store.exists(&self.layout.active_path) {
            return None;
        }
        Some(ConfigFile::load(
            &self.store,
            &self.layout.active_path,
            FileType::Active,
        ))
    }

    /// Copies the active config to `config.bak`.
    pub fn create_default_backup(&self) -> Result<ConfigFile> {
        self.store
            .copy(&self.layout.active_path, &self.layout.backup_path, true)?;
        info!("Backed up active config to {}", self.layout.backup_path.display());
        Ok(ConfigFile::load(
            &self.store,
            &self.layout.backup_path,
            FileType::Backup,
        ))
    }

    /// Stores `content` as `backup-<name>.yaml`, or `backup-<timestamp>.yaml`
    /// without a name.
    pub fn create_custom_backup(&self, content: &str, name: Option<&str>) -> Result<ConfigFile> {
        self.store.ensure_directory(&self.layout.configs_dir)?;

        let file_name = match name.map(sanitize_backup_name).filter(|n| !n.is_empty()) {
            Some(name) => format!("{}{}.yaml", BACKUP_PREFIX, name),
            None => format!(
                "{}{}.yaml",
                BACKUP_PREFIX,
                Utc::now().format("%Y-%m-%dT%H-%M-%SZ")
            ),
        };
        let path = self.stored_path(&file_name)?;
        self.store.write_atomic(&path, content, false)?;
        info!("Created backup {}", path.display());
        Ok(ConfigFile::load(&self.store, &path, FileType::Stored))
    }

    /// Writes a backup's content to the active path as-is.
    pub fn restore_from(&self, file: &ConfigFile) -> Result<()> {
        let _guard = self.activation.lock().unwrap_or_else(PoisonError::into_inner);
        let content = self.content_of(file)?;
        self.store
            .write_atomic(&self.layout.active_path, &content, false)?;
        info!("Restored active config from {}", file.file_name);

        if let Some(bus) = &self.bus {
            bus.notify_active_config_changed(codec::decode(&content).ok());
        }
        Ok(())
    }

    /// Custom `backup-*` files followed by `config.bak` when it exists.
    pub fn get_backup_files(&self) -> Result<Vec<ConfigFile>> {
        let mut backups: Vec<ConfigFile> = self
            .discover()?
            .into_iter()
            .filter(|f| f.is_backup())
            .collect();

        if self.store.exists(&self.layout.backup_path) {
            backups.push(ConfigFile::load(
                &self.store,
                &self.layout.backup_path,
                FileType::Backup,
            ));
        }
        Ok(backups)
    }

    pub fn delete_backup_file(&self, file: &ConfigFile) -> Result<()> {
        let allowed = match file.file_type {
            FileType::Backup => file.path == self.layout.backup_path,
            FileType::Stored => file.is_backup() && self.layout.is_stored_path(&file.path),
            FileType::Active => false,
        };
        if !allowed {
            return Err(ForgeError::NotPermitted {
                path: file.path.clone(),
                reason: "not a backup file".into(),
            });
        }
        self.store.delete(&file.path)?;
        info!("Deleted backup {}", file.path.display());
        Ok(())
    }
}
