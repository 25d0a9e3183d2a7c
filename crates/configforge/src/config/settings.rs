use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};
use crate::kube::StoreLayout;
use crate::watch::DEFAULT_EVENT_CAPACITY;

pub const ENV_SSH_CONFIG: &str = "CONFIGFORGE_SSH_CONFIG";
pub const ENV_KUBE_DIR: &str = "CONFIGFORGE_KUBE_DIR";

/// Engine settings.
///
/// Resolved from defaults, then the settings file, then environment
/// overrides. Command-line flags are applied last by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub ssh_config_path: PathBuf,
    pub kube_dir: PathBuf,
    pub watch_extensions: Vec<String>,
    pub event_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            ssh_config_path: home.join(".ssh").join("config"),
            kube_dir: home.join(".kube"),
            watch_extensions: vec!["yaml".into(), "yml".into()],
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// `~/.config/configforge/settings.yaml` or the platform equivalent.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("configforge").join("settings.yaml"))
}

/// Replaces a leading `~` with the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

impl Settings {
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut settings: Settings = serde_yaml::from_str(content)?;
        settings.expand_paths();
        settings.validate()?;
        Ok(settings)
    }

    /// Loads the settings file and applies environment overrides.
    ///
    /// An `explicit` path must exist; the default location may be absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut settings = match explicit {
            Some(path) => {
                let path = expand_tilde(path);
                if !path.exists() {
                    return Err(ForgeError::access(&path, "settings file does not exist"));
                }
                Self::from_file(&path)?
            }
            None => match default_settings_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };

        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading settings from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| ForgeError::read(path, e))?;
        Self::from_yaml(&content)
    }

    /// Applies `CONFIGFORGE_*` overrides looked up through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup(ENV_SSH_CONFIG).filter(|v| !v.is_empty()) {
            self.ssh_config_path = expand_tilde(Path::new(&value));
        }
        if let Some(value) = lookup(ENV_KUBE_DIR).filter(|v| !v.is_empty()) {
            self.kube_dir = expand_tilde(Path::new(&value));
        }
    }

    fn expand_paths(&mut self) {
        self.ssh_config_path = expand_tilde(&self.ssh_config_path);
        self.kube_dir = expand_tilde(&self.kube_dir);
    }

    fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(ForgeError::Validation(
                "event_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn store_layout(&self) -> StoreLayout {
        StoreLayout::new(&self.kube_dir)
    }
}
