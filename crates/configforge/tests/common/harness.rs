//! Test harness for isolated store execution.
//!
//! The `TestHarness` struct owns a temporary directory laid out like a real
//! installation:
//! - `kube/` as the kubeconfig store root (`config`, `configs/`)
//! - `ssh/config` as the SSH client config

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use configforge::{ConfigFile, ConfigSynchronizer, FileStore, SshConfigManager, StoreLayout};

pub struct TestHarness {
    temp_dir: TempDir,
    pub layout: StoreLayout,
    pub ssh_config: PathBuf,
    pub store: Arc<FileStore>,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let layout = StoreLayout::new(temp_dir.path().join("kube"));
        std::fs::create_dir_all(&layout.configs_dir).expect("Failed to create configs dir");

        let ssh_dir = temp_dir.path().join("ssh");
        std::fs::create_dir_all(&ssh_dir).expect("Failed to create ssh dir");

        Self {
            ssh_config: ssh_dir.join("config"),
            layout,
            temp_dir,
            store: Arc::new(FileStore::new()),
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn synchronizer(&self) -> ConfigSynchronizer {
        ConfigSynchronizer::new(self.layout.clone(), Arc::clone(&self.store))
    }

    pub fn ssh_manager(&self) -> SshConfigManager {
        SshConfigManager::new(&self.ssh_config, Arc::clone(&self.store))
    }

    /// Writes a stored config directly, bypassing the synchronizer.
    pub fn write_stored(&self, file_name: &str, content: &str) -> PathBuf {
        let path = self.layout.configs_dir.join(file_name);
        std::fs::write(&path, content).expect("Failed to write stored config");
        path
    }

    pub fn write_active(&self, content: &str) {
        std::fs::write(&self.layout.active_path, content).expect("Failed to write active config");
    }

    pub fn read_active(&self) -> String {
        std::fs::read_to_string(&self.layout.active_path).expect("Failed to read active config")
    }

    pub fn write_ssh(&self, content: &str) {
        std::fs::write(&self.ssh_config, content).expect("Failed to write ssh config");
    }

    pub fn read_ssh(&self) -> String {
        std::fs::read_to_string(&self.ssh_config).expect("Failed to read ssh config")
    }

    /// Discovers stored configs and returns the one named `file_name`.
    pub fn stored(&self, sync: &ConfigSynchronizer, file_name: &str) -> ConfigFile {
        sync.discover()
            .expect("discover")
            .into_iter()
            .find(|f| f.file_name == file_name)
            .unwrap_or_else(|| panic!("{} not discovered", file_name))
    }
}

/// Polls `check` until it returns true or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    check()
}
