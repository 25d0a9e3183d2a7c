pub mod broadcast;
pub mod config;
pub mod error;
pub mod kube;
pub mod ssh;
pub mod storage;
pub mod watch;

pub use broadcast::{AppEvent, EventBus, Severity};
pub use config::Settings;
pub use error::{ErrorKind, ForgeError, Result};
pub use kube::{
    ConfigFile, ConfigSynchronizer, FileStatus, FileType, KubeConfig, StoreLayout, StoreMonitor,
};
pub use ssh::{Directives, HostEntry, ResolvedHost, SshConfigManager};
pub use storage::FileStore;
pub use watch::{FileChangeEvent, FileWatcher};
