//! Keeps an in-memory index of the store consistent with the disk.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use log::{debug, info, warn};
use tokio::sync::broadcast;

use super::codec;
use super::file::ConfigFile;
use super::synchronizer::ConfigSynchronizer;
use crate::broadcast::{AppEvent, EventBus, Severity};
use crate::error::Result;
use crate::watch::{DirectoryFilter, FileChangeEvent, FileWatcher, WatcherHandle};

pub const DEFAULT_EXTENSIONS: &[&str] = &["yaml", "yml"];

fn touches(event: &FileChangeEvent, path: &Path) -> bool {
    match event {
        FileChangeEvent::Renamed { from, to } => from == path || to == path,
        other => other.path() == path,
    }
}

struct Worker {
    synchronizer: Arc<ConfigSynchronizer>,
    watcher: WatcherHandle,
    bus: EventBus,
    index: Arc<RwLock<Vec<ConfigFile>>>,
}

impl Worker {
    fn run(
        self,
        events: Receiver<FileChangeEvent>,
        mut bus_rx: broadcast::Receiver<AppEvent>,
        shutdown: Arc<AtomicBool>,
    ) {
        let layout = self.synchronizer.layout().clone();
        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            let mut dirty = false;
            match events.recv_timeout(Duration::from_millis(100)) {
                Ok(event) => {
                    let reappeared = matches!(
                        &event,
                        FileChangeEvent::DirectoryChanged { path } if *path == layout.root
                    ) && layout.active_path.exists()
                        && !self.watcher.is_watching(&layout.active_path);
                    if touches(&event, &layout.active_path) || reappeared {
                        self.active_changed(&event);
                    }
                    if event.path().starts_with(&layout.configs_dir) {
                        dirty = true;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            loop {
                match bus_rx.try_recv() {
                    Ok(AppEvent::ReloadConfigRequested) => dirty = true,
                    Ok(_) => {}
                    Err(broadcast::error::TryRecvError::Lagged(n)) => {
                        warn!("Store monitor lagged, missed {} bus events", n);
                        dirty = true;
                    }
                    Err(_) => break,
                }
            }

            if dirty {
                if let Err(e) = refresh_index(&self.synchronizer, &self.index) {
                    warn!("Failed to refresh config index: {}", e);
                    self.bus.notify(e.to_string(), Severity::Error);
                }
            }
        }
        debug!("Store monitor worker stopped");
    }

    fn active_changed(&self, event: &FileChangeEvent) {
        let active = &self.synchronizer.layout().active_path;

        // Deleted can arrive after a root rescan registered the new file.
        let replaced = matches!(event, FileChangeEvent::Deleted { .. });
        if active.exists() && (replaced || !self.watcher.is_watching(active)) {
            debug!("Active config reappeared, watching {}", active.display());
            if let Err(e) = self.watcher.watch_file(active) {
                warn!("Could not re-watch {}: {}", active.display(), e);
            }
        }

        if !active.exists() {
            self.bus.notify_active_config_changed(None);
            return;
        }

        match self
            .synchronizer
            .load_active()
            .and_then(|content| codec::decode(&content))
        {
            Ok(config) => self.bus.notify_active_config_changed(Some(config)),
            Err(e) => {
                warn!("Active config is unreadable: {}", e);
                self.bus.notify_active_config_changed(None);
                self.bus
                    .notify(format!("Active config is unreadable: {}", e), Severity::Error);
            }
        }
    }
}

fn refresh_index(
    synchronizer: &ConfigSynchronizer,
    index: &RwLock<Vec<ConfigFile>>,
) -> Result<usize> {
    let files = synchronizer.discover_validated()?;
    let count = files.len();
    *index.write().unwrap_or_else(PoisonError::into_inner) = files;
    debug!("Config index refreshed with {} files", count);
    Ok(count)
}

/// Watches a store root and keeps a validated index of its stored configs.
///
/// The root is watched for the active file by name, so it is picked up again
/// after an external delete and recreate, or when it first appears. Watcher
/// events are forwarded to the bus as [`AppEvent`]s.
pub struct StoreMonitor {
    synchronizer: Arc<ConfigSynchronizer>,
    watcher: Option<FileWatcher>,
    index: Arc<RwLock<Vec<ConfigFile>>>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    bridge: Option<JoinHandle<()>>,
}

impl StoreMonitor {
    pub fn start(synchronizer: Arc<ConfigSynchronizer>, bus: EventBus) -> Result<Self> {
        Self::start_with_extensions(synchronizer, bus, DEFAULT_EXTENSIONS)
    }

    pub fn start_with_extensions<S: AsRef<str>>(
        synchronizer: Arc<ConfigSynchronizer>,
        bus: EventBus,
        extensions: &[S],
    ) -> Result<Self> {
        let layout = synchronizer.layout().clone();
        let index = Arc::new(RwLock::new(Vec::new()));
        refresh_index(&synchronizer, &index)?;

        let watcher = FileWatcher::new()?;
        watcher.watch_directory(&layout.configs_dir, extensions)?;
        let active_name = layout
            .active_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        watcher.watch_directory_filtered(&layout.root, DirectoryFilter::names(&[active_name]))?;
        if !layout.active_path.exists() {
            debug!("No active config at {} yet", layout.active_path.display());
        }

        let (events_tx, events_rx) = unbounded();
        watcher.on_event(move |event| {
            let _ = events_tx.send(event.clone());
        })?;

        let bridge = bus.forward_from(watcher.subscribe());

        let shutdown = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            synchronizer: Arc::clone(&synchronizer),
            watcher: watcher.handle(),
            bus: bus.clone(),
            index: Arc::clone(&index),
        };
        let bus_rx = bus.subscribe();
        let flag = Arc::clone(&shutdown);
        let worker = std::thread::spawn(move || worker.run(events_rx, bus_rx, flag));

        info!("Monitoring kube store at {}", layout.root.display());
        Ok(Self {
            synchronizer,
            watcher: Some(watcher),
            index,
            shutdown,
            worker: Some(worker),
            bridge: Some(bridge),
        })
    }

    pub fn synchronizer(&self) -> &Arc<ConfigSynchronizer> {
        &self.synchronizer
    }

    /// Snapshot of the current index.
    pub fn index(&self) -> Vec<ConfigFile> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rebuilds the index now. Returns the number of files.
    pub fn refresh(&self) -> Result<usize> {
        refresh_index(&self.synchronizer, &self.index)
    }

    pub fn is_watching(&self, path: impl AsRef<Path>) -> bool {
        self.watcher
            .as_ref()
            .is_some_and(|w| w.is_watching(path))
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        // Dropping the watcher closes its channel, which ends the bridge.
        self.watcher.take();
        if let Some(bridge) = self.bridge.take() {
            let _ = bridge.join();
        }
    }
}

impl Drop for StoreMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
