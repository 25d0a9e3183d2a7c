//! OS file watcher with a single serial dispatcher.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::broadcast;
use walkdir::WalkDir;

use super::event::FileChangeEvent;
use super::translate::{
    classify, Action, Coalescer, DirectoryFilter, WatchKind, WatchTable, WatchedPath,
};
use crate::error::{ForgeError, Result};

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

type Callback = Box<dyn Fn(&FileChangeEvent) + Send>;
type Reply = Sender<Result<bool>>;

enum Command {
    WatchFile(PathBuf),
    WatchDirectory(PathBuf, DirectoryFilter),
    Unwatch(PathBuf),
    UnwatchAll,
    OnEvent(Callback),
}

enum Message {
    Fs(notify::Result<notify::Event>),
    Command(Command, Option<Reply>),
    Shutdown,
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| ForgeError::access(path, e.to_string()))
}

/// Cloneable control surface for a [`FileWatcher`].
///
/// Calls from any thread other than the dispatcher block until the dispatcher
/// has applied them. Calls from inside an event callback are queued and
/// return immediately with an optimistic result.
#[derive(Clone)]
pub struct WatcherHandle {
    messages: Sender<Message>,
    dispatcher: ThreadId,
    table: Arc<RwLock<WatchTable>>,
    sender: broadcast::Sender<FileChangeEvent>,
}

impl WatcherHandle {
    fn request(&self, command: Command) -> Result<bool> {
        if std::thread::current().id() == self.dispatcher {
            self.messages
                .send(Message::Command(command, None))
                .map_err(|_| ForgeError::Watch("watcher has stopped".into()))?;
            return Ok(true);
        }

        let (reply_tx, reply_rx) = bounded(1);
        self.messages
            .send(Message::Command(command, Some(reply_tx)))
            .map_err(|_| ForgeError::Watch("watcher has stopped".into()))?;
        reply_rx
            .recv()
            .map_err(|_| ForgeError::Watch("watcher has stopped".into()))?
    }

    /// Watches a single file. Returns `false` when it was already watched.
    pub fn watch_file(&self, path: impl AsRef<Path>) -> Result<bool> {
        self.request(Command::WatchFile(absolute(path.as_ref())?))
    }

    /// Watches a directory and every matching file in it. An empty
    /// `extensions` list matches all files.
    pub fn watch_directory<S: AsRef<str>>(
        &self,
        path: impl AsRef<Path>,
        extensions: &[S],
    ) -> Result<bool> {
        self.watch_directory_filtered(path, DirectoryFilter::extensions(extensions))
    }

    /// Watches a directory and the files in it selected by `filter`.
    pub fn watch_directory_filtered(
        &self,
        path: impl AsRef<Path>,
        filter: DirectoryFilter,
    ) -> Result<bool> {
        self.request(Command::WatchDirectory(absolute(path.as_ref())?, filter))
    }

    /// Stops watching `path`, and for a directory the files it discovered.
    pub fn stop_watching(&self, path: impl AsRef<Path>) -> Result<bool> {
        self.request(Command::Unwatch(absolute(path.as_ref())?))
    }

    pub fn stop_all(&self) -> Result<()> {
        self.request(Command::UnwatchAll).map(|_| ())
    }

    /// Registers a callback run on the dispatcher thread for every event.
    pub fn on_event<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&FileChangeEvent) + Send + 'static,
    {
        self.request(Command::OnEvent(Box::new(callback))).map(|_| ())
    }

    pub fn is_watching(&self, path: impl AsRef<Path>) -> bool {
        let Ok(path) = absolute(path.as_ref()) else {
            return false;
        };
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&path)
    }

    /// Snapshot of the watch table, sorted by path.
    pub fn watched_paths(&self) -> Vec<WatchedPath> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        let mut paths: Vec<WatchedPath> = table.values().cloned().collect();
        paths.sort_by(|a, b| a.path.cmp(&b.path));
        paths
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FileChangeEvent> {
        self.sender.subscribe()
    }
}

/// Watches files and directories and broadcasts [`FileChangeEvent`]s.
pub struct FileWatcher {
    handle: WatcherHandle,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FileWatcher {
    pub fn new() -> Result<Self> {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let (messages_tx, messages_rx) = unbounded();
        let (sender, _) = broadcast::channel(capacity.max(1));
        let table = Arc::new(RwLock::new(WatchTable::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let fs_tx = messages_tx.clone();
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| {
                let _ = fs_tx.send(Message::Fs(res));
            },
            notify::Config::default(),
        )?;

        let mut dispatcher = Dispatcher {
            watcher,
            table: Arc::clone(&table),
            sender: sender.clone(),
            callbacks: Vec::new(),
            coalescer: Coalescer::default(),
        };
        let flag = Arc::clone(&shutdown);
        let thread = std::thread::Builder::new()
            .name("configforge-watch".into())
            .spawn(move || dispatcher.run(messages_rx, flag))
            .map_err(|e| ForgeError::Watch(e.to_string()))?;

        let handle = WatcherHandle {
            messages: messages_tx,
            dispatcher: thread.thread().id(),
            table,
            sender,
        };

        Ok(Self {
            handle,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> WatcherHandle {
        self.handle.clone()
    }

    pub fn sender(&self) -> broadcast::Sender<FileChangeEvent> {
        self.handle.sender.clone()
    }

    pub fn watch_file(&self, path: impl AsRef<Path>) -> Result<bool> {
        self.handle.watch_file(path)
    }

    pub fn watch_directory<S: AsRef<str>>(
        &self,
        path: impl AsRef<Path>,
        extensions: &[S],
    ) -> Result<bool> {
        self.handle.watch_directory(path, extensions)
    }

    pub fn watch_directory_filtered(
        &self,
        path: impl AsRef<Path>,
        filter: DirectoryFilter,
    ) -> Result<bool> {
        self.handle.watch_directory_filtered(path, filter)
    }

    pub fn stop_watching(&self, path: impl AsRef<Path>) -> Result<bool> {
        self.handle.stop_watching(path)
    }

    pub fn stop_all(&self) -> Result<()> {
        self.handle.stop_all()
    }

    pub fn on_event<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&FileChangeEvent) + Send + 'static,
    {
        self.handle.on_event(callback)
    }

    pub fn is_watching(&self, path: impl AsRef<Path>) -> bool {
        self.handle.is_watching(path)
    }

    pub fn watched_paths(&self) -> Vec<WatchedPath> {
        self.handle.watched_paths()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FileChangeEvent> {
        self.handle.subscribe()
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        if let Err(e) = self.stop_all() {
            debug!("stop_all during drop: {}", e);
        }
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.handle.messages.send(Message::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct Dispatcher {
    watcher: RecommendedWatcher,
    table: Arc<RwLock<WatchTable>>,
    sender: broadcast::Sender<FileChangeEvent>,
    callbacks: Vec<Callback>,
    coalescer: Coalescer,
}

impl Dispatcher {
    fn run(&mut self, messages: Receiver<Message>, shutdown: Arc<AtomicBool>) {
        debug!("Watch dispatcher started");
        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            match messages.recv_timeout(Duration::from_millis(100)) {
                Ok(Message::Fs(Ok(event))) => self.handle_event(event),
                Ok(Message::Fs(Err(e))) => warn!("Watch error: {}", e),
                Ok(Message::Command(command, reply)) => {
                    let result = self.apply(command);
                    match reply {
                        Some(reply) => {
                            let _ = reply.send(result);
                        }
                        None => {
                            if let Err(e) = result {
                                warn!("Queued watch command failed: {}", e);
                            }
                        }
                    }
                }
                Ok(Message::Shutdown) => break,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("Watch dispatcher stopped");
    }

    fn table_mut(&self) -> std::sync::RwLockWriteGuard<'_, WatchTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, path: &Path) -> Option<WatchedPath> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    fn apply(&mut self, command: Command) -> Result<bool> {
        match command {
            Command::WatchFile(path) => self.watch_file(path, None),
            Command::WatchDirectory(path, filter) => self.watch_directory(path, filter),
            Command::Unwatch(path) => Ok(self.unwatch(&path)),
            Command::UnwatchAll => {
                let paths: Vec<PathBuf> = self.table_mut().keys().cloned().collect();
                for path in &paths {
                    self.release(path);
                }
                if !paths.is_empty() {
                    info!("Stopped watching {} paths", paths.len());
                }
                Ok(true)
            }
            Command::OnEvent(callback) => {
                self.callbacks.push(callback);
                Ok(true)
            }
        }
    }

    fn watch_file(&mut self, path: PathBuf, owner: Option<PathBuf>) -> Result<bool> {
        if self.lookup(&path).is_some() {
            return Ok(false);
        }
        if !path.is_file() {
            return Err(ForgeError::access(&path, "not a file"));
        }

        self.watcher.watch(&path, RecursiveMode::NonRecursive)?;
        debug!("Watching file {}", path.display());
        self.table_mut().insert(
            path.clone(),
            WatchedPath {
                path,
                kind: WatchKind::File { owner },
            },
        );
        Ok(true)
    }

    fn watch_directory(&mut self, path: PathBuf, filter: DirectoryFilter) -> Result<bool> {
        if !path.is_dir() {
            return Err(ForgeError::access(&path, "not a directory"));
        }

        let newly_watched = match self.lookup(&path).map(|w| w.kind) {
            Some(WatchKind::Directory { filter: current }) => {
                let merged = current.merge(&filter);
                self.table_mut().insert(
                    path.clone(),
                    WatchedPath {
                        path: path.clone(),
                        kind: WatchKind::Directory { filter: merged },
                    },
                );
                false
            }
            Some(WatchKind::File { .. }) => {
                return Err(ForgeError::Watch(format!(
                    "{} is watched as a file",
                    path.display()
                )));
            }
            None => {
                self.watcher.watch(&path, RecursiveMode::NonRecursive)?;
                self.table_mut().insert(
                    path.clone(),
                    WatchedPath {
                        path: path.clone(),
                        kind: WatchKind::Directory { filter },
                    },
                );
                info!("Watching directory {}", path.display());
                true
            }
        };

        self.rescan(&path, false);
        Ok(newly_watched)
    }

    /// Starts watching files in `dir` not yet in the table. With `announce`,
    /// each one is reported as created.
    fn rescan(&mut self, dir: &Path, announce: bool) {
        let _span = tracing::debug_span!("rescan", dir = %dir.display()).entered();

        let filter = match self.lookup(dir).map(|w| w.kind) {
            Some(WatchKind::Directory { filter }) => filter,
            _ => return,
        };

        if !dir.is_dir() {
            self.emit(FileChangeEvent::Deleted {
                path: dir.to_path_buf(),
            });
            self.release(dir);
            return;
        }

        let mut found: Vec<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| filter.matches(p))
            .collect();
        found.sort();

        for path in found {
            if self.lookup(&path).is_some() {
                continue;
            }
            match self.watch_file(path.clone(), Some(dir.to_path_buf())) {
                Ok(true) if announce => self.emit(FileChangeEvent::Created { path }),
                Ok(_) => {}
                Err(e) => debug!("Could not watch {}: {}", path.display(), e),
            }
        }
    }

    /// Unregisters `path` and drops its table entry. Errors are logged only:
    /// the OS may already have dropped the registration.
    fn release(&mut self, path: &Path) {
        if let Err(e) = self.watcher.unwatch(path) {
            debug!("Unwatch {}: {}", path.display(), e);
        }
        self.table_mut().remove(path);
    }

    fn unwatch(&mut self, path: &Path) -> bool {
        let Some(watched) = self.lookup(path) else {
            return false;
        };

        if watched.is_directory() {
            let owned: Vec<PathBuf> = self
                .table_mut()
                .values()
                .filter(|w| matches!(&w.kind, WatchKind::File { owner: Some(o) } if o == path))
                .map(|w| w.path.clone())
                .collect();
            for file in owned {
                self.release(&file);
            }
        }

        self.release(path);
        debug!("Stopped watching {}", path.display());
        true
    }

    fn rewatch(&mut self, path: &Path) {
        let Some(watched) = self.lookup(path) else {
            return;
        };
        let _ = self.watcher.unwatch(path);
        if let Err(e) = self.watcher.watch(path, RecursiveMode::NonRecursive) {
            debug!("Re-watch of {} failed: {}", path.display(), e);
            self.table_mut().remove(path);
            return;
        }
        self.table_mut().insert(path.to_path_buf(), watched);
    }

    fn handle_event(&mut self, event: notify::Event) {
        let actions = {
            let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
            classify(&event, &table)
        };
        if actions.is_empty() {
            return;
        }
        debug!("{:?} {:?} -> {} actions", event.kind, event.paths, actions.len());

        for action in actions {
            match action {
                Action::Emit(e) => self.emit(e),
                Action::Rescan(dir) => self.rescan(&dir, true),
                Action::Release(path) => self.release(&path),
                Action::Rewatch(path) => self.rewatch(&path),
            }
        }
    }

    fn emit(&mut self, event: FileChangeEvent) {
        if !self.coalescer.admit(&event, Instant::now()) {
            return;
        }
        for callback in &self.callbacks {
            callback(&event);
        }
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_watch_file_twice_is_noop() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config");
        std::fs::write(&path, "x").unwrap();

        let watcher = FileWatcher::new().unwrap();
        assert!(watcher.watch_file(&path).unwrap());
        assert!(!watcher.watch_file(&path).unwrap());
        assert!(watcher.is_watching(&path));
        assert_eq!(watcher.watched_paths().len(), 1);
    }

    #[test]
    fn test_watch_missing_file_fails() {
        let temp = TempDir::new().unwrap();
        let watcher = FileWatcher::new().unwrap();
        assert!(watcher.watch_file(temp.path().join("missing")).is_err());
        assert!(watcher.watched_paths().is_empty());
    }

    #[test]
    fn test_watch_directory_enumerates_matching_files() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.yaml"), "").unwrap();
        std::fs::write(temp.path().join("b.yml"), "").unwrap();
        std::fs::write(temp.path().join("c.json"), "").unwrap();
        std::fs::write(temp.path().join(".hidden.yaml"), "").unwrap();

        let watcher = FileWatcher::new().unwrap();
        assert!(watcher.watch_directory(temp.path(), &["yaml", "yml"]).unwrap());

        assert!(watcher.is_watching(temp.path()));
        assert!(watcher.is_watching(temp.path().join("a.yaml")));
        assert!(watcher.is_watching(temp.path().join("b.yml")));
        assert!(!watcher.is_watching(temp.path().join("c.json")));
        assert!(!watcher.is_watching(temp.path().join(".hidden.yaml")));
    }

    #[test]
    fn test_rewatch_directory_merges_filters() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.yaml"), "").unwrap();
        std::fs::write(temp.path().join("c.json"), "").unwrap();

        let watcher = FileWatcher::new().unwrap();
        assert!(watcher.watch_directory(temp.path(), &["yaml"]).unwrap());
        assert!(!watcher.watch_directory(temp.path(), &["json"]).unwrap());

        assert!(watcher.is_watching(temp.path().join("c.json")));
        let dir = watcher
            .watched_paths()
            .into_iter()
            .find(|w| w.is_directory())
            .unwrap();
        assert_eq!(
            dir.kind,
            WatchKind::Directory {
                filter: DirectoryFilter::extensions(&["json", "yaml"])
            }
        );
    }

    #[test]
    fn test_named_directory_watch_picks_only_that_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("config"), "").unwrap();
        std::fs::write(temp.path().join("config.bak"), "").unwrap();

        let watcher = FileWatcher::new().unwrap();
        watcher
            .watch_directory_filtered(temp.path(), DirectoryFilter::names(&["config"]))
            .unwrap();

        assert!(watcher.is_watching(temp.path().join("config")));
        assert!(!watcher.is_watching(temp.path().join("config.bak")));
    }

    #[test]
    fn test_stop_watching_directory_releases_owned_files() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.yaml"), "").unwrap();
        let outside = TempDir::new().unwrap();
        let single = outside.path().join("config");
        std::fs::write(&single, "").unwrap();

        let watcher = FileWatcher::new().unwrap();
        watcher.watch_directory(temp.path(), &["yaml"]).unwrap();
        watcher.watch_file(&single).unwrap();

        assert!(watcher.stop_watching(temp.path()).unwrap());
        assert!(!watcher.stop_watching(temp.path()).unwrap());
        assert_eq!(watcher.watched_paths().len(), 1);
        assert!(watcher.is_watching(&single));

        watcher.stop_all().unwrap();
        assert!(watcher.watched_paths().is_empty());
    }

    #[test]
    fn test_drop_joins_dispatcher() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config");
        std::fs::write(&path, "").unwrap();

        let watcher = FileWatcher::new().unwrap();
        let handle = watcher.handle();
        watcher.watch_file(&path).unwrap();
        drop(watcher);

        assert!(handle.watch_file(&path).is_err());
    }
}
