//! Filesystem change notification.

pub mod event;
pub mod translate;
pub mod watcher;

pub use event::FileChangeEvent;
pub use translate::{DirectoryFilter, WatchKind, WatchedPath, COALESCE_WINDOW};
pub use watcher::{FileWatcher, WatcherHandle, DEFAULT_EVENT_CAPACITY};
