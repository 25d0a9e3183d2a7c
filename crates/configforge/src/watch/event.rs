use std::path::{Path, PathBuf};

use serde::Serialize;

/// Change reported by [`super::FileWatcher`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FileChangeEvent {
    Created { path: PathBuf },
    Modified { path: PathBuf },
    Deleted { path: PathBuf },
    Renamed { from: PathBuf, to: PathBuf },
    DirectoryChanged { path: PathBuf },
}

impl FileChangeEvent {
    /// The path the event is about; the destination for renames.
    pub fn path(&self) -> &Path {
        match self {
            FileChangeEvent::Created { path }
            | FileChangeEvent::Modified { path }
            | FileChangeEvent::Deleted { path }
            | FileChangeEvent::DirectoryChanged { path } => path,
            FileChangeEvent::Renamed { to, .. } => to,
        }
    }
}
