//! Raw notification to [`FileChangeEvent`] translation.
//!
//! Pure functions over the watch table so the rules can be tested without a
//! live OS watcher.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::Event;

use super::event::FileChangeEvent;
use crate::storage::is_hidden;

/// Identical events closer together than this are emitted once.
pub const COALESCE_WINDOW: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchKind {
    File {
        /// Directory watch that discovered this file, if any.
        owner: Option<PathBuf>,
    },
    Directory { filter: DirectoryFilter },
}

/// Which children of a watched directory are watched as files.
///
/// A child matches when its extension or its exact name is listed. An empty
/// filter matches every file. Hidden files never match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryFilter {
    /// Lower-case extensions without the dot.
    pub extensions: Vec<String>,
    pub names: Vec<String>,
}

impl DirectoryFilter {
    pub fn extensions<S: AsRef<str>>(extensions: &[S]) -> Self {
        Self {
            extensions: normalize_extensions(extensions),
            names: Vec::new(),
        }
    }

    pub fn names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut names: Vec<String> = names
            .iter()
            .map(|n| n.as_ref().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        names.sort();
        names.dedup();
        Self {
            extensions: Vec::new(),
            names,
        }
    }

    pub fn matches_all(&self) -> bool {
        self.extensions.is_empty() && self.names.is_empty()
    }

    pub fn matches(&self, path: &Path) -> bool {
        if is_hidden(path) {
            return false;
        }
        if self.matches_all() {
            return true;
        }
        let named = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| self.names.iter().any(|name| name == n));
        named
            || path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .is_some_and(|e| self.extensions.contains(&e))
    }

    /// Union of two filters, where an empty filter already matches everything.
    pub fn merge(&self, other: &DirectoryFilter) -> DirectoryFilter {
        if self.matches_all() || other.matches_all() {
            return DirectoryFilter::default();
        }
        let union = |a: &[String], b: &[String]| {
            let mut merged: Vec<String> = a.iter().chain(b.iter()).cloned().collect();
            merged.sort();
            merged.dedup();
            merged
        };
        DirectoryFilter {
            extensions: union(&self.extensions, &other.extensions),
            names: union(&self.names, &other.names),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedPath {
    pub path: PathBuf,
    pub kind: WatchKind,
}

impl WatchedPath {
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, WatchKind::Directory { .. })
    }
}

pub type WatchTable = HashMap<PathBuf, WatchedPath>;

/// Work for the dispatcher resulting from one raw event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Emit(FileChangeEvent),
    /// Re-enumerate a watched directory.
    Rescan(PathBuf),
    /// Drop the registration and the table entry.
    Release(PathBuf),
    /// Register the path again; its inode was replaced.
    Rewatch(PathBuf),
}

pub fn normalize_extensions<S: AsRef<str>>(extensions: &[S]) -> Vec<String> {
    let mut result: Vec<String> = extensions
        .iter()
        .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect();
    result.sort();
    result.dedup();
    result
}

fn watched_parent<'a>(path: &Path, table: &'a WatchTable) -> Option<&'a WatchedPath> {
    table.get(path.parent()?).filter(|w| w.is_directory())
}

/// True when a directory watch would pick `path` up.
fn covered_by_directory(path: &Path, table: &WatchTable) -> bool {
    match watched_parent(path, table).map(|w| &w.kind) {
        Some(WatchKind::Directory { filter }) => filter.matches(path),
        _ => false,
    }
}

fn is_structural(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
    )
}

fn push_directory_changed(actions: &mut Vec<Action>, dir: &Path) {
    let rescan = Action::Rescan(dir.to_path_buf());
    if !actions.contains(&rescan) {
        actions.push(Action::Emit(FileChangeEvent::DirectoryChanged {
            path: dir.to_path_buf(),
        }));
        actions.push(rescan);
    }
}

fn classify_rename_pair(from: &Path, to: &Path, table: &WatchTable) -> Vec<Action> {
    let mut actions = Vec::new();
    let from_watched = table.get(from).is_some_and(|w| !w.is_directory());

    if from_watched || covered_by_directory(from, table) {
        actions.push(Action::Emit(FileChangeEvent::Renamed {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        }));
    }
    if from_watched {
        actions.push(Action::Release(from.to_path_buf()));
    }

    for path in [from, to] {
        if let Some(dir) = watched_parent(path, table) {
            push_directory_changed(&mut actions, &dir.path);
        }
    }
    actions
}

fn classify_path(kind: &EventKind, path: &Path, table: &WatchTable, actions: &mut Vec<Action>) {
    match table.get(path) {
        Some(watched) if watched.is_directory() => match kind {
            EventKind::Remove(_) => {
                actions.push(Action::Emit(FileChangeEvent::Deleted {
                    path: path.to_path_buf(),
                }));
                actions.push(Action::Release(path.to_path_buf()));
            }
            _ => push_directory_changed(actions, path),
        },
        Some(_) => {
            let file = path.to_path_buf();
            match kind {
                EventKind::Remove(_)
                | EventKind::Modify(ModifyKind::Name(RenameMode::From))
                | EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => {
                    actions.push(Action::Emit(FileChangeEvent::Deleted { path: file.clone() }));
                    actions.push(Action::Release(file));
                }
                EventKind::Modify(ModifyKind::Name(_)) | EventKind::Create(_) => {
                    actions.push(Action::Emit(FileChangeEvent::Modified { path: file.clone() }));
                    actions.push(Action::Rewatch(file));
                }
                EventKind::Modify(_) => {
                    actions.push(Action::Emit(FileChangeEvent::Modified { path: file }));
                }
                _ => {}
            }

            let renamed_or_created = matches!(
                kind,
                EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_))
            );
            if renamed_or_created {
                if let Some(dir) = watched_parent(path, table) {
                    push_directory_changed(actions, &dir.path);
                }
            }
        }
        None => {
            if is_structural(kind) {
                if let Some(dir) = watched_parent(path, table) {
                    push_directory_changed(actions, &dir.path);
                }
            }
        }
    }
}

/// Translates one raw notification against the current watch table.
pub fn classify(event: &Event, table: &WatchTable) -> Vec<Action> {
    if matches!(event.kind, EventKind::Access(_) | EventKind::Other) {
        return Vec::new();
    }

    if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = event.kind {
        if let [from, to, ..] = event.paths.as_slice() {
            return classify_rename_pair(from, to, table);
        }
    }

    let mut actions = Vec::new();
    for path in &event.paths {
        classify_path(&event.kind, path, table, &mut actions);
    }
    actions
}

/// Drops an event identical to one emitted within [`COALESCE_WINDOW`].
#[derive(Debug, Default)]
pub struct Coalescer {
    recent: HashMap<FileChangeEvent, Instant>,
}

impl Coalescer {
    pub fn admit(&mut self, event: &FileChangeEvent, now: Instant) -> bool {
        if self.recent.len() > 64 {
            self.recent
                .retain(|_, seen| now.duration_since(*seen) < COALESCE_WINDOW);
        }

        match self.recent.get(event) {
            Some(seen) if now.duration_since(*seen) < COALESCE_WINDOW => false,
            _ => {
                self.recent.insert(event.clone(), now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind};

    fn table() -> WatchTable {
        let mut t = WatchTable::new();
        t.insert(
            PathBuf::from("/kube/configs"),
            WatchedPath {
                path: PathBuf::from("/kube/configs"),
                kind: WatchKind::Directory {
                    filter: DirectoryFilter::extensions(&["yaml", "yml"]),
                },
            },
        );
        t.insert(
            PathBuf::from("/kube/configs/dev.yaml"),
            WatchedPath {
                path: PathBuf::from("/kube/configs/dev.yaml"),
                kind: WatchKind::File {
                    owner: Some(PathBuf::from("/kube/configs")),
                },
            },
        );
        t
    }

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    fn emitted(actions: &[Action]) -> Vec<FileChangeEvent> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Emit(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_modify_watched_file() {
        let actions = classify(
            &event(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                &["/kube/configs/dev.yaml"],
            ),
            &table(),
        );
        assert_eq!(
            actions,
            vec![Action::Emit(FileChangeEvent::Modified {
                path: "/kube/configs/dev.yaml".into()
            })]
        );

        let metadata = classify(
            &event(
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
                &["/kube/configs/dev.yaml"],
            ),
            &table(),
        );
        assert_eq!(emitted(&metadata).len(), 1);
    }

    #[test]
    fn test_remove_watched_file_releases() {
        let actions = classify(
            &event(EventKind::Remove(RemoveKind::File), &["/kube/configs/dev.yaml"]),
            &table(),
        );
        assert_eq!(
            actions,
            vec![
                Action::Emit(FileChangeEvent::Deleted {
                    path: "/kube/configs/dev.yaml".into()
                }),
                Action::Release("/kube/configs/dev.yaml".into()),
            ]
        );
    }

    #[test]
    fn test_rename_away_is_deleted_and_directory_changed() {
        let actions = classify(
            &event(
                EventKind::Modify(ModifyKind::Name(RenameMode::From)),
                &["/kube/configs/dev.yaml"],
            ),
            &table(),
        );
        assert_eq!(
            emitted(&actions),
            vec![
                FileChangeEvent::Deleted {
                    path: "/kube/configs/dev.yaml".into()
                },
                FileChangeEvent::DirectoryChanged {
                    path: "/kube/configs".into()
                },
            ]
        );
        assert!(actions.contains(&Action::Release("/kube/configs/dev.yaml".into())));
    }

    #[test]
    fn test_rename_pair() {
        let actions = classify(
            &event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/kube/configs/dev.yaml", "/kube/configs/prod.yaml"],
            ),
            &table(),
        );
        assert_eq!(
            emitted(&actions),
            vec![
                FileChangeEvent::Renamed {
                    from: "/kube/configs/dev.yaml".into(),
                    to: "/kube/configs/prod.yaml".into()
                },
                FileChangeEvent::DirectoryChanged {
                    path: "/kube/configs".into()
                },
            ]
        );
        assert!(actions.contains(&Action::Release("/kube/configs/dev.yaml".into())));
        assert!(actions.contains(&Action::Rescan("/kube/configs".into())));
    }

    #[test]
    fn test_create_in_directory_triggers_rescan() {
        let actions = classify(
            &event(EventKind::Create(CreateKind::File), &["/kube/configs/new.yaml"]),
            &table(),
        );
        assert_eq!(
            actions,
            vec![
                Action::Emit(FileChangeEvent::DirectoryChanged {
                    path: "/kube/configs".into()
                }),
                Action::Rescan("/kube/configs".into()),
            ]
        );
    }

    #[test]
    fn test_unwatched_child_data_change_ignored() {
        let actions = classify(
            &event(
                EventKind::Modify(ModifyKind::Data(DataChange::Any)),
                &["/kube/configs/notes.txt"],
            ),
            &table(),
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn test_directory_removed() {
        let actions = classify(
            &event(EventKind::Remove(RemoveKind::Folder), &["/kube/configs"]),
            &table(),
        );
        assert_eq!(
            actions,
            vec![
                Action::Emit(FileChangeEvent::Deleted {
                    path: "/kube/configs".into()
                }),
                Action::Release("/kube/configs".into()),
            ]
        );
    }

    #[test]
    fn test_directory_self_modify_is_directory_changed() {
        let actions = classify(
            &event(EventKind::Modify(ModifyKind::Any), &["/kube/configs"]),
            &table(),
        );
        assert_eq!(
            emitted(&actions),
            vec![FileChangeEvent::DirectoryChanged {
                path: "/kube/configs".into()
            }]
        );
    }

    #[test]
    fn test_access_ignored() {
        let actions = classify(
            &event(
                EventKind::Access(AccessKind::Any),
                &["/kube/configs/dev.yaml"],
            ),
            &table(),
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn test_unrelated_path_ignored() {
        let actions = classify(
            &event(EventKind::Create(CreateKind::File), &["/elsewhere/x.yaml"]),
            &table(),
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn test_extension_filter() {
        let filter = DirectoryFilter::extensions(&[".YAML", "yml"]);
        assert_eq!(filter.extensions, vec!["yaml", "yml"]);
        assert!(filter.matches(Path::new("/d/a.yaml")));
        assert!(filter.matches(Path::new("/d/a.YML")));
        assert!(!filter.matches(Path::new("/d/a.json")));
        assert!(!filter.matches(Path::new("/d/.hidden.yaml")));
        assert!(DirectoryFilter::default().matches(Path::new("/d/anything")));
    }

    #[test]
    fn test_name_filter_matches_exact_name_only() {
        let filter = DirectoryFilter::names(&["config"]);
        assert!(filter.matches(Path::new("/kube/config")));
        assert!(!filter.matches(Path::new("/kube/config.bak")));
        assert!(!filter.matches(Path::new("/kube/other")));
        assert!(!filter.matches(Path::new("/kube/.config")));
    }

    #[test]
    fn test_merge_filters() {
        let yaml = DirectoryFilter::extensions(&["yaml"]);
        let json = DirectoryFilter::extensions(&["json"]);
        assert_eq!(yaml.merge(&json).extensions, vec!["json", "yaml"]);
        assert!(yaml.merge(&DirectoryFilter::default()).matches_all());
        assert!(DirectoryFilter::default().merge(&json).matches_all());

        let both = yaml.merge(&DirectoryFilter::names(&["config"]));
        assert!(both.matches(Path::new("/kube/config")));
        assert!(both.matches(Path::new("/kube/dev.yaml")));
        assert!(!both.matches(Path::new("/kube/notes.txt")));
    }

    #[test]
    fn test_recreate_of_named_file_triggers_rescan() {
        let mut t = WatchTable::new();
        t.insert(
            PathBuf::from("/kube"),
            WatchedPath {
                path: PathBuf::from("/kube"),
                kind: WatchKind::Directory {
                    filter: DirectoryFilter::names(&["config"]),
                },
            },
        );
        let actions = classify(&event(EventKind::Create(CreateKind::File), &["/kube/config"]), &t);
        assert!(actions.contains(&Action::Rescan("/kube".into())));
    }

    #[test]
    fn test_coalescer_window() {
        let mut c = Coalescer::default();
        let e = FileChangeEvent::Modified {
            path: "/a.yaml".into(),
        };
        let t0 = Instant::now();
        assert!(c.admit(&e, t0));
        assert!(!c.admit(&e, t0 + Duration::from_millis(10)));
        assert!(c.admit(&e, t0 + COALESCE_WINDOW + Duration::from_millis(1)));

        let other = FileChangeEvent::Deleted {
            path: "/a.yaml".into(),
        };
        assert!(c.admit(&other, t0 + Duration::from_millis(10)));
    }
}
