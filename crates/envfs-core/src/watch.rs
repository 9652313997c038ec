//! Watch service over the local filesystem.
//!
//! ```text
//!   notify thread ──▶ map EventKind ──▶ filter by roots ──▶ async-broadcast
//!                                                            │   │   │
//!                                               watch_changes() subscribers
//! ```
//!
//! Every subscriber sees every event. A subscriber that falls more than
//! `event_capacity` events behind loses the oldest ones.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_broadcast::{InactiveReceiver, Sender};
use dashmap::DashMap;
use futures::StreamExt;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tracing::{debug, warn};

use envfs_types::{
    ChangeType, Descriptor, EnvPath, PathChange, UnwatchOptions, WatchError, WatchOptions,
    WatchedPath,
};

use crate::api::ChangeStream;
use crate::config::WatchConfig;
use crate::local::info::{from_native, to_native};

/// One registered root and the change types it lets through.
#[derive(Debug, Clone)]
struct WatchRoot {
    watched: WatchedPath,
    /// Where the OS reports events for this root (symlinks resolved).
    reported: WatchedPath,
    change_types: Vec<ChangeType>,
}

impl WatchRoot {
    fn new(watched: WatchedPath, change_types: Vec<ChangeType>) -> Self {
        let reported = dunce::canonicalize(to_native(&watched.path))
            .ok()
            .and_then(|native| from_native(&native, watched.path.descriptor()).ok())
            .map(|path| WatchedPath {
                path,
                recursive: watched.recursive,
            })
            .unwrap_or_else(|| watched.clone());
        Self {
            watched,
            reported,
            change_types,
        }
    }

    /// The change as seen under this root's own spelling, if it passes.
    fn accept(&self, change: &PathChange) -> Option<PathChange> {
        if !self.change_types.contains(&change.change_type) || !self.reported.covers(&change.path)
        {
            return None;
        }
        let relative = change.path.relative_to(&self.reported.path)?;
        let path = self.watched.path.resolve(&relative).ok()?;
        Some(PathChange {
            path,
            change_type: change.change_type,
        })
    }
}

/// One `add_roots` step, remembered so a later failure can reverse it.
enum Undo {
    /// A root that was not registered before.
    Added { key: EnvPath },
    /// Same recursion flag: only the registry entry changed.
    Replaced { key: EnvPath, previous: WatchRoot },
    /// Different recursion flag: the OS watch was taken down.
    Rewatched { key: EnvPath, previous: WatchRoot },
}

pub struct WatchService {
    descriptor: Descriptor,
    watcher: Mutex<RecommendedWatcher>,
    sender: Sender<PathChange>,
    /// Keyed by the case-folded path.
    roots: Arc<DashMap<EnvPath, WatchRoot>>,
    /// Keeps the channel open while nobody is subscribed.
    _inactive: InactiveReceiver<PathChange>,
}

impl WatchService {
    pub fn new(descriptor: Descriptor, config: &WatchConfig) -> Result<Self, WatchError> {
        let (mut sender, receiver) = async_broadcast::broadcast(config.event_capacity.max(1));
        sender.set_overflow(true);
        let inactive = receiver.deactivate();

        let roots: Arc<DashMap<EnvPath, WatchRoot>> = Arc::new(DashMap::new());
        let handler_roots = Arc::clone(&roots);
        let handler_sender = sender.clone();

        let watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    for change in map_event(&event, descriptor) {
                        let accepted = handler_roots.iter().find_map(|root| root.accept(&change));
                        if let Some(change) = accepted {
                            // Inactive (no subscribers) is fine; overflow drops the oldest.
                            let _ = handler_sender.try_broadcast(change);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "watch backend error"),
            },
            notify::Config::default().with_poll_interval(config.poll_interval()),
        )
        .map_err(|e| WatchError::Failed(e.to_string()))?;

        Ok(Self {
            descriptor,
            roots,
            watcher: Mutex::new(watcher),
            sender,
            _inactive: inactive,
        })
    }

    /// Register roots. Returns `true` when none of them was already watched.
    ///
    /// Either every root is registered or, on failure, the registry and the OS
    /// watches are put back the way this call found them. A previous root
    /// whose OS watch cannot be restored is dropped and named in the error.
    pub fn add_roots(&self, options: WatchOptions) -> Result<bool, WatchError> {
        for watched in &options.paths {
            watched
                .path
                .ensure_environment(&self.descriptor)
                .map_err(|e| WatchError::Failed(e.to_string()))?;
        }

        let mut watcher = self.watcher.lock();
        let mut undo: Vec<Undo> = Vec::new();
        let mut all_new = true;

        for watched in &options.paths {
            let key = watched.path.case_folded();
            let root = WatchRoot::new(watched.clone(), options.change_types.clone());
            let previous = self.roots.get(&key).map(|entry| entry.value().clone());

            if let Some(previous) = previous {
                all_new = false;
                if previous.watched.recursive == watched.recursive {
                    self.roots.insert(key.clone(), root);
                    undo.push(Undo::Replaced { key, previous });
                    continue;
                }
                // Mode change: re-register with the new recursion flag.
                if let Err(e) = watcher.unwatch(&to_native(&previous.watched.path)) {
                    debug!(path = %previous.watched.path, error = %e, "unwatch before mode change");
                }
                undo.push(Undo::Rewatched {
                    key: key.clone(),
                    previous,
                });
            } else {
                undo.push(Undo::Added { key: key.clone() });
            }

            if let Err(e) = watcher.watch(&to_native(&watched.path), recursive_mode(watched)) {
                let mut message = format!("{}: {e}", watched.path);
                for lost in self.roll_back(&mut watcher, undo) {
                    message.push_str(&format!("; previous watch on {lost} could not be restored"));
                }
                return Err(WatchError::Failed(message));
            }
            self.roots.insert(key, root);
            debug!(path = %watched.path, recursive = watched.recursive, "watching");
        }
        Ok(all_new)
    }

    /// Undo `add_roots` steps newest first. The newest step is the one whose
    /// OS watch failed to install. Returns previous roots that had to be dropped.
    fn roll_back(&self, watcher: &mut RecommendedWatcher, undo: Vec<Undo>) -> Vec<EnvPath> {
        let mut lost = Vec::new();
        for (age, step) in undo.into_iter().rev().enumerate() {
            let installed = age > 0;
            match step {
                Undo::Added { key } => {
                    if let Some((_, root)) = self.roots.remove(&key) {
                        let _ = watcher.unwatch(&to_native(&root.watched.path));
                    }
                }
                Undo::Replaced { key, previous } => {
                    self.roots.insert(key, previous);
                }
                Undo::Rewatched { key, previous } => {
                    if installed {
                        let _ = watcher.unwatch(&to_native(&previous.watched.path));
                    }
                    let path = &previous.watched.path;
                    match watcher.watch(&to_native(path), recursive_mode(&previous.watched)) {
                        Ok(()) => {
                            self.roots.insert(key, previous);
                        }
                        Err(e) => {
                            warn!(path = %path, error = %e, "dropping watch root that could not be restored");
                            self.roots.remove(&key);
                            lost.push(path.clone());
                        }
                    }
                }
            }
        }
        lost
    }

    /// Stop watching a root. Returns `true` if it was registered.
    pub fn unwatch(&self, options: &UnwatchOptions) -> Result<bool, WatchError> {
        let mut watcher = self.watcher.lock();
        let Some((_, root)) = self.roots.remove(&options.path.case_folded()) else {
            return Ok(false);
        };
        if let Err(e) = watcher.unwatch(&to_native(&root.watched.path)) {
            // The path may have disappeared, taking the OS watch with it.
            debug!(path = %root.watched.path, error = %e, "unwatch");
        }
        Ok(true)
    }

    pub fn watched_roots(&self) -> Vec<WatchedPath> {
        self.roots.iter().map(|root| root.watched.clone()).collect()
    }

    /// New subscriber seeing every change from now on.
    pub fn subscribe(&self) -> ChangeStream {
        self.sender.new_receiver().boxed()
    }
}

fn recursive_mode(watched: &WatchedPath) -> RecursiveMode {
    if watched.recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    }
}

fn to_change(path: &Path, change_type: ChangeType, descriptor: Descriptor) -> Option<PathChange> {
    let path = from_native(path, descriptor).ok()?;
    Some(PathChange { path, change_type })
}

/// Translate one notify event. Renames become a delete of the old name and a
/// create of the new one.
pub(crate) fn map_event(event: &Event, descriptor: Descriptor) -> Vec<PathChange> {
    let paths: &[PathBuf] = &event.paths;
    let typed = |change_type| -> Vec<PathChange> {
        paths
            .iter()
            .filter_map(|p| to_change(p, change_type, descriptor))
            .collect()
    };

    match event.kind {
        EventKind::Create(_) => typed(ChangeType::Created),
        EventKind::Remove(_) => typed(ChangeType::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => typed(ChangeType::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => typed(ChangeType::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut changes = Vec::new();
            if let Some(from) = paths.first() {
                changes.extend(to_change(from, ChangeType::Deleted, descriptor));
            }
            if let Some(to) = paths.get(1) {
                changes.extend(to_change(to, ChangeType::Created, descriptor));
            }
            changes
        }
        EventKind::Modify(_) => typed(ChangeType::Changed),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};

    fn p(s: &str) -> EnvPath {
        EnvPath::parse(s, Descriptor::local()).unwrap()
    }

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        event
    }

    #[cfg(unix)]
    #[test]
    fn test_map_event_kinds() {
        let d = Descriptor::local();
        let created = map_event(&event(EventKind::Create(CreateKind::File), &["/w/a"]), d);
        assert_eq!(
            created,
            [PathChange {
                path: p("/w/a"),
                change_type: ChangeType::Created
            }]
        );

        let changed = map_event(
            &event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &["/w/a"]),
            d,
        );
        assert_eq!(changed[0].change_type, ChangeType::Changed);

        let removed = map_event(&event(EventKind::Remove(RemoveKind::Any), &["/w/a"]), d);
        assert_eq!(removed[0].change_type, ChangeType::Deleted);

        let renamed = map_event(
            &event(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/w/old", "/w/new"],
            ),
            d,
        );
        assert_eq!(
            renamed,
            [
                PathChange {
                    path: p("/w/old"),
                    change_type: ChangeType::Deleted
                },
                PathChange {
                    path: p("/w/new"),
                    change_type: ChangeType::Created
                },
            ]
        );

        assert!(map_event(&event(EventKind::Any, &["/w/a"]), d).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_root_filter() {
        let root = WatchRoot {
            watched: WatchedPath::new(p("/w")),
            reported: WatchedPath::new(p("/private/w")),
            change_types: vec![ChangeType::Created],
        };
        let change = |path: &str, change_type| PathChange {
            path: p(path),
            change_type,
        };
        assert_eq!(
            root.accept(&change("/private/w/a", ChangeType::Created)),
            Some(change("/w/a", ChangeType::Created))
        );
        assert!(root.accept(&change("/private/w/a", ChangeType::Deleted)).is_none());
        assert!(root.accept(&change("/private/w/a/b", ChangeType::Created)).is_none());
        assert!(root.accept(&change("/w/a", ChangeType::Created)).is_none());
    }

    #[tokio::test]
    async fn test_add_and_unwatch() {
        let dir = tempfile::tempdir().unwrap();
        let root = from_native(dir.path(), Descriptor::local()).unwrap();
        let service = WatchService::new(Descriptor::local(), &WatchConfig::default()).unwrap();

        let options = WatchOptions::builder()
            .path(WatchedPath::recursive(root.clone()))
            .build();
        assert!(service.add_roots(options.clone()).unwrap());
        assert!(!service.add_roots(options).unwrap());
        assert_eq!(service.watched_roots().len(), 1);

        assert!(service.unwatch(&UnwatchOptions::new(root.clone())).unwrap());
        assert!(!service.unwatch(&UnwatchOptions::new(root)).unwrap());
    }

    #[tokio::test]
    async fn test_missing_root_fails_without_residue() {
        let dir = tempfile::tempdir().unwrap();
        let good = from_native(dir.path(), Descriptor::local()).unwrap();
        let missing = good.join("missing").unwrap();
        let service = WatchService::new(Descriptor::local(), &WatchConfig::default()).unwrap();

        let options = WatchOptions::builder()
            .path(WatchedPath::new(good))
            .path(WatchedPath::new(missing))
            .build();
        assert!(service.add_roots(options).is_err());
        assert!(service.watched_roots().is_empty());
    }

    #[tokio::test]
    async fn test_failed_batch_restores_earlier_roots() {
        let dir = tempfile::tempdir().unwrap();
        let kept = from_native(dir.path(), Descriptor::local()).unwrap();
        let flipped = kept.join("flipped").unwrap();
        std::fs::create_dir(to_native(&flipped)).unwrap();
        let missing = kept.join("missing").unwrap();
        let service = WatchService::new(Descriptor::local(), &WatchConfig::default()).unwrap();

        let first = WatchOptions::builder()
            .path(WatchedPath::new(kept.clone()))
            .path(WatchedPath::new(flipped.clone()))
            .change_types([ChangeType::Created])
            .build();
        assert!(service.add_roots(first).unwrap());

        // Same flag for `kept`, new flag for `flipped`, then a root that fails.
        let second = WatchOptions::builder()
            .path(WatchedPath::new(kept.clone()))
            .path(WatchedPath::recursive(flipped.clone()))
            .path(WatchedPath::new(missing))
            .change_types([ChangeType::Deleted])
            .build();
        assert!(service.add_roots(second).is_err());

        let mut roots = service.watched_roots();
        roots.sort_by_key(|root| root.path.to_string());
        assert_eq!(roots, vec![WatchedPath::new(kept.clone()), WatchedPath::new(flipped)]);
        let restored = service.roots.get(&kept.case_folded()).unwrap();
        assert_eq!(restored.change_types, vec![ChangeType::Created]);
    }

    #[tokio::test]
    async fn test_mode_change_on_deleted_root_drops_it() {
        let dir = tempfile::tempdir().unwrap();
        let root = from_native(dir.path(), Descriptor::local())
            .unwrap()
            .join("gone")
            .unwrap();
        std::fs::create_dir(to_native(&root)).unwrap();
        let service = WatchService::new(Descriptor::local(), &WatchConfig::default()).unwrap();

        let options = WatchOptions::builder()
            .path(WatchedPath::new(root.clone()))
            .build();
        assert!(service.add_roots(options).unwrap());
        std::fs::remove_dir(to_native(&root)).unwrap();

        let options = WatchOptions::builder()
            .path(WatchedPath::recursive(root.clone()))
            .build();
        let err = service.add_roots(options).unwrap_err();
        assert!(err.to_string().contains("could not be restored"), "{err}");
        // No root is reported without an OS watch behind it.
        assert!(service.watched_roots().is_empty());
        assert!(!service.unwatch(&UnwatchOptions::new(root)).unwrap());
    }

    #[cfg(windows)]
    #[tokio::test]
    async fn test_unwatch_ignores_case() {
        let dir = tempfile::tempdir().unwrap();
        let root = from_native(dir.path(), Descriptor::local()).unwrap();
        let shouted = EnvPath::parse(&root.to_string().to_uppercase(), Descriptor::local()).unwrap();
        let service = WatchService::new(Descriptor::local(), &WatchConfig::default()).unwrap();

        let options = WatchOptions::builder()
            .path(WatchedPath::new(root))
            .build();
        assert!(service.add_roots(options).unwrap());
        assert!(service.unwatch(&UnwatchOptions::new(shouted)).unwrap());
        assert!(service.watched_roots().is_empty());
    }
}
