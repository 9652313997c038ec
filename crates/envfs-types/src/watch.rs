//! Watch registration values and change events.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::path::EnvPath;

/// Kind of change reported by the watch subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ChangeType {
    Created,
    Deleted,
    Changed,
}

impl ChangeType {
    pub const ALL: [ChangeType; 3] = [ChangeType::Created, ChangeType::Deleted, ChangeType::Changed];
}

/// A root to watch and whether its subdirectories are included.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatchedPath {
    pub path: EnvPath,
    pub recursive: bool,
}

impl WatchedPath {
    pub fn new(path: EnvPath) -> Self {
        Self {
            path,
            recursive: false,
        }
    }

    pub fn recursive(path: EnvPath) -> Self {
        Self {
            path,
            recursive: true,
        }
    }

    /// True if a change at `path` falls under this root.
    pub fn covers(&self, path: &EnvPath) -> bool {
        if !path.starts_with(&self.path) {
            return false;
        }
        // Non-recursive roots see themselves and their direct children.
        self.recursive || path.parts().len() <= self.path.parts().len() + 1
    }
}

/// One change event. `path` is absolute in the watched environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathChange {
    pub path: EnvPath,
    pub change_type: ChangeType,
}

/// Arguments of `add_watch_roots`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchOptions {
    pub paths: Vec<WatchedPath>,
    /// Default: every [`ChangeType`].
    pub change_types: Vec<ChangeType>,
}

impl WatchOptions {
    pub fn builder() -> WatchOptionsBuilder {
        WatchOptionsBuilder {
            opts: WatchOptions {
                paths: Vec::new(),
                change_types: ChangeType::ALL.to_vec(),
            },
        }
    }

    pub fn accepts(&self, change: ChangeType) -> bool {
        self.change_types.contains(&change)
    }
}

pub struct WatchOptionsBuilder {
    opts: WatchOptions,
}

impl WatchOptionsBuilder {
    pub fn path(mut self, path: WatchedPath) -> Self {
        self.opts.paths.push(path);
        self
    }

    pub fn paths(mut self, paths: impl IntoIterator<Item = WatchedPath>) -> Self {
        self.opts.paths.extend(paths);
        self
    }

    /// Replace the default filter.
    pub fn change_types(mut self, types: impl IntoIterator<Item = ChangeType>) -> Self {
        self.opts.change_types = types.into_iter().collect();
        self
    }

    pub fn build(self) -> WatchOptions {
        self.opts
    }
}

/// Arguments of `unwatch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnwatchOptions {
    pub path: EnvPath,
}

impl UnwatchOptions {
    pub fn new(path: EnvPath) -> Self {
        Self { path }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{Descriptor, EnvironmentId, OsFamily};

    fn p(s: &str) -> EnvPath {
        EnvPath::parse(s, Descriptor::new(EnvironmentId::local(), OsFamily::Posix)).unwrap()
    }

    #[test]
    fn test_covers_respects_recursive_flag() {
        let flat = WatchedPath::new(p("/w"));
        assert!(flat.covers(&p("/w")));
        assert!(flat.covers(&p("/w/a")));
        assert!(!flat.covers(&p("/w/a/b")));
        assert!(!flat.covers(&p("/other")));

        let deep = WatchedPath::recursive(p("/w"));
        assert!(deep.covers(&p("/w/a/b/c")));
    }

    #[test]
    fn test_watch_options_default_filter() {
        let opts = WatchOptions::builder().path(WatchedPath::new(p("/w"))).build();
        assert!(ChangeType::ALL.iter().all(|c| opts.accepts(*c)));

        let opts = WatchOptions::builder()
            .change_types([ChangeType::Created])
            .build();
        assert!(opts.accepts(ChangeType::Created));
        assert!(!opts.accepts(ChangeType::Deleted));
    }
}
