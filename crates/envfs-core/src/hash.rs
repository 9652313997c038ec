//! Directory hash engine.
//!
//! Walks a tree breadth first (every entry of a directory before any of its
//! subdirectories) on a blocking thread and streams one
//! [`DirectoryHashEntry`] per non-directory entry through a bounded channel:
//!
//! ```text
//!   spawn_blocking(walk) ──mpsc(channel_capacity)──▶ DirectoryHashStream
//!        │                                              │
//!        └── stops when the receiver is dropped ◀───────┘
//! ```
//!
//! The walk starts on the first poll, so an unpolled stream costs nothing.
//! Hash values are only comparable between walks made with the same
//! [`HashAlgorithm`].

use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, FileType};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use envfs_types::{DirectoryHashEntry, DirectoryHashError, EnvPath, FsError, RelativePath};

use crate::api::DirectoryHashStream;
use crate::config::HashConfig;
use crate::local::errors::fs_error;
use crate::local::info::to_native;

/// A 64-bit content hash family.
pub trait HashAlgorithm: Send + Sync + 'static {
    /// Stable identifier, e.g. for recording which algorithm produced a set
    /// of hashes.
    fn name(&self) -> &'static str;

    fn hasher(&self) -> Box<dyn ContentHasher>;
}

/// Incremental hasher for one file.
pub trait ContentHasher: Send {
    fn update(&mut self, bytes: &[u8]);

    fn finish(self: Box<Self>) -> u64;
}

/// XXH3 64-bit. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct Xxh3;

impl HashAlgorithm for Xxh3 {
    fn name(&self) -> &'static str {
        "xxh3-64"
    }

    fn hasher(&self) -> Box<dyn ContentHasher> {
        Box::new(xxhash_rust::xxh3::Xxh3::new())
    }
}

impl ContentHasher for xxhash_rust::xxh3::Xxh3 {
    fn update(&mut self, bytes: &[u8]) {
        xxhash_rust::xxh3::Xxh3::update(self, bytes);
    }

    fn finish(self: Box<Self>) -> u64 {
        self.digest()
    }
}

/// XXH64 with seed 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct Xxh64;

impl HashAlgorithm for Xxh64 {
    fn name(&self) -> &'static str {
        "xxh64"
    }

    fn hasher(&self) -> Box<dyn ContentHasher> {
        Box::new(xxhash_rust::xxh64::Xxh64::new(0))
    }
}

impl ContentHasher for xxhash_rust::xxh64::Xxh64 {
    fn update(&mut self, bytes: &[u8]) {
        xxhash_rust::xxh64::Xxh64::update(self, bytes);
    }

    fn finish(self: Box<Self>) -> u64 {
        self.digest()
    }
}

/// Hashes local trees.
#[derive(Clone)]
pub struct DirectoryHasher {
    algorithm: Arc<dyn HashAlgorithm>,
    buffer_size: usize,
    channel_capacity: usize,
}

impl DirectoryHasher {
    pub fn new(config: &HashConfig) -> Self {
        Self {
            algorithm: Arc::new(Xxh3),
            buffer_size: config.buffer_size.max(1),
            channel_capacity: config.channel_capacity.max(1),
        }
    }

    pub fn with_algorithm(mut self, algorithm: impl HashAlgorithm) -> Self {
        self.algorithm = Arc::new(algorithm);
        self
    }

    pub fn algorithm_name(&self) -> &'static str {
        self.algorithm.name()
    }

    /// Hash one file's content.
    pub fn hash_file(&self, native: &Path) -> io::Result<u64> {
        let mut file = fs::File::open(native)?;
        let mut hasher = self.algorithm.hasher();
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => hasher.update(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(hasher.finish())
    }

    /// Lazily hash the tree rooted at `root`.
    pub fn stream(&self, root: EnvPath) -> DirectoryHashStream {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let walker = self.clone();
        let start = futures::stream::once(async move {
            tokio::task::spawn_blocking(move || walker.walk(root, tx));
        })
        .filter_map(|()| futures::future::ready(None::<DirectoryHashEntry>));
        start.chain(receiver_stream(rx)).boxed()
    }

    fn walk(&self, root: EnvPath, tx: mpsc::Sender<DirectoryHashEntry>) {
        let emit = |entry: DirectoryHashEntry| tx.blocking_send(entry).is_ok();

        let meta = match fs::metadata(to_native(&root)) {
            Ok(meta) => meta,
            // Nothing there yet: nothing to hash.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            Err(e) => {
                emit(error_entry(fs_error(e, &root)));
                return;
            }
        };
        if !meta.is_dir() {
            let native = to_native(&root);
            emit(self.entry_for(root, &native, meta.file_type()));
            return;
        }

        // Native paths ride along so undecodable names still resolve.
        let native = to_native(&root);
        let mut queue = VecDeque::from([(root, native)]);
        while let Some((dir, native_dir)) = queue.pop_front() {
            let children = match read_sorted(&native_dir) {
                Ok(children) => children,
                Err(e) => {
                    if !emit(error_entry(fs_error(e, &dir))) {
                        return;
                    }
                    continue;
                }
            };

            for (name, native, file_type) in children {
                let entry = match dir.join(&name) {
                    Ok(path) if file_type.is_dir() => {
                        queue.push_back((path, native));
                        continue;
                    }
                    Ok(path) => self.entry_for(path, &native, file_type),
                    Err(e) => error_entry(FsError::other(dir.clone(), e.to_string())),
                };
                if !emit(entry) {
                    debug!(root = %dir, "directory hash consumer went away");
                    return;
                }
            }
        }
    }

    fn entry_for(&self, path: EnvPath, native: &Path, file_type: FileType) -> DirectoryHashEntry {
        if !file_type.is_file() {
            return DirectoryHashEntry::Hash { path, hash: None };
        }
        match self.hash_file(native) {
            Ok(hash) => DirectoryHashEntry::Hash {
                path,
                hash: Some(hash),
            },
            Err(e) => error_entry(fs_error(e, &path)),
        }
    }
}

fn error_entry(err: FsError) -> DirectoryHashEntry {
    DirectoryHashEntry::Error(DirectoryHashError::from(err))
}

/// Children of `dir` with their native paths and unfollowed types, sorted
/// by name.
fn read_sorted(dir: &Path) -> io::Result<Vec<(String, PathBuf, FileType)>> {
    let mut children = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        children.push((name, entry.path(), entry.file_type()?));
    }
    children.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(children)
}

pub(crate) fn receiver_stream<T: Send + 'static>(
    rx: mpsc::Receiver<T>,
) -> impl Stream<Item = T> + Send + 'static {
    futures::stream::unfold(rx, |mut rx| async move {
        let item = rx.recv().await?;
        Some((item, rx))
    })
}

/// `(relative path, hash)` pairs of a hash stream under `root`. Error
/// entries and entries outside `root` are skipped.
pub fn relative_entries(
    stream: DirectoryHashStream,
    root: EnvPath,
) -> impl Stream<Item = (RelativePath, Option<u64>)> + Send + 'static {
    stream.filter_map(move |entry| futures::future::ready(entry.relative_to(&root)))
}

/// A tree's hashes keyed by path relative to its root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeHashes {
    pub entries: BTreeMap<RelativePath, Option<u64>>,
    pub errors: Vec<DirectoryHashError>,
}

impl TreeHashes {
    /// Drain a hash stream into a map relative to `root`.
    pub async fn collect(stream: DirectoryHashStream, root: &EnvPath) -> Self {
        let mut tree = TreeHashes::default();
        let mut stream = stream;
        while let Some(entry) = stream.next().await {
            match entry {
                DirectoryHashEntry::Error(err) => tree.errors.push(err),
                entry => {
                    if let Some((relative, hash)) = entry.relative_to(root) {
                        tree.entries.insert(relative, hash);
                    }
                }
            }
        }
        tree
    }

    /// Paths whose presence or hash differs between the two trees.
    pub fn diff(&self, other: &TreeHashes) -> TreeDiff {
        let mut diff = TreeDiff::default();
        for (path, hash) in &self.entries {
            match other.entries.get(path) {
                None => diff.removed.push(path.clone()),
                Some(theirs) if theirs != hash => diff.changed.push(path.clone()),
                Some(_) => {}
            }
        }
        for path in other.entries.keys() {
            if !self.entries.contains_key(path) {
                diff.added.push(path.clone());
            }
        }
        diff
    }
}

/// Result of [`TreeHashes::diff`], from the left tree's point of view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDiff {
    pub added: Vec<RelativePath>,
    pub removed: Vec<RelativePath>,
    pub changed: Vec<RelativePath>,
}

impl TreeDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::info::from_native;
    use envfs_types::Descriptor;

    fn hasher() -> DirectoryHasher {
        DirectoryHasher::new(&HashConfig {
            buffer_size: 7,
            channel_capacity: 2,
        })
    }

    fn env(p: &Path) -> EnvPath {
        from_native(p, Descriptor::local()).unwrap()
    }

    #[test]
    fn test_hash_file_is_chunk_independent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data");
        std::fs::write(&file, b"the quick brown fox jumps over the lazy dog").unwrap();

        let small = hasher().hash_file(&file).unwrap();
        let large = DirectoryHasher::new(&HashConfig::default())
            .hash_file(&file)
            .unwrap();
        assert_eq!(small, large);
        assert_eq!(
            small,
            xxhash_rust::xxh3::xxh3_64(b"the quick brown fox jumps over the lazy dog")
        );
    }

    #[tokio::test]
    async fn test_breadth_first_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/deep")).unwrap();
        std::fs::write(dir.path().join("a/deep/z.txt"), b"z").unwrap();
        std::fs::write(dir.path().join("a/y.txt"), b"y").unwrap();
        std::fs::write(dir.path().join("x.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("zz.txt"), b"zz").unwrap();

        let root = env(dir.path());
        let names: Vec<String> = hasher()
            .stream(root.clone())
            .map(|entry| entry.path().relative_to(&root).unwrap().to_string())
            .collect()
            .await;
        assert_eq!(names, ["x.txt", "zz.txt", "a/y.txt", "a/deep/z.txt"]);
    }

    #[tokio::test]
    async fn test_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let root = env(&dir.path().join("not-yet"));
        assert_eq!(hasher().stream(root).count().await, 0);
    }

    #[tokio::test]
    async fn test_file_root_yields_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("only");
        std::fs::write(&file, b"content").unwrap();
        let entries: Vec<_> = hasher().stream(env(&file)).collect().await;
        assert_eq!(
            entries,
            [DirectoryHashEntry::Hash {
                path: env(&file),
                hash: Some(xxhash_rust::xxh3::xxh3_64(b"content")),
            }]
        );
    }

    #[tokio::test]
    async fn test_alternate_algorithm() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"abc").unwrap();
        let hasher = hasher().with_algorithm(Xxh64);
        assert_eq!(hasher.algorithm_name(), "xxh64");
        assert_eq!(
            hasher.hash_file(&file).unwrap(),
            xxhash_rust::xxh64::xxh64(b"abc", 0)
        );
    }

    #[tokio::test]
    async fn test_tree_diff() {
        let left = tempfile::tempdir().unwrap();
        let right = tempfile::tempdir().unwrap();
        for dir in [left.path(), right.path()] {
            std::fs::create_dir(dir.join("sub")).unwrap();
            std::fs::write(dir.join("same.txt"), b"same").unwrap();
            std::fs::write(dir.join("sub/nested.txt"), b"nested").unwrap();
        }
        std::fs::write(left.path().join("sub/nested.txt"), b"edited").unwrap();
        std::fs::write(right.path().join("new.txt"), b"new").unwrap();

        let (l, r) = (env(left.path()), env(right.path()));
        let l_tree = TreeHashes::collect(hasher().stream(l.clone()), &l).await;
        let r_tree = TreeHashes::collect(hasher().stream(r.clone()), &r).await;

        let diff = l_tree.diff(&r_tree);
        assert_eq!(diff.changed, [RelativePath::parse("sub/nested.txt").unwrap()]);
        assert_eq!(diff.added, [RelativePath::parse("new.txt").unwrap()]);
        assert!(diff.removed.is_empty());
        assert!(l_tree.diff(&l_tree).is_empty());
    }
}
