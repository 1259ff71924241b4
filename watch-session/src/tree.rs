//! Known directories and files of a watch, and the scans that fill them.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;
use walkdir::WalkDir;

use crate::backend::{BackendOptions, WatchedPaths};
use crate::rules::ExclusionRules;

/// Size and modification time used to detect settled writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileStat {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl From<&Metadata> for FileStat {
    fn from(metadata: &Metadata) -> Self {
        Self {
            size: metadata.len(),
            modified: metadata.modified().ok(),
        }
    }
}

/// An entry found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScannedEntry {
    Dir(PathBuf),
    File(PathBuf, FileStat),
}

/// Which paths under the root a watch covers.
#[derive(Debug, Clone)]
pub(crate) struct TreeScope {
    root: PathBuf,
    rules: ExclusionRules,
    max_depth: Option<usize>,
    follow_symlinks: bool,
}

impl TreeScope {
    pub fn new(options: &BackendOptions) -> Self {
        Self {
            root: options.root.clone(),
            rules: options.ignored.clone(),
            max_depth: options.config.max_depth,
            follow_symlinks: options.config.follow_symlinks,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Depth of `path` below the root, or `None` if it lies outside.
    pub fn depth(&self, path: &Path) -> Option<usize> {
        path.strip_prefix(&self.root)
            .ok()
            .map(|rel| rel.components().count())
    }

    /// Whether events for `path` may be reported.
    pub fn includes(&self, path: &Path) -> bool {
        let Some(depth) = self.depth(path) else {
            return false;
        };
        if self.max_depth.is_some_and(|max| depth > max) {
            return false;
        }
        !self.rules.is_excluded(&self.root, path)
    }

    /// Read metadata, following symlinks only when configured to.
    pub fn metadata(&self, path: &Path) -> std::io::Result<Metadata> {
        if self.follow_symlinks {
            std::fs::metadata(path)
        } else {
            std::fs::symlink_metadata(path)
        }
    }

    /// Walk `start` (the root or a directory below it), skipping excluded subtrees.
    pub fn walk(&self, start: &Path) -> Vec<ScannedEntry> {
        let remaining = match (self.max_depth, self.depth(start)) {
            (Some(max), Some(depth)) => max.saturating_sub(depth),
            (Some(max), None) => max,
            (None, _) => usize::MAX,
        };

        WalkDir::new(start)
            .follow_links(self.follow_symlinks)
            .max_depth(remaining)
            .into_iter()
            .filter_entry(|entry| !self.rules.is_excluded(&self.root, entry.path()))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Skipping unreadable entry during scan: {e}");
                    None
                }
            })
            .filter_map(|entry| {
                let path = entry.path().to_path_buf();
                if entry.file_type().is_dir() {
                    Some(ScannedEntry::Dir(path))
                } else {
                    entry
                        .metadata()
                        .ok()
                        .map(|metadata| ScannedEntry::File(path, FileStat::from(&metadata)))
                }
            })
            .collect()
    }

    /// Scan the whole root into a fresh tree.
    pub fn scan(&self) -> WatchTree {
        let mut tree = WatchTree::new(&self.root);
        for entry in self.walk(&self.root) {
            tree.insert(entry);
        }
        debug!(
            "Scanned {}: {} directories, {} files",
            self.root.display(),
            tree.dir_count(),
            tree.file_count()
        );
        tree
    }
}

/// Directories and files a watch currently knows about.
#[derive(Debug, Clone, Default)]
pub(crate) struct WatchTree {
    dirs: BTreeSet<PathBuf>,
    files: BTreeMap<PathBuf, FileStat>,
}

/// Differences between two scans of the same root.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct TreeDiff {
    pub added: Vec<(PathBuf, FileStat)>,
    pub modified: Vec<(PathBuf, FileStat)>,
    pub removed: Vec<PathBuf>,
}

impl WatchTree {
    pub fn new(root: &Path) -> Self {
        Self {
            dirs: BTreeSet::from([root.to_path_buf()]),
            files: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, entry: ScannedEntry) {
        match entry {
            ScannedEntry::Dir(path) => {
                self.dirs.insert(path);
            }
            ScannedEntry::File(path, stat) => {
                self.files.insert(path, stat);
            }
        }
    }

    /// Record a directory. Returns `true` if it was not known yet.
    pub fn insert_dir(&mut self, path: &Path) -> bool {
        self.dirs.insert(path.to_path_buf())
    }

    /// Record a file's current stat, returning the previous one.
    pub fn insert_file(&mut self, path: &Path, stat: FileStat) -> Option<FileStat> {
        self.files.insert(path.to_path_buf(), stat)
    }

    pub fn file_stat(&self, path: &Path) -> Option<FileStat> {
        self.files.get(path).copied()
    }

    pub fn contains_dir(&self, path: &Path) -> bool {
        self.dirs.contains(path)
    }

    pub fn files(&self) -> impl Iterator<Item = (&PathBuf, &FileStat)> {
        self.files.iter()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn dir_count(&self) -> usize {
        self.dirs.len()
    }

    /// Forget `path` and everything below it. Returns the forgotten files.
    pub fn remove(&mut self, path: &Path) -> Vec<PathBuf> {
        self.dirs.retain(|dir| !dir.starts_with(path));

        let mut removed = Vec::new();
        self.files.retain(|file, _| {
            if file.starts_with(path) {
                removed.push(file.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Compare against a newer scan of the same root.
    pub fn diff(&self, newer: &WatchTree) -> TreeDiff {
        let mut diff = TreeDiff::default();

        for (path, stat) in &newer.files {
            match self.files.get(path) {
                None => diff.added.push((path.clone(), *stat)),
                Some(old) if old != stat => diff.modified.push((path.clone(), *stat)),
                Some(_) => {}
            }
        }

        diff.removed = self
            .files
            .keys()
            .filter(|path| !newer.files.contains_key(*path))
            .cloned()
            .collect();

        diff
    }

    /// Replace the known directories with those of a newer scan.
    pub fn adopt_dirs(&mut self, newer: &WatchTree) {
        self.dirs = newer.dirs.clone();
    }

    /// Directory → direct children map.
    pub fn snapshot(&self) -> WatchedPaths {
        let mut watched: WatchedPaths = self
            .dirs
            .iter()
            .map(|dir| (dir.clone(), Vec::new()))
            .collect();

        let entries = self.dirs.iter().chain(self.files.keys());
        for entry in entries {
            if let Some(children) = entry.parent().and_then(|parent| watched.get_mut(parent)) {
                children.push(entry.clone());
            }
        }

        for children in watched.values_mut() {
            children.sort();
        }
        watched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn scope(root: &Path, rules: ExclusionRules, config: SessionConfig) -> TreeScope {
        TreeScope::new(&BackendOptions {
            root: root.to_path_buf(),
            ignored: rules,
            config,
        })
    }

    fn stat(size: u64) -> FileStat {
        FileStat {
            size,
            modified: None,
        }
    }

    #[test]
    fn test_scan_skips_excluded_subtrees() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("cache/deep")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("cache/deep/blob.bin"), "x").unwrap();
        fs::write(root.join("notes.tmp"), "x").unwrap();

        let rules = ExclusionRules::patterns(["cache", "*.tmp"]).unwrap();
        let tree = scope(root, rules, SessionConfig::default()).scan();

        assert_eq!(tree.file_count(), 1);
        assert!(tree.file_stat(&root.join("src/main.rs")).is_some());
        assert!(tree.contains_dir(root));
        assert!(!tree.contains_dir(&root.join("cache")));
    }

    #[test]
    fn test_scan_respects_max_depth() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("top.txt"), "1").unwrap();
        fs::write(root.join("a/mid.txt"), "2").unwrap();
        fs::write(root.join("a/b/low.txt"), "3").unwrap();

        let scope = scope(
            root,
            ExclusionRules::none(),
            SessionConfig::default().with_max_depth(2),
        );
        let tree = scope.scan();

        assert_eq!(tree.file_count(), 2);
        assert!(tree.file_stat(&root.join("a/b/low.txt")).is_none());
        assert!(!scope.includes(&root.join("a/b/low.txt")));
        assert!(scope.includes(&root.join("a/mid.txt")));
    }

    #[test]
    fn test_remove_directory_returns_files_below_it() {
        let root = Path::new("/w");
        let mut tree = WatchTree::new(root);
        tree.insert_dir(Path::new("/w/a"));
        tree.insert_file(Path::new("/w/a/1.txt"), stat(1));
        tree.insert_file(Path::new("/w/a/2.txt"), stat(2));
        tree.insert_file(Path::new("/w/ab.txt"), stat(3));

        let removed = tree.remove(Path::new("/w/a"));

        assert_eq!(
            removed,
            vec![PathBuf::from("/w/a/1.txt"), PathBuf::from("/w/a/2.txt")]
        );
        assert!(tree.file_stat(Path::new("/w/ab.txt")).is_some());
        assert!(!tree.contains_dir(Path::new("/w/a")));
    }

    #[test]
    fn test_diff() {
        let root = Path::new("/w");
        let mut old = WatchTree::new(root);
        old.insert_file(Path::new("/w/kept.txt"), stat(1));
        old.insert_file(Path::new("/w/grown.txt"), stat(1));
        old.insert_file(Path::new("/w/gone.txt"), stat(1));

        let mut new = WatchTree::new(root);
        new.insert_file(Path::new("/w/kept.txt"), stat(1));
        new.insert_file(Path::new("/w/grown.txt"), stat(9));
        new.insert_file(Path::new("/w/fresh.txt"), stat(1));

        let diff = old.diff(&new);

        assert_eq!(diff.added, vec![(PathBuf::from("/w/fresh.txt"), stat(1))]);
        assert_eq!(diff.modified, vec![(PathBuf::from("/w/grown.txt"), stat(9))]);
        assert_eq!(diff.removed, vec![PathBuf::from("/w/gone.txt")]);
    }

    #[test]
    fn test_snapshot_lists_children() {
        let root = Path::new("/w");
        let mut tree = WatchTree::new(root);
        tree.insert_dir(Path::new("/w/sub"));
        tree.insert_file(Path::new("/w/b.txt"), stat(1));
        tree.insert_file(Path::new("/w/sub/c.txt"), stat(1));

        let watched = tree.snapshot();

        assert_eq!(
            watched.get(Path::new("/w")),
            Some(&vec![PathBuf::from("/w/b.txt"), PathBuf::from("/w/sub")])
        );
        assert_eq!(
            watched.get(Path::new("/w/sub")),
            Some(&vec![PathBuf::from("/w/sub/c.txt")])
        );
    }
}
