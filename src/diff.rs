//! Set operations between two snapshots
//!
//! Both snapshots are flattened into `(containing directory, entry)` pairs.
//! Pairs are bucketed by a composite key built from the directory comparer's
//! hash of the containing directory and the file comparer's hash of the entry,
//! then matched with the comparers' `equals`:
//!
//! - two files match only if their containing directories match (both at the
//!   root, or the directory comparer reports no content difference) and the
//!   file comparer accepts them;
//! - with `consider_attr == false`, an `ATTR_DIFF` result still counts as a
//!   match.
//!
//! File results come back regrouped by containing directory, in the order the
//! directories are first met while walking the input snapshot. Directory
//! results keep snapshot pre-order.
//!
//! ## Example
//!
//! ```rust
//! use keepsake::comparer::{GeneralDirComparer, LooseFileComparer};
//! use keepsake::diff::diff_file_info;
//! use keepsake::{FileAttributes, FileInfo, Index};
//! use chrono::Utc;
//!
//! let now = Utc::now();
//! let mut old = Index::new();
//! old.insert_file(FileInfo::new("a.txt", FileAttributes::NORMAL, now, now, 1));
//! let mut new = old.clone();
//! new.insert_file(FileInfo::new("b.txt", FileAttributes::NORMAL, now, now, 2));
//!
//! let (gone, added) = diff_file_info(&old, &new, &LooseFileComparer, &GeneralDirComparer, false);
//! assert!(gone.is_empty());
//! assert_eq!(added[0].files[0].name, "b.txt");
//! ```

use crate::collections::{map_with_capacity, HashMap};
use crate::comparer::{DirComparer, FileComparer};
use crate::index::Index;
use crate::types::{ComparedResult, DirInfo, FileInfo};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};

/// Files sharing one containing directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileGroup {
    /// Containing directory, `None` for the snapshot root
    pub dir: Option<DirInfo>,
    /// Files in snapshot order
    pub files: Vec<FileInfo>,
}

impl FileGroup {
    /// Root-relative path of the containing directory
    pub fn dir_path(&self) -> &Path {
        self.dir
            .as_ref()
            .map(|d| d.full_name.as_path())
            .unwrap_or_else(|| Path::new(""))
    }

    /// Root-relative path of one of the group's files
    pub fn file_path(&self, file: &FileInfo) -> PathBuf {
        self.dir_path().join(&file.name)
    }

    /// Files paired with their root-relative paths
    pub fn paths(&self) -> impl Iterator<Item = (PathBuf, &FileInfo)> + '_ {
        self.files.iter().map(move |f| (self.file_path(f), f))
    }

    /// Number of files
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the group is empty
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Total number of files across groups
pub fn file_total(groups: &[FileGroup]) -> usize {
    groups.iter().map(FileGroup::len).sum()
}

type FileEntry<'a> = (Option<&'a DirInfo>, &'a FileInfo);

fn flatten_files(index: &Index) -> Vec<FileEntry<'_>> {
    index
        .all_file_info_grouped()
        .into_iter()
        .map(|(node, f)| (node.dir_info(), f))
        .collect()
}

fn file_key(dir_cmp: &dyn DirComparer, file_cmp: &dyn FileComparer, entry: &FileEntry<'_>) -> u64 {
    let mut hasher = DefaultHasher::new();
    entry.0.map(|d| dir_cmp.hash_code(d)).hash(&mut hasher);
    file_cmp.hash_code(entry.1).hash(&mut hasher);
    hasher.finish()
}

fn same_dir(dir_cmp: &dyn DirComparer, a: Option<&DirInfo>, b: Option<&DirInfo>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => !dir_cmp.equals(a, b).contains(ComparedResult::CONTENT_DIFF),
        _ => false,
    }
}

/// Composite-key lookup over one side's file entries
struct FileLookup<'a, 'c> {
    entries: Vec<FileEntry<'a>>,
    buckets: HashMap<u64, Vec<usize>>,
    file_cmp: &'c dyn FileComparer,
    dir_cmp: &'c dyn DirComparer,
    consider_attr: bool,
}

impl<'a, 'c> FileLookup<'a, 'c> {
    fn new(
        index: &'a Index,
        file_cmp: &'c dyn FileComparer,
        dir_cmp: &'c dyn DirComparer,
        consider_attr: bool,
    ) -> Self {
        let entries = flatten_files(index);
        let mut buckets: HashMap<u64, Vec<usize>> = map_with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            buckets.entry(file_key(dir_cmp, file_cmp, entry)).or_default().push(i);
        }
        Self {
            entries,
            buckets,
            file_cmp,
            dir_cmp,
            consider_attr,
        }
    }

    /// Position of the first entry equal to `probe`
    fn find(&self, probe: &FileEntry<'_>) -> Option<usize> {
        let key = file_key(self.dir_cmp, self.file_cmp, probe);
        self.buckets.get(&key)?.iter().copied().find(|&i| {
            let (dir, file) = self.entries[i];
            same_dir(self.dir_cmp, dir, probe.0)
                && self.file_cmp.equals(file, probe.1).is_match(self.consider_attr)
        })
    }
}

/// Accumulates files into per-directory groups in first-seen order
#[derive(Default)]
struct GroupBuilder {
    groups: Vec<FileGroup>,
    positions: HashMap<Option<PathBuf>, usize>,
}

impl GroupBuilder {
    fn push(&mut self, dir: Option<&DirInfo>, file: &FileInfo) {
        let key = dir.map(|d| d.full_name.clone());
        let groups = &mut self.groups;
        let pos = *self.positions.entry(key).or_insert_with(|| {
            groups.push(FileGroup {
                dir: dir.cloned(),
                files: Vec::new(),
            });
            groups.len() - 1
        });
        self.groups[pos].files.push(file.clone());
    }

    fn finish(self) -> Vec<FileGroup> {
        self.groups
    }
}

fn files_missing_from(
    from: &[FileEntry<'_>],
    other: &FileLookup<'_, '_>,
) -> Vec<FileGroup> {
    let mut builder = GroupBuilder::default();
    for entry in from {
        if other.find(entry).is_none() {
            builder.push(entry.0, entry.1);
        }
    }
    builder.finish()
}

/// Files only in `left` and files only in `right`
pub fn diff_file_info(
    left: &Index,
    right: &Index,
    file_cmp: &dyn FileComparer,
    dir_cmp: &dyn DirComparer,
    consider_attr: bool,
) -> (Vec<FileGroup>, Vec<FileGroup>) {
    let left_lookup = FileLookup::new(left, file_cmp, dir_cmp, consider_attr);
    let right_lookup = FileLookup::new(right, file_cmp, dir_cmp, consider_attr);

    let left_only = files_missing_from(&left_lookup.entries, &right_lookup);
    let right_only = files_missing_from(&right_lookup.entries, &left_lookup);
    (left_only, right_only)
}

/// Files present in both snapshots, as two aligned group lists
///
/// `left[i].files[j]` and `right[i].files[j]` are the matched pair, so the
/// two lists can be zipped. Groups follow `left`'s directory order.
pub fn intersect_file_info(
    left: &Index,
    right: &Index,
    file_cmp: &dyn FileComparer,
    dir_cmp: &dyn DirComparer,
    consider_attr: bool,
) -> (Vec<FileGroup>, Vec<FileGroup>) {
    let left_entries = flatten_files(left);
    let right_lookup = FileLookup::new(right, file_cmp, dir_cmp, consider_attr);

    let mut left_groups = GroupBuilder::default();
    let mut right_groups: Vec<FileGroup> = Vec::new();
    for entry in &left_entries {
        let Some(i) = right_lookup.find(entry) else {
            continue;
        };
        let (right_dir, right_file) = right_lookup.entries[i];
        left_groups.push(entry.0, entry.1);
        let group_count = left_groups.groups.len();
        if right_groups.len() < group_count {
            right_groups.push(FileGroup {
                dir: right_dir.cloned(),
                files: Vec::new(),
            });
        }
        let pos = left_groups.positions[&entry.0.map(|d| d.full_name.clone())];
        right_groups[pos].files.push(right_file.clone());
    }
    (left_groups.finish(), right_groups)
}

type DirEntry<'a> = &'a DirInfo;

fn flatten_dirs(index: &Index) -> Vec<DirEntry<'_>> {
    index.all_dir_info()
}

struct DirLookup<'a, 'c> {
    entries: Vec<DirEntry<'a>>,
    buckets: HashMap<u64, Vec<usize>>,
    dir_cmp: &'c dyn DirComparer,
    consider_attr: bool,
}

impl<'a, 'c> DirLookup<'a, 'c> {
    fn new(entries: Vec<DirEntry<'a>>, dir_cmp: &'c dyn DirComparer, consider_attr: bool) -> Self {
        let mut buckets: HashMap<u64, Vec<usize>> = map_with_capacity(entries.len());
        for (i, dir) in entries.iter().enumerate() {
            buckets.entry(dir_cmp.hash_code(dir)).or_default().push(i);
        }
        Self {
            entries,
            buckets,
            dir_cmp,
            consider_attr,
        }
    }

    fn contains(&self, probe: &DirInfo) -> bool {
        self.buckets
            .get(&self.dir_cmp.hash_code(probe))
            .is_some_and(|bucket| {
                bucket.iter().any(|&i| {
                    self.dir_cmp
                        .equals(self.entries[i], probe)
                        .is_match(self.consider_attr)
                })
            })
    }

    fn insert(&mut self, dir: DirEntry<'a>) {
        self.buckets
            .entry(self.dir_cmp.hash_code(dir))
            .or_default()
            .push(self.entries.len());
        self.entries.push(dir);
    }
}

/// Directories only in `left` and directories only in `right`, in pre-order
pub fn diff_dir_info(
    left: &Index,
    right: &Index,
    dir_cmp: &dyn DirComparer,
    consider_attr: bool,
) -> (Vec<DirInfo>, Vec<DirInfo>) {
    let left_lookup = DirLookup::new(flatten_dirs(left), dir_cmp, consider_attr);
    let right_lookup = DirLookup::new(flatten_dirs(right), dir_cmp, consider_attr);

    let only = |from: &DirLookup<'_, '_>, other: &DirLookup<'_, '_>| -> Vec<DirInfo> {
        from.entries
            .iter()
            .filter(|d| !other.contains(d))
            .map(|d| (*d).clone())
            .collect()
    };
    (only(&left_lookup, &right_lookup), only(&right_lookup, &left_lookup))
}

/// Every distinct directory of both snapshots, `left` first
pub fn union_dir_info(
    left: &Index,
    right: &Index,
    dir_cmp: &dyn DirComparer,
    consider_attr: bool,
) -> Vec<DirInfo> {
    let mut seen = DirLookup::new(Vec::new(), dir_cmp, consider_attr);
    for dir in flatten_dirs(left).into_iter().chain(flatten_dirs(right)) {
        if !seen.contains(dir) {
            seen.insert(dir);
        }
    }
    seen.entries.into_iter().cloned().collect()
}
