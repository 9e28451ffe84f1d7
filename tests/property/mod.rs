//! Property-based testing for Keepsake
//!
//! Uses proptest to check the set algebra of snapshot diffs and the
//! deduplication and garbage-collection guarantees of versioning
//! repositories across randomly generated trees.

use crate::integration::{referenced_hashes, snapshot, sorted};
use ::keepsake::diff::{diff_dir_info, diff_file_info, file_total, intersect_file_info, union_dir_info};
use ::keepsake::*;
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const DIRS: &[&str] = &["", "docs", "docs/img", "src"];
const NAMES: &[&str] = &["a.txt", "b.txt", "c.bin", "notes"];

/// Root-relative file path built from one of a few directories and names
fn path_strategy() -> impl Strategy<Value = String> {
    (prop::sample::select(DIRS), prop::sample::select(NAMES)).prop_map(|(dir, name)| {
        if dir.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", dir, name)
        }
    })
}

/// File contents, drawn from a small pool often enough to produce duplicates
fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::sample::select(vec!["alpha", "beta", "gamma", ""]).prop_map(|s| s.as_bytes().to_vec()),
        prop::collection::vec(any::<u8>(), 0..64),
    ]
}

fn tree_strategy() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(path_strategy(), content_strategy(), 0..12)
}

/// In-memory metadata: path to (size, mtime offset in seconds)
fn meta_strategy() -> impl Strategy<Value = BTreeMap<String, (u64, i64)>> {
    prop::collection::btree_map(path_strategy(), (0..3u64, 0..3i64), 0..12)
}

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

fn ensure_dir(index: &mut Index, dir: &Path) {
    let mut prefix = PathBuf::new();
    for component in dir.components() {
        let parent = prefix.clone();
        prefix.push(component);
        if index.node(&prefix).is_none() {
            index
                .node_mut(&parent)
                .unwrap()
                .insert_sub_index(Index::with_dir(DirInfo::new(
                    prefix.clone(),
                    FileAttributes::DIRECTORY,
                    epoch(),
                )))
                .unwrap();
        }
    }
}

/// Snapshot tree built straight from metadata, no filesystem involved
fn build_index(files: &BTreeMap<String, (u64, i64)>) -> Index {
    let mut index = Index::new();
    for (path, (size, offset)) in files {
        let path = Path::new(path);
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        ensure_dir(&mut index, dir);
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        let file = FileInfo::new(
            name,
            FileAttributes::NORMAL,
            epoch(),
            epoch() + Duration::seconds(*offset),
            *size,
        );
        index.node_mut(dir).unwrap().insert_file(file);
    }
    index
}

fn group_paths(groups: &[FileGroup]) -> BTreeSet<PathBuf> {
    groups.iter().flat_map(|g| g.paths().map(|(p, _)| p)).collect()
}

fn index_dirs(index: &Index) -> BTreeSet<PathBuf> {
    index.all_dir_info().iter().map(|d| d.full_name.clone()).collect()
}

fn write_tree(root: &Path, files: &BTreeMap<String, Vec<u8>>) {
    if root.exists() {
        fs::remove_dir_all(root).unwrap();
    }
    fs::create_dir_all(root).unwrap();
    for (rel, content) in files {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A snapshot never differs from itself
    #[test]
    fn diff_is_reflexive(files in meta_strategy()) {
        let index = build_index(&files);
        let (left, right) = diff_file_info(&index, &index, &LooseFileComparer, &GeneralDirComparer, true);
        prop_assert!(left.is_empty() && right.is_empty());
        let (left, right) = diff_dir_info(&index, &index, &GeneralDirComparer, true);
        prop_assert!(left.is_empty() && right.is_empty());
    }

    /// Swapping the operands swaps the two result lists
    #[test]
    fn diff_is_symmetric(a in meta_strategy(), b in meta_strategy()) {
        let (x, y) = (build_index(&a), build_index(&b));
        let (x_only, y_only) = diff_file_info(&x, &y, &LooseFileComparer, &GeneralDirComparer, false);
        let (y_only2, x_only2) = diff_file_info(&y, &x, &LooseFileComparer, &GeneralDirComparer, false);
        prop_assert_eq!(group_paths(&x_only), group_paths(&x_only2));
        prop_assert_eq!(group_paths(&y_only), group_paths(&y_only2));
    }

    /// Every file of the left side is either unique to it or matched
    #[test]
    fn diff_and_intersection_partition_left(a in meta_strategy(), b in meta_strategy()) {
        let (x, y) = (build_index(&a), build_index(&b));
        let (x_only, _) = diff_file_info(&x, &y, &LooseFileComparer, &GeneralDirComparer, false);
        let (matched, partners) = intersect_file_info(&x, &y, &LooseFileComparer, &GeneralDirComparer, false);

        let unique = group_paths(&x_only);
        let common = group_paths(&matched);
        prop_assert!(unique.is_disjoint(&common));
        prop_assert_eq!(unique.len() + common.len(), x.file_count());
        prop_assert_eq!(file_total(&matched), file_total(&partners));

        // Matched pairs line up position by position
        for (l, r) in matched.iter().zip(&partners) {
            prop_assert_eq!(l.dir_path(), r.dir_path());
            for (lf, rf) in l.files.iter().zip(&r.files) {
                prop_assert!(LooseFileComparer.equals(lf, rf).is_match(false));
            }
        }
    }

    /// The directory union holds each distinct path once
    #[test]
    fn dir_union_is_set_union(a in meta_strategy(), b in meta_strategy()) {
        let (x, y) = (build_index(&a), build_index(&b));
        let union = union_dir_info(&x, &y, &GeneralDirComparer, false);
        let paths: BTreeSet<PathBuf> = union.iter().map(|d| d.full_name.clone()).collect();
        prop_assert_eq!(paths.len(), union.len());
        let expected: BTreeSet<PathBuf> = index_dirs(&x).union(&index_dirs(&y)).cloned().collect();
        prop_assert_eq!(paths, expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// One blob per distinct content, and an unchanged rerun stores nothing
    #[test]
    fn versioning_backup_deduplicates(files in tree_strategy()) {
        let work_dir = TempDir::new().unwrap();
        let target = work_dir.path().join("target");
        write_tree(&target, &files);

        let repo = VersioningBackup::create(
            work_dir.path().join("repo"),
            BackupOptions::default().with_check_hash(true),
        )
        .unwrap();
        let first = RecordInfo::new("first").unwrap();
        prop_assert!(repo.backup_task(&target, first).execute().unwrap().is_empty());

        let distinct: BTreeSet<&Vec<u8>> = files.values().collect();
        let blobs = sorted(repo.blob_hashes().unwrap());
        prop_assert_eq!(blobs.len(), distinct.len());

        let second = RecordInfo::new("second").unwrap();
        repo.backup_task(&target, second.clone()).execute().unwrap();
        prop_assert_eq!(sorted(repo.blob_hashes().unwrap()), blobs);
        prop_assert_eq!(repo.index_of(&second).unwrap().file_count(), files.len());
    }

    /// Removing any subset of records keeps every survivor restorable and
    /// leaves exactly the blobs the survivors reference
    #[test]
    fn record_removal_keeps_survivors_whole(
        rounds in prop::collection::vec(tree_strategy(), 1..4),
        remove_mask in prop::collection::vec(any::<bool>(), 4)
    ) {
        let work_dir = TempDir::new().unwrap();
        let target = work_dir.path().join("target");
        let repo = VersioningBackup::create(
            work_dir.path().join("repo"),
            BackupOptions::default().with_check_hash(true),
        )
        .unwrap();

        let mut history = Vec::new();
        for (i, files) in rounds.iter().enumerate() {
            write_tree(&target, files);
            let record = RecordInfo::new(format!("round {}", i)).unwrap();
            repo.backup_task(&target, record.clone()).execute().unwrap();
            history.push((record, files.clone()));
        }

        let doomed: Vec<RecordInfo> = history
            .iter()
            .zip(&remove_mask)
            .filter(|(_, remove)| **remove)
            .map(|((record, _), _)| record.clone())
            .collect();
        prop_assert!(repo.remove_task(doomed.clone()).execute().unwrap().is_empty());

        prop_assert_eq!(sorted(repo.blob_hashes().unwrap()), sorted(referenced_hashes(&repo)));
        for (record, files) in history.iter().filter(|(r, _)| !doomed.contains(r)) {
            let restored = work_dir.path().join(format!("restore {}", record.name()));
            let index = repo.index_of(record).unwrap();
            repo.restore_task(&restored, RestoreTarget::Index(index)).execute().unwrap();
            let expected: BTreeMap<String, Vec<u8>> = files.clone();
            prop_assert_eq!(snapshot(&restored), expected);
        }
    }
}
