//! Snapshot tree
//!
//! An [`Index`] is one node of a directory snapshot: the directory's own
//! [`DirInfo`] (absent on the root), its subdirectories as child nodes and its
//! files. Children are owned; there are no parent links.
//!
//! Every traversal here is pre-order and lists a node's files before
//! descending into its subdirectories, in stored order. The builder stores
//! both lists sorted by name, so traversal order is deterministic. Directory
//! deletion in the mirroring backup depends on that order (it walks the list
//! backwards to remove the deepest directories first).
//!
//! ## Example
//!
//! ```rust
//! use keepsake::{DirInfo, FileAttributes, FileInfo, Index};
//! use chrono::Utc;
//! use std::path::{Path, PathBuf};
//!
//! # fn main() -> keepsake::Result<()> {
//! let now = Utc::now();
//! let mut root = Index::new();
//! let mut a = Index::with_dir(DirInfo::new("A", FileAttributes::DIRECTORY, now));
//! a.insert_file(FileInfo::new("x.txt", FileAttributes::NORMAL, now, now, 1));
//! root.insert_sub_index(a)?;
//! root.insert_file(FileInfo::new("B.txt", FileAttributes::NORMAL, now, now, 2));
//!
//! let paths: Vec<PathBuf> = root.all_file_info().into_iter().map(|(p, _)| p).collect();
//! assert_eq!(paths, vec![PathBuf::from("B.txt"), PathBuf::from("A/x.txt")]);
//! assert!(root.get_sub_index(Path::new("A")).is_some());
//! # Ok(())
//! # }
//! ```

use crate::error::{KeepsakeError, Result};
use crate::types::{DirInfo, FileInfo};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One directory node of a snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    #[serde(rename = "Dir", default)]
    dir_info: Option<DirInfo>,
    #[serde(rename = "SubIndexes", default)]
    sub_indexes: Vec<Index>,
    #[serde(rename = "Files", default)]
    files: Vec<FileInfo>,
}

impl Index {
    /// Empty root node
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty node for the directory `dir`
    pub fn with_dir(dir: DirInfo) -> Self {
        Self {
            dir_info: Some(dir),
            ..Self::default()
        }
    }

    /// Directory descriptor, `None` on the root
    pub fn dir_info(&self) -> Option<&DirInfo> {
        self.dir_info.as_ref()
    }

    /// Whether this node is a snapshot root
    pub fn is_root(&self) -> bool {
        self.dir_info.is_none()
    }

    /// Root-relative path of this node (empty on the root)
    pub fn dir_path(&self) -> &Path {
        self.dir_info
            .as_ref()
            .map(|d| d.full_name.as_path())
            .unwrap_or_else(|| Path::new(""))
    }

    /// Root-relative path of a file stored in this node
    pub fn file_path(&self, file: &FileInfo) -> PathBuf {
        self.dir_path().join(&file.name)
    }

    /// Direct children
    pub fn sub_indexes(&self) -> &[Index] {
        &self.sub_indexes
    }

    /// Files directly in this node
    pub fn files(&self) -> &[FileInfo] {
        &self.files
    }

    /// Mutable access to the files directly in this node
    pub fn files_mut(&mut self) -> &mut [FileInfo] {
        &mut self.files
    }

    /// Append a child node
    ///
    /// # Errors
    ///
    /// - [`KeepsakeError::InvalidArgument`] if `index` has no directory descriptor
    pub fn insert_sub_index(&mut self, index: Index) -> Result<()> {
        if index.dir_info.is_none() {
            return Err(KeepsakeError::invalid_argument(
                "sub index must carry directory info",
            ));
        }
        self.sub_indexes.push(index);
        Ok(())
    }

    /// Append a file
    pub fn insert_file(&mut self, file: FileInfo) {
        self.files.push(file);
    }

    /// Detach the direct child whose full name is `full_name`
    pub fn remove_sub_index(&mut self, full_name: &Path) -> Option<Index> {
        let pos = self
            .sub_indexes
            .iter()
            .position(|s| s.dir_path() == full_name)?;
        Some(self.sub_indexes.remove(pos))
    }

    /// Remove the direct file called `name`
    pub fn remove_file(&mut self, name: &str) -> Option<FileInfo> {
        let pos = self.files.iter().position(|f| f.name == name)?;
        Some(self.files.remove(pos))
    }

    /// Descendant node for a root-relative directory path
    ///
    /// An empty path yields `None`; use [`Index::node`] to include this node.
    pub fn get_sub_index(&self, path: &Path) -> Option<&Index> {
        let mut current = self;
        let mut prefix = PathBuf::new();
        let mut found = false;
        for component in path.components() {
            prefix.push(component);
            current = current
                .sub_indexes
                .iter()
                .find(|s| s.dir_path() == prefix)?;
            found = true;
        }
        found.then_some(current)
    }

    /// Mutable form of [`Index::get_sub_index`]
    pub fn get_sub_index_mut(&mut self, path: &Path) -> Option<&mut Index> {
        if path.as_os_str().is_empty() {
            return None;
        }
        let mut current = self;
        let mut prefix = PathBuf::new();
        for component in path.components() {
            prefix.push(component);
            current = current
                .sub_indexes
                .iter_mut()
                .find(|s| s.dir_path() == prefix)?;
        }
        Some(current)
    }

    /// This node for an empty path, otherwise the matching descendant
    pub fn node(&self, path: &Path) -> Option<&Index> {
        if path.as_os_str().is_empty() {
            Some(self)
        } else {
            self.get_sub_index(path)
        }
    }

    /// Mutable form of [`Index::node`]
    pub fn node_mut(&mut self, path: &Path) -> Option<&mut Index> {
        if path.as_os_str().is_empty() {
            Some(self)
        } else {
            self.get_sub_index_mut(path)
        }
    }

    /// Remove a file by its root-relative path
    pub fn remove_file_at(&mut self, path: &Path) -> Option<FileInfo> {
        let name = path.file_name()?.to_str()?;
        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        self.node_mut(parent)?.remove_file(name)
    }

    /// Detach a directory subtree by its root-relative path
    pub fn remove_dir_at(&mut self, path: &Path) -> Option<Index> {
        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        self.node_mut(parent)?.remove_sub_index(path)
    }

    /// File lookup by root-relative path
    pub fn file_at(&self, path: &Path) -> Option<&FileInfo> {
        let name = path.file_name()?.to_str()?;
        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        self.node(parent)?.files.iter().find(|f| f.name == name)
    }

    /// Mutable file lookup by root-relative path
    pub fn file_at_mut(&mut self, path: &Path) -> Option<&mut FileInfo> {
        let name = path.file_name()?.to_str()?;
        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        self.node_mut(parent)?
            .files
            .iter_mut()
            .find(|f| f.name == name)
    }

    /// This node and every descendant, pre-order
    pub fn all_indexes(&self) -> Vec<&Index> {
        let mut out = Vec::new();
        self.collect_indexes(&mut out);
        out
    }

    fn collect_indexes<'a>(&'a self, out: &mut Vec<&'a Index>) {
        out.push(self);
        for sub in &self.sub_indexes {
            sub.collect_indexes(out);
        }
    }

    /// Every directory below this node, pre-order (this node excluded)
    pub fn all_dir_info(&self) -> Vec<&DirInfo> {
        self.all_dir_info_grouped()
            .into_iter()
            .map(|(_, dir)| dir)
            .collect()
    }

    /// Every directory below this node paired with the node that contains it
    pub fn all_dir_info_grouped(&self) -> Vec<(&Index, &DirInfo)> {
        let mut out = Vec::new();
        for node in self.all_indexes() {
            for sub in &node.sub_indexes {
                if let Some(dir) = sub.dir_info.as_ref() {
                    out.push((node, dir));
                }
            }
        }
        out
    }

    /// Every file paired with the node that contains it, files before subdirectories
    pub fn all_file_info_grouped(&self) -> Vec<(&Index, &FileInfo)> {
        self.all_indexes()
            .into_iter()
            .flat_map(|node| node.files.iter().map(move |f| (node, f)))
            .collect()
    }

    /// Every file with its root-relative path, files before subdirectories
    pub fn all_file_info(&self) -> Vec<(PathBuf, &FileInfo)> {
        self.all_file_info_grouped()
            .into_iter()
            .map(|(node, f)| (node.file_path(f), f))
            .collect()
    }

    /// Mutable references to every file with its root-relative path
    pub fn all_files_mut(&mut self) -> Vec<(PathBuf, &mut FileInfo)> {
        let mut out = Vec::new();
        self.collect_files_mut(&mut out);
        out
    }

    fn collect_files_mut<'a>(&'a mut self, out: &mut Vec<(PathBuf, &'a mut FileInfo)>) {
        let dir = self.dir_path().to_path_buf();
        for file in self.files.iter_mut() {
            out.push((dir.join(&file.name), file));
        }
        for sub in self.sub_indexes.iter_mut() {
            sub.collect_files_mut(out);
        }
    }

    /// Number of files in this subtree
    pub fn file_count(&self) -> usize {
        self.files.len() + self.sub_indexes.iter().map(Index::file_count).sum::<usize>()
    }

    /// Number of directories below this node
    pub fn dir_count(&self) -> usize {
        self.sub_indexes.len() + self.sub_indexes.iter().map(Index::dir_count).sum::<usize>()
    }

    /// Whether the subtree holds neither files nor directories
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.sub_indexes.is_empty()
    }
}
