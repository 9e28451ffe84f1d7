//! Equality policies for snapshot entries
//!
//! A comparer answers two questions about a pair of entries: do they describe
//! the same content, and do their attributes agree. The answer is a
//! [`ComparedResult`] so callers can choose whether attribute-only changes
//! count as a difference.
//!
//! `hash_code` must agree with `equals`: whenever `equals` reports no
//! `CONTENT_DIFF`, both entries hash to the same value. Attributes are
//! therefore never part of the hash, which keeps the hash valid whether or not
//! attribute differences are masked.

use crate::types::{ComparedResult, DirInfo, FileInfo};
use std::fmt::Debug;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

/// File equality policy
pub trait FileComparer: Debug + Send + Sync {
    /// Whether this comparer needs `FileInfo::sha1` populated on both sides
    fn compare_hash(&self) -> bool;

    /// Compare two files
    fn equals(&self, a: &FileInfo, b: &FileInfo) -> ComparedResult;

    /// Hash consistent with [`FileComparer::equals`]
    fn hash_code(&self, file: &FileInfo) -> u64;
}

/// Directory equality policy
pub trait DirComparer: Debug + Send + Sync {
    /// Compare two directories
    fn equals(&self, a: &DirInfo, b: &DirInfo) -> ComparedResult;

    /// Hash consistent with [`DirComparer::equals`]
    fn hash_code(&self, dir: &DirInfo) -> u64;
}

fn attr_flag(differs: bool) -> ComparedResult {
    if differs {
        ComparedResult::ATTR_DIFF
    } else {
        ComparedResult::SAME
    }
}

fn content_flag(differs: bool) -> ComparedResult {
    if differs {
        ComparedResult::CONTENT_DIFF
    } else {
        ComparedResult::SAME
    }
}

/// Name, modification time and size identify a file; no hashing needed
#[derive(Debug, Clone, Copy, Default)]
pub struct LooseFileComparer;

impl FileComparer for LooseFileComparer {
    fn compare_hash(&self) -> bool {
        false
    }

    fn equals(&self, a: &FileInfo, b: &FileInfo) -> ComparedResult {
        content_flag(a.name != b.name || a.modified != b.modified || a.size != b.size)
            | attr_flag(a.attributes != b.attributes)
    }

    fn hash_code(&self, file: &FileInfo) -> u64 {
        let mut hasher = DefaultHasher::new();
        file.name.hash(&mut hasher);
        file.modified.hash(&mut hasher);
        file.size.hash(&mut hasher);
        hasher.finish()
    }
}

/// Like [`LooseFileComparer`] but also requires equal SHA-1
///
/// Two files without a hash compare equal on that field.
#[derive(Debug, Clone, Copy, Default)]
pub struct TightFileComparer;

impl FileComparer for TightFileComparer {
    fn compare_hash(&self) -> bool {
        true
    }

    fn equals(&self, a: &FileInfo, b: &FileInfo) -> ComparedResult {
        LooseFileComparer.equals(a, b) | content_flag(a.sha1 != b.sha1)
    }

    fn hash_code(&self, file: &FileInfo) -> u64 {
        let mut hasher = DefaultHasher::new();
        LooseFileComparer.hash_code(file).hash(&mut hasher);
        file.sha1.hash(&mut hasher);
        hasher.finish()
    }
}

/// Root-relative path identifies a directory
#[derive(Debug, Clone, Copy, Default)]
pub struct GeneralDirComparer;

impl DirComparer for GeneralDirComparer {
    fn equals(&self, a: &DirInfo, b: &DirInfo) -> ComparedResult {
        content_flag(a.full_name != b.full_name) | attr_flag(a.attributes != b.attributes)
    }

    fn hash_code(&self, dir: &DirInfo) -> u64 {
        let mut hasher = DefaultHasher::new();
        dir.full_name.hash(&mut hasher);
        hasher.finish()
    }
}

/// File comparer selected by the `check_hash` option
pub fn file_comparer_for(check_hash: bool) -> Arc<dyn FileComparer> {
    if check_hash {
        Arc::new(TightFileComparer)
    } else {
        Arc::new(LooseFileComparer)
    }
}
