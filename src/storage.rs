//! Content-addressed blob store of a versioning repository
//!
//! Each distinct file content is kept once, named after its SHA-1:
//!
//! ```text
//! blob/
//! └── <prefix>/       # first 2 hex chars of the hash
//!     └── <suffix>    # remaining 38 hex chars
//! ```
//!
//! Blobs are written to a `.tmp*` file inside the prefix directory and then
//! renamed into place without clobbering, so a blob under its final name is
//! always complete. Leftover temporaries from an interrupted run are ignored
//! by enumeration.
//!
//! Reference tracking is not stored: which blobs are live is derived from the
//! record indexes when records are removed.

use crate::collections::HashSet;
use crate::error::{KeepsakeError, Result};
use crate::hash::{is_valid_sha1, SHA1_HEX_LEN};
use crate::utils::{normalize_attributes, remove_dir_if_empty};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

const PREFIX_LEN: usize = 2;
const TEMP_PREFIX: &str = ".tmp";

/// Blob directory handle
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Handle for the blob directory at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Blob directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Split a hash into its prefix directory and file name
    ///
    /// # Errors
    ///
    /// - [`KeepsakeError::InvalidArgument`] if `hash` is not a lowercase hex SHA-1
    pub fn split_hash(hash: &str) -> Result<(&str, &str)> {
        if !is_valid_sha1(hash) {
            return Err(KeepsakeError::invalid_argument(format!(
                "{:?} is not a SHA-1 hex digest",
                hash
            )));
        }
        Ok(hash.split_at(PREFIX_LEN))
    }

    /// Location of the blob for `hash`
    pub fn blob_path(&self, hash: &str) -> Result<PathBuf> {
        let (prefix, name) = Self::split_hash(hash)?;
        Ok(self.root.join(prefix).join(name))
    }

    /// Whether a blob for `hash` exists
    pub fn contains(&self, hash: &str) -> bool {
        self.blob_path(hash).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Every stored hash
    ///
    /// # Errors
    ///
    /// - [`KeepsakeError::BrokenRepository`] if a file in the blob directory
    ///   does not sit at `<2 hex>/<38 hex>`
    pub fn hashes(&self) -> Result<Vec<String>> {
        let mut hashes = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = entry?;
            if entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.starts_with(TEMP_PREFIX) {
                warn!("Ignoring partial blob {:?}", entry.path());
                continue;
            }

            let hash = self.hash_of(entry.path()).ok_or_else(|| {
                KeepsakeError::broken(format!("Blob file is broken: {:?}", entry.path()))
            })?;
            hashes.push(hash);
        }
        trace!("Found {} blobs in {:?}", hashes.len(), self.root);
        Ok(hashes)
    }

    fn hash_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let mut parts = relative.components().map(|c| c.as_os_str().to_str());
        let (Some(Some(prefix)), Some(Some(name)), None) = (parts.next(), parts.next(), parts.next()) else {
            return None;
        };
        if prefix.len() != PREFIX_LEN || name.len() != SHA1_HEX_LEN - PREFIX_LEN {
            return None;
        }
        let hash = format!("{}{}", prefix, name);
        is_valid_sha1(&hash).then_some(hash)
    }

    /// Every prefix directory
    ///
    /// # Errors
    ///
    /// - [`KeepsakeError::BrokenRepository`] if a directory name is not two
    ///   lowercase hex characters
    pub fn prefixes(&self) -> Result<Vec<String>> {
        let mut prefixes = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let valid = name
                .to_str()
                .filter(|n| n.len() == PREFIX_LEN && n.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')));
            match valid {
                Some(n) => prefixes.push(n.to_string()),
                None => {
                    return Err(KeepsakeError::broken(format!(
                        "Blob structure is broken: {:?}",
                        entry.path()
                    )));
                }
            }
        }
        Ok(prefixes)
    }

    /// Copy `src` into the store under `hash`
    ///
    /// `known_prefixes` holds the prefix directories known to exist; a missing
    /// one is created and added. The new blob is made plain and writable.
    ///
    /// # Errors
    ///
    /// - [`KeepsakeError::Io`] with kind `AlreadyExists` if the blob is already stored
    /// - [`KeepsakeError::Io`] if reading `src` or writing the blob fails
    pub fn store_file(&self, src: &Path, hash: &str, known_prefixes: &mut HashSet<String>) -> Result<PathBuf> {
        let (prefix, name) = Self::split_hash(hash)?;
        let dir = self.root.join(prefix);
        if !known_prefixes.contains(prefix) {
            fs::create_dir_all(&dir)?;
            known_prefixes.insert(prefix.to_string());
        }

        let mut reader = File::open(src)?;
        let mut temp = tempfile::Builder::new().prefix(TEMP_PREFIX).tempfile_in(&dir)?;
        let size = io::copy(&mut reader, temp.as_file_mut())?;
        temp.as_file().sync_all()?;

        let target = dir.join(name);
        temp.persist_noclobber(&target).map_err(|e| KeepsakeError::Io(e.error))?;
        if let Err(e) = normalize_attributes(&target) {
            let _ = fs::remove_file(&target);
            return Err(e);
        }
        trace!("Stored blob {} ({} bytes) from {:?}", hash, size, src);
        Ok(target)
    }

    /// Delete the blob for `hash`
    pub fn delete(&self, hash: &str) -> Result<()> {
        fs::remove_file(self.blob_path(hash)?)?;
        Ok(())
    }

    /// Remove prefix directories that no longer hold any blob
    ///
    /// Failures are skipped; a directory that cannot be removed now is retried
    /// the next time.
    pub fn prune_empty_prefixes(&self) -> usize {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return 0;
        };
        let removed = entries
            .filter_map(|e| e.ok())
            .filter(|e| remove_dir_if_empty(&e.path()).unwrap_or(false))
            .count();
        debug!("Pruned {} empty blob prefixes", removed);
        removed
    }
}
