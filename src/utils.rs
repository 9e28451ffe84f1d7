//! Filesystem helpers shared by the builder, the repositories and the tasks
//!
//! ## Categories of Utilities
//!
//! ### Metadata
//! - Reading [`FileAttributes`] from platform metadata
//! - Applying attributes back, and normalizing repository copies
//! - Creation/modification times as `DateTime<Utc>`
//!
//! ### File Operations
//! - Non-overwriting copy that keeps the source modification time
//! - Atomic file writing
//! - Empty-directory pruning
//!
//! ### Names and Paths
//! - Record-name validation
//! - Root-relative path computation
//! - UTF-8 conversion of OS strings
//!
//! All functions are thread-safe and are called from rayon workers.

use crate::error::{KeepsakeError, Result};
use crate::types::FileAttributes;
use chrono::{DateTime, Utc};
use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::trace;

/// Longest accepted record name, in characters
pub const MAX_FILE_NAME_LEN: usize = 255;

const RESERVED_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Check whether `name` can be used as a single portable file name
///
/// Rejects blank names, names with leading or trailing whitespace, names over
/// [`MAX_FILE_NAME_LEN`] characters, `.` and `..`, and names containing path
/// separators, reserved punctuation or control characters.
///
/// # Example
///
/// ```rust
/// use keepsake::utils::is_valid_file_name;
///
/// assert!(is_valid_file_name("before upgrade"));
/// assert!(!is_valid_file_name("a/b"));
/// assert!(!is_valid_file_name(" trailing "));
/// ```
pub fn is_valid_file_name(name: &str) -> bool {
    if name.trim().is_empty() || name.trim() != name {
        return false;
    }
    if name.chars().count() > MAX_FILE_NAME_LEN || name == "." || name == ".." {
        return false;
    }
    !name
        .chars()
        .any(|c| c.is_control() || RESERVED_CHARS.contains(&c))
}

/// Convert an OS string to UTF-8
pub fn os_to_string(name: &OsStr) -> Result<String> {
    name.to_str()
        .map(str::to_owned)
        .ok_or_else(|| KeepsakeError::PathConversion(name.to_os_string()))
}

/// Convert a `SystemTime` to UTC
pub fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

/// Creation and modification times of an entry
///
/// Filesystems that do not record a birth time report the modification time
/// for both.
pub fn entry_times(metadata: &fs::Metadata) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let modified = metadata.modified()?;
    let created = metadata.created().unwrap_or(modified);
    Ok((to_utc(created), to_utc(modified)))
}

/// Read attributes from metadata (Unix implementation)
///
/// A missing owner-write bit maps to `READONLY` and a dot-name to `HIDDEN`.
#[cfg(unix)]
pub fn read_attributes(path: &Path, metadata: &fs::Metadata) -> FileAttributes {
    use std::os::unix::fs::PermissionsExt;

    let mut attrs = FileAttributes::empty();
    if metadata.is_dir() {
        attrs |= FileAttributes::DIRECTORY;
    }
    if metadata.permissions().mode() & 0o200 == 0 {
        attrs |= FileAttributes::READONLY;
    }
    let dotted = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'));
    if dotted {
        attrs |= FileAttributes::HIDDEN;
    }
    if attrs.is_empty() {
        FileAttributes::NORMAL
    } else {
        attrs
    }
}

/// Read attributes from metadata (Windows implementation)
#[cfg(windows)]
pub fn read_attributes(_path: &Path, metadata: &fs::Metadata) -> FileAttributes {
    use std::os::windows::fs::MetadataExt;

    let attrs = FileAttributes::from_bits_truncate(metadata.file_attributes());
    if attrs.is_empty() {
        FileAttributes::NORMAL
    } else {
        attrs
    }
}

/// Apply the read-only part of `attrs` to an existing entry (Unix implementation)
///
/// Only the owner-write bit is touched; group and other bits are left as the
/// umask created them.
#[cfg(unix)]
pub fn apply_attributes(path: &Path, attrs: FileAttributes) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)?.permissions();
    let mode = permissions.mode();
    let mode = if attrs.contains(FileAttributes::READONLY) {
        mode & !0o222
    } else {
        mode | 0o200
    };
    permissions.set_mode(mode);
    fs::set_permissions(path, permissions)?;
    Ok(())
}

/// Apply the read-only part of `attrs` to an existing entry (Windows implementation)
///
/// std exposes only the read-only bit; hidden, system and archive bits are
/// carried in the index but not re-applied.
#[cfg(windows)]
pub fn apply_attributes(path: &Path, attrs: FileAttributes) -> Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    permissions.set_readonly(attrs.contains(FileAttributes::READONLY));
    fs::set_permissions(path, permissions)?;
    Ok(())
}

/// Make a repository-side copy plain and writable
pub fn normalize_attributes(path: &Path) -> Result<()> {
    apply_attributes(path, FileAttributes::NORMAL)
}

/// Copy `src` to `dst`, failing if `dst` already exists
///
/// The destination keeps the source's modification time so later snapshots of
/// a restored tree compare equal to the snapshot it came from.
///
/// # Errors
///
/// - [`KeepsakeError::Io`] with kind `AlreadyExists` if `dst` exists
/// - [`KeepsakeError::Io`] if reading or writing fails
pub fn copy_new(src: &Path, dst: &Path) -> Result<u64> {
    let mut reader = File::open(src)?;
    let modified = reader.metadata()?.modified()?;
    let mut writer = OpenOptions::new().write(true).create_new(true).open(dst)?;

    let copied = match io::copy(&mut reader, &mut writer).and_then(|n| writer.flush().map(|_| n)) {
        Ok(n) => n,
        Err(e) => {
            drop(writer);
            let _ = fs::remove_file(dst);
            return Err(e.into());
        }
    };
    if let Err(e) = writer.set_modified(modified) {
        drop(writer);
        let _ = fs::remove_file(dst);
        return Err(e.into());
    }
    trace!("Copied {:?} -> {:?} ({} bytes)", src, dst, copied);
    Ok(copied)
}

/// Remove directory if empty
pub fn remove_dir_if_empty(path: &Path) -> Result<bool> {
    if path.is_dir() && fs::read_dir(path)?.next().is_none() {
        fs::remove_dir(path)?;
        trace!("Removed empty directory: {:?}", path);
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Make a path relative to a base path
///
/// Strips `base` lexically; symlinks are not resolved.
///
/// # Errors
///
/// - [`KeepsakeError::InvalidArgument`] if `path` is not under `base`
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .map_err(|_| KeepsakeError::invalid_argument(format!(
            "Path {:?} is not relative to {:?}",
            path, base
        )))
}

/// Atomic file write (write to temp file then rename)
///
/// The temporary file is created next to `path` so the final rename never
/// crosses filesystems. Readers see either the old content or the new content.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::Builder::new()
        .prefix(".tmp")
        .tempfile_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| KeepsakeError::Io(e.error))?;
    Ok(())
}
