//! SHA-1 content hashing
//!
//! Blob keys and `FileInfo::sha1` are the lowercase hex SHA-1 of the raw file
//! bytes (40 characters). Files are streamed through an 8KB buffer.

use crate::error::Result;
use rayon::prelude::*;
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Length of a hex-encoded SHA-1
pub const SHA1_HEX_LEN: usize = 40;

/// Hash a file's content using SHA-1
///
/// # Errors
///
/// - [`KeepsakeError::Io`](crate::KeepsakeError::Io) if the file cannot be opened or read
///
/// # Example
///
/// ```rust,no_run
/// use keepsake::hash::compute_sha1;
/// use std::path::Path;
///
/// # fn example() -> keepsake::Result<()> {
/// let hash = compute_sha1(Path::new("notes.txt"))?;
/// assert_eq!(hash.len(), 40);
/// # Ok(())
/// # }
/// ```
pub fn compute_sha1(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buffer = vec![0u8; 8192]; // 8KB buffer

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash in-memory data using SHA-1
pub fn sha1_of(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// Hash many files in parallel on a pool of `workers` threads
///
/// The output is index-aligned with `paths`. Each slot holds the hash or the
/// error for that file; one failing file does not affect the others.
pub fn compute_sha1_all(paths: &[PathBuf], workers: usize) -> Result<Vec<Result<String>>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()?;
    Ok(pool.install(|| paths.par_iter().map(|p| compute_sha1(p)).collect()))
}

/// Whether `s` is a 40-character lowercase hex SHA-1
pub fn is_valid_sha1(s: &str) -> bool {
    s.len() == SHA1_HEX_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
