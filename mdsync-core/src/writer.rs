//! Atomic file writes and body checksums.
//!
//! ## `atomic_write` protocol
//!
//! 1. Ensure the parent directory exists.
//! 2. Write to `<path>.mdsync.tmp`.
//! 3. Rename to the final path (atomic on POSIX).
//! 4. On rename failure, remove the `.tmp` and leave the original intact.
//!
//! Every project state file (local store, manifest, index, describe cache,
//! settings) goes through this path, so a crash leaves either the previous
//! complete file or the new complete file on disk.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{io_err, CoreError};

/// Atomically replace `path` with `content`.
pub fn atomic_write(path: &Path, content: &str) -> Result<(), CoreError> {
    let tmp = PathBuf::from(format!("{}.mdsync.tmp", path.display()));
    atomic_write_with_tmp(path, content.as_bytes(), &tmp)
}

/// Byte-oriented variant of [`atomic_write`].
pub fn atomic_write_bytes(path: &Path, content: &[u8]) -> Result<(), CoreError> {
    let tmp = PathBuf::from(format!("{}.mdsync.tmp", path.display()));
    atomic_write_with_tmp(path, content, &tmp)
}

fn atomic_write_with_tmp(path: &Path, content: &[u8], tmp: &Path) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    if let Some(tmp_parent) = tmp.parent() {
        std::fs::create_dir_all(tmp_parent).map_err(|e| io_err(tmp_parent, e))?;
    }
    std::fs::write(tmp, content).map_err(|e| io_err(tmp, e))?;

    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }

    tracing::debug!("wrote: {}", path.display());
    Ok(())
}

/// SHA-256 hex digest of a body, with line endings normalised to LF.
pub fn checksum(content: &str) -> String {
    checksum_bytes(content.replace("\r\n", "\n").as_bytes())
}

fn checksum_bytes(content: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(content);
    hex::encode(h.finalize())
}

/// Checksum of the file at `path`.
///
/// Text bodies are normalised like [`checksum`]; anything that is not
/// UTF-8 (documents, static resource archives) is hashed as raw bytes.
pub fn checksum_file(path: &Path) -> Result<String, CoreError> {
    let bytes = std::fs::read(path).map_err(|e| io_err(path, e))?;
    Ok(match std::str::from_utf8(&bytes) {
        Ok(text) => checksum(text),
        Err(_) => checksum_bytes(&bytes),
    })
}
