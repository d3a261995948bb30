//! Whole-file snapshots replaced atomically.
//!
//! Small metadata files (deletion bitmaps, row snapshots, table schema)
//! are rewritten in full. The new bytes go to `<name>.tmp`, are synced,
//! and then renamed over the old file so a reader sees either the old
//! or the new contents, never a prefix.

use crate::error::{StorageError, StorageResult};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;

/// Atomically replaces the file at `path` with `data`.
///
/// # Errors
///
/// Returns an error if the temp file cannot be written, synced, or
/// renamed into place.
pub fn write_snapshot(path: &Path, data: &[u8]) -> StorageResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| StorageError::NoParent(path.to_path_buf()))?;
    let mut temp_name = path
        .file_name()
        .ok_or_else(|| StorageError::NoParent(path.to_path_buf()))?
        .to_os_string();
    temp_name.push(".tmp");
    let temp_path = parent.join(temp_name);

    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    sync_dir(parent)
}

/// Reads the snapshot at `path`, or `None` if it does not exist.
///
/// # Errors
///
/// Returns an error for any I/O failure other than the file missing.
pub fn read_snapshot(path: &Path) -> StorageResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> StorageResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

// NTFS journals metadata; there is no directory handle to fsync.
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> StorageResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_snapshot_reads_as_none() {
        let dir = tempdir().unwrap();
        assert!(read_snapshot(&dir.path().join("isDel")).unwrap().is_none());
    }

    #[test]
    fn snapshot_is_replaced_whole() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("isDel");

        write_snapshot(&path, b"a much longer first version").unwrap();
        write_snapshot(&path, b"v2").unwrap();

        assert_eq!(read_snapshot(&path).unwrap().unwrap(), b"v2");
        assert!(!dir.path().join("isDel.tmp").exists());
    }
}
