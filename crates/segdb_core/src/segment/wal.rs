//! Write-ahead-logged writable segment.
//!
//! Every insert and delete is framed as a [`WalRecord`] and appended to
//! `wal.log` before the in-memory state changes. Loading a directory
//! replays the log from the start.
//!
//! ## Recovery
//!
//! | Condition                   | Action                            |
//! |-----------------------------|-----------------------------------|
//! | Truncated header or payload | tail cut off, replay ends cleanly |
//! | CRC mismatch                | load fails                        |
//! | Bad magic / unknown type    | load fails                        |
//! | Delete of an unknown row    | load fails                        |
//!
//! A segment opened [read-only](WalWritableSegment::read_only) replays a
//! copy of the log and never creates, truncates or marks anything on disk.

use super::wal_record::{encode_insert, WalRecord};
use super::{index_row, ordered_indexes, DeletionBitmap, Segment, SegmentKind, WritableSegment};
use crate::config::WritableBackendKind;
use crate::error::{CoreError, CoreResult};
use crate::index::SegmentIndex;
use crate::schema::{Row, Schema};
use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use segdb_storage::{read_snapshot, FileBackend, InMemoryBackend, StorageBackend};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Log file inside a WAL segment directory.
pub const WAL_FILE: &str = "wal.log";

#[derive(Debug, Default)]
struct State {
    rows: Vec<Row>,
    deleted: DeletionBitmap,
}

/// A writable segment persisted through a write-ahead log.
///
/// Rows are kept in insertion order, so physical and logical ids are the
/// same. Indexes are [`OrderedIndex`](crate::index::OrderedIndex)es;
/// deleted rows stay in them and are filtered through the bitmap.
pub struct WalWritableSegment {
    dir: PathBuf,
    schema: Arc<Schema>,
    sync_on_write: bool,
    read_only: bool,
    log: Mutex<Option<Box<dyn StorageBackend>>>,
    state: RwLock<State>,
    indexes: Vec<SegmentIndex>,
}

impl std::fmt::Debug for WalWritableSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Writers lock `log` before `state`; never hold both here.
        let loaded = self.log.lock().is_some();
        let state = self.state.read();
        f.debug_struct("WalWritableSegment")
            .field("dir", &self.dir)
            .field("rows", &state.rows.len())
            .field("deleted", &state.deleted.len())
            .field("read_only", &self.read_only)
            .field("loaded", &loaded)
            .finish()
    }
}

impl WalWritableSegment {
    /// Creates an unloaded segment. Call [`WritableSegment::load`] before
    /// writing to it.
    #[must_use]
    pub fn new(schema: Arc<Schema>, sync_on_write: bool) -> Self {
        let indexes = ordered_indexes(&schema);
        Self {
            dir: PathBuf::new(),
            schema,
            sync_on_write,
            read_only: false,
            log: Mutex::new(None),
            state: RwLock::new(State::default()),
            indexes,
        }
    }

    /// Opens the segment for inspection only.
    ///
    /// [`load`](WritableSegment::load) then replays an in-memory copy of
    /// `wal.log` (if any) and leaves the directory untouched. Inserts and
    /// deletes are rejected.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    fn check_writable(&self) -> CoreResult<()> {
        if self.read_only {
            return Err(CoreError::invalid_operation(format!(
                "WAL segment {} is open read-only",
                self.dir.display()
            )));
        }
        Ok(())
    }

    /// Creates a segment over an already opened log and replays it.
    ///
    /// Nothing is written to `dir`; [`flush`](WritableSegment::flush)
    /// still saves the deletion bitmap there.
    ///
    /// # Errors
    ///
    /// Returns an error if the log is corrupt.
    pub fn with_log(
        dir: &Path,
        schema: Arc<Schema>,
        log: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        let mut segment = Self::new(schema, false);
        segment.dir = dir.to_path_buf();
        segment.replay(log)?;
        Ok(segment)
    }

    fn replay(&mut self, mut log: Box<dyn StorageBackend>) -> CoreResult<()> {
        let bytes = log.read_all()?;
        let mut state = State::default();
        self.indexes = ordered_indexes(&self.schema);

        let mut offset = 0usize;
        let mut records = 0usize;
        while offset < bytes.len() {
            let Some((record, len)) = WalRecord::decode(&bytes[offset..])? else {
                warn!(
                    segment = %self.dir.display(),
                    offset,
                    dropped = bytes.len() - offset,
                    "truncating torn WAL tail"
                );
                log.truncate(offset as u64)?;
                log.sync()?;
                break;
            };
            match record {
                WalRecord::Insert { row } => {
                    self.schema.check_row(&row).map_err(|e| {
                        CoreError::wal_corruption(format!("logged row at offset {offset}: {e}"))
                    })?;
                    let logical_id = state.rows.len() as u64;
                    index_row(&self.schema, &self.indexes, &row, logical_id)?;
                    state.rows.push(row);
                }
                WalRecord::Delete { logical_id } => {
                    if logical_id >= state.rows.len() as u64 {
                        return Err(CoreError::wal_corruption(format!(
                            "delete of unknown row {logical_id} at offset {offset}"
                        )));
                    }
                    state.deleted.insert(logical_id)?;
                }
            }
            offset += len;
            records += 1;
        }

        debug!(
            segment = %self.dir.display(),
            records,
            rows = state.rows.len(),
            deleted = state.deleted.len(),
            "replayed WAL"
        );
        *self.state.get_mut() = state;
        *self.log.get_mut() = Some(log);
        Ok(())
    }

    fn append(&self, log: &mut dyn StorageBackend, frame: &[u8]) -> CoreResult<()> {
        log.append(frame)?;
        if self.sync_on_write {
            log.flush()?;
            log.sync()?;
        }
        Ok(())
    }
}

impl Segment for WalWritableSegment {
    fn dir(&self) -> &Path {
        &self.dir
    }

    fn kind(&self) -> SegmentKind {
        SegmentKind::Writable(WritableBackendKind::Wal)
    }

    fn logical_row_count(&self) -> u64 {
        self.state.read().rows.len() as u64
    }

    fn deletions(&self) -> MappedRwLockReadGuard<'_, DeletionBitmap> {
        RwLockReadGuard::map(self.state.read(), |s| &s.deleted)
    }

    fn physical_to_logical(&self, physical_id: u64) -> Option<u64> {
        (physical_id < self.logical_row_count()).then_some(physical_id)
    }

    fn index(&self, index_id: usize) -> Option<&SegmentIndex> {
        self.indexes.get(index_id)
    }

    fn row(&self, logical_id: u64) -> CoreResult<Option<Row>> {
        Ok(usize::try_from(logical_id)
            .ok()
            .and_then(|i| self.state.read().rows.get(i).cloned()))
    }

    fn as_writable(&self) -> Option<&dyn WritableSegment> {
        Some(self)
    }
}

impl WritableSegment for WalWritableSegment {
    fn backend(&self) -> WritableBackendKind {
        WritableBackendKind::Wal
    }

    fn load(&mut self, dir: &Path) -> CoreResult<()> {
        self.dir = dir.to_path_buf();
        if self.read_only {
            let bytes = read_snapshot(&dir.join(WAL_FILE))?.unwrap_or_default();
            return self.replay(Box::new(InMemoryBackend::with_data(bytes)));
        }

        let log = FileBackend::open_with_create_dirs(&dir.join(WAL_FILE))?;
        self.replay(Box::new(log))?;
        // The marker is written once, when the directory is initialized.
        // An existing bitmap may belong to rows another backend flushed.
        if DeletionBitmap::marker_exists(dir) {
            return Ok(());
        }
        self.state.get_mut().deleted.save(dir)
    }

    fn insert(&self, row: Row) -> CoreResult<u64> {
        self.schema.check_row(&row)?;
        self.check_writable()?;
        let mut guard = self.log.lock();
        let log = guard
            .as_mut()
            .ok_or_else(|| CoreError::invalid_operation("WAL segment is not loaded"))?;
        self.append(log.as_mut(), &encode_insert(&row)?)?;

        let mut state = self.state.write();
        let logical_id = state.rows.len() as u64;
        index_row(&self.schema, &self.indexes, &row, logical_id)?;
        state.rows.push(row);
        Ok(logical_id)
    }

    fn delete(&self, logical_id: u64) -> CoreResult<bool> {
        self.check_writable()?;
        let mut guard = self.log.lock();
        let log = guard
            .as_mut()
            .ok_or_else(|| CoreError::invalid_operation("WAL segment is not loaded"))?;
        {
            let state = self.state.read();
            if logical_id >= state.rows.len() as u64 {
                return Err(CoreError::invalid_operation(format!(
                    "logical id {logical_id} out of range for {} rows",
                    state.rows.len()
                )));
            }
            if state.deleted.contains(logical_id) {
                return Ok(false);
            }
        }
        self.append(log.as_mut(), &WalRecord::Delete { logical_id }.encode()?)?;
        self.state.write().deleted.insert(logical_id)
    }

    fn flush(&self) -> CoreResult<()> {
        if self.read_only {
            return Ok(());
        }
        let mut guard = self.log.lock();
        if let Some(log) = guard.as_mut() {
            log.flush()?;
            log.sync()?;
        }
        std::fs::create_dir_all(&self.dir)?;
        self.state.read().deleted.save(&self.dir)
    }

    fn into_segment(self: Box<Self>) -> Arc<dyn Segment> {
        Arc::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, Value};
    use segdb_storage::InMemoryBackend;
    use tempfile::tempdir;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder()
                .column("name", ColumnType::Str)
                .column("age", ColumnType::I64)
                .index("by_name", &["name"])
                .build()
                .unwrap(),
        )
    }

    fn row(name: &str, age: i64) -> Row {
        vec![Value::from(name), Value::I64(age)]
    }

    #[test]
    fn insert_delete_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wr-0001");

        let mut seg = WalWritableSegment::new(schema(), false);
        seg.load(&path).unwrap();
        assert!(DeletionBitmap::marker_exists(&path));
        assert_eq!(seg.insert(row("a", 1)).unwrap(), 0);
        assert_eq!(seg.insert(row("b", 2)).unwrap(), 1);
        assert!(seg.delete(0).unwrap());
        assert!(!seg.delete(0).unwrap());
        seg.flush().unwrap();
        drop(seg);

        let mut reopened = WalWritableSegment::new(schema(), false);
        reopened.load(&path).unwrap();
        assert_eq!(reopened.logical_row_count(), 2);
        assert!(reopened.is_deleted(0));
        assert!(!reopened.is_deleted(1));
        assert_eq!(reopened.row(1).unwrap(), Some(row("b", 2)));
        assert_eq!(reopened.index(0).unwrap().lookup(b"b"), vec![1]);
    }

    #[test]
    fn physical_ids_are_logical_ids() {
        let seg = WalWritableSegment::with_log(
            Path::new("wr-0001"),
            schema(),
            Box::new(InMemoryBackend::new()),
        )
        .unwrap();
        seg.insert(row("x", 0)).unwrap();
        assert_eq!(seg.physical_to_logical(0), Some(0));
        assert_eq!(seg.physical_to_logical(1), None);
        assert!(seg.is_writable());
        assert!(seg.as_writable().is_some());
    }

    #[test]
    fn torn_tail_is_dropped() {
        let mut data = WalRecord::Insert { row: row("a", 1) }.encode().unwrap();
        let second = WalRecord::Insert { row: row("b", 2) }.encode().unwrap();
        data.extend_from_slice(&second[..second.len() - 3]);

        let seg = WalWritableSegment::with_log(
            Path::new("wr-0001"),
            schema(),
            Box::new(InMemoryBackend::with_data(data)),
        )
        .unwrap();
        assert_eq!(seg.logical_row_count(), 1);
        assert_eq!(seg.insert(row("c", 3)).unwrap(), 1);
    }

    #[test]
    fn checksum_failure_is_fatal() {
        let mut data = WalRecord::Insert { row: row("a", 1) }.encode().unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        let err = WalWritableSegment::with_log(
            Path::new("wr-0001"),
            schema(),
            Box::new(InMemoryBackend::with_data(data)),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::ChecksumMismatch { .. }));
    }

    #[test]
    fn delete_of_unknown_row_is_corruption() {
        let data = WalRecord::Delete { logical_id: 0 }.encode().unwrap();
        let err = WalWritableSegment::with_log(
            Path::new("wr-0001"),
            schema(),
            Box::new(InMemoryBackend::with_data(data)),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::WalCorruption { .. }));
    }

    #[test]
    fn unloaded_segment_rejects_writes() {
        let seg = WalWritableSegment::new(schema(), false);
        assert!(seg.insert(row("a", 1)).is_err());
        assert!(seg.delete(0).is_err());
    }

    #[test]
    fn insert_checks_schema() {
        let seg = WalWritableSegment::with_log(
            Path::new("wr-0001"),
            schema(),
            Box::new(InMemoryBackend::new()),
        )
        .unwrap();
        assert!(seg.insert(vec![Value::I64(1)]).is_err());
        assert_eq!(seg.logical_row_count(), 0);
    }

    #[test]
    fn debug_does_not_block_concurrent_inserts() {
        let seg = WalWritableSegment::with_log(
            Path::new("wr-0001"),
            schema(),
            Box::new(InMemoryBackend::new()),
        )
        .unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..2_000 {
                    seg.insert(row("w", i)).unwrap();
                }
            });
            s.spawn(|| {
                for _ in 0..2_000 {
                    assert!(format!("{seg:?}").contains("WalWritableSegment"));
                }
            });
        });
        assert_eq!(seg.logical_row_count(), 2_000);
    }

    #[test]
    fn load_keeps_existing_deletion_bitmap() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wr-0001");
        std::fs::create_dir_all(&path).unwrap();
        DeletionBitmap::from_ids(&[0, 2]).unwrap().save(&path).unwrap();
        let before = std::fs::read(DeletionBitmap::marker_path(&path)).unwrap();

        let mut seg = WalWritableSegment::new(schema(), false);
        seg.load(&path).unwrap();
        let after = std::fs::read(DeletionBitmap::marker_path(&path)).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn read_only_load_leaves_dir_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wr-0001");
        let mut seg = WalWritableSegment::new(schema(), false);
        seg.load(&path).unwrap();
        seg.insert(row("a", 1)).unwrap();
        seg.flush().unwrap();
        drop(seg);

        // Tear the last record so a writable load would truncate it.
        let log_path = path.join(WAL_FILE);
        let mut bytes = std::fs::read(&log_path).unwrap();
        bytes.extend_from_slice(&WalRecord::Insert { row: row("b", 2) }.encode().unwrap()[..7]);
        std::fs::write(&log_path, &bytes).unwrap();

        let mut ro = WalWritableSegment::new(schema(), false).read_only(true);
        ro.load(&path).unwrap();
        assert_eq!(ro.logical_row_count(), 1);
        assert!(ro.insert(row("c", 3)).is_err());
        assert!(ro.delete(0).is_err());
        ro.flush().unwrap();
        assert_eq!(std::fs::read(&log_path).unwrap(), bytes);

        let missing = dir.path().join("wr-0002");
        let mut empty = WalWritableSegment::new(schema(), false).read_only(true);
        empty.load(&missing).unwrap();
        assert_eq!(empty.logical_row_count(), 0);
        assert!(!missing.exists());
    }
}
