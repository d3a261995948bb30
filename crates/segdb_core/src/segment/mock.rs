//! In-memory writable segment, snapshotted on flush.

use super::{
    index_row, ordered_indexes, DeletionBitmap, Segment, SegmentKind, WritableSegment, ROWS_FILE,
};
use crate::config::WritableBackendKind;
use crate::error::{from_cbor, to_cbor, CoreError, CoreResult};
use crate::index::SegmentIndex;
use crate::schema::{Row, Schema};
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use segdb_storage::{read_snapshot, write_snapshot};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct State {
    rows: Vec<Row>,
    deleted: DeletionBitmap,
}

/// A writable segment that keeps everything in memory.
///
/// Nothing touches disk until [`flush`](WritableSegment::flush), which
/// writes `rows.cbor` and the `isDel` marker. A directory that was never
/// flushed is therefore opened as a fresh segment.
#[derive(Debug)]
pub struct MockWritableSegment {
    dir: PathBuf,
    schema: Arc<Schema>,
    state: RwLock<State>,
    indexes: Vec<SegmentIndex>,
}

impl MockWritableSegment {
    /// Creates an empty segment bound to `dir`.
    #[must_use]
    pub fn new(dir: &Path, schema: Arc<Schema>) -> Self {
        let indexes = ordered_indexes(&schema);
        Self {
            dir: dir.to_path_buf(),
            schema,
            state: RwLock::new(State::default()),
            indexes,
        }
    }
}

impl Segment for MockWritableSegment {
    fn dir(&self) -> &Path {
        &self.dir
    }

    fn kind(&self) -> SegmentKind {
        SegmentKind::Writable(WritableBackendKind::Mock)
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

impl WritableSegment for MockWritableSegment {
    fn backend(&self) -> WritableBackendKind {
        WritableBackendKind::Mock
    }

    fn load(&mut self, dir: &Path) -> CoreResult<()> {
        self.dir = dir.to_path_buf();
        let rows: Vec<Row> = match read_snapshot(&dir.join(ROWS_FILE))? {
            Some(bytes) => from_cbor(&bytes)?,
            None => Vec::new(),
        };
        let deleted = DeletionBitmap::load(dir)?.unwrap_or_default();
        if let Some(bad) = deleted.iter().find(|&id| id >= rows.len() as u64) {
            return Err(CoreError::segment_corruption(format!(
                "deleted id {bad} out of range for {} rows in {}",
                rows.len(),
                dir.display()
            )));
        }

        self.indexes = ordered_indexes(&self.schema);
        for (logical_id, row) in rows.iter().enumerate() {
            self.schema.check_row(row)?;
            index_row(&self.schema, &self.indexes, row, logical_id as u64)?;
        }
        debug!(
            segment = %dir.display(),
            rows = rows.len(),
            deleted = deleted.len(),
            "loaded mock segment"
        );
        *self.state.get_mut() = State { rows, deleted };
        Ok(())
    }

    fn insert(&self, row: Row) -> CoreResult<u64> {
        self.schema.check_row(&row)?;
        let mut state = self.state.write();
        let logical_id = state.rows.len() as u64;
        index_row(&self.schema, &self.indexes, &row, logical_id)?;
        state.rows.push(row);
        Ok(logical_id)
    }

    fn delete(&self, logical_id: u64) -> CoreResult<bool> {
        let mut state = self.state.write();
        if logical_id >= state.rows.len() as u64 {
            return Err(CoreError::invalid_operation(format!(
                "logical id {logical_id} out of range for {} rows",
                state.rows.len()
            )));
        }
        state.deleted.insert(logical_id)
    }

    fn flush(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let state = self.state.read();
        write_snapshot(&self.dir.join(ROWS_FILE), &to_cbor(&state.rows)?)?;
        state.deleted.save(&self.dir)
    }

    fn into_segment(self: Box<Self>) -> Arc<dyn Segment> {
        Arc::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, Value};
    use tempfile::tempdir;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder()
                .column("name", ColumnType::Str)
                .index("by_name", &["name"])
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn nothing_on_disk_before_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wr-0001");
        let seg = MockWritableSegment::new(&path, schema());
        seg.insert(vec![Value::from("a")]).unwrap();
        assert!(!path.exists());

        seg.flush().unwrap();
        assert!(DeletionBitmap::marker_exists(&path));
        assert!(path.join(ROWS_FILE).is_file());
    }

    #[test]
    fn flush_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wr-0001");
        let seg = MockWritableSegment::new(&path, schema());
        seg.insert(vec![Value::from("a")]).unwrap();
        seg.insert(vec![Value::from("b")]).unwrap();
        assert!(seg.delete(1).unwrap());
        seg.flush().unwrap();

        let mut loaded = MockWritableSegment::new(&path, schema());
        loaded.load(&path).unwrap();
        assert_eq!(loaded.logical_row_count(), 2);
        assert!(loaded.is_deleted(1));
        assert_eq!(loaded.index(0).unwrap().lookup(b"a"), vec![0]);
        assert_eq!(loaded.kind(), SegmentKind::Writable(WritableBackendKind::Mock));
    }

    #[test]
    fn load_of_empty_dir_is_empty() {
        let dir = tempdir().unwrap();
        let mut seg = MockWritableSegment::new(dir.path(), schema());
        seg.load(dir.path()).unwrap();
        assert_eq!(seg.logical_row_count(), 0);
        assert_eq!(seg.deleted_count(), 0);
    }

    #[test]
    fn delete_out_of_range() {
        let seg = MockWritableSegment::new(Path::new("wr-0001"), schema());
        assert!(seg.delete(0).is_err());
    }
}
