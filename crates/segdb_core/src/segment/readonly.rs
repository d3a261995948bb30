//! Immutable trie-indexed segment store.

use super::{DeletionBitmap, Segment, SegmentKind, ROWS_FILE};
use crate::error::{from_cbor, to_cbor, CoreError, CoreResult};
use crate::index::{OrderedIndex, SegmentIndex, TrieIndex};
use crate::schema::{Row, Schema};
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use segdb_storage::{read_snapshot, write_snapshot};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A readonly segment.
///
/// Rows are stored sorted by the key of the first schema index, so the
/// storage position of a row (its physical id) generally differs from its
/// logical id. Every single string-column index is built as a
/// [`TrieIndex`] over physical ids; other indexes are [`OrderedIndex`]es
/// over logical ids.
///
/// Rows never change once built. Rows can still be soft deleted; the
/// bitmap is persisted by the next [`save`](Self::save).
#[derive(Debug)]
pub struct ReadonlySegment {
    dir: PathBuf,
    schema: Arc<Schema>,
    rows: Vec<Row>,
    physical_to_logical: Vec<u32>,
    indexes: Vec<SegmentIndex>,
    deleted: RwLock<DeletionBitmap>,
}

impl ReadonlySegment {
    /// Creates an empty segment bound to `dir`.
    #[must_use]
    pub fn new(dir: &Path, schema: Arc<Schema>) -> Self {
        let indexes = schema
            .indexes()
            .iter()
            .map(|ix| {
                if ix.is_trie_indexable() {
                    SegmentIndex::Trie(TrieIndex::build(Vec::new()))
                } else {
                    SegmentIndex::Ordered(OrderedIndex::new())
                }
            })
            .collect();
        Self {
            dir: dir.to_path_buf(),
            schema,
            rows: Vec::new(),
            physical_to_logical: Vec::new(),
            indexes,
            deleted: RwLock::new(DeletionBitmap::new()),
        }
    }

    /// Replaces the contents with `rows` (in logical order) and builds
    /// the physical order and all indexes.
    ///
    /// # Errors
    ///
    /// Returns an error if a row does not fit the schema, there are more
    /// rows than segment-local ids, or a deleted id is out of range.
    pub fn build(&mut self, rows: Vec<Row>, deleted: DeletionBitmap) -> CoreResult<()> {
        if u32::try_from(rows.len()).is_err() {
            return Err(CoreError::invalid_operation(format!(
                "{} rows exceed a segment's id space",
                rows.len()
            )));
        }
        for row in &rows {
            self.schema.check_row(row)?;
        }
        if let Some(bad) = deleted.iter().find(|&id| id >= rows.len() as u64) {
            return Err(CoreError::invalid_operation(format!(
                "deleted id {bad} out of range for {} rows",
                rows.len()
            )));
        }

        let clustering: Vec<Vec<u8>> = if self.schema.index_count() > 0 {
            rows.iter()
                .map(|row| self.schema.index_key(row, 0))
                .collect::<CoreResult<_>>()?
        } else {
            Vec::new()
        };
        let mut order: Vec<u32> = (0..rows.len() as u32).collect();
        if !clustering.is_empty() {
            order.sort_by(|&a, &b| clustering[a as usize].cmp(&clustering[b as usize]));
        }

        let mut indexes = Vec::with_capacity(self.schema.index_count());
        for (index_id, ix) in self.schema.indexes().iter().enumerate() {
            if ix.is_trie_indexable() {
                let mut entries = Vec::with_capacity(rows.len());
                for (physical, &logical) in order.iter().enumerate() {
                    let key = self.schema.index_key(&rows[logical as usize], index_id)?;
                    entries.push((key, physical as u64));
                }
                indexes.push(SegmentIndex::Trie(TrieIndex::build(entries)));
            } else {
                let ordered = OrderedIndex::new();
                for (logical, row) in rows.iter().enumerate() {
                    ordered.insert(self.schema.index_key(row, index_id)?, logical as u64);
                }
                indexes.push(SegmentIndex::Ordered(ordered));
            }
        }

        debug!(
            segment = %self.dir.display(),
            rows = rows.len(),
            deleted = deleted.len(),
            "built readonly segment"
        );
        self.rows = rows;
        self.physical_to_logical = order;
        self.indexes = indexes;
        *self.deleted.write() = deleted;
        Ok(())
    }

    /// Assembles a segment from explicit parts.
    ///
    /// `physical_to_logical` must be a permutation of the logical ids
    /// and there must be one index object per schema index. The index
    /// objects are taken as given.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SegmentCorruption`] if the parts disagree.
    pub fn from_parts(
        dir: &Path,
        schema: Arc<Schema>,
        rows: Vec<Row>,
        physical_to_logical: Vec<u32>,
        indexes: Vec<SegmentIndex>,
        deleted: DeletionBitmap,
    ) -> CoreResult<Self> {
        if indexes.len() != schema.index_count() {
            return Err(CoreError::segment_corruption(format!(
                "{} index objects for {} schema indexes",
                indexes.len(),
                schema.index_count()
            )));
        }
        let mut seen = vec![false; rows.len()];
        if physical_to_logical.len() != rows.len() {
            return Err(CoreError::segment_corruption(
                "physical order does not cover every row",
            ));
        }
        for &logical in &physical_to_logical {
            match seen.get_mut(logical as usize) {
                Some(slot) if !*slot => *slot = true,
                _ => {
                    return Err(CoreError::segment_corruption(format!(
                        "physical order maps to logical id {logical} twice or out of range"
                    )))
                }
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            schema,
            rows,
            physical_to_logical,
            indexes,
            deleted: RwLock::new(deleted),
        })
    }

    /// Loads the segment stored in its directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the rows file is missing or undecodable, or
    /// the stored data does not fit the schema.
    pub fn load(&mut self) -> CoreResult<()> {
        let rows_path = self.dir.join(ROWS_FILE);
        let bytes = read_snapshot(&rows_path)?.ok_or_else(|| {
            CoreError::segment_corruption(format!("missing {}", rows_path.display()))
        })?;
        let rows: Vec<Row> = from_cbor(&bytes)?;
        let deleted = DeletionBitmap::load(&self.dir)?.unwrap_or_default();
        self.build(rows, deleted)
    }

    /// Writes rows and deletion bitmap to the segment directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or files cannot be written.
    pub fn save(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        write_snapshot(&self.dir.join(ROWS_FILE), &to_cbor(&self.rows)?)?;
        self.deleted.read().save(&self.dir)
    }

    /// Soft-deletes a row. Returns false if it already was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is out of range.
    pub fn delete(&self, logical_id: u64) -> CoreResult<bool> {
        if logical_id >= self.rows.len() as u64 {
            return Err(CoreError::invalid_operation(format!(
                "logical id {logical_id} out of range for {} rows",
                self.rows.len()
            )));
        }
        self.deleted.write().insert(logical_id)
    }
}

impl Segment for ReadonlySegment {
    fn dir(&self) -> &Path {
        &self.dir
    }

    fn kind(&self) -> SegmentKind {
        SegmentKind::Readonly
    }

    fn logical_row_count(&self) -> u64 {
        self.rows.len() as u64
    }

    fn deletions(&self) -> MappedRwLockReadGuard<'_, DeletionBitmap> {
        RwLockReadGuard::map(self.deleted.read(), |d| d)
    }

    fn physical_to_logical(&self, physical_id: u64) -> Option<u64> {
        let physical = usize::try_from(physical_id).ok()?;
        self.physical_to_logical.get(physical).map(|&l| u64::from(l))
    }

    fn index(&self, index_id: usize) -> Option<&SegmentIndex> {
        self.indexes.get(index_id)
    }

    fn row(&self, logical_id: u64) -> CoreResult<Option<Row>> {
        Ok(usize::try_from(logical_id)
            .ok()
            .and_then(|i| self.rows.get(i))
            .cloned())
    }

    fn as_readonly(&self) -> Option<&ReadonlySegment> {
        Some(self)
    }
}
