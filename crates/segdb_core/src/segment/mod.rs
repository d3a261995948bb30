//! Segment backends.
//!
//! A table is an ordered list of segments. Each segment is backed by one
//! storage engine and exposes the same capabilities through [`Segment`]:
//! a deletion bitmap over logical ids, one index object per schema index,
//! and a physical-to-logical id mapping.
//!
//! | Backend                 | Kind     | Indexes        | Physical order        |
//! |-------------------------|----------|----------------|-----------------------|
//! | [`ReadonlySegment`]     | readonly | trie / ordered | sorted by first index |
//! | [`MockWritableSegment`] | writable | ordered        | insertion order       |
//! | [`WalWritableSegment`]  | writable | ordered        | insertion order       |
//!
//! ## Directory layout
//!
//! ```text
//! rd-0000/            readonly segment
//! ├─ isDel            deletion bitmap (roaring)
//! └─ rows.cbor        rows in logical order
//! wr-0001/            writable segment
//! ├─ isDel            deletion bitmap; marks the dir as created
//! ├─ wal.log          WAL backend only
//! └─ rows.cbor        mock backend only, written on flush
//! ```

mod bitmap;
mod mock;
mod readonly;
mod wal;
mod wal_record;

pub use bitmap::{DeletionBitmap, DELETION_MARKER};
pub use mock::MockWritableSegment;
pub use readonly::ReadonlySegment;
pub use wal::{WalWritableSegment, WAL_FILE};
pub use wal_record::{compute_crc32, WalRecord, WalRecordType};

use crate::config::WritableBackendKind;
use crate::error::CoreResult;
use crate::index::{OrderedIndex, SegmentIndex};
use crate::schema::{Row, Schema};
use parking_lot::MappedRwLockReadGuard;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// File holding a segment's rows as CBOR.
pub const ROWS_FILE: &str = "rows.cbor";

/// Directory name prefix of readonly segments (`rd-NNNN`).
pub const READONLY_DIR_PREFIX: &str = "rd";

/// Directory name prefix of writable segments (`wr-NNNN`).
pub const WRITABLE_DIR_PREFIX: &str = "wr";

/// Readonly or writable, and for writable segments which engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// Immutable trie-indexed store.
    Readonly,
    /// Mutable store of the given backend.
    Writable(WritableBackendKind),
}

impl SegmentKind {
    /// Returns true for writable segments.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::Writable(_))
    }

    /// Directory name prefix for segments of this kind.
    #[must_use]
    pub const fn dir_prefix(self) -> &'static str {
        match self {
            Self::Readonly => READONLY_DIR_PREFIX,
            Self::Writable(_) => WRITABLE_DIR_PREFIX,
        }
    }

    /// Directory name of the segment with `ordinal`, e.g. `rd-0003`.
    #[must_use]
    pub fn dir_name(self, ordinal: usize) -> String {
        format!("{}-{ordinal:04}", self.dir_prefix())
    }
}

/// Parses a segment directory name into (writable, ordinal).
///
/// Returns `None` for anything that is not `rd-<digits>` or
/// `wr-<digits>`.
#[must_use]
pub fn parse_dir_name(name: &str) -> Option<(bool, usize)> {
    let (prefix, ordinal) = name.split_once('-')?;
    let writable = match prefix {
        READONLY_DIR_PREFIX => false,
        WRITABLE_DIR_PREFIX => true,
        _ => return None,
    };
    if ordinal.is_empty() || !ordinal.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((writable, ordinal.parse().ok()?))
}

/// Ordinal encoded in the last component of a segment directory.
#[must_use]
pub fn dir_ordinal(dir: &Path) -> Option<usize> {
    let name = dir.file_name()?.to_str()?;
    parse_dir_name(name).map(|(_, ordinal)| ordinal)
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Readonly => f.write_str("readonly"),
            Self::Writable(backend) => write!(f, "writable({backend})"),
        }
    }
}

/// Capabilities every segment backend provides.
pub trait Segment: Send + Sync + fmt::Debug {
    /// Directory the segment lives in.
    fn dir(&self) -> &Path;

    /// Segment kind.
    fn kind(&self) -> SegmentKind;

    /// Returns true if the segment accepts writes.
    fn is_writable(&self) -> bool {
        self.kind().is_writable()
    }

    /// Number of logical rows, deleted ones included.
    fn logical_row_count(&self) -> u64;

    /// Read view of the deletion bitmap.
    ///
    /// Holds the segment's bitmap lock until dropped; keep it for a
    /// whole pass over many ids rather than taking it per id.
    fn deletions(&self) -> MappedRwLockReadGuard<'_, DeletionBitmap>;

    /// Returns true if `logical_id` is deleted.
    fn is_deleted(&self, logical_id: u64) -> bool {
        self.deletions().contains(logical_id)
    }

    /// Number of deleted rows.
    fn deleted_count(&self) -> u64 {
        self.deletions().len()
    }

    /// Maps a storage position to its logical id, or `None` if the
    /// position is out of range.
    fn physical_to_logical(&self, physical_id: u64) -> Option<u64>;

    /// Index object for schema index `index_id`.
    fn index(&self, index_id: usize) -> Option<&SegmentIndex>;

    /// Row at `logical_id`, deleted or not; `None` if out of range.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot produce the row.
    fn row(&self, logical_id: u64) -> CoreResult<Option<Row>>;

    /// Writable capabilities, if the segment has them.
    fn as_writable(&self) -> Option<&dyn WritableSegment> {
        None
    }

    /// Readonly store, if this is one.
    fn as_readonly(&self) -> Option<&ReadonlySegment> {
        None
    }
}

/// Capabilities of segments that accept writes.
pub trait WritableSegment: Segment {
    /// Storage engine behind the segment.
    fn backend(&self) -> WritableBackendKind;

    /// Opens the segment stored in `dir`, initializing it if empty.
    ///
    /// # Errors
    ///
    /// Returns an error on any I/O or format failure.
    fn load(&mut self, dir: &Path) -> CoreResult<()>;

    /// Appends a row and returns its logical id.
    ///
    /// # Errors
    ///
    /// Returns an error if the row does not fit the schema or the write
    /// fails.
    fn insert(&self, row: Row) -> CoreResult<u64>;

    /// Marks a row deleted. Returns false if it already was.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is out of range or the write fails.
    fn delete(&self, logical_id: u64) -> CoreResult<bool>;

    /// Makes all writes durable in the segment directory.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting fails.
    fn flush(&self) -> CoreResult<()>;

    /// Converts into a shared segment handle for a table.
    fn into_segment(self: Box<Self>) -> Arc<dyn Segment>;
}

/// One empty ordered index per schema index, as writable segments keep.
pub(crate) fn ordered_indexes(schema: &Schema) -> Vec<SegmentIndex> {
    (0..schema.index_count())
        .map(|_| SegmentIndex::Ordered(OrderedIndex::new()))
        .collect()
}

/// Adds `row` under `logical_id` to every ordered index.
pub(crate) fn index_row(
    schema: &Schema,
    indexes: &[SegmentIndex],
    row: &[crate::schema::Value],
    logical_id: u64,
) -> CoreResult<()> {
    for (index_id, index) in indexes.iter().enumerate() {
        if let Some(ordered) = index.as_ordered() {
            ordered.insert(schema.index_key(row, index_id)?, logical_id);
        }
    }
    Ok(())
}
