//! Per-segment deletion bitmap and the `isDel` marker file.

use crate::error::{CoreError, CoreResult};
use roaring::RoaringBitmap;
use segdb_storage::{read_snapshot, write_snapshot};
use std::path::{Path, PathBuf};

/// File holding a segment's deletion bitmap.
///
/// Its presence is also what marks a directory as an existing writable
/// segment.
pub const DELETION_MARKER: &str = "isDel";

/// Soft-deleted logical ids of one segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeletionBitmap {
    bits: RoaringBitmap,
}

impl DeletionBitmap {
    /// Creates an empty bitmap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a bitmap with the given ids set.
    ///
    /// # Errors
    ///
    /// Returns an error if an id does not fit a segment-local id.
    pub fn from_ids(ids: &[u64]) -> CoreResult<Self> {
        let mut bitmap = Self::new();
        for &id in ids {
            bitmap.insert(id)?;
        }
        Ok(bitmap)
    }

    /// Returns true if `logical_id` is deleted.
    #[must_use]
    pub fn contains(&self, logical_id: u64) -> bool {
        u32::try_from(logical_id).is_ok_and(|id| self.bits.contains(id))
    }

    /// Marks `logical_id` deleted. Returns false if it already was.
    ///
    /// # Errors
    ///
    /// Returns an error if the id does not fit a segment-local id.
    pub fn insert(&mut self, logical_id: u64) -> CoreResult<bool> {
        let id = u32::try_from(logical_id).map_err(|_| {
            CoreError::invalid_operation(format!("logical id {logical_id} out of range"))
        })?;
        Ok(self.bits.insert(id))
    }

    /// Number of deleted ids.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.bits.len()
    }

    /// Returns true if nothing is deleted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Deleted ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.bits.iter().map(u64::from)
    }

    /// Path of the marker file in `dir`.
    #[must_use]
    pub fn marker_path(dir: &Path) -> PathBuf {
        dir.join(DELETION_MARKER)
    }

    /// Returns true if `dir` holds a deletion bitmap.
    #[must_use]
    pub fn marker_exists(dir: &Path) -> bool {
        Self::marker_path(dir).is_file()
    }

    /// Reads the bitmap stored in `dir`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn load(dir: &Path) -> CoreResult<Option<Self>> {
        let Some(bytes) = read_snapshot(&Self::marker_path(dir))? else {
            return Ok(None);
        };
        let bits = RoaringBitmap::deserialize_from(bytes.as_slice()).map_err(|e| {
            CoreError::segment_corruption(format!(
                "bad deletion bitmap in {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Some(Self { bits }))
    }

    /// Atomically writes the bitmap to `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    pub fn save(&self, dir: &Path) -> CoreResult<()> {
        let mut bytes = Vec::with_capacity(self.bits.serialized_size());
        self.bits.serialize_into(&mut bytes)?;
        write_snapshot(&Self::marker_path(dir), &bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn contains_and_insert() {
        let mut bitmap = DeletionBitmap::new();
        assert!(bitmap.insert(5).unwrap());
        assert!(!bitmap.insert(5).unwrap());
        assert!(bitmap.contains(5));
        assert!(!bitmap.contains(4));
        assert!(!bitmap.contains(u64::MAX));
        assert!(bitmap.insert(u64::from(u32::MAX) + 1).is_err());
        assert_eq!(bitmap.len(), 1);
    }

    #[test]
    fn marker_round_trip() {
        let dir = tempdir().unwrap();
        assert!(!DeletionBitmap::marker_exists(dir.path()));
        assert!(DeletionBitmap::load(dir.path()).unwrap().is_none());

        let bitmap = DeletionBitmap::from_ids(&[1, 7, 1000]).unwrap();
        bitmap.save(dir.path()).unwrap();

        assert!(DeletionBitmap::marker_exists(dir.path()));
        let loaded = DeletionBitmap::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.iter().collect::<Vec<_>>(), vec![1, 7, 1000]);
    }

    #[test]
    fn garbage_marker_is_corruption() {
        let dir = tempdir().unwrap();
        std::fs::write(DeletionBitmap::marker_path(dir.path()), b"junk").unwrap();
        assert!(matches!(
            DeletionBitmap::load(dir.path()),
            Err(CoreError::SegmentCorruption { .. })
        ));
    }
}
