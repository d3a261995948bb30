//! Backend selection for segment directories.

use crate::config::{Config, WritableBackendKind};
use crate::error::CoreResult;
use crate::schema::Schema;
use crate::segment::{
    DeletionBitmap, MockWritableSegment, ReadonlySegment, WalWritableSegment, WritableSegment,
};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Builds segment backends bound to a table's schema.
///
/// The writable backend is resolved once per call, from
/// [`Config::writable_backend`] if pinned and from the
/// `SEGDB_WRITABLE_SEGMENT` environment variable otherwise. Nothing else
/// is consulted, so directories written by different backends can sit
/// side by side in one table.
#[derive(Debug, Clone)]
pub struct SegmentFactory {
    schema: Arc<Schema>,
    config: Config,
}

impl SegmentFactory {
    /// Creates a factory for `schema`.
    #[must_use]
    pub fn new(schema: Arc<Schema>, config: Config) -> Self {
        Self { schema, config }
    }

    /// Schema attached to every segment built here.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Creates a writable segment in a new or empty `dir`.
    ///
    /// A mock segment is only bound to `dir`. A WAL segment is loaded
    /// right away, which initializes its files unless the configuration
    /// is read-only.
    ///
    /// # Errors
    ///
    /// Returns an error if the WAL segment cannot initialize `dir`.
    pub fn create_writable_segment(&self, dir: &Path) -> CoreResult<Box<dyn WritableSegment>> {
        let kind = self.config.resolve_writable_backend();
        debug!(segment = %dir.display(), backend = %kind, "creating writable segment");
        match kind {
            WritableBackendKind::Mock => {
                Ok(Box::new(MockWritableSegment::new(dir, Arc::clone(&self.schema))))
            }
            WritableBackendKind::Wal => {
                let mut segment = self.wal_segment();
                segment.load(dir)?;
                Ok(Box::new(segment))
            }
        }
    }

    /// Opens the writable segment in `dir`.
    ///
    /// A directory without the `isDel` marker has never been created and
    /// goes through [`create_writable_segment`](Self::create_writable_segment).
    ///
    /// # Errors
    ///
    /// Returns an error if loading fails.
    pub fn open_writable_segment(&self, dir: &Path) -> CoreResult<Box<dyn WritableSegment>> {
        if !DeletionBitmap::marker_exists(dir) {
            return self.create_writable_segment(dir);
        }

        let kind = self.config.resolve_writable_backend();
        debug!(segment = %dir.display(), backend = %kind, "opening writable segment");
        let mut segment: Box<dyn WritableSegment> = match kind {
            WritableBackendKind::Mock => {
                Box::new(MockWritableSegment::new(dir, Arc::clone(&self.schema)))
            }
            WritableBackendKind::Wal => Box::new(self.wal_segment()),
        };
        segment.load(dir)?;
        Ok(segment)
    }

    fn wal_segment(&self) -> WalWritableSegment {
        WalWritableSegment::new(Arc::clone(&self.schema), self.config.sync_on_write)
            .read_only(self.config.read_only)
    }

    /// Returns an empty readonly segment bound to `dir`.
    ///
    /// Readonly segments always use the trie store; no override applies.
    #[must_use]
    pub fn create_readonly_segment(&self, dir: &Path) -> ReadonlySegment {
        ReadonlySegment::new(dir, Arc::clone(&self.schema))
    }

    /// Loads the readonly segment saved in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment files are missing or corrupt.
    pub fn open_readonly_segment(&self, dir: &Path) -> CoreResult<ReadonlySegment> {
        let mut segment = self.create_readonly_segment(dir);
        segment.load()?;
        Ok(segment)
    }
}
