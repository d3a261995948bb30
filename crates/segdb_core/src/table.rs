//! Composite table: an ordered list of segments seen as one table.
//!
//! ```text
//! <table>/
//! ├─ SCHEMA        table schema (CBOR)
//! ├─ rd-0000/      readonly segment
//! ├─ rd-0001/
//! └─ wr-0002/      writable segment
//! ```
//!
//! Segment `i` owns the table-wide row ids
//! `row_base[i] .. row_base[i] + segments[i].logical_row_count()`.
//! The segment list and the bases change together under the exclusive
//! lock; queries hold the shared lock for their whole duration.
//!
//! Position follows the ordinal in the directory name, so a replacement
//! segment must reuse the ordinal of the one it replaces. A readonly
//! directory supersedes the writable directory with the same ordinal.

use crate::config::Config;
use crate::context::QueryContext;
use crate::error::{from_cbor, to_cbor, CoreError, CoreResult};
use crate::factory::SegmentFactory;
use crate::regex::RegexDfa;
use crate::schema::{IndexSchema, Row, Schema};
use crate::segment::{dir_ordinal, parse_dir_name, DeletionBitmap, Segment, SegmentKind};
use parking_lot::RwLock;
use segdb_storage::{read_snapshot, write_snapshot};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// File holding the table schema.
pub const SCHEMA_FILE: &str = "SCHEMA";

#[derive(Debug, Default)]
struct SegmentList {
    segments: Vec<Arc<dyn Segment>>,
    row_base: Vec<u64>,
    next_ordinal: usize,
}

impl SegmentList {
    fn recompute_bases(&mut self) {
        self.row_base.clear();
        let mut base = 0u64;
        for segment in &self.segments {
            self.row_base.push(base);
            base += segment.logical_row_count();
        }
    }

    fn row_count(&self) -> u64 {
        match (self.row_base.last(), self.segments.last()) {
            (Some(base), Some(last)) => base + last.logical_row_count(),
            _ => 0,
        }
    }

    fn locate(&self, row_id: u64) -> Option<(usize, u64)> {
        let i = self.row_base.partition_point(|&base| base <= row_id);
        let i = i.checked_sub(1)?;
        let logical = row_id - self.row_base[i];
        (logical < self.segments[i].logical_row_count()).then_some((i, logical))
    }

    fn get(&self, i: usize) -> CoreResult<&Arc<dyn Segment>> {
        self.segments.get(i).ok_or(CoreError::SegmentNotFound {
            ordinal: i,
            count: self.segments.len(),
        })
    }
}

/// A table split into segments, each backed by its own engine.
///
/// # Example
///
/// ```rust,ignore
/// use segdb_core::{CompositeTable, Config, Schema, ColumnType};
///
/// let schema = Schema::builder()
///     .column("name", ColumnType::Str)
///     .index("by_name", &["name"])
///     .build()?;
/// let table = CompositeTable::create(path, schema, Config::default())?;
/// table.build_readonly_segment(rows, Default::default())?;
///
/// let mut ctx = table.create_db_context();
/// let mut ids = Vec::new();
/// table.index_match_regex_str(0, "a.*", "", &mut ids, &mut ctx)?;
/// ```
#[derive(Debug)]
pub struct CompositeTable {
    dir: PathBuf,
    schema: Arc<Schema>,
    config: Config,
    factory: SegmentFactory,
    segments: RwLock<SegmentList>,
}

impl CompositeTable {
    /// Creates a new table in `dir` and persists its schema.
    ///
    /// # Errors
    ///
    /// Returns an error if `dir` is missing and `create_if_missing` is
    /// off, if a table already exists there, or on I/O failure.
    pub fn create(dir: &Path, schema: Schema, config: Config) -> CoreResult<Self> {
        if config.read_only {
            return Err(CoreError::invalid_operation(format!(
                "cannot create table in {} in read-only mode",
                dir.display()
            )));
        }
        if !dir.exists() {
            if !config.create_if_missing {
                return Err(CoreError::invalid_operation(format!(
                    "table directory {} does not exist and create_if_missing is false",
                    dir.display()
                )));
            }
            std::fs::create_dir_all(dir)?;
        }
        let schema_path = dir.join(SCHEMA_FILE);
        if schema_path.exists() {
            return Err(CoreError::invalid_operation(format!(
                "table already exists in {}",
                dir.display()
            )));
        }
        write_snapshot(&schema_path, &to_cbor(&schema)?)?;
        info!(table = %dir.display(), indexes = schema.index_count(), "created table");
        Ok(Self::with_schema(dir, schema, config))
    }

    /// Opens the table stored in `dir`, loading every segment.
    ///
    /// Readonly segments are loaded from their files; writable ones go
    /// through [`SegmentFactory::open_writable_segment`]. With
    /// [`Config::read_only`] set nothing under `dir` is written.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema is missing or inconsistent, or any
    /// segment fails to load.
    pub fn open(dir: &Path, config: Config) -> CoreResult<Self> {
        let schema_path = dir.join(SCHEMA_FILE);
        let bytes = read_snapshot(&schema_path)?.ok_or_else(|| {
            CoreError::invalid_operation(format!("no table in {}", dir.display()))
        })?;
        let schema: Schema = from_cbor(&bytes)?;
        schema.validate()?;
        let table = Self::with_schema(dir, schema, config);

        let mut found = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some((writable, ordinal)) = name.to_str().and_then(parse_dir_name) else {
                continue;
            };
            found.push((ordinal, writable, entry.path()));
        }
        // Readonly sorts first within an ordinal; the writable dir it was
        // sealed from is left behind.
        found.sort_by_key(|(ordinal, writable, _)| (*ordinal, *writable));
        found.dedup_by(|later, kept| {
            if later.0 != kept.0 {
                return false;
            }
            warn!(
                superseded = %later.2.display(),
                by = %kept.2.display(),
                "ignoring superseded segment directory"
            );
            true
        });

        {
            let mut list = table.segments.write();
            for (ordinal, writable, path) in found {
                let segment: Arc<dyn Segment> = if writable {
                    table.factory.open_writable_segment(&path)?.into_segment()
                } else {
                    Arc::new(table.factory.open_readonly_segment(&path)?)
                };
                debug!(segment = %path.display(), kind = %segment.kind(), "opened segment");
                list.segments.push(segment);
                list.next_ordinal = ordinal + 1;
            }
            list.recompute_bases();
            info!(
                table = %dir.display(),
                segments = list.segments.len(),
                rows = list.row_count(),
                "opened table"
            );
        }
        Ok(table)
    }

    /// Creates a table over `dir` without reading or writing anything.
    #[must_use]
    pub fn with_schema(dir: &Path, schema: Schema, config: Config) -> Self {
        let schema = Arc::new(schema);
        let factory = SegmentFactory::new(Arc::clone(&schema), config.clone());
        Self {
            dir: dir.to_path_buf(),
            schema,
            config,
            factory,
            segments: RwLock::new(SegmentList::default()),
        }
    }

    /// Table directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Table schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Table configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Factory building this table's segments.
    #[must_use]
    pub fn factory(&self) -> &SegmentFactory {
        &self.factory
    }

    fn check_writable(&self) -> CoreResult<()> {
        if self.config.read_only {
            return Err(CoreError::invalid_operation(format!(
                "table {} is open read-only",
                self.dir.display()
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Segment list mutation
    // ------------------------------------------------------------------

    /// Appends a segment and returns its position.
    pub fn push_segment(&self, segment: Arc<dyn Segment>) -> usize {
        let mut list = self.segments.write();
        let base = list.row_count();
        list.segments.push(segment);
        list.row_base.push(base);
        list.segments.len() - 1
    }

    /// Creates a writable segment in a fresh `wr-NNNN` directory and
    /// appends it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot initialize the directory.
    pub fn new_writable_segment(&self) -> CoreResult<usize> {
        self.check_writable()?;
        let mut list = self.segments.write();
        let kind = SegmentKind::Writable(self.config.resolve_writable_backend());
        let path = self.segment_path(kind, list.next_ordinal);
        let segment = self.factory.create_writable_segment(&path)?.into_segment();
        list.next_ordinal += 1;
        let base = list.row_count();
        list.segments.push(segment);
        list.row_base.push(base);
        debug!(segment = %path.display(), base, "added writable segment");
        Ok(list.segments.len() - 1)
    }

    /// Builds a readonly segment from `rows` (logical order) in a fresh
    /// `rd-NNNN` directory, saves it and appends it.
    ///
    /// # Errors
    ///
    /// Returns an error if the rows do not fit the schema or saving
    /// fails.
    pub fn build_readonly_segment(
        &self,
        rows: Vec<Row>,
        deleted: DeletionBitmap,
    ) -> CoreResult<usize> {
        self.check_writable()?;
        let mut list = self.segments.write();
        let path = self.segment_path(SegmentKind::Readonly, list.next_ordinal);
        let mut segment = self.factory.create_readonly_segment(&path);
        segment.build(rows, deleted)?;
        segment.save()?;
        list.next_ordinal += 1;
        let base = list.row_count();
        list.segments.push(Arc::new(segment));
        list.row_base.push(base);
        debug!(segment = %path.display(), base, "added readonly segment");
        Ok(list.segments.len() - 1)
    }

    /// Replaces the segment at position `i`, e.g. a sealed writable
    /// segment with its readonly build. Returns the old segment.
    ///
    /// The replacement must live in
    /// [`segment_path(kind, ordinal)`](Self::segment_path) with the
    /// ordinal of the segment it replaces, so that reopening the table
    /// puts it back at `i`. A readonly segment cannot be replaced by a
    /// writable one. The old directory stays on disk; once a readonly
    /// replacement is saved it supersedes a writable one on open.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SegmentNotFound`] if `i` is out of range and
    /// [`CoreError::InvalidOperation`] if the replacement's directory
    /// or kind does not fit position `i`.
    pub fn replace_segment(
        &self,
        i: usize,
        segment: Arc<dyn Segment>,
    ) -> CoreResult<Arc<dyn Segment>> {
        let mut list = self.segments.write();
        let current = list.get(i)?;
        let ordinal = dir_ordinal(current.dir()).ok_or_else(|| {
            CoreError::invalid_operation(format!(
                "segment {} has no ordinal in its directory name",
                current.dir().display()
            ))
        })?;
        if segment.is_writable() && !current.is_writable() {
            return Err(CoreError::invalid_operation(format!(
                "readonly segment {} cannot be replaced by a writable one",
                current.dir().display()
            )));
        }
        let expected = self.segment_path(segment.kind(), ordinal);
        if segment.dir() != expected {
            return Err(CoreError::invalid_operation(format!(
                "replacement for position {i} must live in {}, not {}",
                expected.display(),
                segment.dir().display()
            )));
        }
        let old = std::mem::replace(&mut list.segments[i], segment);
        list.recompute_bases();
        debug!(
            old = %old.dir().display(),
            new = %list.segments[i].dir().display(),
            position = i,
            "replaced segment"
        );
        Ok(old)
    }

    /// Detaches the segment at position `i`. Its directory is left on
    /// disk.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SegmentNotFound`] if `i` is out of range.
    pub fn remove_segment(&self, i: usize) -> CoreResult<Arc<dyn Segment>> {
        let mut list = self.segments.write();
        list.get(i)?;
        let old = list.segments.remove(i);
        list.recompute_bases();
        debug!(segment = %old.dir().display(), position = i, "removed segment");
        Ok(old)
    }

    // ------------------------------------------------------------------
    // Read accessors
    // ------------------------------------------------------------------

    /// Number of segments.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.read().segments.len()
    }

    /// Snapshot of the per-segment row-id bases.
    #[must_use]
    pub fn row_base(&self) -> Vec<u64> {
        self.segments.read().row_base.clone()
    }

    /// Total logical rows, deleted ones included.
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.segments.read().row_count()
    }

    /// Segment at position `i`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SegmentNotFound`] if `i` is out of range.
    pub fn segment(&self, i: usize) -> CoreResult<Arc<dyn Segment>> {
        self.segments.read().get(i).cloned()
    }

    /// Directory for a segment of `kind` with `ordinal`.
    #[must_use]
    pub fn segment_path(&self, kind: SegmentKind, ordinal: usize) -> PathBuf {
        self.dir.join(kind.dir_name(ordinal))
    }

    /// Ordinal of the segment at position `i`, taken from its directory
    /// name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SegmentNotFound`] if `i` is out of range and
    /// [`CoreError::InvalidOperation`] if the directory is not named
    /// like a segment directory.
    pub fn segment_ordinal(&self, i: usize) -> CoreResult<usize> {
        let list = self.segments.read();
        let segment = list.get(i)?;
        dir_ordinal(segment.dir()).ok_or_else(|| {
            CoreError::invalid_operation(format!(
                "segment {} has no ordinal in its directory name",
                segment.dir().display()
            ))
        })
    }

    /// Maps a table-wide row id to (segment position, logical id).
    #[must_use]
    pub fn locate(&self, row_id: u64) -> Option<(usize, u64)> {
        self.segments.read().locate(row_id)
    }

    // ------------------------------------------------------------------
    // Rows
    // ------------------------------------------------------------------

    /// Inserts a row into the last segment and returns its table-wide id.
    ///
    /// # Errors
    ///
    /// Returns an error if the last segment is not writable or the
    /// insert fails.
    pub fn insert(&self, row: Row) -> CoreResult<u64> {
        self.check_writable()?;
        let list = self.segments.read();
        let (Some(segment), Some(&base)) = (list.segments.last(), list.row_base.last()) else {
            return Err(CoreError::invalid_operation("table has no segments"));
        };
        let writable = segment.as_writable().ok_or_else(|| {
            CoreError::invalid_operation(format!(
                "last segment {} is not writable",
                segment.dir().display()
            ))
        })?;
        Ok(base + writable.insert(row)?)
    }

    /// Soft-deletes a row. Returns false if it already was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the row id is out of range.
    pub fn delete(&self, row_id: u64) -> CoreResult<bool> {
        self.check_writable()?;
        let list = self.segments.read();
        let (i, logical) = list.locate(row_id).ok_or_else(|| {
            CoreError::invalid_operation(format!("row id {row_id} out of range"))
        })?;
        let segment = &list.segments[i];
        if let Some(writable) = segment.as_writable() {
            writable.delete(logical)
        } else if let Some(readonly) = segment.as_readonly() {
            readonly.delete(logical)
        } else {
            Err(CoreError::invalid_operation(format!(
                "segment {} does not support deletes",
                segment.dir().display()
            )))
        }
    }

    /// Row at `row_id`, or `None` if it is out of range or deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot produce the row.
    pub fn get(&self, row_id: u64) -> CoreResult<Option<Row>> {
        let list = self.segments.read();
        let Some((i, logical)) = list.locate(row_id) else {
            return Ok(None);
        };
        let segment = &list.segments[i];
        if segment.is_deleted(logical) {
            return Ok(None);
        }
        segment.row(logical)
    }

    /// Persists every segment: writable segments flush, readonly ones
    /// save their deletion bitmaps.
    ///
    /// # Errors
    ///
    /// Returns the first persistence failure.
    pub fn flush(&self) -> CoreResult<()> {
        self.check_writable()?;
        let list = self.segments.read();
        for segment in &list.segments {
            if let Some(writable) = segment.as_writable() {
                writable.flush()?;
            } else if let Some(readonly) = segment.as_readonly() {
                readonly.save()?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Creates a query context seeded with the configured budget.
    #[must_use]
    pub fn create_db_context(&self) -> QueryContext {
        QueryContext::new(self.config.regex_match_mem_limit)
    }

    /// Matches `dfa` against index `index_id` of every readonly segment
    /// and writes the table-wide ids of matching live rows to `out`.
    ///
    /// `out` is cleared first. Results are segment-major: each segment's
    /// survivors in trie order, segments in table order. Writable
    /// segments are skipped, and a segment whose match runs over
    /// `ctx.regex_match_mem_limit` contributes nothing; both are logged
    /// and recorded in [`QueryContext::report`]. The call still returns
    /// `Ok(true)`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidIndexId`], [`CoreError::CompositeIndex`],
    ///   [`CoreError::NonStringIndex`] before any segment is visited;
    ///   `out` is untouched
    /// - [`CoreError::NotRegexCapable`] if a readonly segment holds no
    ///   trie for the index; `out` is left empty
    pub fn index_match_regex(
        &self,
        index_id: usize,
        dfa: &RegexDfa,
        out: &mut Vec<u64>,
        ctx: &mut QueryContext,
    ) -> CoreResult<bool> {
        let index = self.regex_index(index_id)?;

        let list = self.segments.read();
        out.clear();
        ctx.report_mut().reset(index_id);
        if let Err(e) = Self::match_segments(&list, index_id, index, dfa, out, ctx) {
            out.clear();
            return Err(e);
        }
        Ok(true)
    }

    /// Compiles `pattern` with `options` and runs
    /// [`index_match_regex`](Self::index_match_regex).
    ///
    /// # Errors
    ///
    /// Adds [`CoreError::RegexCompile`] and
    /// [`CoreError::InvalidRegexOption`] to the errors of
    /// `index_match_regex`; compile failures leave `out` untouched.
    pub fn index_match_regex_str(
        &self,
        index_id: usize,
        pattern: &str,
        options: &str,
        out: &mut Vec<u64>,
        ctx: &mut QueryContext,
    ) -> CoreResult<bool> {
        self.regex_index(index_id)?;
        let dfa = RegexDfa::compile(pattern, options)?;
        self.index_match_regex(index_id, &dfa, out, ctx)
    }

    fn regex_index(&self, index_id: usize) -> CoreResult<&IndexSchema> {
        let index = self
            .schema
            .index(index_id)
            .ok_or(CoreError::InvalidIndexId {
                index_id,
                index_count: self.schema.index_count(),
            })?;
        if index.column_num() != 1 {
            return Err(CoreError::CompositeIndex {
                index_id,
                name: index.name.clone(),
            });
        }
        if !index.column_meta(0).is_some_and(|meta| meta.is_string()) {
            return Err(CoreError::NonStringIndex {
                index_id,
                name: index.name.clone(),
            });
        }
        Ok(index)
    }

    fn match_segments(
        list: &SegmentList,
        index_id: usize,
        index: &IndexSchema,
        dfa: &RegexDfa,
        out: &mut Vec<u64>,
        ctx: &mut QueryContext,
    ) -> CoreResult<()> {
        let mem_limit = ctx.regex_match_mem_limit;

        for (segment, &base) in list.segments.iter().zip(&list.row_base) {
            if segment.kind() != SegmentKind::Readonly {
                warn!(
                    segment = %segment.dir().display(),
                    index = %index.name,
                    "skipping writable segment in regex match"
                );
                ctx.report_mut()
                    .skipped_writable
                    .push(segment.dir().to_path_buf());
                continue;
            }

            let trie = segment
                .index(index_id)
                .ok_or_else(|| {
                    CoreError::segment_corruption(format!(
                        "segment {} has no index {index_id}",
                        segment.dir().display()
                    ))
                })?
                .as_trie()
                .ok_or_else(|| CoreError::NotRegexCapable {
                    index_id,
                    name: index.name.clone(),
                    segment: segment.dir().to_path_buf(),
                })?;

            let start = out.len();
            if !trie.match_regex_append(dfa, out, mem_limit) {
                out.truncate(start);
                warn!(
                    segment = %segment.dir().display(),
                    index = %index.name,
                    mem_limit,
                    "regex match exceeded memory limit, segment skipped"
                );
                ctx.report_mut()
                    .budget_exhausted
                    .push(segment.dir().to_path_buf());
                continue;
            }

            let deleted = segment.deletions();
            let mut kept = start;
            for read in start..out.len() {
                let physical = out[read];
                let logical = segment.physical_to_logical(physical).ok_or_else(|| {
                    CoreError::segment_corruption(format!(
                        "physical id {physical} out of range in {}",
                        segment.dir().display()
                    ))
                })?;
                if deleted.contains(logical) {
                    continue;
                }
                out[kept] = base + logical;
                kept += 1;
            }
            out.truncate(kept);
            ctx.report_mut().segments_matched += 1;
        }
        Ok(())
    }
}
