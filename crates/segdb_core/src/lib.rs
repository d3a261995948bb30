//! # segdb core
//!
//! Segment management and cross-segment index queries for segdb tables.
//!
//! A table is an ordered list of segments. Each segment is backed by one
//! storage engine:
//!
//! - readonly segments: immutable, rows clustered by the first index and
//!   string indexes built as byte tries
//! - writable segments: an in-memory mock engine or a write-ahead-logged
//!   engine, chosen per process by `SEGDB_WRITABLE_SEGMENT`
//!
//! [`CompositeTable`] maps segment-local logical ids to one table-wide
//! row-id space and runs regex lookups over every readonly segment's trie,
//! filtering deleted rows and bounding memory per segment.
//!
//! ## Example
//!
//! ```rust
//! use segdb_core::{ColumnType, CompositeTable, Config, DeletionBitmap, Schema, Value};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let schema = Schema::builder()
//!     .column("name", ColumnType::Str)
//!     .index("by_name", &["name"])
//!     .build()
//!     .unwrap();
//! let table = CompositeTable::create(dir.path(), schema, Config::default()).unwrap();
//! table
//!     .build_readonly_segment(
//!         vec![vec![Value::from("apple")], vec![Value::from("banana")]],
//!         DeletionBitmap::new(),
//!     )
//!     .unwrap();
//!
//! let mut ctx = table.create_db_context();
//! let mut ids = Vec::new();
//! table.index_match_regex_str(0, "b.*", "", &mut ids, &mut ctx).unwrap();
//! assert_eq!(ids, vec![1]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod error;
mod factory;
pub mod index;
mod regex;
mod schema;
pub mod segment;
mod table;

pub use config::{Config, WritableBackendKind, DEFAULT_REGEX_MATCH_MEM_LIMIT, WRITABLE_BACKEND_ENV};
pub use context::{MatchReport, QueryContext};
pub use error::{CoreError, CoreResult};
pub use factory::SegmentFactory;
pub use index::{OrderedIndex, SegmentIndex, TrieIndex};
pub use regex::{RegexDfa, RegexOptions};
pub use schema::{ColumnMeta, ColumnType, IndexSchema, Row, Schema, SchemaBuilder, Value};
pub use segment::{
    DeletionBitmap, MockWritableSegment, ReadonlySegment, Segment, SegmentKind,
    WalWritableSegment, WritableSegment,
};
pub use table::{CompositeTable, SCHEMA_FILE};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
