//! # segdb storage
//!
//! Byte stores underneath segdb segment directories.
//!
//! Segment backends keep two kinds of files:
//!
//! - **logs**, appended record by record and replayed on open
//!   (see [`StorageBackend`], [`FileBackend`], [`InMemoryBackend`]);
//! - **snapshots**, small whole-file blobs such as the deletion bitmap,
//!   replaced atomically (see [`write_snapshot`], [`read_snapshot`]).
//!
//! Stores never interpret the bytes they hold. Record framing, checksums
//! and replay belong to the segment backends in `segdb_core`.
//!
//! ## Example
//!
//! ```rust
//! use segdb_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut log = InMemoryBackend::new();
//! let offset = log.append(b"record").unwrap();
//! assert_eq!(log.read_at(offset, 6).unwrap(), b"record");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod snapshot;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use snapshot::{read_snapshot, write_snapshot};
