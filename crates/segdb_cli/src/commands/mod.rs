//! CLI command implementations.

pub mod inspect;
pub mod regex_match;

use segdb_core::{CompositeTable, Config};
use std::path::Path;
use tracing::debug;

/// Opens an existing table read-only; never creates or modifies one.
pub fn open_table(path: &Path) -> Result<CompositeTable, Box<dyn std::error::Error>> {
    if !path.join(segdb_core::SCHEMA_FILE).is_file() {
        return Err(format!("No table found at {}", path.display()).into());
    }
    debug!(table = %path.display(), "opening table");
    let config = Config::default().create_if_missing(false).read_only(true);
    Ok(CompositeTable::open(path, config)?)
}
