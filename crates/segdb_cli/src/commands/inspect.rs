//! Inspect command implementation.

use segdb_core::{CompositeTable, Segment};
use serde::Serialize;
use std::path::Path;

/// Table inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Table path.
    pub path: String,
    /// Total logical rows, deleted included.
    pub row_count: u64,
    /// Schema indexes.
    pub indexes: Vec<IndexInfo>,
    /// Segments in table order.
    pub segments: Vec<SegmentInfo>,
}

/// One schema index.
#[derive(Debug, Serialize)]
pub struct IndexInfo {
    /// Index id.
    pub id: usize,
    /// Index name.
    pub name: String,
    /// Indexed column names.
    pub columns: Vec<String>,
    /// Whether regex lookups can run on it.
    pub regex_capable: bool,
}

/// One segment.
#[derive(Debug, Serialize)]
pub struct SegmentInfo {
    /// Position in the table.
    pub position: usize,
    /// Segment kind.
    pub kind: String,
    /// Segment directory.
    pub dir: String,
    /// First table-wide row id.
    pub row_base: u64,
    /// Logical rows.
    pub rows: u64,
    /// Deleted rows.
    pub deleted: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let table = super::open_table(path)?;
    let result = inspect(&table)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn inspect(table: &CompositeTable) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let indexes = table
        .schema()
        .indexes()
        .iter()
        .enumerate()
        .map(|(id, ix)| IndexInfo {
            id,
            name: ix.name.clone(),
            columns: ix.metas.iter().map(|m| m.name.clone()).collect(),
            regex_capable: ix.is_trie_indexable(),
        })
        .collect();

    let bases = table.row_base();
    let mut segments = Vec::with_capacity(bases.len());
    for (position, &row_base) in bases.iter().enumerate() {
        let segment = table.segment(position)?;
        segments.push(SegmentInfo {
            position,
            kind: segment.kind().to_string(),
            dir: segment.dir().display().to_string(),
            row_base,
            rows: segment.logical_row_count(),
            deleted: segment.deleted_count(),
        });
    }

    Ok(InspectResult {
        path: table.dir().display().to_string(),
        row_count: table.row_count(),
        indexes,
        segments,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("segdb Table Inspection");
    println!("======================");
    println!();
    println!("Path: {}", result.path);
    println!("Rows: {}", result.row_count);
    println!();
    println!("Indexes:");
    for ix in &result.indexes {
        let regex = if ix.regex_capable { " [regex]" } else { "" };
        println!("  [{}] {} ({}){}", ix.id, ix.name, ix.columns.join(", "), regex);
    }
    println!();
    println!("Segments:");
    if result.segments.is_empty() {
        println!("  (none)");
    }
    for seg in &result.segments {
        println!(
            "  [{}] {:<14} base {:>8}  rows {:>8}  deleted {:>6}  {}",
            seg.position, seg.kind, seg.row_base, seg.rows, seg.deleted, seg.dir
        );
    }
}
