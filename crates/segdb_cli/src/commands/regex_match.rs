//! Match command implementation.

use segdb_core::{CompositeTable, CoreError, MatchReport};
use serde::Serialize;
use std::path::Path;

/// Arguments of one match run.
#[derive(Debug)]
pub struct MatchRequest<'a> {
    /// Index name or numeric id.
    pub index: &'a str,
    /// Regex pattern.
    pub pattern: &'a str,
    /// Regex flags.
    pub options: &'a str,
    /// Budget override in bytes.
    pub mem_limit: Option<usize>,
}

/// Match result.
#[derive(Debug, Serialize)]
pub struct MatchResult {
    /// Index id the match ran on.
    pub index_id: usize,
    /// Pattern as given.
    pub pattern: String,
    /// Matching table-wide row ids, segment-major.
    pub row_ids: Vec<u64>,
    /// Readonly segments included.
    pub segments_matched: usize,
    /// Writable segments skipped.
    pub skipped_writable: Vec<String>,
    /// Segments that ran out of budget.
    pub budget_exhausted: Vec<String>,
    /// Whether every segment contributed.
    pub complete: bool,
}

/// Runs the match command.
pub fn run(
    path: &Path,
    request: &MatchRequest<'_>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let table = super::open_table(path)?;
    let index_id = resolve_index(&table, request.index)?;

    let mut ctx = table.create_db_context();
    if let Some(limit) = request.mem_limit {
        ctx.regex_match_mem_limit = limit;
    }
    let mut row_ids = Vec::new();
    table
        .index_match_regex_str(
            index_id,
            request.pattern,
            request.options,
            &mut row_ids,
            &mut ctx,
        )
        .map_err(query_error)?;
    let result = to_result(index_id, request.pattern, row_ids, ctx.report());

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn resolve_index(table: &CompositeTable, index: &str) -> Result<usize, Box<dyn std::error::Error>> {
    if let Some(id) = table.schema().index_id(index) {
        return Ok(id);
    }
    index
        .parse()
        .map_err(|_| format!("No index named {index:?}").into())
}

/// Rejected arguments read as a usage problem; anything else is reported
/// as the table fault it is.
fn query_error(err: CoreError) -> Box<dyn std::error::Error> {
    if err.is_precondition() {
        format!("Invalid query: {err}").into()
    } else {
        Box::new(err)
    }
}

fn to_result(index_id: usize, pattern: &str, row_ids: Vec<u64>, report: &MatchReport) -> MatchResult {
    let paths = |dirs: &[std::path::PathBuf]| {
        dirs.iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
    };
    MatchResult {
        index_id,
        pattern: pattern.to_string(),
        row_ids,
        segments_matched: report.segments_matched,
        skipped_writable: paths(&report.skipped_writable),
        budget_exhausted: paths(&report.budget_exhausted),
        complete: report.is_complete(),
    }
}

fn print_text_output(result: &MatchResult) {
    println!(
        "{} match(es) for {:?} on index {}",
        result.row_ids.len(),
        result.pattern,
        result.index_id
    );
    for id in &result.row_ids {
        println!("  {id}");
    }
    println!();
    println!("Segments matched: {}", result.segments_matched);
    for dir in &result.skipped_writable {
        println!("  skipped (writable): {dir}");
    }
    for dir in &result.budget_exhausted {
        println!("  skipped (memory limit): {dir}");
    }
    if !result.complete {
        println!("Result is partial.");
    }
}
