//! Per-query state.

use std::path::PathBuf;

/// State owned by one query call.
///
/// Carries the per-segment memory budget in, and the completeness report
/// of the last regex match out.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// Memory budget for one segment's regex match, in bytes.
    pub regex_match_mem_limit: usize,
    report: MatchReport,
}

impl QueryContext {
    /// Creates a context with the given budget.
    #[must_use]
    pub fn new(regex_match_mem_limit: usize) -> Self {
        Self {
            regex_match_mem_limit,
            report: MatchReport::default(),
        }
    }

    /// Report of the last regex match run with this context.
    #[must_use]
    pub fn report(&self) -> &MatchReport {
        &self.report
    }

    pub(crate) fn report_mut(&mut self) -> &mut MatchReport {
        &mut self.report
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_REGEX_MATCH_MEM_LIMIT)
    }
}

/// Which segments a regex match covered.
///
/// Mirrors the warnings logged during the call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchReport {
    /// Index the match ran on.
    pub index_id: usize,
    /// Readonly segments whose results are included.
    pub segments_matched: usize,
    /// Writable segments skipped.
    pub skipped_writable: Vec<PathBuf>,
    /// Readonly segments that ran out of budget and contributed nothing.
    pub budget_exhausted: Vec<PathBuf>,
}

impl MatchReport {
    /// Returns true if every segment contributed to the result.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.skipped_writable.is_empty() && self.budget_exhausted.is_empty()
    }

    pub(crate) fn reset(&mut self, index_id: usize) {
        self.index_id = index_id;
        self.segments_matched = 0;
        self.skipped_writable.clear();
        self.budget_exhausted.clear();
    }
}
