//! Table configuration and the writable-backend override.

use std::fmt;

/// Environment variable naming the writable-segment backend.
pub const WRITABLE_BACKEND_ENV: &str = "SEGDB_WRITABLE_SEGMENT";

/// Default per-segment memory budget for regex matching: 16 MiB.
pub const DEFAULT_REGEX_MATCH_MEM_LIMIT: usize = 16 * 1024 * 1024;

/// Storage engine behind a writable segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WritableBackendKind {
    /// In-memory rows, snapshotted on flush.
    Mock,
    /// Persistent write-ahead-logged rows.
    Wal,
}

impl WritableBackendKind {
    /// Resolves an override value: `mock` in any case selects
    /// [`Self::Mock`], anything else (including no value) [`Self::Wal`].
    #[must_use]
    pub fn resolve(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("mock") => Self::Mock,
            _ => Self::Wal,
        }
    }

    /// Resolves the kind from [`WRITABLE_BACKEND_ENV`].
    #[must_use]
    pub fn from_env() -> Self {
        Self::resolve(std::env::var(WRITABLE_BACKEND_ENV).ok().as_deref())
    }

    /// Short name used in logs and the CLI.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Wal => "wal",
        }
    }
}

impl fmt::Display for WritableBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for creating or opening a table.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether `CompositeTable::create` may create a missing directory.
    pub create_if_missing: bool,

    /// Pins the writable backend; `None` consults the environment.
    pub writable_backend: Option<WritableBackendKind>,

    /// Memory budget handed to new query contexts, in bytes.
    pub regex_match_mem_limit: usize,

    /// Whether the WAL segment flushes after every record.
    pub sync_on_write: bool,

    /// Open for inspection only. Nothing under the table directory is
    /// created, truncated or rewritten, and mutations are rejected.
    pub read_only: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            writable_backend: None,
            regex_match_mem_limit: DEFAULT_REGEX_MATCH_MEM_LIMIT,
            sync_on_write: false,
            read_only: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the table directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Pins the writable backend instead of reading the environment.
    #[must_use]
    pub const fn writable_backend(mut self, kind: WritableBackendKind) -> Self {
        self.writable_backend = Some(kind);
        self
    }

    /// Sets the default regex-match memory budget.
    #[must_use]
    pub const fn regex_match_mem_limit(mut self, bytes: usize) -> Self {
        self.regex_match_mem_limit = bytes;
        self
    }

    /// Sets whether the WAL segment flushes after every record.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets read-only mode.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Returns the writable backend to use: the pinned one, or the
    /// environment override.
    #[must_use]
    pub fn resolve_writable_backend(&self) -> WritableBackendKind {
        self.writable_backend
            .unwrap_or_else(WritableBackendKind::from_env)
    }
}
