use crate::types::DataProductId;

/// Top-level dpt error type.
///
/// All fallible operations in `dpt-core` return [`Result<T, TrackerError>`](Result).
/// Storage failures keep their own enum so callers can tell a transport or
/// transaction failure apart from the tracker's own invariants.
#[derive(thiserror::Error, Debug)]
pub enum TrackerError {
    /// Error from the relational store (`SQLite` operations, transactions).
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A uniqueness invariant of the store does not hold. Fatal: indicates a
    /// corrupted database or a writer that bypassed the tracker.
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// The requested dependency edge would make a data product depend on itself.
    #[error("Dependency {parent} -> {child} would create a cycle")]
    Cycle {
        /// Prospective parent data product.
        parent: DataProductId,
        /// Prospective child data product.
        child: DataProductId,
    },

    /// Session API used outside of its valid state.
    #[error("Invalid session state: {0}")]
    State(String),

    /// Error in configuration parsing or validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The environment observer could not capture the execution context.
    #[error("Observation error: {0}")]
    Observe(String),

    /// Filesystem I/O error (hashing tracked files, reading lockfiles).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A data product path that the store cannot record exactly.
    #[error("Path is not valid UTF-8: {}", .0.display())]
    InvalidPath(std::path::PathBuf),
}

/// Errors from the SQLite-backed store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Underlying `SQLite` operation failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON encoding of bulk query parameters failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A referenced row was not found in the store.
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Errors in dpt configuration parsing and validation.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist at the expected path.
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Configuration values are present but semantically invalid.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Configuration file syntax could not be parsed (TOML error).
    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<rusqlite::Error> for TrackerError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Sqlite(err))
    }
}

/// Convenience alias for `Result<T, TrackerError>`.
pub type Result<T> = std::result::Result<T, TrackerError>;
