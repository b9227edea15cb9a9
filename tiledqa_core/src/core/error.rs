use thiserror::Error;

use crate::core::geometry::envelope::Envelope;

/// Errors raised by the data source layer (tables, cursors).
#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Query error on table {table}: {message}")]
    Query { table: String, message: String },

    /// A row could not be read; carries enough context to report it.
    #[error("Error loading row {oid} of table {table}: {message}")]
    CorruptRow {
        table: String,
        oid: i64,
        message: String,
    },

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Data error: {0}")]
    Other(String),
}

/// Failure returned by a test implementation.
#[derive(Error, Debug)]
pub enum TestFailure {
    /// The whole test instance is unusable for the rest of the run.
    #[error("{0}")]
    Test(String),

    /// The failure is attributable to the row currently being tested.
    #[error("{0}")]
    Row(String),

    /// Anything else. Fatal for the run.
    #[error(transparent)]
    Unexpected(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl From<DataError> for TestFailure {
    fn from(error: DataError) -> Self {
        TestFailure::Unexpected(Box::new(error))
    }
}

impl From<ContainerError> for TestFailure {
    fn from(error: ContainerError) -> Self {
        TestFailure::Unexpected(Box::new(error))
    }
}

/// Where an unclassified test failure happened.
#[derive(Debug, Clone)]
pub enum FailureContext {
    Row { table: String, oid: Option<i64> },
    Tile(Envelope),
    Run,
}

impl std::fmt::Display for FailureContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureContext::Row { table, oid: Some(oid) } => write!(f, "row {} of {}", oid, table),
            FailureContext::Row { table, oid: None } => write!(f, "row without id of {}", table),
            FailureContext::Tile(envelope) => write!(f, "tile {}", envelope),
            FailureContext::Run => write!(f, "test run"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Test '{test}' failed for {context}: {source}")]
    TestExecution {
        test: String,
        context: FailureContext,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Internal consistency failure. Never recovered.
    #[error(
        "Test '{test}' has inconsistent error count for {context}: returned count is {returned}, raised errors count is {raised}"
    )]
    InconsistentErrorCount {
        test: String,
        context: String,
        returned: usize,
        raised: usize,
    },

    #[error("Invalid relation pattern: {0}")]
    InvalidRelation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

/// Result type of the data source layer.
pub type DataResult<T> = std::result::Result<T, DataError>;
