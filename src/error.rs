//! Error types for vexel plan parsing and execution.

use thiserror::Error;

/// Result type alias using [`VexelError`].
pub type Result<T> = std::result::Result<T, VexelError>;

/// Result type for operator-internal work that is not yet tagged with an operator id.
pub type ExecResult<T> = std::result::Result<T, ExecutionCause>;

/// Error types for vexel operations.
#[derive(Debug, Error)]
pub enum VexelError {
    // ==================== Plan Errors ====================
    /// The plan document is not well-formed JSON.
    #[error("Plan parse error at line {line}, column {column}: {message}")]
    PlanParse {
        line: usize,
        column: usize,
        message: String,
    },

    /// The plan document is well-formed but semantically invalid.
    #[error("Plan schema error at {path}: {message}")]
    PlanSchema { path: String, message: String },

    // ==================== Execution Errors ====================
    /// Runtime failure of a specific operator.
    #[error("Execution error in {operator}: {cause}")]
    Execution {
        operator: String,
        #[source]
        cause: ExecutionCause,
    },

    // ==================== Interchange Errors ====================
    /// A batch could not be mapped to or from the Arrow format.
    #[error("Interchange error: {0}")]
    Interchange(String),

    // ==================== Catalog Errors ====================
    /// Data source registration errors (duplicate name, invalid table data).
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// I/O error outside of operator execution (e.g. reading a plan file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VexelError {
    /// Creates a plan schema error at the given JSON path.
    pub fn plan_schema(path: impl Into<String>, message: impl Into<String>) -> Self {
        VexelError::PlanSchema {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Wraps an execution cause with the identity of the failing operator.
    pub fn execution(operator: impl Into<String>, cause: ExecutionCause) -> Self {
        VexelError::Execution {
            operator: operator.into(),
            cause,
        }
    }

    /// Returns the failing operator's id for execution errors.
    #[must_use]
    pub fn operator(&self) -> Option<&str> {
        match self {
            VexelError::Execution { operator, .. } => Some(operator),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for VexelError {
    fn from(err: serde_json::Error) -> Self {
        VexelError::PlanParse {
            line: err.line(),
            column: err.column(),
            message: err.to_string(),
        }
    }
}

/// Cause of an operator failure.
#[derive(Debug, Error)]
pub enum ExecutionCause {
    /// Integer division or modulo by zero.
    #[error("Division by zero")]
    DivisionByZero,

    /// Runtime type mismatch.
    #[error("Type error: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// A scan referenced a data source that is not registered.
    #[error("Data source not found: {0}")]
    SourceNotFound(String),

    /// A source's schema does not provide what the plan declared.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Buffered state of a blocking operator exceeded the configured limit.
    #[error("Memory limit exceeded: {used} bytes used, limit is {limit} bytes")]
    MemoryLimitExceeded { used: usize, limit: usize },

    /// Malformed input data or inconsistent internal state.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Arrow compute kernel failure.
    #[error("Arrow error: {0}")]
    Arrow(#[source] arrow::error::ArrowError),

    /// CSV decoding failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// I/O failure while reading a source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<arrow::error::ArrowError> for ExecutionCause {
    fn from(err: arrow::error::ArrowError) -> Self {
        match err {
            arrow::error::ArrowError::DivideByZero => ExecutionCause::DivisionByZero,
            other => ExecutionCause::Arrow(other),
        }
    }
}

impl ExecutionCause {
    /// Creates a type mismatch cause.
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        ExecutionCause::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
