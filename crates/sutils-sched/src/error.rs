//! Error handling for resource matching and submission.

use thiserror::Error;

/// Result type for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur while matching a batch script to cluster resources.
#[derive(Error, Debug)]
pub enum SchedError {
    /// A required directive is missing or unreadable in the batch script.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// A line of node-info output could not be parsed.
    #[error("Topology parse error on line {line}: {message}")]
    TopologyParse { line: usize, message: String },

    /// The topology query command failed.
    #[error("Topology query failed: {command} - {message}")]
    TopologyQueryFailed { command: String, message: String },

    /// Neither idle nor queued capacity covers any requested partition.
    #[error("No capacity available: {0}")]
    NoCapacityAvailable(String),

    /// SLURM submission failed.
    #[error("SLURM submission failed: {0}")]
    SlurmSubmitError(String),

    /// SLURM command execution failed.
    #[error("SLURM command failed: {command} - {message}")]
    SlurmCommandError { command: String, message: String },

    /// The user picked something that is not on the list.
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    /// The prompt's input ended before a valid selection was made.
    #[error("Selection aborted: input closed")]
    SelectionAborted,

    /// A memory size with an unknown unit suffix.
    #[error("Invalid unit: {0}")]
    InvalidUnit(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Outcome could not be rendered as JSON.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl SchedError {
    /// Whether the error means "nothing to do" rather than a failure.
    pub fn is_no_capacity(&self) -> bool {
        matches!(self, SchedError::NoCapacityAvailable(_))
    }
}
