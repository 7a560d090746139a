//! Error types for batch operations

use std::fmt;
use thiserror::Error;

/// A single per-item task that failed during a parallel dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// Position of the item in the batch
    pub position: usize,
    /// Identifier of the item
    pub id: String,
    /// Rendered cause of the failure
    pub reason: String,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item {} ({}): {}", self.position, self.id, self.reason)
    }
}

/// Main error type for batch operations
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index out of range: {index} (batch holds {len} items)")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("Unknown identifier: {0}")]
    UnknownIdentifier(String),

    #[error("Duplicate identifier: {0}")]
    DuplicateIdentifier(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("{} of {total} item tasks failed: {}", .failures.len(), summarize(.failures))]
    ParallelTaskFailure {
        total: usize,
        failures: Vec<TaskFailure>,
    },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

fn summarize(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl BatchError {
    /// Failed item positions when this is a `ParallelTaskFailure`
    pub fn failed_positions(&self) -> Vec<usize> {
        match self {
            BatchError::ParallelTaskFailure { failures, .. } => {
                failures.iter().map(|f| f.position).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Specialized Result type for batch operations
pub type Result<T> = std::result::Result<T, BatchError>;

impl From<bincode::Error> for BatchError {
    fn from(err: bincode::Error) -> Self {
        BatchError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for BatchError {
    fn from(err: serde_json::Error) -> Self {
        BatchError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallel_failure_message() {
        let err = BatchError::ParallelTaskFailure {
            total: 3,
            failures: vec![
                TaskFailure {
                    position: 1,
                    id: "b".to_string(),
                    reason: "boom".to_string(),
                },
                TaskFailure {
                    position: 2,
                    id: "c".to_string(),
                    reason: "bad shape".to_string(),
                },
            ],
        };
        let message = err.to_string();
        assert!(message.starts_with("2 of 3 item tasks failed"));
        assert!(message.contains("item 1 (b): boom"));
        assert_eq!(err.failed_positions(), vec![1, 2]);
    }

    #[test]
    fn test_index_out_of_range_message() {
        let err = BatchError::IndexOutOfRange { index: -1, len: 2 };
        assert_eq!(
            err.to_string(),
            "Index out of range: -1 (batch holds 2 items)"
        );
    }
}
