//! Error types for the workflow core

use thiserror::Error;

use crate::types::LogicalPort;

/// Result type alias using WorkflowError
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Kind of graph entity an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Operator,
    Link,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Operator => write!(f, "operator"),
            Self::Link => write!(f, "link"),
        }
    }
}

/// Errors that can occur in the workflow core
///
/// Structural errors (duplicate, dangling, not found) are contract
/// violations by the caller, usually a stale ID held by the UI.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// An operator with this ID is already in the graph
    #[error("Operator '{0}' already exists")]
    DuplicateOperator(String),

    /// A link with the same ID or the same endpoints already exists
    #[error("Link '{link_id}' duplicates an existing link from {source_port:?} to {target_port:?}")]
    DuplicateLink {
        link_id: String,
        source_port: LogicalPort,
        target_port: LogicalPort,
    },

    /// A link endpoint refers to a missing operator or port
    #[error("Link '{link_id}' references missing endpoint {port:?}")]
    DanglingReference { link_id: String, port: LogicalPort },

    /// Operator or link absent
    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },

    /// Mutation attempted while modification is disabled
    #[error("Workflow graph is locked for modification")]
    GraphLocked,

    /// Operator type is not in the metadata registry
    #[error("Unknown operator type: {0}")]
    UnknownOperatorType(String),

    /// Operator ports differ from the ones its type defines
    #[error("Operator '{operator_id}' does not have the ports of type '{operator_type}'")]
    PortMismatch {
        operator_id: String,
        operator_type: String,
    },

    /// Schema propagation request failed (non-fatal)
    #[error("Schema propagation request failed: {0}")]
    PropagationRequestFailed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkflowError {
    pub fn operator_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: EntityKind::Operator,
            id: id.into(),
        }
    }

    pub fn link_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: EntityKind::Link,
            id: id.into(),
        }
    }

    /// Create a propagation failure with a message
    pub fn propagation(msg: impl Into<String>) -> Self {
        Self::PropagationRequestFailed(msg.into())
    }
}

impl From<reqwest::Error> for WorkflowError {
    fn from(err: reqwest::Error) -> Self {
        Self::PropagationRequestFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = WorkflowError::operator_not_found("op-1");
        assert_eq!(err.to_string(), "operator 'op-1' not found");
        let err = WorkflowError::link_not_found("link-1");
        assert_eq!(err.to_string(), "link 'link-1' not found");
    }
}
