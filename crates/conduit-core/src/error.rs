use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::workflow::NodeKind;

#[derive(Debug, Error)]
pub enum ConduitError {
    // Graph errors
    #[error("Workflow validation failed: {0}")]
    Validation(#[from] ValidationError),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Scheduler invariant violations
    #[error("Internal engine fault: {0}")]
    Internal(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConduitError>;

/// A single structural or configuration problem found in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ValidationIssue {
    DuplicateNodeId { id: String },
    UnknownNode { edge: (String, String), id: String },
    MissingEntry,
    MultipleEntries { ids: Vec<String> },
    EntryHasIncomingEdges { id: String },
    MissingOutput,
    MultipleOutputs { ids: Vec<String> },
    OutputHasOutgoingEdges { id: String },
    CycleDetected { path: Vec<String> },
    UnreachableNode { id: String },
    ArityViolation { id: String, kind: NodeKind, detail: String },
    InvalidConfig { id: String, reason: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateNodeId { id } => write!(f, "duplicate node id '{}'", id),
            Self::UnknownNode { edge, id } => {
                write!(f, "edge {} -> {} references unknown node '{}'", edge.0, edge.1, id)
            }
            Self::MissingEntry => write!(f, "workflow has no user_query entry node"),
            Self::MultipleEntries { ids } => {
                write!(f, "workflow has multiple user_query nodes: {}", ids.join(", "))
            }
            Self::EntryHasIncomingEdges { id } => {
                write!(f, "user_query node '{}' must not have incoming edges", id)
            }
            Self::MissingOutput => write!(f, "workflow has no output node"),
            Self::MultipleOutputs { ids } => {
                write!(f, "workflow has multiple output nodes: {}", ids.join(", "))
            }
            Self::OutputHasOutgoingEdges { id } => {
                write!(f, "output node '{}' must not have outgoing edges", id)
            }
            Self::CycleDetected { path } => write!(f, "cycle detected: {}", path.join(" -> ")),
            Self::UnreachableNode { id } => {
                write!(f, "node '{}' is not reachable from the user_query node", id)
            }
            Self::ArityViolation { id, kind, detail } => {
                write!(f, "{} node '{}': {}", kind, id, detail)
            }
            Self::InvalidConfig { id, reason } => {
                write!(f, "invalid config for node '{}': {}", id, reason)
            }
        }
    }
}

/// Every issue found while validating one workflow graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn has(&self, pred: impl Fn(&ValidationIssue) -> bool) -> bool {
        self.issues.iter().any(pred)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msgs: Vec<String> = self.issues.iter().map(|i| i.to_string()).collect();
        write!(f, "{}", msgs.join("; "))
    }
}

/// Node-local failure. Recorded in the trace, never unwinds the run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutorError {
    #[error("Provider unavailable after {attempts} attempts: {message}")]
    ProviderUnavailable { attempts: u32, message: String },

    #[error("Provider request failed: {0}")]
    Provider(String),

    #[error("Retrieval failed: {0}")]
    RetrievalFailure(String),

    #[error("Web search failed: {0}")]
    WebSearchFailure(String),

    #[error("Invalid node config: {0}")]
    ConfigInvalid(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Node timed out after {0}ms")]
    Timeout(u64),

    #[error("Run deadline exceeded")]
    DeadlineExceeded,

    #[error("Run cancelled")]
    Cancelled,
}

/// Generation backend failure, classified for the retry policy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unparseable response: {0}")]
    Parse(String),

    #[error("cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Timeout(_) | Self::Server { .. } | Self::Connection(_)
        )
    }

    /// Classify an HTTP status code returned by a provider.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let message = body.into();
        match status {
            401 | 403 => Self::Auth(message),
            408 => Self::Timeout(message),
            429 => Self::RateLimited(message),
            500..=599 => Self::Server { status, message },
            _ => Self::InvalidRequest(format!("HTTP {}: {}", status, message)),
        }
    }
}

/// Retrieval or web-search backend failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetrievalError {
    #[error("backend request failed: {0}")]
    Request(String),

    #[error("backend returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unparseable backend response: {0}")]
    Parse(String),

    #[error("cancelled")]
    Cancelled,
}
