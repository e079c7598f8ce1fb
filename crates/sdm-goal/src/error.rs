// error.rs — Error types for push evaluation and goal resolution.

use thiserror::Error;

/// Errors that can occur while evaluating pushes and resolving goal plans.
#[derive(Debug, Error)]
pub enum GoalError {
    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },

    /// Failed to serialize/deserialize push or plan data.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A push test raised an error instead of answering true/false.
    ///
    /// This is fatal for the push: a faulty predicate would otherwise
    /// silently skip goals for the repository.
    #[error("push test '{test}' failed: {reason}")]
    PredicateFailed { test: String, reason: String },

    /// The declared "after" edges among matched goal sets form a cycle.
    #[error("goal ordering cycle among: {}", goals.join(", "))]
    OrderingCycle { goals: Vec<String> },

    /// A repository URL does not carry a `scheme://` prefix.
    #[error("invalid repository url '{url}': {reason}")]
    InvalidRepoUrl { url: String, reason: String },

    /// A push test pattern (glob or regex) could not be compiled.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// The project loader has no checkout for the repository.
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    /// A write was attempted on a project loaded read-only.
    #[error("project {0} was loaded read-only")]
    ReadOnlyProject(String),

    /// Deployment status could not be read or changed.
    #[error("deployment status unavailable: {0}")]
    DeploymentStatusUnavailable(String),

    /// A notification dispatch failed (non-fatal).
    #[error("notification error: {0}")]
    NotificationError(String),
}
