//! Unified error taxonomy for the Dodoco workspace.
//!
//! Every failure the orchestrator surfaces falls into one of five classes
//! (see [`ErrorKind`]). Lower crates define their own error enums and convert
//! into [`DodocoError`] at the orchestrator boundary.

use std::path::PathBuf;

use thiserror::Error;

/// Classification of a [`DodocoError`] for callers that map errors to
/// client/server responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input. Never retried.
    Validation,
    /// Approval, membership, or quota rejection. Never retried.
    Authz,
    /// A record or engine instance is absent where it is required.
    NotFound,
    /// Duplicate name or a concurrent mutation lost the race.
    Conflict,
    /// Engine or store failure.
    Infra,
}

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum DodocoError {
    /// A request field is missing or malformed.
    #[error("validation failed: {message}")]
    Validation {
        /// Description of the invalid input.
        message: String,
    },

    /// The requested image is not on the allow-list.
    #[error("image '{image}' is not supported; allowed images are <{}>", allowed.join(", "))]
    BadImage {
        /// Image reference as requested.
        image: String,
        /// Base image names that would have been accepted.
        allowed: Vec<String>,
    },

    /// The owning project has not been approved.
    #[error("project {project_id} is not approved")]
    NotApproved {
        /// Project that was checked.
        project_id: i64,
    },

    /// The requester may not act on the project.
    #[error("user {user_id} may not manage containers of project {project_id}")]
    Forbidden {
        /// Requesting user.
        user_id: i64,
        /// Project that was checked.
        project_id: i64,
    },

    /// The project already owns its maximum number of containers.
    #[error("project {project_id} reached its container limit of {limit}")]
    QuotaExceeded {
        /// Project that was checked.
        project_id: i64,
        /// Configured container limit.
        limit: i64,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A uniqueness or concurrency conflict.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// The engine or the store failed.
    #[error("infrastructure failure during {operation}: {message}")]
    Infra {
        /// Operation that was in progress.
        operation: &'static str,
        /// Underlying failure description.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl DodocoError {
    /// Shorthand for an [`DodocoError::Infra`] value.
    pub fn infra(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Infra {
            operation,
            message: message.into(),
        }
    }

    /// Shorthand for a [`DodocoError::Conflict`] value.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Shorthand for a [`DodocoError::NotFound`] value.
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Returns the taxonomy class of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::BadImage { .. } | Self::Serialization { .. } => {
                ErrorKind::Validation
            }
            Self::NotApproved { .. } | Self::Forbidden { .. } | Self::QuotaExceeded { .. } => {
                ErrorKind::Authz
            }
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Infra { .. } | Self::Io { .. } => ErrorKind::Infra,
        }
    }

    /// Returns whether the error should be reported as a client error.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Infra)
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, DodocoError>;
