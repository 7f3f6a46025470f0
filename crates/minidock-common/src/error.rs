//! Unified error type for the minidock workspace.
//!
//! Best-effort cgroup operations do not use this type: they report an
//! [`Outcome`](crate::types::Outcome) instead and leave severity to the caller.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum MinidockError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A container specification was rejected before anything was launched.
    #[error("invalid container specification: {message}")]
    Validation {
        /// Description of the rejected field.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A resource limit could not be applied and the launch requires it.
    #[error("{capability} limit not applied: {reason}")]
    ResourceLimit {
        /// Which limit failed (`memory`, `cpu`, `cgroup`).
        capability: &'static str,
        /// Why it failed.
        reason: String,
    },

    /// The supervising process lost track of the isolated process.
    #[error("supervision failed: {message}")]
    Supervision {
        /// Description of the failure.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, MinidockError>;
