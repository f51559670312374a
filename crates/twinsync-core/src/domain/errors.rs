//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including validation failures and malformed relative paths.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Relative path is absolute, has empty segments, or escapes the root
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Unknown sync mode name
    #[error("Invalid sync mode: {0}")]
    InvalidSyncMode(String),

    /// Identity string is empty
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),
}
