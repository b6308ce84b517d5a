//! Backend configuration errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading configuration or resolving users.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// No user with this name is configured.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// Configured users must be students or teachers.
    #[error("user '{user}' has unusable role '{role}'")]
    InvalidRole { user: String, role: String },

    /// The remote sandbox needs a base URL.
    #[error("remote sandbox requires base_url (or STEPCODE_EXECUTION_URL)")]
    MissingExecutionUrl,
}
