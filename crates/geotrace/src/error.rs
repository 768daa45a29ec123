//! Error types for geotrace.
//!
//! This module defines the crate-level error type for failures that actually
//! propagate: store access, configuration, and I/O. Capture-engine and
//! session-transition failures have their own local error enums
//! ([`crate::capture::CaptureError`], [`crate::session::SessionError`])
//! because they are classified outcomes, not fatal conditions.

use std::path::PathBuf;
use thiserror::Error;

use crate::session::SessionError;

/// The main error type for geotrace operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Store Errors ===
    /// Failed to open or create the registry database.
    #[error("failed to open registry at {path}: {source}")]
    StoreOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A registry query failed.
    #[error("registry query failed: {0}")]
    StoreQuery(#[from] rusqlite::Error),

    /// The registry is unavailable (lock poisoned, backend gone).
    #[error("registry unavailable: {message}")]
    StoreUnavailable {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Session Errors ===
    /// A session state transition was rejected.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// No tracked record exists for the given user.
    #[error("unknown user: {user_id}")]
    UnknownUser {
        /// The identifier that was looked up.
        user_id: String,
    },

    /// An administrator command was rejected before submission.
    #[error("invalid admin command: {message}")]
    InvalidCommand {
        /// Why the command was rejected.
        message: String,
    },

    // === HTTP Errors ===
    /// Building an HTTP client failed.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for geotrace operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a store-unavailable error.
    #[must_use]
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Create an unknown-user error.
    #[must_use]
    pub fn unknown_user(user_id: impl Into<String>) -> Self {
        Self::UnknownUser {
            user_id: user_id.into(),
        }
    }

    /// Create an invalid-command error.
    #[must_use]
    pub fn invalid_command(message: impl Into<String>) -> Self {
        Self::InvalidCommand {
            message: message.into(),
        }
    }

    /// Check if this error means the user is not tracked.
    #[must_use]
    pub fn is_unknown_user(&self) -> bool {
        matches!(self, Self::UnknownUser { .. })
    }

    /// Check if this error originated in the registry store.
    #[must_use]
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            Self::StoreOpen { .. } | Self::StoreQuery(_) | Self::StoreUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::unknown_user("USR-1");
        assert_eq!(err.to_string(), "unknown user: USR-1");

        let err = Error::internal("test error");
        assert_eq!(err.to_string(), "internal error: test error");
    }

    #[test]
    fn test_error_is_unknown_user() {
        assert!(Error::unknown_user("USR-1").is_unknown_user());
        assert!(!Error::internal("test").is_unknown_user());
    }

    #[test]
    fn test_error_is_store_error() {
        assert!(Error::store_unavailable("locked").is_store_error());
        assert!(!Error::unknown_user("USR-1").is_store_error());
    }

    #[test]
    fn test_invalid_command_display() {
        let err = Error::invalid_command("empty command text");
        assert!(err.to_string().contains("empty command text"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_from_session_error() {
        let err: Error = SessionError::NotActive {
            state: crate::session::SessionState::Paused,
        }
        .into();
        assert!(matches!(err, Error::Session(_)));
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }
}
