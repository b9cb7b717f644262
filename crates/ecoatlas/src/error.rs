//! Error types for ecoatlas.
//!
//! This module defines all error types used throughout the ecoatlas crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for ecoatlas operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
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

    /// The backend URL or key is missing from the configuration.
    #[error("backend not configured: set remote.url and remote.anon_key")]
    RemoteNotConfigured,

    // === Report Errors ===
    /// A required report field is missing or blank.
    #[error("missing required field: {field}")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },

    /// A coordinate pair or WKT point could not be understood.
    #[error("invalid location '{input}': {reason}")]
    InvalidLocation {
        /// The offending input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An unknown report kind or alert level was encountered.
    #[error("unknown {what}: {value}")]
    UnknownVariant {
        /// What kind of value was being parsed.
        what: &'static str,
        /// The offending value.
        value: String,
    },

    // === Remote Errors ===
    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {message}")]
    Remote {
        /// HTTP status code.
        status: u16,
        /// Error message extracted from the response body.
        message: String,
    },

    /// The HTTP request could not be completed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A URL could not be built.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    // === Sync Errors ===
    /// A sync is already running on this synchronizer.
    #[error("a sync is already in progress")]
    SyncInProgress,

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

    /// Server-supplied GeoJSON did not have the expected shape.
    #[error("invalid GeoJSON: {0}")]
    GeoJson(String),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for ecoatlas operations.
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

    /// Create an invalid location error.
    #[must_use]
    pub fn invalid_location(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidLocation {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create a remote error from a status code and message.
    #[must_use]
    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        Self::Remote {
            status,
            message: message.into(),
        }
    }

    /// Create a GeoJSON shape error.
    #[must_use]
    pub fn geojson(message: impl Into<String>) -> Self {
        Self::GeoJson(message.into())
    }

    /// Check if this error rejects the report itself rather than the attempt.
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::MissingField { .. } | Self::InvalidLocation { .. } | Self::UnknownVariant { .. }
        )
    }

    /// Check if a later attempt could plausibly succeed.
    ///
    /// Network failures, timeouts, rate limiting and server-side errors are
    /// retryable. Client errors such as a foreign-key violation are not,
    /// though the queue keeps those reports too.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Remote { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::SyncInProgress;
        assert_eq!(err.to_string(), "a sync is already in progress");

        let err = Error::internal("test error");
        assert_eq!(err.to_string(), "internal error: test error");
    }

    #[test]
    fn test_missing_field_display() {
        let err = Error::MissingField {
            field: "description",
        };
        assert_eq!(err.to_string(), "missing required field: description");
        assert!(err.is_validation_error());
    }

    #[test]
    fn test_invalid_location_display() {
        let err = Error::invalid_location("POINT(x y)", "not a number");
        let msg = err.to_string();
        assert!(msg.contains("POINT(x y)"));
        assert!(msg.contains("not a number"));
        assert!(err.is_validation_error());
    }

    #[test]
    fn test_remote_error_display() {
        let err = Error::remote(409, "duplicate key value");
        let msg = err.to_string();
        assert!(msg.contains("409"));
        assert!(msg.contains("duplicate key value"));
    }

    #[test]
    fn test_is_retryable() {
        assert!(Error::remote(503, "unavailable").is_retryable());
        assert!(Error::remote(429, "slow down").is_retryable());
        assert!(!Error::remote(400, "bad request").is_retryable());
        assert!(!Error::remote(409, "conflict").is_retryable());
        assert!(!Error::SyncInProgress.is_retryable());
    }

    #[test]
    fn test_remote_not_validation() {
        assert!(!Error::remote(400, "bad").is_validation_error());
        assert!(!Error::RemoteNotConfigured.is_validation_error());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::DatabaseQuery(_)));
        }
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
    fn test_from_url_error() {
        let err: Error = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, Error::Url(_)));
    }

    #[test]
    fn test_database_migration_error_display() {
        let err = Error::DatabaseMigration {
            message: "version mismatch".to_string(),
        };
        assert!(err.to_string().contains("version mismatch"));
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "invalid zoom".to_string(),
        };
        assert!(err.to_string().contains("invalid zoom"));
    }

    #[test]
    fn test_unknown_variant_display() {
        let err = Error::UnknownVariant {
            what: "alert level",
            value: "apocalyptic".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("alert level"));
        assert!(msg.contains("apocalyptic"));
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

    #[test]
    fn test_database_open_error_display() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err = Error::DatabaseOpen {
                path: PathBuf::from("/nonexistent/path/db.sqlite"),
                source: sqlite_err,
            };
            assert!(err.to_string().contains("/nonexistent/path/db.sqlite"));
        }
    }
}
