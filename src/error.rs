//! Error types for press-sync.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=store, 3=not_found, 4=validation, etc.)
//! - Retryability flags for the batch applier
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for press-sync operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Operators match on the string; shell scripts on the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Store (exit 2)
    NotInitialized,
    AlreadyInitialized,
    DatabaseError,
    ConstraintViolation,

    // Not Found (exit 3)
    EntityNotFound,

    // Validation (exit 4)
    InvalidArgument,
    ConfirmationRequired,

    // Hierarchy (exit 5)
    CycleDetected,

    // Export (exit 6)
    MalformedExport,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Media transfer (exit 9)
    FetchError,
    UploadError,

    // Internal (exit 1)
    InternalError,
    PartialFailure,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::ConstraintViolation => "CONSTRAINT_VIOLATION",
            Self::EntityNotFound => "ENTITY_NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::ConfirmationRequired => "CONFIRMATION_REQUIRED",
            Self::CycleDetected => "CYCLE_DETECTED",
            Self::MalformedExport => "MALFORMED_EXPORT",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::FetchError => "FETCH_ERROR",
            Self::UploadError => "UPLOAD_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::PartialFailure => "PARTIAL_FAILURE",
        }
    }

    /// Category-based exit code (1-9).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError | Self::PartialFailure => 1,
            Self::NotInitialized
            | Self::AlreadyInitialized
            | Self::DatabaseError
            | Self::ConstraintViolation => 2,
            Self::EntityNotFound => 3,
            Self::InvalidArgument | Self::ConfirmationRequired => 4,
            Self::CycleDetected => 5,
            Self::MalformedExport => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
            Self::FetchError | Self::UploadError => 9,
        }
    }

    /// Whether the batch applier may retry an operation that failed with this code.
    ///
    /// True for transient conditions (busy database, network transfer).
    /// False for constraint violations, missing entities and bad input.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError | Self::IoError | Self::FetchError | Self::UploadError
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in press-sync operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized: run `psync init` first")]
    NotInitialized,

    #[error("Already initialized at {path}")]
    AlreadyInitialized { path: PathBuf },

    #[error("{collection} not found: {id}")]
    NotFound { collection: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Category hierarchy cycle: {child} cannot be placed under {parent}")]
    CycleDetected { child: String, parent: String },

    #[error("Malformed export: {0}")]
    MalformedExport(String),

    #[error("Deletion requires explicit confirmation")]
    ConfirmationRequired,

    #[error("Fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Upload failed for {name}: {message}")]
    Upload { name: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run finished with {errors} error(s)")]
    PartialFailure { errors: usize },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::AlreadyInitialized { .. } => ErrorCode::AlreadyInitialized,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Constraint(_) => ErrorCode::ConstraintViolation,
            Self::NotFound { .. } => ErrorCode::EntityNotFound,
            Self::CycleDetected { .. } => ErrorCode::CycleDetected,
            Self::MalformedExport(_) => ErrorCode::MalformedExport,
            Self::ConfirmationRequired => ErrorCode::ConfirmationRequired,
            Self::Fetch { .. } => ErrorCode::FetchError,
            Self::Upload { .. } => ErrorCode::UploadError,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
            Self::PartialFailure { .. } => ErrorCode::PartialFailure,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Whether retrying the failed operation could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.error_code().is_retryable()
    }

    /// Context-aware recovery hint for operators.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotInitialized => {
                Some("Run `psync init` to create the live store database".to_string())
            }

            Self::AlreadyInitialized { path } => Some(format!(
                "Database already exists at {}. Use `--force` to reinitialize.",
                path.display()
            )),

            Self::NotFound { collection, .. } => Some(format!(
                "Use `psync status` to inspect the {collection} in the live store."
            )),

            Self::CycleDetected { .. } => Some(
                "Category parents must form a tree. Move the parent out of the child's subtree first."
                    .to_string(),
            ),

            Self::ConfirmationRequired => Some(
                "Review `psync orphans` output, then re-run with `--confirm` to delete."
                    .to_string(),
            ),

            Self::MalformedExport(_) => Some(
                "The export must be a WordPress WXR document (<rss><channel>…</channel></rss>)."
                    .to_string(),
            ),

            Self::PartialFailure { .. } => Some(
                "See the report's errors. Re-running the same export only applies the remaining work."
                    .to_string(),
            ),

            Self::Constraint(msg) if msg.contains("slug") => Some(
                "Another entity already uses this slug. Rename one of them in the source export."
                    .to_string(),
            ),

            Self::Constraint(_)
            | Self::Fetch { .. }
            | Self::Upload { .. }
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::InvalidArgument(_)
            | Self::Config(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    ///
    /// Includes error code, message, retryability, exit code, and
    /// optional recovery hint.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}
