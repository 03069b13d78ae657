//! # Error Types
//!
//! Structured error types for modsee_core. Every fallible operation returns a
//! [`ModelError`] carrying enough context (stage id, path, backend) for a
//! caller to report or recover without parsing strings.
//!
//! ## Example
//!
//! ```rust
//! use modsee_core::errors::{ModelError, ModelResult};
//!
//! fn require_positive(field: &str, value: f64) -> ModelResult<()> {
//!     if value <= 0.0 {
//!         return Err(ModelError::invalid_input(field, value.to_string(), "must be positive"));
//!     }
//!     Ok(())
//! }
//!
//! assert!(require_positive("tolerance", -1.0).is_err());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stage::StageId;

/// Result type alias for modsee_core operations
pub type ModelResult<T> = Result<T, ModelError>;

/// Structured error type for model, stage and persistence operations.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "details")]
pub enum ModelError {
    /// An operation referenced a stage that is not in the store
    #[error("Stage not found: {stage_id}")]
    StageNotFound { stage_id: StageId },

    /// `create_stage` was called with an id that already exists
    #[error("Stage {stage_id} already exists")]
    DuplicateStage { stage_id: StageId },

    /// Stage 0 is permanent for the lifetime of a project
    #[error("Stage 0 is the root stage and cannot be removed")]
    RootStageRemoval,

    /// An input value is invalid (out of range, wrong shape, etc.)
    #[error("Invalid input for '{field}': {value} - {reason}")]
    InvalidInput {
        field: String,
        value: String,
        reason: String,
    },

    /// A required field or property is missing
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    /// File I/O error
    #[error("File error: {operation} on '{path}' - {reason}")]
    FileError {
        operation: String,
        path: String,
        reason: String,
    },

    /// File is locked by another user/process
    #[error("File locked: '{path}' is locked by {locked_by} since {locked_at}")]
    FileLocked {
        path: String,
        locked_by: String,
        locked_at: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error in '{path}': {reason}")]
    SerializationError { path: String, reason: String },

    /// File format version is not understood
    #[error("Version mismatch: file version {file_version}, expected {expected_version}")]
    VersionMismatch {
        file_version: String,
        expected_version: String,
    },

    /// The selected persistence backend cannot perform the operation
    #[error("Backend '{backend}' cannot perform this operation: {reason}")]
    BackendMismatch { backend: String, reason: String },

    /// Embedded attribute store failure
    #[error("Storage error: {reason}")]
    StorageError { reason: String },

    /// A settings key outside the known schema
    #[error("Unknown setting: {key}")]
    UnknownSetting { key: String },

    /// A settings value whose type does not match the schema
    #[error("Setting '{key}' expects {expected}, got {actual}")]
    SettingTypeMismatch {
        key: String,
        expected: String,
        actual: String,
    },
}

impl ModelError {
    /// Create a StageNotFound error
    pub fn stage_not_found(stage_id: StageId) -> Self {
        ModelError::StageNotFound { stage_id }
    }

    /// Create an InvalidInput error
    pub fn invalid_input(field: impl Into<String>, value: impl Into<String>, reason: impl Into<String>) -> Self {
        ModelError::InvalidInput {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a MissingField error
    pub fn missing_field(field: impl Into<String>) -> Self {
        ModelError::MissingField {
            field: field.into(),
        }
    }

    /// Create a FileError
    pub fn file_error(operation: impl Into<String>, path: impl Into<String>, reason: impl Into<String>) -> Self {
        ModelError::FileError {
            operation: operation.into(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a FileLocked error
    pub fn file_locked(path: impl Into<String>, locked_by: impl Into<String>, locked_at: impl Into<String>) -> Self {
        ModelError::FileLocked {
            path: path.into(),
            locked_by: locked_by.into(),
            locked_at: locked_at.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization(path: impl Into<String>, reason: impl Into<String>) -> Self {
        ModelError::SerializationError {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a BackendMismatch error
    pub fn backend_mismatch(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        ModelError::BackendMismatch {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// Create a StorageError
    pub fn storage(reason: impl Into<String>) -> Self {
        ModelError::StorageError {
            reason: reason.into(),
        }
    }

    /// Check if this is a recoverable error (e.g., can retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ModelError::FileLocked { .. })
    }

    /// Get a short error code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ModelError::StageNotFound { .. } => "STAGE_NOT_FOUND",
            ModelError::DuplicateStage { .. } => "DUPLICATE_STAGE",
            ModelError::RootStageRemoval => "ROOT_STAGE_REMOVAL",
            ModelError::InvalidInput { .. } => "INVALID_INPUT",
            ModelError::MissingField { .. } => "MISSING_FIELD",
            ModelError::FileError { .. } => "FILE_ERROR",
            ModelError::FileLocked { .. } => "FILE_LOCKED",
            ModelError::SerializationError { .. } => "SERIALIZATION_ERROR",
            ModelError::VersionMismatch { .. } => "VERSION_MISMATCH",
            ModelError::BackendMismatch { .. } => "BACKEND_MISMATCH",
            ModelError::StorageError { .. } => "STORAGE_ERROR",
            ModelError::UnknownSetting { .. } => "UNKNOWN_SETTING",
            ModelError::SettingTypeMismatch { .. } => "SETTING_TYPE_MISMATCH",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let error = ModelError::stage_not_found(7);
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("StageNotFound"));
        let roundtrip: ModelError = serde_json::from_str(&json).unwrap();
        assert_eq!(error, roundtrip);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ModelError::missing_field("E").error_code(), "MISSING_FIELD");
        assert_eq!(ModelError::RootStageRemoval.error_code(), "ROOT_STAGE_REMOVAL");
        assert_eq!(
            ModelError::backend_mismatch("json", "no results").error_code(),
            "BACKEND_MISMATCH"
        );
    }

    #[test]
    fn test_display_includes_context() {
        let error = ModelError::serialization("model.json", "expected value at line 1");
        assert_eq!(
            error.to_string(),
            "Serialization error in 'model.json': expected value at line 1"
        );
        assert!(ModelError::file_locked("a", "b", "c").is_recoverable());
    }
}
