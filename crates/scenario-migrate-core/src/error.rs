//! Error types for schema migration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PolicySwitch;

/// Stable, machine-readable error codes.
///
/// These codes form a **stable API contract**: variant names and their
/// serialized `snake_case` strings must never change across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorCode {
    /// JSON (de)serialization error in the document exchange form.
    JsonParseError,
    /// The document's declared version is unusable (malformed, or newer than the target).
    InvalidDocument,
    /// The engine was asked for something it cannot do (target, registry holes).
    ConfigurationError,
    /// Required structure is missing or malformed.
    StructuralError,
    /// Legacy data does not fit the assumptions needed to reinterpret it.
    DataInvariantViolation,
    /// An ambiguous case needs an operator policy switch.
    PolicyRequired,
    /// The legacy construct has no mechanical translation.
    UnsupportedTranslation,
}

/// Failure of a single step.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    #[error("Structural error at {path}: {message}")]
    Structural { path: String, message: String },

    #[error("Data invariant violated at {path}: {message}")]
    DataInvariant { path: String, message: String },

    #[error("Policy required: {reason}; set {switch} ({flag})", flag = .switch.flag())]
    PolicyRequired { switch: PolicySwitch, reason: String },

    #[error("Unsupported translation at {path}: {message}")]
    UnsupportedTranslation { path: String, message: String },
}

impl StepError {
    pub fn structural(path: impl Into<String>, message: impl Into<String>) -> Self {
        StepError::Structural {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn data(path: impl Into<String>, message: impl Into<String>) -> Self {
        StepError::DataInvariant {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn policy(switch: PolicySwitch, reason: impl Into<String>) -> Self {
        StepError::PolicyRequired {
            switch,
            reason: reason.into(),
        }
    }

    pub fn unsupported(path: impl Into<String>, message: impl Into<String>) -> Self {
        StepError::UnsupportedTranslation {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            StepError::Structural { .. } => ErrorCode::StructuralError,
            StepError::DataInvariant { .. } => ErrorCode::DataInvariantViolation,
            StepError::PolicyRequired { .. } => ErrorCode::PolicyRequired,
            StepError::UnsupportedTranslation { .. } => ErrorCode::UnsupportedTranslation,
        }
    }

    /// Element path context, if available.
    pub fn path(&self) -> Option<&str> {
        match self {
            StepError::Structural { path, .. }
            | StepError::DataInvariant { path, .. }
            | StepError::UnsupportedTranslation { path, .. } => Some(path),
            StepError::PolicyRequired { .. } => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("JSON (de)serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid schemaVersion {value:?} on root element")]
    InvalidVersion { value: String },

    #[error("Document is at version {current}, newer than target {target}")]
    VersionAhead { current: u32, target: u32 },

    #[error("Target version {target} is not supported: {reason}")]
    UnsupportedTarget { target: u32, reason: String },

    #[error("No step registered for {from} -> {to}")]
    MissingStep { from: u32, to: u32 },

    #[error("Step {from} -> {to} registered twice")]
    DuplicateStep { from: u32, to: u32 },

    #[error("Translation {from} -> {to} failed: {source}")]
    StepFailed {
        from: u32,
        to: u32,
        #[source]
        source: StepError,
    },

    #[error("One-day timestep conversion failed: {source}")]
    TimestepConversionFailed {
        #[source]
        source: StepError,
    },
}

impl MigrateError {
    /// Returns the stable error code for this error variant.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            MigrateError::JsonError(_) => ErrorCode::JsonParseError,
            MigrateError::InvalidVersion { .. } | MigrateError::VersionAhead { .. } => {
                ErrorCode::InvalidDocument
            }
            MigrateError::UnsupportedTarget { .. }
            | MigrateError::MissingStep { .. }
            | MigrateError::DuplicateStep { .. } => ErrorCode::ConfigurationError,
            MigrateError::StepFailed { source, .. }
            | MigrateError::TimestepConversionFailed { source } => source.error_code(),
        }
    }

    /// The version pair of the failing step, if a step failed.
    pub fn versions(&self) -> Option<(u32, u32)> {
        match self {
            MigrateError::StepFailed { from, to, .. } => Some((*from, *to)),
            _ => None,
        }
    }

    /// The underlying step failure, if any.
    pub fn step_error(&self) -> Option<&StepError> {
        match self {
            MigrateError::StepFailed { source, .. }
            | MigrateError::TimestepConversionFailed { source } => Some(source),
            _ => None,
        }
    }

    /// Element path context, if available.
    pub fn path(&self) -> Option<&str> {
        self.step_error().and_then(StepError::path)
    }

    /// Produces a structured JSON error.
    ///
    /// Format: `{"code": "...", "message": "...", "path": "..." | null, "versions": [from, to] | null}`
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.error_code(),
            "message": self.to_string(),
            "path": self.path(),
            "versions": self.versions(),
        })
    }
}
