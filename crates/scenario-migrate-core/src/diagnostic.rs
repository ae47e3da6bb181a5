//! Operator-visible diagnostics emitted by successful steps.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A warning produced while migrating a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Version the step migrated from.
    pub from_version: u32,
    /// Version the step migrated to.
    pub to_version: u32,
    /// Classification of the diagnostic.
    pub kind: DiagnosticKind,
    /// Human-readable description.
    pub message: String,
}

/// Classification of migration diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A value was inserted that the old document did not specify.
    DefaultInserted,
    /// Legacy data was dropped because the new schema has no place for it.
    Dropped,
    /// The new form is close to, but not exactly, the old meaning.
    LossyConversion,
    /// The operator should review or edit the result by hand.
    ManualFollowUp,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} -> {}] {}",
            self.from_version, self.to_version, self.message
        )
    }
}
