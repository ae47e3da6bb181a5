//! Post-migration validation seam.
//!
//! Full schema validation lives outside this crate; the engine only hands a
//! migrated document and the schema identifier to a [`Validator`].

use serde::{Deserialize, Serialize};

use crate::document::{Document, SCHEMA_LOCATION_ATTR, SCHEMA_VERSION_ATTR};

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Element or attribute path the issue refers to.
    pub path: String,
    pub message: String,
}

/// Result of validating one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub schema_file: String,
    pub issues: Vec<ValidationIssue>,
    /// Set when the validator could not check the document at all (for
    /// example because the schema file is unavailable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl ValidationReport {
    pub fn new(schema_file: impl Into<String>) -> Self {
        Self {
            schema_file: schema_file.into(),
            ..Self::default()
        }
    }

    pub fn skipped(schema_file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            schema_file: schema_file.into(),
            issues: Vec::new(),
            skipped: Some(reason.into()),
        }
    }

    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            path: path.into(),
            message: message.into(),
        });
    }

    /// `true` when the document was checked and no issue was found.
    pub fn is_valid(&self) -> bool {
        self.skipped.is_none() && self.issues.is_empty()
    }
}

/// Checks a migrated document against the schema for its version.
pub trait Validator {
    fn validate(&self, doc: &Document, schema_file: &str) -> ValidationReport;
}

/// Checks only the root declaration: the version and the schema location.
#[derive(Debug, Clone, Copy)]
pub struct DeclarationValidator {
    pub expected_version: u32,
}

impl Validator for DeclarationValidator {
    fn validate(&self, doc: &Document, schema_file: &str) -> ValidationReport {
        let mut report = ValidationReport::new(schema_file);
        let root = doc.root();
        match doc.schema_version() {
            Ok(v) if v == self.expected_version => {}
            Ok(v) => report.push(
                format!("{}@{SCHEMA_VERSION_ATTR}", root.name),
                format!("declares version {v}, expected {}", self.expected_version),
            ),
            Err(e) => report.push(format!("{}@{SCHEMA_VERSION_ATTR}", root.name), e.to_string()),
        }
        if root.attr(SCHEMA_LOCATION_ATTR) != Some(schema_file) {
            report.push(
                format!("{}@{SCHEMA_LOCATION_ATTR}", root.name),
                format!("schema location should be {schema_file:?}"),
            );
        }
        report
    }
}
