//! Schema-version migration for scenario documents.
//!
//! A scenario document declares the schema version its content conforms to.
//! This crate rewrites a document from its declared version to a newer one by
//! applying one registered step per version increment, in order:
//!
//! ```no_run
//! use scenario_migrate_core::{migrate, Document, MigrateOptions};
//!
//! let mut doc = Document::from_json_str(r#"{"name": "scenario", "attributes": {"schemaVersion": "30"}}"#)?;
//! let report = migrate(&mut doc, &MigrateOptions::default())?;
//! println!("now valid against {}", report.schema_file);
//! # Ok::<(), scenario_migrate_core::MigrateError>(())
//! ```
//!
//! Legacy data whose meaning cannot be decided mechanically makes the run
//! fail with [`StepError::PolicyRequired`] until the matching switch in
//! [`PolicyConfig`] is set.

pub mod config;
pub mod derived;
pub mod diagnostic;
pub mod document;
pub mod error;
pub mod migrate;
pub mod registry;
pub mod steps;
pub mod tree_utils;
pub mod validate;

pub use config::{
    schema_file_name, IptiSpIntent, ItnDescription, MaxDensCorrection, MigrateOptions,
    PolicyConfig, PolicySwitch, ReportOnlyAtRisk, SchemaNaming, CURRENT_VERSION,
};
pub use diagnostic::{Diagnostic, DiagnosticKind};
pub use document::{Document, Element, Node};
pub use error::{ErrorCode, MigrateError, StepError};
pub use migrate::{migrate, MigrationReport, Migrator, ONE_DAY_TIMESTEPS_VERSION};
pub use registry::{Step, StepContext, StepFn, StepRegistry};
pub use validate::{DeclarationValidator, ValidationReport, Validator};
