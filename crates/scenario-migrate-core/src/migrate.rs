//! The dispatcher: walks a document from its declared version to the target,
//! one registered step at a time.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{schema_file_name, MigrateOptions, CURRENT_VERSION, UNSUPPORTED_TARGET};
use crate::diagnostic::Diagnostic;
use crate::document::{Document, SCHEMA_LOCATION_ATTR};
use crate::error::MigrateError;
use crate::registry::{StepContext, StepRegistry};
use crate::steps::one_day_timesteps::convert_to_one_day_timesteps;

/// The only target version the one-day-timestep conversion applies to.
pub const ONE_DAY_TIMESTEPS_VERSION: u32 = 18;

/// Outcome of a successful migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Version the document declared before migration.
    pub from_version: u32,
    /// Version the document declares now.
    pub to_version: u32,
    /// Schema the migrated document should be validated against.
    pub schema_file: String,
    /// Version pairs of the steps applied, in order.
    pub steps_applied: Vec<(u32, u32)>,
    /// Whether the one-day-timestep conversion ran.
    pub one_day_timesteps: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl MigrationReport {
    /// `true` when the document was already at the target version.
    pub fn is_noop(&self) -> bool {
        self.steps_applied.is_empty() && !self.one_day_timesteps
    }
}

/// Applies registered steps to documents under fixed options.
///
/// A `Migrator` holds no per-document state and can be shared between
/// threads.
#[derive(Debug, Clone)]
pub struct Migrator {
    registry: StepRegistry,
    options: MigrateOptions,
}

impl Migrator {
    /// A migrator over the standard steps.
    pub fn new(options: MigrateOptions) -> Result<Self, MigrateError> {
        Ok(Self::with_registry(StepRegistry::standard()?, options))
    }

    pub fn with_registry(registry: StepRegistry, options: MigrateOptions) -> Self {
        Self { registry, options }
    }

    pub fn options(&self) -> &MigrateOptions {
        &self.options
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Reject targets no document can be migrated to.
    pub fn check_target(&self) -> Result<(), MigrateError> {
        let target = self.options.target_version;
        let reason = if target == UNSUPPORTED_TARGET {
            Some("version 1 was never well-defined and is merged into version 2".to_string())
        } else if target > CURRENT_VERSION {
            Some(format!("the newest known version is {CURRENT_VERSION}"))
        } else if self.options.one_day_timesteps && target != ONE_DAY_TIMESTEPS_VERSION {
            Some(format!(
                "1-day timestep conversion requires target version {ONE_DAY_TIMESTEPS_VERSION}"
            ))
        } else {
            None
        };
        match reason {
            Some(reason) => Err(MigrateError::UnsupportedTarget { target, reason }),
            None => Ok(()),
        }
    }

    /// Migrate `doc` in place to the configured target version.
    ///
    /// On error the document is left partially migrated, declaring the
    /// version of the step that failed; callers should discard it.
    pub fn migrate(&self, doc: &mut Document) -> Result<MigrationReport, MigrateError> {
        self.check_target()?;
        let target = self.options.target_version;
        let from_version = doc.schema_version()?;
        if from_version > target {
            return Err(MigrateError::VersionAhead {
                current: from_version,
                target,
            });
        }

        let mut ctx = StepContext::new(&self.options.policy);
        let mut steps_applied = Vec::new();
        for from in from_version..target {
            let to = from + 1;
            let step = self
                .registry
                .get(from)
                .ok_or(MigrateError::MissingStep { from, to })?;

            doc.set_schema_version(to);
            doc.root_mut()
                .set_attr(SCHEMA_LOCATION_ATTR, schema_file_name(to, self.options.naming));
            ctx.enter(from, to);
            debug!(from, to, summary = step.summary, "applying step");

            if let Err(source) = step.apply(doc.root_mut(), &mut ctx) {
                warn!(from, to, error = %source, "step failed");
                return Err(MigrateError::StepFailed { from, to, source });
            }
            steps_applied.push((from, to));
        }

        if self.options.one_day_timesteps {
            ctx.enter(target, target);
            debug!(version = target, "converting to 1-day timesteps");
            convert_to_one_day_timesteps(doc.root_mut(), &mut ctx).map_err(|source| {
                warn!(error = %source, "1-day timestep conversion failed");
                MigrateError::TimestepConversionFailed { source }
            })?;
        }

        let report = MigrationReport {
            from_version,
            to_version: target,
            schema_file: schema_file_name(target, self.options.naming),
            steps_applied,
            one_day_timesteps: self.options.one_day_timesteps,
            diagnostics: ctx.into_diagnostics(),
        };
        info!(
            from = report.from_version,
            to = report.to_version,
            diagnostics = report.diagnostics.len(),
            "migration complete"
        );
        Ok(report)
    }
}

/// Migrate `doc` with the standard steps.
///
/// Shorthand for [`Migrator::new`] followed by [`Migrator::migrate`].
pub fn migrate(doc: &mut Document, options: &MigrateOptions) -> Result<MigrationReport, MigrateError> {
    Migrator::new(options.clone())?.migrate(doc)
}
