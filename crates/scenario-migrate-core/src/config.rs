//! Configuration for a migration run.
//!
//! Policy switches resolve legacy data whose historical meaning is ambiguous.
//! They are set once before a run (or a batch of runs) and only read by steps.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The newest schema version the engine can produce.
pub const CURRENT_VERSION: u32 = 31;

/// Version 1 was never well-defined and is merged into version 2.
pub const UNSUPPORTED_TARGET: u32 = 1;

/// How a schema version is turned into a schema file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaNaming {
    /// `schema_<version>.xsd`
    #[default]
    Versioned,
    /// `schema.xsd`
    Unversioned,
    /// `schema_current.xsd`
    Current,
}

impl SchemaNaming {
    pub fn file_name(self, version: u32) -> String {
        match self {
            SchemaNaming::Versioned => format!("schema_{version}.xsd"),
            SchemaNaming::Unversioned => "schema.xsd".to_string(),
            SchemaNaming::Current => "schema_current.xsd".to_string(),
        }
    }
}

/// Schema identifier associated with `version` under `naming`.
pub fn schema_file_name(version: u32, naming: SchemaNaming) -> String {
    naming.file_name(version)
}

/// Treatment of the max-density correction when a legacy model does not say.
///
/// Older models carried a bug in the maximum-density calculation; a document
/// without an explicit flag may have been calibrated with or without it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaxDensCorrection {
    /// Apply the correction (no option emitted; it is the default).
    Apply,
    /// Keep the old behaviour (`MAX_DENS_CORRECTION=false`).
    PreserveBug,
}

/// Meaning of an IPTi description with no IPTi interventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IptiSpIntent {
    /// The SP model was intended (`IPTI_SP_MODEL=true`).
    AssumeIntended,
    /// The description was left over (`IPTI_SP_MODEL=false`).
    AssumeUnintended,
}

/// Whether IPTi reporting should be restricted to the at-risk population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportOnlyAtRisk {
    On,
    Off,
}

/// Handling of legacy ITN descriptions, which have no mechanical equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItnDescription {
    /// Replace with the default net parameterisation.
    Replace,
    /// Leave as is; the operator edits it by hand.
    Manual,
}

/// Operator-supplied answers to ambiguous legacy semantics.
///
/// Every switch is `None` (unset) by default; a step that meets ambiguous
/// data with its switch unset fails with [`crate::StepError::PolicyRequired`].
///
/// ## Serialization Format
///
/// Fields are serialized in `kebab-case`. This naming convention is part of
/// the public contract for config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PolicyConfig {
    pub max_dens_correction: Option<MaxDensCorrection>,
    pub ipti_sp_without_interventions: Option<IptiSpIntent>,
    pub ipti_report_only_at_risk: Option<ReportOnlyAtRisk>,
    pub itn_description: Option<ItnDescription>,
}

/// Names a policy switch in diagnostics and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicySwitch {
    MaxDensCorrection,
    IptiSpWithoutInterventions,
    IptiReportOnlyAtRisk,
    ItnDescription,
}

impl PolicySwitch {
    /// Command-line flag that sets this switch.
    pub fn flag(self) -> &'static str {
        match self {
            PolicySwitch::MaxDensCorrection => "--max-dens-correction",
            PolicySwitch::IptiSpWithoutInterventions => "--ipti-sp-option-without-interventions",
            PolicySwitch::IptiReportOnlyAtRisk => "--ipti-report-only-at-risk",
            PolicySwitch::ItnDescription => "--itn-description",
        }
    }
}

impl fmt::Display for PolicySwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PolicySwitch::MaxDensCorrection => "max-dens-correction",
            PolicySwitch::IptiSpWithoutInterventions => "ipti-sp-without-interventions",
            PolicySwitch::IptiReportOnlyAtRisk => "ipti-report-only-at-risk",
            PolicySwitch::ItnDescription => "itn-description",
        };
        f.write_str(name)
    }
}

/// Options for a migration run.
///
/// ## Serialization Format
///
/// Fields are serialized in `kebab-case` (e.g. `target-version`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MigrateOptions {
    /// Version to migrate to. Default: [`CURRENT_VERSION`].
    pub target_version: u32,
    /// Schema file naming for the `xsi:noNamespaceSchemaLocation` attribute.
    pub naming: SchemaNaming,
    pub policy: PolicyConfig,
    /// Rescale a 5-day-timestep scenario to 1-day timesteps after reaching
    /// version 18. Only valid with target version 18.
    pub one_day_timesteps: bool,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            target_version: CURRENT_VERSION,
            naming: SchemaNaming::Versioned,
            policy: PolicyConfig::default(),
            one_day_timesteps: false,
        }
    }
}
