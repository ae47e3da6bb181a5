//! Step abstraction and the version-keyed step registry.
//!
//! A step is a plain function that rewrites a document declared at version
//! `from + 1` whose content is still at version `from`. Steps are registered in
//! an explicit table keyed by their source version; the standard registry is
//! checked for holes and duplicates when it is built.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::config::{PolicyConfig, CURRENT_VERSION};
use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::document::Element;
use crate::error::{MigrateError, StepError};
use crate::steps;

/// Signature of a step body. Receives the root element.
pub type StepFn = fn(&mut Element, &mut StepContext<'_>) -> Result<(), StepError>;

/// One N -> N+1 transformation.
#[derive(Clone, Copy)]
pub struct Step {
    pub from: u32,
    /// One-line description, shown by the CLI's `steps` listing.
    pub summary: &'static str,
    apply: StepFn,
}

impl Step {
    pub const fn new(from: u32, summary: &'static str, apply: StepFn) -> Self {
        Self {
            from,
            summary,
            apply,
        }
    }

    pub fn to(&self) -> u32 {
        self.from + 1
    }

    pub fn apply(&self, root: &mut Element, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
        (self.apply)(root, ctx)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("from", &self.from)
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

/// Read-only policy plus a diagnostic sink, handed to every step.
#[derive(Debug)]
pub struct StepContext<'a> {
    policy: &'a PolicyConfig,
    from: u32,
    to: u32,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> StepContext<'a> {
    pub fn new(policy: &'a PolicyConfig) -> Self {
        Self {
            policy,
            from: 0,
            to: 0,
            diagnostics: Vec::new(),
        }
    }

    /// Attribute subsequent diagnostics to the step `from -> to`.
    pub fn enter(&mut self, from: u32, to: u32) {
        self.from = from;
        self.to = to;
    }

    pub fn policy(&self) -> &PolicyConfig {
        self.policy
    }

    /// Record an operator-visible diagnostic.
    ///
    /// Diagnostics reach operators through the report; the log line is only
    /// emitted at debug level.
    pub fn warn(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
        let message = message.into();
        debug!(from = self.from, to = self.to, ?kind, "{message}");
        self.diagnostics.push(Diagnostic {
            from_version: self.from,
            to_version: self.to,
            kind,
            message,
        });
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

/// Steps keyed by source version.
#[derive(Debug, Clone, Default)]
pub struct StepRegistry {
    steps: BTreeMap<u32, Step>,
}

impl StepRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// All standard steps 0 -> 1 through `CURRENT_VERSION - 1 -> CURRENT_VERSION`.
    pub fn standard() -> Result<Self, MigrateError> {
        let mut registry = Self::new();
        for step in steps::STANDARD_STEPS {
            registry.register(*step)?;
        }
        registry.verify(CURRENT_VERSION)?;
        Ok(registry)
    }

    pub fn register(&mut self, step: Step) -> Result<(), MigrateError> {
        if self.steps.contains_key(&step.from) {
            return Err(MigrateError::DuplicateStep {
                from: step.from,
                to: step.to(),
            });
        }
        self.steps.insert(step.from, step);
        Ok(())
    }

    /// Check that every step from 0 up to `latest` is present.
    pub fn verify(&self, latest: u32) -> Result<(), MigrateError> {
        match (0..latest).find(|from| !self.steps.contains_key(from)) {
            Some(from) => Err(MigrateError::MissingStep { from, to: from + 1 }),
            None => Ok(()),
        }
    }

    pub fn get(&self, from: u32) -> Option<&Step> {
        self.steps.get(&from)
    }

    /// Steps in version order.
    pub fn iter(&self) -> impl Iterator<Item = &Step> {
        self.steps.values()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
