//! Steps 7 -> 8, 10 -> 11 and 11 -> 12.
//!
//! Emergence data moved out of external files and into the model, and the old
//! case management model was retired.

use crate::diagnostic::DiagnosticKind;
use crate::document::Element;
use crate::error::StepError;
use crate::registry::StepContext;
use crate::tree_utils::{child_mut, require_child_mut};

pub fn translate_7_to_8(root: &mut Element, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let ento = require_child_mut(root, "entoData")?;
    let Some(vector) = child_mut(ento, "vector")? else {
        return Ok(());
    };
    let mosq = require_child_mut(require_child_mut(vector, "anopheles")?, "mosq")?;
    if mosq.remove_attr("emergenceRateFilename").is_some() {
        ctx.warn(
            DiagnosticKind::ManualFollowUp,
            "emergenceRateFilename removed; emergence rates must now be given in the document",
        );
    }
    Ok(())
}

/// Initial infected/infectious proportions of a newly modelled mosquito population.
const DEFAULT_PROP_INFECTED: &str = "0.078";
const DEFAULT_PROP_INFECTIOUS: &str = "0.021";

pub fn translate_10_to_11(root: &mut Element, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let ento = require_child_mut(root, "entoData")?;
    let Some(vector) = child_mut(ento, "vector")? else {
        return Ok(());
    };
    let mut species = 0;
    vector.for_each_descendant_mut("anopheles", &mut |anopheles| {
        anopheles.take_children("emergence");
        anopheles.set_attr("propInfected", DEFAULT_PROP_INFECTED);
        anopheles.set_attr("propInfectious", DEFAULT_PROP_INFECTIOUS);
        species += 1;
    });
    if species > 0 {
        ctx.warn(
            DiagnosticKind::DefaultInserted,
            format!(
                "propInfected={DEFAULT_PROP_INFECTED} and propInfectious={DEFAULT_PROP_INFECTIOUS} \
                 set for {species} mosquito species; these defaults may not be suitable"
            ),
        );
    }
    Ok(())
}

pub fn translate_11_to_12(root: &mut Element, _ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    if root.find("caseManagements").is_some() {
        return Err(StepError::unsupported(
            "scenario/caseManagements",
            "case managements must be replaced by an EventScheduler model by hand",
        ));
    }
    root.remove_attr("simulationDuration");
    Ok(())
}
