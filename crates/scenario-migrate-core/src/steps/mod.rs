//! Per-version transformation steps.
//!
//! Each step rewrites a document whose content is at version N into version
//! N+1. Steps assume the output of every earlier step and are not idempotent:
//! the dispatcher's version gating is what keeps them from running twice.
//!
//! Modules group steps by schema era; [`STANDARD_STEPS`] lists every step in
//! version order.

pub mod one_day_timesteps;
pub mod v01_v06;
pub mod v07_v12;
pub mod v13_model_options;
pub mod v14_v19;
pub mod v20_v24;
pub mod v25_v27;
pub mod v28_interventions;
pub mod v29_v31;

use crate::document::Element;
use crate::error::StepError;
use crate::registry::{Step, StepContext};

/// Steps for versions without content changes.
pub fn no_change(_root: &mut Element, _ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    Ok(())
}

/// Every step from version 0 to [`crate::CURRENT_VERSION`], in order.
pub static STANDARD_STEPS: &[Step] = &[
    Step::new(0, "pre-versioning baseline", no_change),
    Step::new(1, "namespace, defaults, best -> value", v01_v06::translate_1_to_2),
    Step::new(2, "no content change", no_change),
    Step::new(3, "vector / non-vector entomology split", v01_v06::translate_3_to_4),
    Step::new(4, "infection incidence flag remap", v01_v06::translate_4_to_5),
    Step::new(5, "case management nmf split", v01_v06::translate_5_to_6),
    Step::new(6, "ITN/IRS descriptions added", no_change),
    Step::new(7, "emergence rate file removed", v07_v12::translate_7_to_8),
    Step::new(8, "no content change", no_change),
    Step::new(9, "no content change", no_change),
    Step::new(10, "emergence moved into model", v07_v12::translate_10_to_11),
    Step::new(11, "case managements retired", v07_v12::translate_11_to_12),
    Step::new(12, "model and survey options", v13_model_options::translate_12_to_13),
    Step::new(13, "drug description review", v14_v19::translate_13_to_14),
    Step::new(14, "no content change", no_change),
    Step::new(15, "model element and health system", v14_v19::translate_15_to_16),
    Step::new(16, "mosquito feeding parameters", v14_v19::translate_16_to_17),
    Step::new(17, "demography and mode relocation", v14_v19::translate_17_to_18),
    Step::new(18, "EIR input mode 3 retired", v14_v19::translate_18_to_19),
    Step::new(19, "health system sequelae groups", v20_v24::translate_19_to_20),
    Step::new(20, "intervention descriptions", v20_v24::translate_20_to_21),
    Step::new(21, "no content change", no_change),
    Step::new(22, "IPTi report-only-at-risk", v20_v24::translate_22_to_23),
    Step::new(23, "human availability and weight", v20_v24::translate_23_to_24),
    Step::new(24, "decay functions and MDA decisions", v25_v27::translate_24_to_25),
    Step::new(25, "daily outcomes and shared decay", v25_v27::translate_25_to_26),
    Step::new(26, "no content change", no_change),
    Step::new(27, "interventions grouped by kind", v28_interventions::translate_27_to_28),
    Step::new(28, "ITN parameterisation", v29_v31::translate_28_to_29),
    Step::new(29, "seasonality and deployment lists", v29_v31::translate_29_to_30),
    Step::new(30, "innate max density and larviciding", v29_v31::translate_30_to_31),
];
