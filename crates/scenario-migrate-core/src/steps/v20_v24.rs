//! Steps 19 -> 20 through 23 -> 24.
//!
//! Sequelae data moved from the immediate-outcomes model to the health system
//! and changed from upper to lower age bounds, intervention descriptions got
//! their own container, the IPTi options were made explicit and human
//! availability/weight data moved out of code into the document.

use crate::config::{IptiSpIntent, PolicySwitch, ReportOnlyAtRisk};
use crate::derived::{
    match_legacy_buckets, AgeBucket, LEGACY_SEQUELAE_MAX_AGES, SEQUELAE_LOWER_BOUNDS,
};
use crate::diagnostic::DiagnosticKind;
use crate::document::Element;
use crate::error::StepError;
use crate::registry::StepContext;
use crate::tree_utils::{
    child, child_mut, format_number, option_element, parse_attr, path_of, require_child,
    require_child_mut, take_required_child, uses_option,
};

// ---------------------------------------------------------------------------
// 19 -> 20
// ---------------------------------------------------------------------------

/// Sequelae probabilities used by every fitted scenario without explicit data.
const DEFAULT_SEQUELAE_INPATIENT: [f64; 2] = [0.0132, 0.005];

pub fn translate_19_to_20(root: &mut Element, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let monitoring = require_child_mut(root, "monitoring")?;
    if let Some(continuous) = child_mut(monitoring, "continuous")? {
        if continuous.attr("period") == Some("5") {
            continuous.set_attr("period", "1");
        } else {
            ctx.warn(
                DiagnosticKind::ManualFollowUp,
                "monitoring/continuous period changed unit from days to timesteps; update it",
            );
        }
    }
    require_child_mut(monitoring, "SurveyOptions")?.for_each_descendant_mut(
        "option",
        &mut |option| {
            if option.attr("name") == Some("imr_summary") {
                option.set_attr("name", "allCauseIMR");
            }
        },
    );

    let ento = require_child_mut(root, "entoData")?;
    if let Some(vector) = child_mut(ento, "vector")? {
        vector.try_for_each_descendant_mut("anopheles", &mut |anopheles| {
            require_child_mut(anopheles, "mosq")?.set_attr("minInfectedThreshold", "0.01");
            Ok::<(), StepError>(())
        })?;
        ctx.warn(
            DiagnosticKind::DefaultInserted,
            "minInfectedThreshold created with default 0.01 for each mosquito species",
        );
    }

    if let Some(ipti_sp) = ipti_sp_model_option(root, ctx)? {
        let model = require_child_mut(root, "model")?;
        require_child_mut(model, "ModelOptions")?.append(option_element("IPTI_SP_MODEL", ipti_sp));
    }

    let health_system = require_child_mut(root, "healthSystem")?;
    translate_health_system(health_system, ctx)?;
    let Some(interventions) = child_mut(root, "interventions")? else {
        return Ok(());
    };
    let Some(timed) = child_mut(interventions, "timed")? else {
        return Ok(());
    };
    timed.try_for_each_descendant_mut("changeHS", &mut |change| {
        translate_health_system(change, ctx)
    })
}

/// Value of the `IPTI_SP_MODEL` option to add, if any.
fn ipti_sp_model_option(
    root: &Element,
    ctx: &mut StepContext<'_>,
) -> Result<Option<bool>, StepError> {
    let Some(interventions) = child(root, "interventions")? else {
        return Ok(None);
    };
    if child(interventions, "iptiDescription")?.is_none() {
        return Ok(None);
    }

    let mut deployments = 0;
    if let Some(continuous) = child(interventions, "continuous")? {
        deployments += continuous.count_descendants("ipti");
    }
    if let Some(timed) = child(interventions, "timed")? {
        deployments += timed
            .descendants("intervention")
            .iter()
            .map(|i| i.count_descendants("ipti"))
            .sum::<usize>();
    }
    if deployments > 0 {
        return Ok(Some(true));
    }

    ctx.warn(
        DiagnosticKind::ManualFollowUp,
        "iptiDescription without IPTi interventions",
    );
    match ctx.policy().ipti_sp_without_interventions {
        Some(IptiSpIntent::AssumeIntended) => Ok(Some(true)),
        Some(IptiSpIntent::AssumeUnintended) => Ok(Some(false)),
        None => Err(StepError::policy(
            PolicySwitch::IptiSpWithoutInterventions,
            "iptiDescription is present without any IPTi intervention",
        )),
    }
}

/// Move sequelae data onto a health system and rename CFR values.
fn translate_health_system(hs: &mut Element, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let values = match child_mut(hs, "ImmediateOutcomes")? {
        Some(outcomes) => {
            let path = path_of(outcomes, "pSequelaeInpatient");
            let legacy = take_required_child(outcomes, "pSequelaeInpatient")?;
            let buckets = legacy
                .descendants("item")
                .into_iter()
                .map(|item| {
                    Ok(AgeBucket {
                        max_age_yrs: parse_attr(item, "maxAgeYrs")?,
                        value: parse_attr(item, "value")?,
                    })
                })
                .collect::<Result<Vec<_>, StepError>>()?;
            match_legacy_buckets(&path, &buckets, &LEGACY_SEQUELAE_MAX_AGES)?
        }
        None => {
            ctx.warn(
                DiagnosticKind::DefaultInserted,
                "pSequelaeInpatient added with default data",
            );
            DEFAULT_SEQUELAE_INPATIENT.to_vec()
        }
    };

    let mut groups = Element::new("pSequelaeInpatient");
    for (value, lower_bound) in values.iter().zip(SEQUELAE_LOWER_BOUNDS) {
        groups.append(
            Element::new("group")
                .with_attr("value", format_number(*value))
                .with_attr("lowerbound", format_number(lower_bound)),
        );
    }
    hs.append(groups);

    require_child_mut(hs, "CFR")?.for_each_descendant_mut("group", &mut |group| {
        if let Some(cfr) = group.remove_attr("cfr") {
            group.set_attr("value", cfr);
        }
    });
    Ok(())
}

// ---------------------------------------------------------------------------
// 20 -> 21
// ---------------------------------------------------------------------------

pub fn translate_20_to_21(root: &mut Element, _ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let interventions = require_child_mut(root, "interventions")?;
    let mut descriptions = Element::new("descriptions");
    let mut kept = Vec::new();
    for element in interventions.take_elements() {
        if element.name == "continuous" || element.name == "timed" {
            kept.push(element);
        } else {
            descriptions.append(element);
        }
    }
    interventions.insert(0, descriptions);
    for element in kept {
        interventions.append(element);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 22 -> 23
// ---------------------------------------------------------------------------

pub fn translate_22_to_23(root: &mut Element, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    if !uses_option(root, "IPTI_SP_MODEL")? {
        return Ok(());
    }
    match ctx.policy().ipti_report_only_at_risk {
        Some(ReportOnlyAtRisk::Off) => Ok(()),
        Some(ReportOnlyAtRisk::On) => {
            let model = require_child_mut(root, "model")?;
            require_child_mut(model, "ModelOptions")?
                .append(option_element("REPORT_ONLY_AT_RISK", true));
            Ok(())
        }
        None => Err(StepError::policy(
            PolicySwitch::IptiReportOnlyAtRisk,
            "the scenario uses IPTI_SP_MODEL, whose reporting behaviour changed",
        )),
    }
}

// ---------------------------------------------------------------------------
// 23 -> 24
// ---------------------------------------------------------------------------

/// Age-group lower bounds (years) of the Tanzanian survey data.
const HUMAN_GROUP_LOWER_BOUNDS: [f64; 18] = [
    0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 20.0, 20.0,
];

const AVAILABILITY_TO_MOSQUITOES: [f64; 18] = [
    0.225940909648,
    0.286173633441,
    0.336898395722,
    0.370989854675,
    0.403114915112,
    0.442585112522,
    0.473839351511,
    0.512630464378,
    0.54487872702,
    0.581527755812,
    0.630257580698,
    0.663063362714,
    0.702417432755,
    0.734605377277,
    0.788908765653,
    0.839587932303,
    1.0,
    1.0,
];

/// Mean weight (kg) per age group.
const HUMAN_WEIGHT: [f64; 18] = [
    13.9856718,
    18.30372108,
    21.745749,
    24.25753512,
    26.06595444,
    28.48868784,
    30.84202788,
    33.48638244,
    35.20335432,
    37.19394024,
    40.1368962,
    42.00539916,
    44.53731348,
    46.77769728,
    49.48396092,
    54.36,
    60.0,
    60.0,
];

const WEIGHT_MULT_STD_DEV: &str = "0.14";

fn age_groups(name: &str, values: &[f64]) -> Element {
    let mut element = Element::new(name);
    for (lower_bound, value) in HUMAN_GROUP_LOWER_BOUNDS.iter().zip(values) {
        element.append(
            Element::new("group")
                .with_attr("lowerbound", format_number(*lower_bound))
                .with_attr("value", format_number(*value)),
        );
    }
    element
}

pub fn translate_23_to_24(root: &mut Element, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    if root.attr("assimMode") != Some("0") {
        return Err(StepError::unsupported(
            "scenario@assimMode",
            "assimMode is no longer supported",
        ));
    }
    root.remove_attr("assimMode");

    if require_child(root, "entoData")?.has_child("vector") {
        ctx.warn(
            DiagnosticKind::ManualFollowUp,
            "units of vector-model EIR changed from inoculations per average person to \
             inoculations per average adult; check the input EIR",
        );
    }

    let model = require_child_mut(root, "model")?;
    let interval: i64 = parse_attr(require_child(model, "parameters")?, "interval")?;
    let mut human = Element::new("human").with_child(age_groups(
        "availabilityToMosquitoes",
        &AVAILABILITY_TO_MOSQUITOES,
    ));
    if interval == 1 {
        human.append(
            age_groups("weight", &HUMAN_WEIGHT).with_attr("multStdDev", WEIGHT_MULT_STD_DEV),
        );
    }
    model.insert_before("parameters", human);
    ctx.warn(
        DiagnosticKind::DefaultInserted,
        "human availability to mosquitoes (and weight, for 1-day timesteps) added from the \
         Tanzanian survey data",
    );
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
