//! Steps 28 -> 29 through 30 -> 31.
//!
//! The new ITN model, seasonality as an explicit entomology input, deployment
//! lists and the generic vector-population intervention.

use crate::config::{ItnDescription, PolicySwitch};
use crate::derived::{annual_eir, steps_per_year, FourierCoefficients};
use crate::diagnostic::DiagnosticKind;
use crate::document::Element;
use crate::error::StepError;
use crate::registry::StepContext;
use crate::tree_utils::{
    child_mut, contains_option, format_number, option_element, parse_attr, promote_attr,
    promote_attr_to_beta_mean, require_attr, require_child, require_child_mut, take_attr,
    take_required_child, take_unique_child,
};

// ---------------------------------------------------------------------------
// 28 -> 29
// ---------------------------------------------------------------------------

/// Per-species ITN effect parameters of the default parameterisation.
fn itn_anopheles_params(
    mosquito: &str,
    deterrency_insecticide_factor: &str,
    preprandial_insecticide_scaling: &str,
) -> Element {
    Element::new("anophelesParams")
        .with_attr("mosquito", mosquito)
        .with_child(
            Element::new("deterrency")
                .with_attr("holeFactor", "0.5")
                .with_attr("insecticideFactor", deterrency_insecticide_factor)
                .with_attr("interactionFactor", "1.492537")
                .with_attr("holeScalingFactor", "0.1")
                .with_attr("insecticideScalingFactor", "0.1"),
        )
        .with_child(
            Element::new("preprandialKillingEffect")
                .with_attr("baseFactor", "0.09")
                .with_attr("holeFactor", "0.57")
                .with_attr("insecticideFactor", "0.604")
                .with_attr("interactionFactor", "-0.424")
                .with_attr("holeScalingFactor", "0.1")
                .with_attr("insecticideScalingFactor", preprandial_insecticide_scaling),
        )
        .with_child(
            Element::new("postprandialKillingEffect")
                .with_attr("baseFactor", "0.10")
                .with_attr("holeFactor", "0")
                .with_attr("insecticideFactor", "0.55")
                .with_attr("interactionFactor", "0")
                .with_attr("holeScalingFactor", "0.1")
                .with_attr("insecticideScalingFactor", "0.1"),
        )
}

/// The default ITN description of schema 29.
fn default_itn_description() -> Element {
    Element::new("description")
        .with_child(Element::new("usage").with_attr("value", "0.8"))
        .with_child(
            Element::new("holeRate")
                .with_attr("mean", "0.9")
                .with_attr("sigma", "0.8"),
        )
        .with_child(
            Element::new("ripRate")
                .with_attr("mean", "0.7")
                .with_attr("sigma", "0.8"),
        )
        .with_child(Element::new("ripFactor").with_attr("value", "0.4"))
        .with_child(
            Element::new("initialInsecticide")
                .with_attr("mu", "70")
                .with_attr("sigma", "20"),
        )
        .with_child(
            Element::new("insecticideDecay")
                .with_attr("L", "2.2")
                .with_attr("function", "exponential")
                .with_attr("mu", "-0.32")
                .with_attr("sigma", "0.8"),
        )
        .with_child(
            Element::new("attritionOfNets")
                .with_attr("L", "12")
                .with_attr("k", "2")
                .with_attr("function", "smooth-compact"),
        )
        .with_child(itn_anopheles_params("gambiae_ss", "0.67", "1"))
        .with_child(itn_anopheles_params("funestus", "0.67", "1"))
        .with_child(itn_anopheles_params("arabiensis", "0.1", "0.1"))
}

pub fn translate_28_to_29(root: &mut Element, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let interventions = require_child_mut(root, "interventions")?;
    let Some(itn) = child_mut(interventions, "ITN")? else {
        return Ok(());
    };
    match ctx.policy().itn_description {
        None => Err(StepError::policy(
            PolicySwitch::ItnDescription,
            "the ITN description changed and cannot be translated automatically",
        )),
        Some(ItnDescription::Manual) => {
            ctx.warn(
                DiagnosticKind::ManualFollowUp,
                "ITN description left unchanged as requested; it must be updated by hand",
            );
            Ok(())
        }
        Some(ItnDescription::Replace) => {
            itn.take_children("decay");
            itn.take_descendants("anophelesParams");
            itn.insert(0, default_itn_description());
            ctx.warn(
                DiagnosticKind::DefaultInserted,
                "ITN description replaced with the default parameterisation",
            );
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// 29 -> 30
// ---------------------------------------------------------------------------

const SURVEY_RENAMES: [(&str, &str); 2] = [
    ("Vector_EIR_Input", "inputEIR"),
    ("Vector_EIR_Simulated", "simulatedEIR"),
];

/// Mosquito attributes promoted to `<name value=".."/>` elements, in order,
/// before `availabilityVariance` is added.
const MOSQ_VALUES: [&str; 5] = [
    "mosqRestDuration",
    "extrinsicIncubationPeriod",
    "mosqLaidEggsSameDayProportion",
    "mosqSeekingDuration",
    "mosqSurvivalFeedingCycleProbability",
];

/// Promoted to `<name mean=".." variance="0"/>` after `availabilityVariance`.
const MOSQ_BETA_MEANS: [&str; 3] = ["mosqProbBiting", "mosqProbFindRestSite", "mosqProbResting"];

const MOSQ_TRAILING_VALUES: [&str; 2] = ["mosqProbOvipositing", "mosqHumanBloodIndex"];

const NON_HUMAN_HOST_VALUES: [&str; 4] = [
    "mosqRelativeEntoAvailability",
    "mosqProbBiting",
    "mosqProbFindRestSite",
    "mosqProbResting",
];

/// Intervention kinds whose `timed` children are renamed in place.
const TIMED_DEPLOYMENT_KINDS: [&str; 4] =
    ["changeHS", "changeEIR", "insertR_0Case", "uninfectVectors"];

/// Intervention kinds whose deployments are wrapped into lists of `deploy`,
/// with the lists each kind can carry.
const DEPLOY_LIST_KINDS: [(&str, &[&str]); 8] = [
    ("MDA", &["timed"]),
    ("vaccine", &["continuous", "timed"]),
    ("IPT", &["continuous", "timed"]),
    ("ITN", &["continuous", "timed"]),
    ("IRS", &["timed"]),
    ("vectorDeterrent", &["timed"]),
    ("cohort", &["continuous", "timed"]),
    ("immuneSuppression", &["timed"]),
];

pub fn translate_29_to_30(root: &mut Element, _ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let monitoring = require_child_mut(root, "monitoring")?;
    for option in require_child_mut(monitoring, "SurveyOptions")?.children_named_mut("option") {
        let renamed = SURVEY_RENAMES
            .iter()
            .find(|(old, _)| option.attr("name") == Some(*old));
        if let Some((_, new)) = renamed {
            option.set_attr("name", *new);
        }
    }

    let ento = require_child_mut(root, "entomology")?;
    let mode = match require_attr(ento, "mode")?.trim() {
        "2" => "forced",
        "4" => "dynamic",
        other => {
            return Err(StepError::data(
                "entomology@mode",
                format!("unsupported entomology mode {other:?}"),
            ))
        }
    };
    ento.set_attr("mode", mode);
    ento.rename_attr("annualEIR", "scaledAnnualEIR");

    if let Some(vector) = child_mut(ento, "vector")? {
        for anopheles in vector.children_named_mut("anopheles") {
            translate_anopheles(anopheles)?;
        }
    }

    let interventions = require_child_mut(root, "interventions")?;
    for kind in TIMED_DEPLOYMENT_KINDS {
        if let Some(interv) = child_mut(interventions, kind)? {
            for timed in interv.children_named_mut("timed") {
                timed.name = "timedDeployment".to_string();
            }
        }
    }
    if let Some(irs) = child_mut(interventions, "IRS")? {
        translate_irs_description(irs)?;
    }
    for (kind, lists) in DEPLOY_LIST_KINDS {
        if let Some(interv) = child_mut(interventions, kind)? {
            for list in lists {
                wrap_deployments(interv, list);
            }
        }
    }
    Ok(())
}

fn translate_anopheles(anopheles: &mut Element) -> Result<(), StepError> {
    let mosq = require_child_mut(anopheles, "mosq")?;
    for name in MOSQ_VALUES {
        promote_attr(mosq, name)?;
    }
    mosq.append(Element::new("availabilityVariance").with_attr("value", "0"));
    for name in MOSQ_BETA_MEANS {
        promote_attr_to_beta_mean(mosq, name)?;
    }
    for name in MOSQ_TRAILING_VALUES {
        promote_attr(mosq, name)?;
    }
    for host in anopheles.children_named_mut("nonHumanHosts") {
        for name in NON_HUMAN_HOST_VALUES {
            promote_attr(host, name)?;
        }
    }

    let mut seasonality = Element::new("seasonality").with_attr("input", "EIR");
    if let Some(eir) = take_unique_child(anopheles, "EIR")? {
        let coefficients = FourierCoefficients {
            a0: parse_attr(&eir, "a0")?,
            a1: parse_attr(&eir, "a1")?,
            b1: parse_attr(&eir, "b1")?,
            a2: parse_attr(&eir, "a2")?,
            b2: parse_attr(&eir, "b2")?,
            rotate_angle: parse_attr(&eir, "EIRRotateAngle")?,
        };
        let coeffic = |a: &str, b: &str| -> Result<Element, StepError> {
            Ok(Element::new("coeffic")
                .with_attr("a", require_attr(&eir, a)?)
                .with_attr("b", require_attr(&eir, b)?))
        };
        seasonality.append(
            Element::new("fourierSeries")
                .with_child(coeffic("a1", "b1")?)
                .with_child(coeffic("a2", "b2")?)
                .with_attr("EIRRotateAngle", require_attr(&eir, "EIRRotateAngle")?),
        );
        seasonality.set_attr("annualEIR", format_number(annual_eir(&coefficients)));
    }
    if let Some(monthly) = take_unique_child(anopheles, "monthlyEIR")? {
        let mut values = Element::new("monthlyValues").with_attr("smoothing", "fourier");
        for item in monthly.children_named("item") {
            values.append(Element::new("value").with_text(item.text()));
        }
        seasonality.append(values);
        seasonality.set_attr("annualEIR", require_attr(&monthly, "annualEIR")?);
    }
    anopheles.insert(0, seasonality);
    Ok(())
}

/// Gather the IRS decay and per-species parameters into a `description`.
fn translate_irs_description(irs: &mut Element) -> Result<(), StepError> {
    let mut description = Element::new("description").with_child(take_required_child(irs, "decay")?);
    for mut params in irs.take_children("anophelesParams") {
        let index = params.position("killingEffect").ok_or_else(|| {
            StepError::structural("IRS/anophelesParams/killingEffect", "required element is missing")
        })?;
        if let Some(post) = params.children[index].as_element_mut() {
            post.name = "postprandialKillingEffect".to_string();
        }
        params.insert(
            index,
            Element::new("preprandialKillingEffect").with_attr("value", "0"),
        );
        description.append(params);
    }
    irs.append(description);
    Ok(())
}

/// Move the `list` children of `interv` into a single `list` element of `deploy`s.
fn wrap_deployments(interv: &mut Element, list: &str) {
    let deployments = interv.take_children(list);
    if deployments.is_empty() {
        return;
    }
    let mut wrapper = Element::new(list);
    for mut deployment in deployments {
        deployment.name = "deploy".to_string();
        wrapper.append(deployment);
    }
    interv.append(wrapper);
}

// ---------------------------------------------------------------------------
// 30 -> 31
// ---------------------------------------------------------------------------

const LARVICIDING_DEFAULT_NAME: &str = "simple larviciding";

pub fn translate_30_to_31(root: &mut Element, _ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let model = require_child_mut(root, "model")?;
    let options = require_child_mut(model, "ModelOptions")?;
    if !contains_option(options, "INNATE_MAX_DENS") {
        options.append(option_element("INNATE_MAX_DENS", false));
    }

    let Some(interventions) = child_mut(root, "interventions")? else {
        return Ok(());
    };
    let Some(mut larviciding) = take_unique_child(interventions, "larviciding")? else {
        return Ok(());
    };

    let name = larviciding
        .attr("name")
        .unwrap_or(LARVICIDING_DEFAULT_NAME)
        .to_string();
    larviciding.set_attr("name", format!("{name} translated from schema 30"));

    let model = require_child(root, "model")?;
    let interval = require_attr(require_child(model, "parameters")?, "interval")?;
    let steps_per_year = steps_per_year("model/parameters@interval", interval)?;

    let description = require_child_mut(&mut larviciding, "description")?;
    for anopheles in description.children_named_mut("anopheles") {
        let duration: f64 = parse_attr(&take_required_child(anopheles, "duration")?, "value")?;
        let mut effectiveness = take_required_child(anopheles, "effectiveness")?;
        anopheles.append(
            Element::new("emergenceReduction")
                .with_attr("initial", take_attr(&mut effectiveness, "value")?)
                .with_child(
                    Element::new("decay")
                        .with_attr("function", "step")
                        .with_attr("L", format_number(duration / steps_per_year)),
                ),
        );
    }
    larviciding.name = "intervention".to_string();

    let interventions = require_child_mut(root, "interventions")?;
    interventions.append(Element::new("vectorPop").with_child(larviciding));
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
