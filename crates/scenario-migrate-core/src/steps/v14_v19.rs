//! Steps 13 -> 14 through 18 -> 19.
//!
//! Model parameters were gathered under a `model` element, the health system
//! was split from its case fatality rates, mosquito feeding-cycle parameters
//! became explicit and the static EIR input mode 3 was retired.

use crate::diagnostic::DiagnosticKind;
use crate::document::Element;
use crate::error::StepError;
use crate::registry::StepContext;
use crate::tree_utils::{
    child, child_mut, format_number, parse_attr, require_attr, require_child, require_child_mut,
    take_attr, take_required_child, take_unique_child,
};

// ---------------------------------------------------------------------------
// 13 -> 14
// ---------------------------------------------------------------------------

pub fn translate_13_to_14(root: &mut Element, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    if root.find("drugDescription").is_some() {
        ctx.warn(
            DiagnosticKind::ManualFollowUp,
            "drugDescription element has changed; please rewrite it manually",
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 15 -> 16
// ---------------------------------------------------------------------------

pub fn translate_15_to_16(root: &mut Element, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let model_options = root.take_descendant("ModelOptions").ok_or_else(|| {
        StepError::structural("scenario/ModelOptions", "required element is missing")
    })?;
    let parameters = take_required_child(root, "parameters")?;

    let (health_system, memory) = match take_unique_child(root, "healthSystem")? {
        None => {
            let mut scheduler = root.take_descendant("EventScheduler").ok_or_else(|| {
                StepError::structural(
                    "scenario/EventScheduler",
                    "neither healthSystem nor EventScheduler is present",
                )
            })?;
            let memory = take_attr(&mut scheduler, "healthSystemMemory")?;
            ctx.warn(
                DiagnosticKind::DefaultInserted,
                "event scheduler health system given a case fatality rate of 0",
            );
            let cfr = Element::new("CFR").with_child(
                Element::new("group")
                    .with_attr("cfr", "0")
                    .with_attr("lowerbound", "0"),
            );
            let health_system = Element::new("healthSystem")
                .with_child(scheduler)
                .with_child(cfr);
            (health_system, memory)
        }
        Some(mut outcomes) => {
            let memory = take_attr(&mut outcomes, "healthSystemMemory")?;
            outcomes.name = "ImmediateOutcomes".to_string();
            let cfr = take_required_child(&mut outcomes, "CFR")?;
            let health_system = Element::new("healthSystem")
                .with_child(outcomes)
                .with_child(cfr);
            (health_system, memory)
        }
    };

    root.try_for_each_descendant_mut("intervention", &mut |intervention| {
        let Some(mut outcomes) = take_unique_child(intervention, "changeHS")? else {
            return Ok(());
        };
        outcomes.remove_attr("healthSystemMemory");
        outcomes.name = "ImmediateOutcomes".to_string();
        let cfr = take_required_child(&mut outcomes, "CFR")?;
        intervention.append(
            Element::new("changeHS")
                .with_child(outcomes)
                .with_child(cfr),
        );
        Ok::<(), StepError>(())
    })?;

    root.append(
        Element::new("model")
            .with_child(model_options)
            .with_child(Element::new("clinical").with_attr("healthSystemMemory", memory))
            .with_child(parameters),
    );
    root.insert_before("entoData", health_system);
    Ok(())
}

// ---------------------------------------------------------------------------
// 16 -> 17
// ---------------------------------------------------------------------------

const SPECIES: [&str; 3] = ["gambiae_ss", "funestus", "arabiensis"];
const HUMAN_BLOOD_INDEX: [f64; 3] = [0.939, 0.98, 0.871];
const HUMAN_BLOOD_INDEX_NO_NON_HUMAN_HOSTS: f64 = 1.0;
const LAID_EGGS_SAME_DAY_PROPORTION: [f64; 3] = [0.313, 0.616, 0.313];
const SURVIVAL_FEEDING_CYCLE_PROBABILITY: [f64; 3] = [0.623, 0.611, 0.623];
const RELATIVE_ENTO_AVAILABILITY: f64 = 1.0;
const NON_HUMAN_HOST_NUMBER: f64 = 1.0;

pub fn translate_16_to_17(root: &mut Element, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let Some(vector) = root.find_mut("vector") else {
        return Ok(());
    };

    let first_host = vector
        .find("anopheles")
        .and_then(|anopheles| anopheles.find("nonHumanHosts"))
        .map(|host| host.attr("name").unwrap_or_default().to_string());
    if let Some(name) = first_host {
        vector.append(
            Element::new("nonHumanHosts")
                .with_attr("name", name)
                .with_attr("number", format_number(NON_HUMAN_HOST_NUMBER)),
        );
    }

    vector.try_for_each_descendant_mut("anopheles", &mut |anopheles| {
        set_feeding_cycle_parameters(anopheles, ctx)
    })
}

fn set_feeding_cycle_parameters(
    anopheles: &mut Element,
    ctx: &mut StepContext<'_>,
) -> Result<(), StepError> {
    let species = anopheles.attr("mosquito").unwrap_or_default().to_string();
    let index = SPECIES.iter().position(|s| *s == species).ok_or_else(|| {
        StepError::unsupported(
            format!("anopheles[mosquito={species}]"),
            "no standard feeding-cycle values for this species; edit them by hand",
        )
    })?;

    let hosts = anopheles.count_descendants("nonHumanHosts");
    let human_blood_index = match hosts {
        0 => HUMAN_BLOOD_INDEX_NO_NON_HUMAN_HOSTS,
        1 => {
            if let Some(host) = anopheles.find_mut("nonHumanHosts") {
                host.set_attr(
                    "mosqRelativeEntoAvailability",
                    format_number(RELATIVE_ENTO_AVAILABILITY),
                );
                host.remove_attr("mosqEntoAvailability");
            }
            HUMAN_BLOOD_INDEX[index]
        }
        _ => {
            ctx.warn(
                DiagnosticKind::ManualFollowUp,
                format!(
                    "{species} has {hosts} non-human host types; edit their relative \
                     availabilities by hand"
                ),
            );
            HUMAN_BLOOD_INDEX[index]
        }
    };

    let mosq = anopheles
        .find_mut("mosq")
        .ok_or_else(|| StepError::structural("anopheles/mosq", "required element is missing"))?;
    mosq.set_attr("mosqHumanBloodIndex", format_number(human_blood_index));
    mosq.set_attr(
        "mosqLaidEggsSameDayProportion",
        format_number(LAID_EGGS_SAME_DAY_PROPORTION[index]),
    );
    mosq.set_attr(
        "mosqSurvivalFeedingCycleProbability",
        format_number(SURVIVAL_FEEDING_CYCLE_PROBABILITY[index]),
    );
    mosq.remove_attr("mosqEntoAvailability");
    mosq.remove_attr("mosqSeekingDeathRate");

    ctx.warn(
        DiagnosticKind::DefaultInserted,
        format!("standard feeding-cycle parameters set for {species}"),
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// 17 -> 18
// ---------------------------------------------------------------------------

pub fn translate_17_to_18(root: &mut Element, _ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    require_child(root, "demography")?;
    require_child(root, "entoData")?;
    for attr in ["popSize", "maximumAgeYrs", "mode"] {
        require_attr(root, attr)?;
    }

    let pop_size = take_attr(root, "popSize")?;
    let maximum_age = take_attr(root, "maximumAgeYrs")?;
    let mode = take_attr(root, "mode")?;

    let demography = require_child_mut(root, "demography")?;
    demography.set_attr("popSize", pop_size);
    demography.set_attr("maximumAgeYrs", maximum_age);
    require_child_mut(root, "entoData")?.set_attr("mode", mode);
    Ok(())
}

// ---------------------------------------------------------------------------
// 18 -> 19
// ---------------------------------------------------------------------------

const MODE_STATIC_EIR: i64 = 3;
const MODE_DYNAMIC: &str = "4";

pub fn translate_18_to_19(root: &mut Element, _ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let mode: i64 = parse_attr(require_child(root, "entoData")?, "mode")?;
    if mode == MODE_STATIC_EIR {
        if !has_eir_change_at_start(root)? {
            return Err(StepError::data(
                "scenario/entoData@mode",
                "mode is 3 but no changeEIR intervention exists at time 0",
            ));
        }
        require_child_mut(root, "entoData")?.set_attr("mode", MODE_DYNAMIC);
    }

    if let Some(model) = child_mut(root, "model")? {
        if let Some(parameters) = child_mut(model, "parameters")? {
            parameters.remove_attr("delta");
        }
    }
    Ok(())
}

/// Whether a timed intervention at time 0 supplies EIR values.
fn has_eir_change_at_start(root: &Element) -> Result<bool, StepError> {
    let Some(interventions) = child(root, "interventions")? else {
        return Ok(false);
    };
    let Some(timed) = child(interventions, "timed")? else {
        return Ok(false);
    };
    for intervention in timed.descendants("intervention") {
        let time: i64 = parse_attr(intervention, "time")?;
        if time == 0 && child(intervention, "changeEIR")?.is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::test_support::{names, run};
    use pretty_assertions::assert_eq;

    // -----------------------------------------------------------------------
    // Test 1: 13 -> 14 flags drug descriptions for review
    // -----------------------------------------------------------------------
    #[test]
    fn test_13_to_14_flags_drug_description() {
        let root = Element::new("scenario").with_child(
            Element::new("drugDescription")
                .with_child(Element::new("drug").with_attr("abbrev", "CQ")),
        );
        let (out, diagnostics) = run(translate_13_to_14, root.clone()).unwrap();
        assert_eq!(out, root);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::ManualFollowUp);
    }

    #[test]
    fn test_13_to_14_without_drug_description() {
        let root = Element::new("scenario").with_child(Element::new("model"));
        let (out, diagnostics) = run(translate_13_to_14, root.clone()).unwrap();
        assert_eq!(out, root);
        assert!(diagnostics.is_empty());
    }

    // -----------------------------------------------------------------------
    // Test 2: 15 -> 16 with an ImmediateOutcomes health system
    // -----------------------------------------------------------------------
    #[test]
    fn test_15_to_16_immediate_outcomes() {
        let root = Element::new("scenario")
            .with_child(Element::new("ModelOptions"))
            .with_child(Element::new("demography"))
            .with_child(
                Element::new("healthSystem")
                    .with_attr("healthSystemMemory", "6")
                    .with_attr("name", "hs")
                    .with_child(Element::new("drugRegimen"))
                    .with_child(Element::new("CFR")),
            )
            .with_child(Element::new("entoData"))
            .with_child(
                Element::new("interventions").with_child(
                    Element::new("timed").with_child(
                        Element::new("intervention").with_attr("time", "5").with_child(
                            Element::new("changeHS")
                                .with_attr("healthSystemMemory", "6")
                                .with_child(Element::new("CFR")),
                        ),
                    ),
                ),
            )
            .with_child(Element::new("parameters"));

        let (out, _) = run(translate_15_to_16, root).unwrap();
        assert_eq!(
            names(&out),
            vec!["demography", "healthSystem", "entoData", "interventions", "model"]
        );
        let model = out.find("model").unwrap();
        assert_eq!(names(model), vec!["ModelOptions", "clinical", "parameters"]);
        assert_eq!(
            model.find("clinical").unwrap().attr("healthSystemMemory"),
            Some("6")
        );
        let hs = out.find("healthSystem").unwrap();
        assert_eq!(names(hs), vec!["ImmediateOutcomes", "CFR"]);
        assert_eq!(names(hs.find("ImmediateOutcomes").unwrap()), vec!["drugRegimen"]);

        let change = out.find("changeHS").unwrap();
        assert_eq!(names(change), vec!["ImmediateOutcomes", "CFR"]);
        assert!(change.attributes.is_empty());
    }

    #[test]
    fn test_15_to_16_event_scheduler() {
        let root = Element::new("scenario")
            .with_child(Element::new("ModelOptions"))
            .with_child(Element::new("EventScheduler").with_attr("healthSystemMemory", "28"))
            .with_child(Element::new("parameters"));
        let (out, diagnostics) = run(translate_15_to_16, root).unwrap();
        let hs = out.find("healthSystem").unwrap();
        assert_eq!(names(hs), vec!["EventScheduler", "CFR"]);
        assert!(!hs.find("EventScheduler").unwrap().has_attr("healthSystemMemory"));
        assert_eq!(hs.find("group").unwrap().attr("cfr"), Some("0"));
        assert_eq!(diagnostics[0].kind, DiagnosticKind::DefaultInserted);
    }

    // -----------------------------------------------------------------------
    // Test 3: 16 -> 17 feeding-cycle parameters
    // -----------------------------------------------------------------------
    fn anopheles(species: &str, hosts: usize) -> Element {
        let mut a = Element::new("anopheles")
            .with_attr("mosquito", species)
            .with_child(
                Element::new("mosq")
                    .with_attr("mosqEntoAvailability", "0.1")
                    .with_attr("mosqSeekingDeathRate", "1.6"),
            );
        for i in 0..hosts {
            a.append(
                Element::new("nonHumanHosts")
                    .with_attr("name", format!("cattle{i}"))
                    .with_attr("mosqEntoAvailability", "0.2"),
            );
        }
        a
    }

    #[test]
    fn test_16_to_17_single_host() {
        let root = Element::new("scenario").with_child(
            Element::new("entoData").with_child(
                Element::new("vector")
                    .with_child(anopheles("funestus", 1))
                    .with_child(anopheles("gambiae_ss", 0)),
            ),
        );
        let (out, _) = run(translate_16_to_17, root).unwrap();
        let vector = out.find("vector").unwrap();
        let summary = vector.children_named("nonHumanHosts").next().unwrap();
        assert_eq!(summary.attr("name"), Some("cattle0"));
        assert_eq!(summary.attr("number"), Some("1.0"));

        let mosqs = vector.descendants("mosq");
        assert_eq!(mosqs[0].attr("mosqHumanBloodIndex"), Some("0.98"));
        assert_eq!(mosqs[0].attr("mosqLaidEggsSameDayProportion"), Some("0.616"));
        assert!(!mosqs[0].has_attr("mosqSeekingDeathRate"));
        assert_eq!(mosqs[1].attr("mosqHumanBloodIndex"), Some("1.0"));

        let host = vector.find("anopheles").unwrap().find("nonHumanHosts").unwrap();
        assert_eq!(host.attr("mosqRelativeEntoAvailability"), Some("1.0"));
        assert!(!host.has_attr("mosqEntoAvailability"));
    }

    #[test]
    fn test_16_to_17_several_hosts_warns() {
        let root = Element::new("scenario")
            .with_child(Element::new("vector").with_child(anopheles("arabiensis", 2)));
        let (_, diagnostics) = run(translate_16_to_17, root).unwrap();
        assert!(diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::ManualFollowUp));
    }

    #[test]
    fn test_16_to_17_unknown_species_fails() {
        let root = Element::new("scenario")
            .with_child(Element::new("vector").with_child(anopheles("stephensi", 0)));
        let err = run(translate_16_to_17, root).unwrap_err();
        assert!(matches!(err, StepError::UnsupportedTranslation { .. }));
    }

    // -----------------------------------------------------------------------
    // Test 4: 17 -> 18 and 18 -> 19
    // -----------------------------------------------------------------------
    #[test]
    fn test_17_to_18_moves_attributes() {
        let root = Element::new("scenario")
            .with_attr("popSize", "1000")
            .with_attr("maximumAgeYrs", "90")
            .with_attr("mode", "2")
            .with_child(Element::new("demography"))
            .with_child(Element::new("entoData"));
        let (out, _) = run(translate_17_to_18, root).unwrap();
        assert!(out.attributes.is_empty());
        assert_eq!(out.find("demography").unwrap().attr("popSize"), Some("1000"));
        assert_eq!(out.find("entoData").unwrap().attr("mode"), Some("2"));
    }

    fn mode_three(time: &str) -> Element {
        Element::new("scenario")
            .with_child(Element::new("entoData").with_attr("mode", "3"))
            .with_child(
                Element::new("interventions").with_child(
                    Element::new("timed").with_child(
                        Element::new("intervention")
                            .with_attr("time", time)
                            .with_child(Element::new("changeEIR")),
                    ),
                ),
            )
            .with_child(
                Element::new("model")
                    .with_child(Element::new("parameters").with_attr("delta", "0.1")),
            )
    }

    #[test]
    fn test_18_to_19_mode_three_with_eir_at_start() {
        let (out, _) = run(translate_18_to_19, mode_three("0")).unwrap();
        assert_eq!(out.find("entoData").unwrap().attr("mode"), Some("4"));
        assert!(!out.find("parameters").unwrap().has_attr("delta"));
    }

    #[test]
    fn test_18_to_19_mode_three_without_eir_fails() {
        let err = run(translate_18_to_19, mode_three("5")).unwrap_err();
        assert!(matches!(err, StepError::DataInvariant { .. }));
    }
}
