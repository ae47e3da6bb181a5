//! Step 27 -> 28: interventions grouped by kind.
//!
//! Up to version 27 an intervention was spread over three places: its
//! description under `descriptions`, its age-based deployment under
//! `continuous` and its mass deployments under `timed/intervention`. From 28
//! on, every intervention kind owns one element holding all three.

use tracing::debug;

use crate::derived::steps_per_year;
use crate::diagnostic::DiagnosticKind;
use crate::document::Element;
use crate::error::StepError;
use crate::registry::StepContext;
use crate::tree_utils::{
    child_mut, format_number, get_or_create_child, parse_attr, parse_text, require_attr,
    require_child, require_child_mut, take_required_child, take_unique_child,
};

/// `descriptions` children: (old name, intervention kind, new name).
const DESCRIPTION_KINDS: &[(&str, &str, &str)] = &[
    ("iptiDescription", "IPT", "description"),
    ("vaccineDescription", "vaccine", "description"),
    ("MDADescription", "MDA", "description"),
    ("ITNDecay", "ITN", "decay"),
    ("IRSDecay", "IRS", "decay"),
    ("VADecay", "vectorDeterrent", "decay"),
];

/// `descriptions/anopheles` children, which become per-species parameters.
const ANOPHELES_KINDS: &[(&str, &str)] = &[
    ("ITNDescription", "ITN"),
    ("IRSDescription", "IRS"),
    ("VADescription", "vectorDeterrent"),
];

const CONTINUOUS_KINDS: &[(&str, &str)] = &[
    ("ipti", "IPT"),
    ("vaccine", "vaccine"),
    ("cohort", "cohort"),
    ("ITN", "ITN"),
];

const TIMED_KINDS: &[(&str, &str)] = &[
    ("changeHS", "changeHS"),
    ("changeEIR", "changeEIR"),
    ("MDA", "MDA"),
    ("vaccinate", "vaccine"),
    ("ITN", "ITN"),
    ("IRS", "IRS"),
    ("VectorAvailability", "vectorDeterrent"),
    ("ipti", "IPT"),
    ("cohort", "cohort"),
    ("uninfectVectors", "uninfectVectors"),
    ("immuneSuppression", "immuneSuppression"),
    ("insertR_0Case", "insertR_0Case"),
];

const IMPORTED_INFECTIONS: &str = "importedInfectionsPerThousandHosts";

fn kind_of<'t>(table: &[(&str, &'t str)], name: &str) -> Option<&'t str> {
    table.iter().find(|(old, _)| *old == name).map(|(_, kind)| *kind)
}

fn unexpected(path: &str, name: &str) -> StepError {
    StepError::unsupported(format!("{path}/{name}"), "unexpected element")
}

/// Rename `element` and append it to the intervention element `kind`.
fn relocate(
    interventions: &mut Element,
    kind: &str,
    mut element: Element,
    new_name: &str,
) -> Result<(), StepError> {
    debug!(from = %element.name, to = %format!("{kind}/{new_name}"), "relocating");
    element.name = new_name.to_string();
    get_or_create_child(interventions, kind)?.append(element);
    Ok(())
}

pub fn translate_27_to_28(root: &mut Element, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    rename_entomology(root)?;
    for drugs in root.children_named_mut("drugDescription") {
        drugs.name = "pharmacology".to_string();
    }

    // Only needed, and only checked, when imported infections are present.
    let steps_per_year = require_child(root, "model").and_then(model_steps_per_year);

    let interventions = require_child_mut(root, "interventions")?;
    let descriptions = take_required_child(interventions, "descriptions")?;
    let continuous = take_unique_child(interventions, "continuous")?;
    let timed = take_unique_child(interventions, "timed")?;

    regroup_descriptions(interventions, descriptions)?;
    if let Some(mut continuous) = continuous {
        for element in continuous.take_elements() {
            let kind = kind_of(CONTINUOUS_KINDS, &element.name)
                .ok_or_else(|| unexpected("interventions/continuous", &element.name))?;
            relocate(interventions, kind, element, "continuous")?;
        }
    }
    if let Some(mut timed) = timed {
        let mut warned = false;
        for mut intervention in timed.take_children("intervention") {
            let time = require_attr(&intervention, "time")?.to_string();
            for mut element in intervention.take_elements() {
                if element.name == IMPORTED_INFECTIONS {
                    if !warned {
                        ctx.warn(
                            DiagnosticKind::ManualFollowUp,
                            "imported infections converted exactly from the old representation; \
                             this is probably not wanted unless results must be replicated",
                        );
                        warned = true;
                    }
                    add_imported_infections(interventions, &element, &time, steps_per_year.clone()?)?;
                    continue;
                }
                if element.name == "larviciding" {
                    return Err(StepError::unsupported(
                        "interventions/timed/intervention/larviciding",
                        "the larviciding model changed significantly; remove and re-add it",
                    ));
                }
                let kind = kind_of(TIMED_KINDS, &element.name).ok_or_else(|| {
                    unexpected("interventions/timed/intervention", &element.name)
                })?;
                element.set_attr("time", time.clone());
                relocate(interventions, kind, element, "timed")?;
            }
        }
    }
    Ok(())
}

fn rename_entomology(root: &mut Element) -> Result<(), StepError> {
    let ento = require_child_mut(root, "entoData")?;
    ento.name = "entomology".to_string();
    let Some(vector) = child_mut(ento, "vector")? else {
        return Ok(());
    };
    for anopheles in vector.children_named_mut("anopheles") {
        for element in anopheles.elements_mut() {
            match element.name.as_str() {
                "eir" => element.name = "EIR".to_string(),
                "monthlyEir" => element.name = "monthlyEIR".to_string(),
                _ => {}
            }
        }
    }
    Ok(())
}

fn model_steps_per_year(model: &Element) -> Result<f64, StepError> {
    let parameters = require_child(model, "parameters")?;
    steps_per_year(
        "model/parameters@interval",
        require_attr(parameters, "interval")?,
    )
}

fn regroup_descriptions(
    interventions: &mut Element,
    mut descriptions: Element,
) -> Result<(), StepError> {
    for element in descriptions.take_elements() {
        if element.name == "anopheles" {
            regroup_anopheles(interventions, element)?;
            continue;
        }
        let (_, kind, new_name) = DESCRIPTION_KINDS
            .iter()
            .find(|(old, _, _)| *old == element.name)
            .ok_or_else(|| unexpected("interventions/descriptions", &element.name))?;
        relocate(interventions, kind, element, new_name)?;
    }
    Ok(())
}

fn regroup_anopheles(interventions: &mut Element, mut anopheles: Element) -> Result<(), StepError> {
    let mosquito = anopheles.attr("mosquito").unwrap_or_default().to_string();
    for mut params in anopheles.take_elements() {
        let kind = kind_of(ANOPHELES_KINDS, &params.name).ok_or_else(|| {
            unexpected("interventions/descriptions/anopheles", &params.name)
        })?;
        params.set_attr("mosquito", mosquito.clone());
        let name = params.remove_attr("name");
        let group = get_or_create_child(interventions, kind)?;
        if let Some(name) = name {
            if !group.has_attr("name") {
                group.set_attr("name", name);
            }
        }
        params.name = "anophelesParams".to_string();
        group.append(params);
    }
    Ok(())
}

/// Convert a per-timestep imported-infection rate at `time` into a per-year
/// rate, switched back off one timestep later.
fn add_imported_infections(
    interventions: &mut Element,
    old: &Element,
    time: &str,
    steps_per_year: f64,
) -> Result<(), StepError> {
    let per_step: f64 = parse_text(old)?;
    let start: i64 = time.trim().parse().map_err(|_| {
        StepError::structural(
            "interventions/timed/intervention@time",
            format!("cannot parse {time:?}"),
        )
    })?;
    let end = start.checked_add(1).ok_or_else(|| {
        StepError::data(
            "interventions/timed/intervention@time",
            format!("time {start} leaves no room to switch imported infections off"),
        )
    })?;
    let rates = get_or_create_child(get_or_create_child(interventions, "importedInfections")?, "timed")?;

    // A zero inserted by the previous deployment at this same time is reused.
    let reuse_last = match rates.children_named("rate").last() {
        Some(last) => parse_attr::<i64>(last, "time")? == start,
        None => false,
    };
    if !reuse_last {
        rates.append(Element::new("rate").with_attr("time", start.to_string()));
    }
    if let Some(rate) = rates.children_named_mut("rate").last() {
        rate.set_attr("value", format_number(per_step * steps_per_year));
    }
    rates.append(
        Element::new("rate")
            .with_attr("time", end.to_string())
            .with_attr("value", "0"),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::test_support::{names, run};
    use pretty_assertions::assert_eq;

    fn scenario(interventions: Element) -> Element {
        Element::new("scenario")
            .with_child(Element::new("drugDescription"))
            .with_child(
                Element::new("entoData").with_child(
                    Element::new("vector").with_child(
                        Element::new("anopheles")
                            .with_child(Element::new("mosq"))
                            .with_child(Element::new("eir")),
                    ),
                ),
            )
            .with_child(interventions)
            .with_child(
                Element::new("model")
                    .with_child(Element::new("parameters").with_attr("interval", "5")),
            )
    }

    fn descriptions() -> Element {
        Element::new("descriptions")
            .with_child(Element::new("vaccineDescription").with_attr("vaccineType", "PEV"))
            .with_child(Element::new("ITNDecay").with_attr("L", "3"))
            .with_child(
                Element::new("anopheles")
                    .with_attr("mosquito", "gambiae")
                    .with_child(
                        Element::new("ITNDescription")
                            .with_attr("name", "nets")
                            .with_child(Element::new("deterrency")),
                    ),
            )
            .with_child(
                Element::new("anopheles")
                    .with_attr("mosquito", "funestus")
                    .with_child(Element::new("ITNDescription").with_attr("name", "other")),
            )
    }

    fn timed(interventions: Vec<Element>) -> Element {
        let mut timed = Element::new("timed");
        for intervention in interventions {
            timed.append(intervention);
        }
        timed
    }

    fn at(time: &str, child: Element) -> Element {
        Element::new("intervention")
            .with_attr("time", time)
            .with_child(child)
    }

    // -----------------------------------------------------------------------
    // Test 1: renames and grouping
    // -----------------------------------------------------------------------
    #[test]
    fn test_groups_interventions_by_kind() {
        let interventions = Element::new("interventions")
            .with_attr("name", "scenario interventions")
            .with_child(descriptions())
            .with_child(Element::new("continuous").with_child(Element::new("vaccine")))
            .with_child(timed(vec![
                at("10", Element::new("ITN").with_attr("coverage", "0.8")),
                at("20", Element::new("vaccinate")),
            ]));
        let (out, diagnostics) = run(translate_27_to_28, scenario(interventions)).unwrap();

        assert_eq!(names(&out), vec!["pharmacology", "entomology", "interventions", "model"]);
        assert!(out.find("EIR").is_some());

        let interventions = out.find("interventions").unwrap();
        assert_eq!(interventions.attr("name"), Some("scenario interventions"));
        assert_eq!(names(interventions), vec!["vaccine", "ITN"]);

        let vaccine = interventions.find("vaccine").unwrap();
        assert_eq!(names(vaccine), vec!["description", "continuous", "timed"]);
        assert_eq!(vaccine.find("timed").unwrap().attr("time"), Some("20"));

        let itn = interventions.find("ITN").unwrap();
        assert_eq!(itn.attr("name"), Some("nets"));
        assert_eq!(
            names(itn),
            vec!["decay", "anophelesParams", "anophelesParams", "timed"]
        );
        let params = itn.descendants("anophelesParams");
        assert_eq!(params[0].attr("mosquito"), Some("gambiae"));
        assert_eq!(params[1].attr("mosquito"), Some("funestus"));
        assert!(!params[1].has_attr("name"));
        let deployment = itn.find("timed").unwrap();
        assert_eq!(deployment.attr("coverage"), Some("0.8"));
        assert_eq!(deployment.attr("time"), Some("10"));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_every_timed_intervention_is_moved() {
        let interventions = Element::new("interventions")
            .with_child(Element::new("descriptions"))
            .with_child(timed(vec![
                at("1", Element::new("changeHS")),
                at("2", Element::new("changeHS")),
                at("3", Element::new("changeHS")),
            ]));
        let (out, _) = run(translate_27_to_28, scenario(interventions)).unwrap();
        let change = out.find("changeHS").unwrap();
        let times: Vec<_> = change.elements().map(|e| e.attr("time").unwrap()).collect();
        assert_eq!(times, vec!["1", "2", "3"]);
    }

    // -----------------------------------------------------------------------
    // Test 2: unsupported content
    // -----------------------------------------------------------------------
    #[test]
    fn test_larviciding_is_unsupported() {
        let interventions = Element::new("interventions")
            .with_child(Element::new("descriptions"))
            .with_child(timed(vec![at("1", Element::new("larviciding"))]));
        let err = run(translate_27_to_28, scenario(interventions)).unwrap_err();
        assert!(matches!(err, StepError::UnsupportedTranslation { .. }));
    }

    #[test]
    fn test_unknown_description_is_unsupported() {
        let interventions = Element::new("interventions").with_child(
            Element::new("descriptions").with_child(Element::new("larvicideDescription")),
        );
        let err = run(translate_27_to_28, scenario(interventions)).unwrap_err();
        assert_eq!(
            err.path(),
            Some("interventions/descriptions/larvicideDescription")
        );
    }

    // -----------------------------------------------------------------------
    // Test 3: imported infections
    // -----------------------------------------------------------------------
    #[test]
    fn test_imported_infections_become_yearly_rates() {
        let interventions = Element::new("interventions")
            .with_child(Element::new("descriptions"))
            .with_child(timed(vec![
                at("10", Element::new(IMPORTED_INFECTIONS).with_text("0.5")),
                at("11", Element::new(IMPORTED_INFECTIONS).with_text("1")),
            ]));
        let (out, diagnostics) = run(translate_27_to_28, scenario(interventions)).unwrap();
        let rates: Vec<_> = out
            .find("importedInfections")
            .unwrap()
            .descendants("rate")
            .iter()
            .map(|r| (r.attr("time").unwrap(), r.attr("value").unwrap()))
            .collect();
        assert_eq!(
            rates,
            vec![("10", "36.5"), ("11", "73.0"), ("12", "0")]
        );
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_imported_infections_at_last_time_are_rejected() {
        let interventions = Element::new("interventions")
            .with_child(Element::new("descriptions"))
            .with_child(timed(vec![at(
                "9223372036854775807",
                Element::new(IMPORTED_INFECTIONS).with_text("1"),
            )]));
        let err = run(translate_27_to_28, scenario(interventions)).unwrap_err();
        assert!(matches!(err, StepError::DataInvariant { .. }));
    }
}
