//! Conversion of 5-day-timestep fitting scenarios to 1-day timesteps.
//!
//! Runs once, on a document at version 18, after the regular chain. Only the
//! simple health systems used by the fitting scenarios are understood; the
//! replacement event-scheduler models treat every case with an idealised
//! drug, described by the `drugDescription` added here.

use crate::derived::five_day_to_one_day_step;
use crate::diagnostic::DiagnosticKind;
use crate::document::Element;
use crate::error::StepError;
use crate::registry::StepContext;
use crate::tree_utils::{
    child, option_element, parse_attr, parse_text, require_child, require_child_mut,
    require_descendant_mut, take_required_child,
};

/// Health-system memory in days.
const ONE_DAY_HEALTH_SYSTEM_MEMORY: &str = "28";

const ONE_DAY_OPTIONS: [&str; 3] = [
    "MOLINEAUX_WITHIN_HOST_MODEL",
    "INCLUDES_PK_PD",
    "CLINICAL_EVENT_SCHEDULER",
];

/// Intervention-set name of the fitting scenarios that deploy MDA.
const MDA_INTERVENTIONS_NAME: &str = "A2 Intervention";

/// Event-scheduler parameterisations replacing the known fitting health systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FittingHealthSystem {
    /// Monitoring health systems switched in by `changeHS`: every case treated.
    Monitoring,
    /// No treatment at all.
    NoTreatment,
    /// Treatment through official care only, as in the Ironmal fits.
    Ironmal,
}

impl FittingHealthSystem {
    fn for_change(name: &str) -> Option<Self> {
        match name {
            "Do Monitoring HS" | "Np Monitoring HS" => Some(Self::Monitoring),
            _ => None,
        }
    }

    fn for_initial(name: &str) -> Option<Self> {
        match name {
            "no Treatment" | "Mortality Fitting" | "no Treatment no Mortality" => {
                Some(Self::NoTreatment)
            }
            "Ironmal" => Some(Self::Ironmal),
            _ => None,
        }
    }

    fn event_scheduler(self) -> Element {
        const OFFICIAL_CARE_TREATMENT: &str =
            "official_care(yes){p(.6): effective_treat p(.4): none} official_care(no): none";

        let test = || decision("test", "", "none,microscopy,RDT", "none");
        let (uncomplicated, complicated) = match self {
            Self::Monitoring => (
                vec![
                    decision("treatment", "", "effective_treat,none", "effective_treat"),
                    test(),
                ],
                vec![
                    decision("treatment", "", "effective_treat,none", "effective_treat"),
                    decision("hospitalisation", "", "none,delayed,immediate", "immediate"),
                    test(),
                ],
            ),
            Self::NoTreatment => (
                vec![
                    decision("treatment", "", "effective_treat,none", "none"),
                    test(),
                ],
                vec![
                    decision("treatment", "", "effective_treat,none", "none"),
                    decision("hospitalisation", "", "none,delayed,immediate", "none"),
                    test(),
                ],
            ),
            Self::Ironmal => (
                vec![
                    decision("official_care", "p", "yes,no", "p(.64): yes p(.36): no"),
                    decision(
                        "treatment",
                        "official_care,p",
                        "effective_treat,none",
                        OFFICIAL_CARE_TREATMENT,
                    ),
                    test(),
                ],
                vec![
                    decision("official_care", "p", "yes,no", "p(.48): yes p(.52): no"),
                    decision(
                        "treatment",
                        "official_care,p",
                        "effective_treat,none",
                        OFFICIAL_CARE_TREATMENT,
                    ),
                    decision(
                        "hospitalisation",
                        "official_care",
                        "none,delayed,immediate",
                        "official_care(yes): immediate official_care(no): none",
                    ),
                    test(),
                ],
            ),
        };
        Element::new("EventScheduler")
            .with_child(case_tree("uncomplicated", uncomplicated))
            .with_child(case_tree("complicated", complicated))
            .with_child(clinical_outcomes())
    }
}

fn decision(name: &str, depends: &str, values: &str, tree: &str) -> Element {
    Element::new("decision")
        .with_attr("name", name)
        .with_attr("depends", depends)
        .with_attr("values", values)
        .with_text(tree)
}

fn effective_medication() -> Element {
    Element::new("medicate")
        .with_attr("drug", "effective")
        .with_attr("mg", "1")
        .with_attr("hour", "0")
}

fn case_tree(name: &str, decisions: Vec<Element>) -> Element {
    let mut list = Element::new("decisions");
    for d in decisions {
        list.append(d);
    }
    Element::new(name).with_child(list).with_child(
        Element::new("treatments")
            .with_child(
                Element::new("treatment")
                    .with_attr("name", "effective_treat")
                    .with_child(Element::new("schedule").with_child(effective_medication())),
            )
            .with_child(
                Element::new("treatment")
                    .with_attr("name", "none")
                    .with_child(Element::new("schedule")),
            ),
    )
}

fn clinical_outcomes() -> Element {
    [
        ("maxUCSeekingMemory", "3"),
        ("uncomplicatedCaseDuration", "3"),
        ("complicatedCaseDuration", "5"),
        ("complicatedRiskDuration", "5"),
        ("pImmediateUC", "1"),
    ]
    .into_iter()
    .fold(Element::new("ClinicalOutcomes"), |outcomes, (name, text)| {
        outcomes.with_child(Element::new(name).with_text(text))
    })
}

/// The idealised drug treating every case in the replacement health systems.
fn effective_drug_description() -> Element {
    let text = |name: &str, value: &str| Element::new(name).with_text(value);
    Element::new("drugDescription").with_child(
        Element::new("drug")
            .with_attr("abbrev", "effective")
            .with_child(
                Element::new("PD").with_child(
                    Element::new("allele")
                        .with_attr("name", "sensitive")
                        .with_child(text("initial_frequency", "1"))
                        .with_child(text("max_killing_rate", "1e7"))
                        .with_child(text("IC50", "1"))
                        .with_child(text("slope", "1")),
                ),
            )
            .with_child(
                Element::new("PK")
                    .with_child(text("negligible_concentration", "1e-5"))
                    .with_child(text("half_life", "0.00069"))
                    .with_child(text("vol_dist", "0.01667")),
            ),
    )
}

/// Replace the `ImmediateOutcomes` of a health system with an event scheduler.
fn replace_immediate_outcomes(
    hs: &mut Element,
    pick: fn(&str) -> Option<FittingHealthSystem>,
) -> Result<(), StepError> {
    let name = require_child(hs, "ImmediateOutcomes")?
        .attr("name")
        .unwrap_or_default();
    let template = pick(name).ok_or_else(|| {
        StepError::unsupported(
            format!("{}/ImmediateOutcomes", hs.name),
            format!("no 1-day equivalent known for health system {name:?}"),
        )
    })?;
    take_required_child(hs, "ImmediateOutcomes")?;
    hs.insert_before("CFR", template.event_scheduler());
    Ok(())
}

fn rescale_step(path: &str, step: i64) -> Result<String, StepError> {
    five_day_to_one_day_step(step)
        .map(|rescaled| rescaled.to_string())
        .ok_or_else(|| StepError::data(path, format!("timestep {step} is out of range")))
}

pub fn convert_to_one_day_timesteps(
    root: &mut Element,
    ctx: &mut StepContext<'_>,
) -> Result<(), StepError> {
    ctx.warn(
        DiagnosticKind::ManualFollowUp,
        "1-day timestep conversion is only intended for fitting scenarios without \
         interventions or treatment",
    );

    require_descendant_mut(root, "surveys")?.try_for_each_descendant_mut(
        "surveyTime",
        &mut |time| {
            let step: i64 = parse_text(time)?;
            time.set_text(rescale_step("monitoring/surveys/surveyTime", step)?);
            Ok::<(), StepError>(())
        },
    )?;

    let model = require_child_mut(root, "model")?;
    let options = require_child_mut(model, "ModelOptions")?;
    for name in ONE_DAY_OPTIONS {
        options.append(option_element(name, true));
    }
    require_descendant_mut(root, "clinical")?
        .set_attr("healthSystemMemory", ONE_DAY_HEALTH_SYSTEM_MEMORY);

    root.try_for_each_descendant_mut("intervention", &mut |intervention| {
        if intervention.has_attr("time") {
            let step: i64 = parse_attr(intervention, "time")?;
            intervention.set_attr("time", rescale_step("intervention@time", step)?);
        }
        Ok::<(), StepError>(())
    })?;

    root.try_for_each_descendant_mut("changeHS", &mut |change| {
        replace_immediate_outcomes(change, FittingHealthSystem::for_change)
    })?;
    replace_immediate_outcomes(
        require_descendant_mut(root, "healthSystem")?,
        FittingHealthSystem::for_initial,
    )?;

    root.insert_before("model", effective_drug_description());

    let adds_mda = child(root, "interventions")?
        .is_some_and(|i| i.attr("name") == Some(MDA_INTERVENTIONS_NAME));
    if adds_mda {
        let interventions = require_child_mut(root, "interventions")?;
        interventions.insert(
            0,
            Element::new("MDADescription").with_child(
                Element::new("schedule").with_child(
                    Element::new("medicate")
                        .with_attr("drug", "effective")
                        .with_attr("hour", "0")
                        .with_attr("mg", "1"),
                ),
            ),
        );
    }
    Ok(())
}
