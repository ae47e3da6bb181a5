//! Steps 24 -> 25 and 25 -> 26: decay functions.
//!
//! Vaccine and vector-intervention effects stopped carrying ad-hoc half-life
//! fields and started sharing a general decay-function description.

use crate::diagnostic::DiagnosticKind;
use crate::document::Element;
use crate::error::StepError;
use crate::registry::StepContext;
use crate::tree_utils::{
    child, format_number, parse_attr, parse_text, path_of, require_attr, require_child_mut,
    take_attr, take_required_child,
};

// ---------------------------------------------------------------------------
// 24 -> 25
// ---------------------------------------------------------------------------

/// Elements whose Weibull-decayed value becomes a decay function.
const WEIBULL_DECAYED_VALUES: &[&str] = &[
    "preprandialKillingEffect",
    "postprandialKillingEffect",
    "killingEffect",
    "deterrency",
];

fn vaccine_type_name(code: &str) -> Option<&'static str> {
    match code.trim() {
        "1" => Some("PEV"),
        "2" => Some("BSV"),
        "3" => Some("TBV"),
        _ => None,
    }
}

fn translate_vaccine(vaccine: &mut Element) -> Result<(), StepError> {
    let code = vaccine.attr("vaccineType").unwrap_or_default();
    let name = vaccine_type_name(code).ok_or_else(|| {
        StepError::data(
            "vaccineDescription@vaccineType",
            format!("unrecognized vaccine type {code:?}"),
        )
    })?;
    vaccine.set_attr("vaccineType", name);

    let index = vaccine.position("halfLifeYrs").ok_or_else(|| {
        StepError::structural(path_of(vaccine, "halfLifeYrs"), "required element is missing")
    })?;
    let half_life = take_required_child(vaccine, "halfLifeYrs")?;
    let years: f64 = parse_attr(&half_life, "value")?;
    let function = if years == 0.0 { "constant" } else { "exponential" };
    vaccine.insert(
        index,
        Element::new("decay")
            .with_attr("L", format_number(years))
            .with_attr("function", function),
    );
    Ok(())
}

fn weibull_to_decay(effect: &mut Element) {
    let half_life = effect.remove_attr("halflife").unwrap_or_default();
    effect.set_attr("L", half_life);
    match effect.remove_attr("Weibullk") {
        Some(k) => {
            effect.set_attr("function", "weibull");
            effect.set_attr("k", k);
        }
        None => effect.set_attr("function", "exponential"),
    }
}

fn translate_mda(mda: &mut Element) -> Result<(), StepError> {
    let schedule = take_required_child(mda, "schedule")?;
    mda.append(
        Element::new("decisions")
            .with_child(
                Element::new("decision")
                    .with_attr("name", "test")
                    .with_attr("depends", "")
                    .with_attr("values", "none,microscopy,RDT")
                    .with_text("none"),
            )
            .with_child(
                Element::new("decision")
                    .with_attr("name", "treatment")
                    .with_attr("depends", "")
                    .with_attr("values", "1")
                    .with_text("1"),
            ),
    );
    mda.append(
        Element::new("treatments").with_child(
            Element::new("treatment")
                .with_attr("name", "1")
                .with_child(schedule),
        ),
    );
    Ok(())
}

pub fn translate_24_to_25(root: &mut Element, _ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    root.try_for_each_descendant_mut("vaccineDescription", &mut translate_vaccine)?;
    for name in WEIBULL_DECAYED_VALUES {
        root.for_each_descendant_mut(name, &mut weibull_to_decay);
    }
    match root.find_mut("MDADescription") {
        Some(mda) => translate_mda(mda),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// 25 -> 26
// ---------------------------------------------------------------------------

/// Days over which an immediate uncomplicated-case treatment used to apply.
const IMMEDIATE_UC_DAYS: usize = 3;

/// Daily treatment-seeking probabilities equivalent to a single probability `p`.
///
/// The daily values are normalized so that a case is treated within
/// [`IMMEDIATE_UC_DAYS`] days.
fn daily_pr_imm_uc(p: f64) -> Vec<f64> {
    let mut daily = Vec::with_capacity(IMMEDIATE_UC_DAYS);
    let mut untreated = 1.0;
    for _ in 0..IMMEDIATE_UC_DAYS {
        daily.push(untreated * p);
        untreated *= 1.0 - p;
    }
    let total: f64 = daily.iter().sum();
    daily.iter().map(|v| v / total).collect()
}

fn translate_clinical_outcomes(
    outcomes: &mut Element,
    ctx: &mut StepContext<'_>,
) -> Result<(), StepError> {
    let path = path_of(outcomes, "pImmediateUC");
    let p: f64 = parse_text(&take_required_child(outcomes, "pImmediateUC")?)?;
    if p == 1.0 {
        outcomes.append(Element::new("dailyPrImmUCTS").with_text("1"));
        return Ok(());
    }
    if !(p > 0.0 && p < 1.0) {
        return Err(StepError::data(
            path,
            format!("probability {p} must lie in (0, 1]"),
        ));
    }
    ctx.warn(
        DiagnosticKind::LossyConversion,
        "pImmediateUC replaced with dailyPrImmUCTS; not an exact equivalent",
    );
    for value in daily_pr_imm_uc(p) {
        outcomes.append(Element::new("dailyPrImmUCTS").with_text(format_number(value)));
    }
    Ok(())
}

/// Vector-intervention descriptions and the decay element replacing their
/// per-effect decay functions.
const VECTOR_DECAYS: [(&str, &str); 3] = [
    ("ITNDescription", "ITNDecay"),
    ("IRSDescription", "IRSDecay"),
    ("VADescription", "VADecay"),
];

#[derive(Debug, Clone, PartialEq)]
struct SharedDecay {
    function: String,
    l: String,
    k: String,
    l_value: f64,
    k_value: f64,
}

impl SharedDecay {
    fn of(effect: &Element) -> Result<Self, StepError> {
        let l = require_attr(effect, "L")?.to_string();
        let k = effect.attr("k").unwrap_or("1").to_string();
        Ok(Self {
            function: effect.attr("function").unwrap_or_default().to_string(),
            l_value: decay_number(effect, "L", &l)?,
            k_value: decay_number(effect, "k", &k)?,
            l,
            k,
        })
    }

    fn same_as(&self, other: &Self) -> bool {
        self.function == other.function
            && self.l_value == other.l_value
            && self.k_value == other.k_value
    }

    fn into_element(self, name: &str) -> Element {
        let mut decay = Element::new(name)
            .with_attr("function", self.function)
            .with_attr("L", self.l);
        if self.k_value != 1.0 {
            decay.set_attr("k", self.k);
        }
        decay
    }
}

fn decay_number(effect: &Element, attr: &str, raw: &str) -> Result<f64, StepError> {
    raw.trim().parse().map_err(|_| {
        StepError::data(
            format!("{}@{attr}", effect.name),
            format!("decay parameter {raw:?} is not a number"),
        )
    })
}

/// The one decay function shared by every effect of `description` across species.
fn shared_decay(descriptions: &Element, description: &str) -> Result<Option<SharedDecay>, StepError> {
    let mut shared: Option<SharedDecay> = None;
    for anopheles in descriptions.children_named("anopheles") {
        let Some(interv) = child(anopheles, description)? else {
            continue;
        };
        for effect in interv.elements() {
            let decay = SharedDecay::of(effect)?;
            match &shared {
                None => shared = Some(decay),
                Some(first) if first.same_as(&decay) => {}
                Some(first) => {
                    return Err(StepError::unsupported(
                        format!("anopheles/{description}/{}", effect.name),
                        format!(
                            "differing decay functions are no longer supported \
                             ({} L={} k={} and {} L={} k={})",
                            first.function, first.l, first.k, decay.function, decay.l, decay.k
                        ),
                    ))
                }
            }
        }
    }
    Ok(shared)
}

fn strip_effect_decay(effect: &mut Element) -> Result<(), StepError> {
    for name in ["function", "L", "k"] {
        effect.remove_attr(name);
    }
    let initial = take_attr(effect, "initial")?;
    effect.set_attr("value", initial);
    Ok(())
}

pub fn translate_25_to_26(root: &mut Element, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    root.try_for_each_descendant_mut("ClinicalOutcomes", &mut |outcomes| {
        translate_clinical_outcomes(outcomes, ctx)
    })?;

    let interventions = require_child_mut(root, "interventions")?;
    let descriptions = require_child_mut(interventions, "descriptions")?;
    let mut decays = Vec::new();
    for (description, decay) in VECTOR_DECAYS {
        if let Some(shared) = shared_decay(descriptions, description)? {
            decays.push(shared.into_element(decay));
        }
    }
    for anopheles in descriptions.children_named_mut("anopheles") {
        for (description, _) in VECTOR_DECAYS {
            for interv in anopheles.children_named_mut(description) {
                for effect in interv.elements_mut() {
                    strip_effect_decay(effect)?;
                }
            }
        }
    }
    for decay in decays {
        descriptions.insert_before("anopheles", decay);
    }
    Ok(())
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
    // Test 1: 24 -> 25
    // -----------------------------------------------------------------------
    fn vaccine(kind: &str, half_life: &str) -> Element {
        Element::new("vaccineDescription")
            .with_attr("vaccineType", kind)
            .with_child(Element::new("efficacyB"))
            .with_child(Element::new("halfLifeYrs").with_attr("value", half_life))
            .with_child(Element::new("initialEfficacy"))
    }

    #[test]
    fn test_24_to_25_vaccines() {
        let root = Element::new("scenario").with_child(
            Element::new("interventions")
                .with_child(vaccine("1", "0"))
                .with_child(vaccine("3", "2.5")),
        );
        let (out, _) = run(translate_24_to_25, root).unwrap();
        let vaccines = out.descendants("vaccineDescription");
        assert_eq!(vaccines[0].attr("vaccineType"), Some("PEV"));
        assert_eq!(vaccines[1].attr("vaccineType"), Some("TBV"));
        assert_eq!(names(vaccines[0]), vec!["efficacyB", "decay", "initialEfficacy"]);
        let constant = vaccines[0].find("decay").unwrap();
        assert_eq!(constant.attr("function"), Some("constant"));
        assert_eq!(constant.attr("L"), Some("0.0"));
        let exponential = vaccines[1].find("decay").unwrap();
        assert_eq!(exponential.attr("function"), Some("exponential"));
        assert_eq!(exponential.attr("L"), Some("2.5"));
    }

    #[test]
    fn test_24_to_25_unknown_vaccine_type() {
        let root = Element::new("scenario").with_child(vaccine("4", "1"));
        let err = run(translate_24_to_25, root).unwrap_err();
        assert!(matches!(err, StepError::DataInvariant { .. }));
    }

    #[test]
    fn test_24_to_25_weibull_and_mda() {
        let root = Element::new("scenario")
            .with_child(
                Element::new("ITNDescription")
                    .with_child(
                        Element::new("killingEffect")
                            .with_attr("initial", "0.6")
                            .with_attr("halflife", "2")
                            .with_attr("Weibullk", "1.5"),
                    )
                    .with_child(
                        Element::new("deterrency")
                            .with_attr("initial", "0.2")
                            .with_attr("halflife", "3"),
                    ),
            )
            .with_child(
                Element::new("MDADescription")
                    .with_child(Element::new("schedule").with_child(Element::new("medicate"))),
            );
        let (out, _) = run(translate_24_to_25, root).unwrap();

        let killing = out.find("killingEffect").unwrap();
        assert_eq!(killing.attr("function"), Some("weibull"));
        assert_eq!(killing.attr("L"), Some("2"));
        assert_eq!(killing.attr("k"), Some("1.5"));
        assert!(!killing.has_attr("halflife"));
        assert_eq!(out.find("deterrency").unwrap().attr("function"), Some("exponential"));

        let mda = out.find("MDADescription").unwrap();
        assert_eq!(names(mda), vec!["decisions", "treatments"]);
        let decisions = mda.find("decisions").unwrap().descendants("decision");
        assert_eq!(decisions[0].text(), "none");
        assert_eq!(decisions[1].attr("values"), Some("1"));
        let treatment = mda.find("treatment").unwrap();
        assert_eq!(treatment.attr("name"), Some("1"));
        assert!(treatment.find("schedule").unwrap().has_child("medicate"));
    }

    // -----------------------------------------------------------------------
    // Test 2: 25 -> 26 clinical outcomes
    // -----------------------------------------------------------------------
    fn scenario_25(p_immediate: &str, descriptions: Element) -> Element {
        Element::new("scenario")
            .with_child(
                Element::new("model").with_child(
                    Element::new("clinical").with_child(
                        Element::new("ClinicalOutcomes")
                            .with_child(Element::new("maxUCSeekingMemory").with_text("3"))
                            .with_child(Element::new("pImmediateUC").with_text(p_immediate)),
                    ),
                ),
            )
            .with_child(Element::new("interventions").with_child(descriptions))
    }

    #[test]
    fn test_25_to_26_exact_immediate_treatment() {
        let root = scenario_25("1", Element::new("descriptions"));
        let (out, diagnostics) = run(translate_25_to_26, root).unwrap();
        let outcomes = out.find("ClinicalOutcomes").unwrap();
        assert_eq!(names(outcomes), vec!["maxUCSeekingMemory", "dailyPrImmUCTS"]);
        assert_eq!(outcomes.find("dailyPrImmUCTS").unwrap().text(), "1");
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_25_to_26_partial_immediate_treatment() {
        let root = scenario_25("0.5", Element::new("descriptions"));
        let (out, diagnostics) = run(translate_25_to_26, root).unwrap();
        let values: Vec<f64> = out
            .descendants("dailyPrImmUCTS")
            .iter()
            .map(|e| e.text().parse().unwrap())
            .collect();
        assert_eq!(values.len(), 3);
        let total: f64 = values.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!((values[0] - 4.0 / 7.0).abs() < 1e-12);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::LossyConversion);
    }

    #[test]
    fn test_25_to_26_rejects_out_of_range_probability() {
        let root = scenario_25("0", Element::new("descriptions"));
        let err = run(translate_25_to_26, root).unwrap_err();
        assert!(matches!(err, StepError::DataInvariant { .. }));
    }

    // -----------------------------------------------------------------------
    // Test 3: 25 -> 26 shared vector decay
    // -----------------------------------------------------------------------
    fn itn_effect(name: &str, l: &str) -> Element {
        Element::new(name)
            .with_attr("initial", "0.5")
            .with_attr("function", "exponential")
            .with_attr("L", l)
    }

    fn anopheles(l: &str) -> Element {
        Element::new("anopheles").with_child(
            Element::new("ITNDescription")
                .with_child(itn_effect("deterrency", l))
                .with_child(itn_effect("killingEffect", l)),
        )
    }

    #[test]
    fn test_25_to_26_shared_decay() {
        let descriptions = Element::new("descriptions")
            .with_child(Element::new("ITNDescription"))
            .with_child(anopheles("2"))
            .with_child(anopheles("2.0"));
        let (out, _) = run(translate_25_to_26, scenario_25("1", descriptions)).unwrap();
        let descriptions = out.find("descriptions").unwrap();
        assert_eq!(
            names(descriptions),
            vec!["ITNDescription", "ITNDecay", "anopheles", "anopheles"]
        );
        let decay = descriptions.find("ITNDecay").unwrap();
        assert_eq!(decay.attr("function"), Some("exponential"));
        assert_eq!(decay.attr("L"), Some("2"));
        assert!(!decay.has_attr("k"));
        let effect = descriptions.find("deterrency").unwrap();
        assert_eq!(effect.attr("value"), Some("0.5"));
        assert_eq!(effect.attributes.len(), 1);
    }

    #[test]
    fn test_25_to_26_differing_decay_is_unsupported() {
        let descriptions = Element::new("descriptions")
            .with_child(anopheles("2"))
            .with_child(anopheles("3"));
        let err = run(translate_25_to_26, scenario_25("1", descriptions)).unwrap_err();
        assert!(matches!(err, StepError::UnsupportedTranslation { .. }));
    }

    #[test]
    fn test_25_to_26_malformed_decay_is_not_merged() {
        let descriptions = Element::new("descriptions")
            .with_child(anopheles("short"))
            .with_child(anopheles("short"));
        let err = run(translate_25_to_26, scenario_25("1", descriptions)).unwrap_err();
        assert!(matches!(err, StepError::DataInvariant { .. }));

        let mut effect = itn_effect("deterrency", "2");
        effect.set_attr("k", "");
        let descriptions = Element::new("descriptions").with_child(
            Element::new("anopheles")
                .with_child(Element::new("ITNDescription").with_child(effect)),
        );
        let err = run(translate_25_to_26, scenario_25("1", descriptions)).unwrap_err();
        assert!(matches!(err, StepError::DataInvariant { .. }));
    }
}
