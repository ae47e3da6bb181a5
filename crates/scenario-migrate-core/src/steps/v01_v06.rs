//! Steps 1 -> 2 through 5 -> 6: the first schema clean-ups.
//!
//! Version 2 introduced the schema namespace and normalised attribute names,
//! version 4 split entomology into vector and non-vector models, version 5
//! fixed an infection incidence flag and version 6 split the non-malaria fever
//! parameters of case management by parasite status.

use crate::diagnostic::DiagnosticKind;
use crate::document::Element;
use crate::error::StepError;
use crate::registry::StepContext;
use crate::tree_utils::{child_mut, parse_attr, path_of, require_child_mut};

pub const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Extrinsic incubation period (days) assumed when a document never gave one.
const DEFAULT_EIP_DURATION: &str = "10";

/// Legacy `nspore` counted 5-day timesteps.
const DAYS_PER_NSPORE: i64 = 5;

// ---------------------------------------------------------------------------
// 1 -> 2
// ---------------------------------------------------------------------------

pub fn translate_1_to_2(root: &mut Element, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    root.set_attr("xmlns:xsi", XSI_NAMESPACE);
    for attr in ["wuID", "assimMode"] {
        if !root.has_attr(attr) {
            root.set_attr(attr, "0");
        }
    }

    if let Some(ento) = child_mut(root, "entoData")? {
        if ento.remove_attr("firstDay").is_some() {
            ctx.warn(DiagnosticKind::Dropped, "Removed entoData firstDay attribute");
        }
    }
    let mut first_days = 0;
    root.for_each_descendant_mut("changeEIR", &mut |e| {
        if e.remove_attr("firstDay").is_some() {
            first_days += 1;
        }
    });
    if first_days > 0 {
        ctx.warn(
            DiagnosticKind::Dropped,
            format!("Removed firstDay attribute from {first_days} changeEIR element(s)"),
        );
    }

    if let Some(params) = root.find_mut("parameters") {
        params.remove_attr("useIseed");
        let nspore: i64 = parse_attr(params, "nspore")?;
        let eip_duration = nspore.checked_mul(DAYS_PER_NSPORE).ok_or_else(|| {
            StepError::data("parameters@nspore", format!("nspore {nspore} is out of range"))
        })?;
        params.remove_attr("nspore");
        params.set_attr("eipDuration", eip_duration.to_string());
    }

    root.take_descendants("sources");
    root.for_each_descendant_mut("item", &mut |item| item.set_text(""));
    root.for_each_descendant_mut("MDA", &mut |mda| {
        mda.set_attr("minAge", "0");
        mda.set_attr("maxAge", "99");
        mda.set_attr("coverage", "1");
    });

    root.rename_attr("best", "value");
    root.for_each_element_mut(&mut |e| {
        e.rename_attr("best", "value");
    });
    Ok(())
}

// ---------------------------------------------------------------------------
// 3 -> 4
// ---------------------------------------------------------------------------

pub fn translate_3_to_4(root: &mut Element, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let eip_duration = child_mut(root, "parameters")?.and_then(|p| p.remove_attr("eipDuration"));
    let mut defaulted = false;
    let mut eip_for = |ctx: &mut StepContext<'_>| match &eip_duration {
        Some(eip) => eip.clone(),
        None => {
            if !defaulted {
                defaulted = true;
                ctx.warn(
                    DiagnosticKind::DefaultInserted,
                    format!("No eipDuration given; using {DEFAULT_EIP_DURATION} days"),
                );
            }
            DEFAULT_EIP_DURATION.to_string()
        }
    };

    if let Some(ento) = child_mut(root, "entoData")? {
        let daily = ento.take_descendants("EIRDaily");
        if !daily.is_empty() {
            let mut non_vector = Element::new("nonVector").with_attr("eipDuration", eip_for(ctx));
            for eir in daily {
                non_vector.append(eir);
            }
            ento.append(non_vector);
        }

        let anopheles = ento.take_descendants("anopheles");
        if !anopheles.is_empty() {
            let mut vector = Element::new("vector");
            for mut species in anopheles {
                species.remove_attr("useNv0Guess");
                vector.append(species);
            }
            ento.append(vector);
        }
        ento.remove_attr("inputType");
    }

    let Some(interventions) = child_mut(root, "interventions")? else {
        return Ok(());
    };
    let Some(timed) = child_mut(interventions, "timed")? else {
        return Ok(());
    };
    for intervention in timed.children_named_mut("intervention") {
        if let Some(change) = child_mut(intervention, "changeEIR")? {
            change.remove_attr("inputType");
            change.remove_attr("name");
            change.set_attr("eipDuration", eip_for(ctx));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 4 -> 5
// ---------------------------------------------------------------------------

const NEGATIVE_BINOMIAL_MASS_ACTION: u64 = 1 << 2;
const LOGNORMAL_MASS_ACTION: u64 = 1 << 4;
const LOGNORMAL_MASS_ACTION_PLUS_PRE_IMM: u64 = 1 << 5;
const INFECTION_INCIDENCE_FLAGS: u64 =
    NEGATIVE_BINOMIAL_MASS_ACTION | LOGNORMAL_MASS_ACTION | LOGNORMAL_MASS_ACTION_PLUS_PRE_IMM;

pub fn translate_4_to_5(root: &mut Element, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let model_version: u64 = parse_attr(root, "modelVersion")?;
    let incidence = model_version & INFECTION_INCIDENCE_FLAGS;
    if incidence & LOGNORMAL_MASS_ACTION_PLUS_PRE_IMM == 0 {
        return Ok(());
    }
    if incidence != LOGNORMAL_MASS_ACTION_PLUS_PRE_IMM {
        return Err(StepError::data(
            path_of(root, "@modelVersion"),
            "combination of infection incidence model flags",
        ));
    }
    let updated = (model_version & !LOGNORMAL_MASS_ACTION_PLUS_PRE_IMM) | LOGNORMAL_MASS_ACTION;
    root.set_attr("modelVersion", updated.to_string());
    ctx.warn(
        DiagnosticKind::LossyConversion,
        "LOGNORMAL_MASS_ACTION_PLUS_PRE_IMM replaced by LOGNORMAL_MASS_ACTION, which has had a bug fixed",
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// 5 -> 6
// ---------------------------------------------------------------------------

const CLINICAL_EVENT_SCHEDULER: u64 = 1 << 13;

pub fn translate_5_to_6(root: &mut Element, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    let model_version: u64 = parse_attr(root, "modelVersion")?;
    root.remove_attr("wuID");

    let has_case_managements = root.find("caseManagements").is_some();
    if model_version & CLINICAL_EVENT_SCHEDULER != 0 {
        if root.find("healthSystem").is_some() {
            ctx.warn(
                DiagnosticKind::ManualFollowUp,
                "healthSystem element present but not used by the event scheduler",
            );
        }
    } else if has_case_managements {
        ctx.warn(
            DiagnosticKind::ManualFollowUp,
            "caseManagements element present but not used (updating anyway)",
        );
    }

    let Some(case_managements) = root.find_mut("caseManagements") else {
        return Ok(());
    };
    case_managements.try_for_each_descendant_mut("caseManagement", &mut |cm| {
        cm.remove_attr("minAgeYrs");
        let nmf = require_child_mut(cm, "nmf")?;
        nmf.name = "nmfNP".to_string();
        let mut parasite_positive = nmf.clone();
        parasite_positive.name = "nmfP".to_string();
        cm.insert_before("nmfNP", parasite_positive);
        Ok::<(), StepError>(())
    })
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
    // Test 1: 1 -> 2 normalises attributes and drops obsolete data
    // -----------------------------------------------------------------------
    #[test]
    fn test_1_to_2() {
        let root = Element::new("scenario")
            .with_attr("assimMode", "1")
            .with_child(
                Element::new("entoData")
                    .with_attr("firstDay", "3")
                    .with_child(Element::new("sources")),
            )
            .with_child(
                Element::new("parameters")
                    .with_attr("nspore", "2")
                    .with_attr("useIseed", "0")
                    .with_child(Element::new("parameter").with_attr("best", "0.5")),
            )
            .with_child(Element::new("item").with_text("old"))
            .with_child(
                Element::new("interventions").with_child(
                    Element::new("intervention")
                        .with_child(Element::new("MDA"))
                        .with_child(Element::new("changeEIR").with_attr("firstDay", "1")),
                ),
            );

        let (out, diagnostics) = run(translate_1_to_2, root).unwrap();

        assert_eq!(out.attr("xmlns:xsi"), Some(XSI_NAMESPACE));
        assert_eq!(out.attr("wuID"), Some("0"));
        assert_eq!(out.attr("assimMode"), Some("1"));
        assert!(out.find("sources").is_none());
        assert!(!out.find("entoData").unwrap().has_attr("firstDay"));
        assert!(!out.find("changeEIR").unwrap().has_attr("firstDay"));

        let params = out.find("parameters").unwrap();
        assert_eq!(params.attr("eipDuration"), Some("10"));
        assert!(!params.has_attr("nspore"));
        assert!(!params.has_attr("useIseed"));
        assert_eq!(params.find("parameter").unwrap().attr("value"), Some("0.5"));

        assert_eq!(out.find("item").unwrap().text(), "");
        let mda = out.find("MDA").unwrap();
        assert_eq!(mda.attr("maxAge"), Some("99"));
        assert_eq!(mda.attr("coverage"), Some("1"));
        assert_eq!(diagnostics.len(), 2);
    }

    #[test]
    fn test_1_to_2_requires_nspore() {
        let root = Element::new("scenario").with_child(Element::new("parameters"));
        let err = run(translate_1_to_2, root).unwrap_err();
        assert!(matches!(err, StepError::Structural { .. }));
    }

    #[test]
    fn test_1_to_2_without_parameters() {
        let root = Element::new("scenario").with_child(Element::new("item").with_text("old"));
        let (out, _) = run(translate_1_to_2, root).unwrap();
        assert!(out.find("parameters").is_none());
        assert_eq!(out.find("item").unwrap().text(), "");
    }

    #[test]
    fn test_1_to_2_rejects_nspore_overflow() {
        let root = Element::new("scenario")
            .with_child(Element::new("parameters").with_attr("nspore", i64::MAX.to_string()));
        let err = run(translate_1_to_2, root).unwrap_err();
        assert!(matches!(err, StepError::DataInvariant { .. }));
    }

    // -----------------------------------------------------------------------
    // Test 2: 3 -> 4 splits entomology by model
    // -----------------------------------------------------------------------
    #[test]
    fn test_3_to_4_vector_split() {
        let root = Element::new("scenario")
            .with_child(Element::new("parameters").with_attr("eipDuration", "12"))
            .with_child(
                Element::new("entoData")
                    .with_attr("inputType", "EIR")
                    .with_child(Element::new("EIRDaily").with_text("1"))
                    .with_child(Element::new("EIRDaily").with_text("2"))
                    .with_child(
                        Element::new("anopheles")
                            .with_attr("mosquito", "gambiae_ss")
                            .with_attr("useNv0Guess", "0"),
                    ),
            )
            .with_child(
                Element::new("interventions").with_child(
                    Element::new("timed").with_child(
                        Element::new("intervention").with_attr("time", "3").with_child(
                            Element::new("changeEIR")
                                .with_attr("inputType", "EIR")
                                .with_attr("name", "x"),
                        ),
                    ),
                ),
            );

        let (out, diagnostics) = run(translate_3_to_4, root).unwrap();
        assert!(diagnostics.is_empty());

        let ento = out.find("entoData").unwrap();
        assert_eq!(names(ento), vec!["nonVector", "vector"]);
        assert!(!ento.has_attr("inputType"));
        let non_vector = ento.find("nonVector").unwrap();
        assert_eq!(non_vector.attr("eipDuration"), Some("12"));
        let texts: Vec<_> = non_vector.elements().map(Element::text).collect();
        assert_eq!(texts, vec!["1", "2"]);
        assert!(!ento.find("anopheles").unwrap().has_attr("useNv0Guess"));

        let change = out.find("changeEIR").unwrap();
        assert_eq!(change.attributes.len(), 1);
        assert_eq!(change.attr("eipDuration"), Some("12"));
        assert!(!out.find("parameters").unwrap().has_attr("eipDuration"));
    }

    #[test]
    fn test_3_to_4_defaults_eip_duration_once() {
        let root = Element::new("scenario").with_child(
            Element::new("entoData").with_child(Element::new("EIRDaily").with_text("1")),
        );
        let (out, diagnostics) = run(translate_3_to_4, root).unwrap();
        assert_eq!(out.find("nonVector").unwrap().attr("eipDuration"), Some("10"));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::DefaultInserted);
    }

    // -----------------------------------------------------------------------
    // Test 3: 4 -> 5 flag remap
    // -----------------------------------------------------------------------
    #[test]
    fn test_4_to_5_remaps_bit_five() {
        let root = Element::new("scenario").with_attr("modelVersion", "33");
        let (out, diagnostics) = run(translate_4_to_5, root).unwrap();
        assert_eq!(out.attr("modelVersion"), Some("17"));
        assert_eq!(diagnostics[0].kind, DiagnosticKind::LossyConversion);
    }

    #[test]
    fn test_4_to_5_leaves_other_flags() {
        let root = Element::new("scenario").with_attr("modelVersion", "20");
        let (out, diagnostics) = run(translate_4_to_5, root).unwrap();
        assert_eq!(out.attr("modelVersion"), Some("20"));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_4_to_5_rejects_combination() {
        let root = Element::new("scenario").with_attr("modelVersion", "48");
        let err = run(translate_4_to_5, root).unwrap_err();
        assert!(matches!(err, StepError::DataInvariant { .. }));
    }

    // -----------------------------------------------------------------------
    // Test 4: 5 -> 6 splits nmf
    // -----------------------------------------------------------------------
    #[test]
    fn test_5_to_6_splits_nmf() {
        let root = Element::new("scenario")
            .with_attr("modelVersion", "0")
            .with_attr("wuID", "7")
            .with_child(
                Element::new("caseManagements").with_child(
                    Element::new("caseManagement")
                        .with_attr("minAgeYrs", "0")
                        .with_child(Element::new("nmf").with_attr("value", "0.1"))
                        .with_child(Element::new("endPoints")),
                ),
            );
        let (out, diagnostics) = run(translate_5_to_6, root).unwrap();
        assert!(!out.has_attr("wuID"));
        let cm = out.find("caseManagement").unwrap();
        assert!(!cm.has_attr("minAgeYrs"));
        assert_eq!(names(cm), vec!["nmfP", "nmfNP", "endPoints"]);
        assert_eq!(cm.find("nmfP").unwrap().attr("value"), Some("0.1"));
        assert_eq!(diagnostics.len(), 1);
    }
}
