//! Step 12 -> 13: model and survey options.
//!
//! The legacy integer flag fields `modelVersion` and `summaryOption` become
//! named option lists. Models that never said whether the max-density
//! correction applies need an operator decision.

use tracing::debug;

use crate::config::{MaxDensCorrection, PolicySwitch};
use crate::derived::{FlagTable, MODEL_OPTION_FLAGS, SURVEY_OPTION_FLAGS};
use crate::diagnostic::DiagnosticKind;
use crate::document::Element;
use crate::error::StepError;
use crate::registry::StepContext;
use crate::tree_utils::{option_element, parse_attr, require_child, require_child_mut};

/// Options whose presence settles the max-density question on their own.
const MAX_DENS_DECIDING_OPTIONS: &[&str] = &[
    "MAX_DENS_CORRECTION",
    "DUMMY_WITHIN_HOST_MODEL",
    "EMPIRICAL_WITHIN_HOST_MODEL",
];

/// Analysis numbers of the Garki fitting runs, which used the density bias.
const GARKI_ANALYSES: std::ops::RangeInclusive<i64> = 22..=30;

pub fn translate_12_to_13(root: &mut Element, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
    // Read and decide everything before the first mutation.
    let model_version: u64 = parse_attr(root, "modelVersion")?;
    let enabled = MODEL_OPTION_FLAGS.decode(model_version);
    let preserve_max_dens_bug = if enabled
        .iter()
        .any(|name| MAX_DENS_DECIDING_OPTIONS.contains(name))
    {
        false
    } else {
        match ctx.policy().max_dens_correction {
            Some(MaxDensCorrection::Apply) => false,
            Some(MaxDensCorrection::PreserveBug) => true,
            None => {
                return Err(StepError::policy(
                    PolicySwitch::MaxDensCorrection,
                    "the model does not say whether the max-density correction applies",
                ))
            }
        }
    };

    let surveys = require_child(require_child(root, "monitoring")?, "surveys")?;
    let summary_option: u64 = parse_attr(surveys, "summaryOption")?;
    let analysis_no: Option<i64> = match root.attr("analysisNo") {
        Some(_) => Some(parse_attr(root, "analysisNo")?),
        None => None,
    };

    warn_unknown_bits(ctx, "modelVersion", &MODEL_OPTION_FLAGS, model_version);
    warn_unknown_bits(ctx, "summaryOption", &SURVEY_OPTION_FLAGS, summary_option);

    let mut model_options = Element::new("ModelOptions");
    for name in &enabled {
        model_options.append(option_element(name, true));
    }
    if preserve_max_dens_bug {
        model_options.append(option_element("MAX_DENS_CORRECTION", false));
    }
    if analysis_no.is_some_and(|n| GARKI_ANALYSES.contains(&n)) {
        model_options.append(option_element("GARKI_DENSITY_BIAS", true));
    }
    debug!(options = model_options.children.len(), "built ModelOptions");
    root.insert(0, model_options);
    root.remove_attr("modelVersion");

    let mut survey_options = Element::new("SurveyOptions");
    for name in SURVEY_OPTION_FLAGS.decode(summary_option) {
        survey_options.append(option_element(name, true));
    }
    let monitoring = require_child_mut(root, "monitoring")?;
    monitoring.insert_before("surveys", survey_options);
    require_child_mut(monitoring, "surveys")?.remove_attr("summaryOption");
    Ok(())
}

fn warn_unknown_bits(ctx: &mut StepContext<'_>, field: &str, table: &FlagTable, bits: u64) {
    let unknown = table.unknown_bits(bits);
    if unknown != 0 {
        ctx.warn(
            DiagnosticKind::Dropped,
            format!("{field} has unknown bits {unknown:#x}, which were ignored"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::steps::test_support::{names, run, run_with};
    use pretty_assertions::assert_eq;

    fn scenario(model_version: &str, summary_option: &str) -> Element {
        Element::new("scenario")
            .with_attr("schemaVersion", "13")
            .with_attr("modelVersion", model_version)
            .with_attr("analysisNo", "1")
            .with_child(Element::new("demography"))
            .with_child(
                Element::new("monitoring").with_child(
                    Element::new("surveys")
                        .with_attr("summaryOption", summary_option)
                        .with_child(Element::new("surveyTime").with_text("1")),
                ),
            )
    }

    fn option_pairs(options: &Element) -> Vec<(String, String)> {
        options
            .children_named("option")
            .map(|o| {
                (
                    o.attr("name").unwrap().to_string(),
                    o.attr("value").unwrap().to_string(),
                )
            })
            .collect()
    }

    fn preserve_bug() -> PolicyConfig {
        PolicyConfig {
            max_dens_correction: Some(MaxDensCorrection::PreserveBug),
            ..PolicyConfig::default()
        }
    }

    // -----------------------------------------------------------------------
    // Test 1: the max-density decision is gated on policy
    // -----------------------------------------------------------------------
    #[test]
    fn test_unset_policy_fails_before_mutation() {
        let root = scenario("0", "1");
        let err = run(translate_12_to_13, root).unwrap_err();
        assert!(matches!(
            err,
            StepError::PolicyRequired {
                switch: PolicySwitch::MaxDensCorrection,
                ..
            }
        ));
    }

    #[test]
    fn test_preserve_bug_adds_false_option() {
        let (out, _) = run_with(translate_12_to_13, scenario("0", "1"), preserve_bug()).unwrap();
        assert_eq!(names(&out)[0], "ModelOptions");
        assert_eq!(
            option_pairs(out.find("ModelOptions").unwrap()),
            vec![("MAX_DENS_CORRECTION".to_string(), "false".to_string())]
        );
        assert!(!out.has_attr("modelVersion"));
    }

    #[test]
    fn test_apply_adds_nothing() {
        let policy = PolicyConfig {
            max_dens_correction: Some(MaxDensCorrection::Apply),
            ..PolicyConfig::default()
        };
        let (out, _) = run_with(translate_12_to_13, scenario("0", "1"), policy).unwrap();
        assert!(out.find("ModelOptions").unwrap().children.is_empty());
    }

    #[test]
    fn test_explicit_flag_needs_no_policy() {
        // bit 6 = MAX_DENS_CORRECTION, bit 1 = PENALISATION_EPISODES
        let (out, _) = run(translate_12_to_13, scenario("66", "1")).unwrap();
        assert_eq!(
            option_pairs(out.find("ModelOptions").unwrap()),
            vec![
                ("PENALISATION_EPISODES".to_string(), "true".to_string()),
                ("MAX_DENS_CORRECTION".to_string(), "true".to_string()),
            ]
        );
    }

    // -----------------------------------------------------------------------
    // Test 2: survey options and Garki analyses
    // -----------------------------------------------------------------------
    #[test]
    fn test_survey_options_inserted_before_surveys() {
        let (out, diagnostics) =
            run_with(translate_12_to_13, scenario("0", "2097155"), preserve_bug()).unwrap();
        let monitoring = out.find("monitoring").unwrap();
        assert_eq!(names(monitoring), vec!["SurveyOptions", "surveys"]);
        let measures: Vec<_> = option_pairs(monitoring.find("SurveyOptions").unwrap())
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(measures, vec!["nHost", "nInfect", "imr_summary"]);
        assert!(!monitoring.find("surveys").unwrap().has_attr("summaryOption"));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_garki_analysis_adds_density_bias() {
        let mut root = scenario("64", "1");
        root.set_attr("analysisNo", "25");
        let (out, _) = run(translate_12_to_13, root).unwrap();
        let options = option_pairs(out.find("ModelOptions").unwrap());
        assert_eq!(options.last().unwrap().0, "GARKI_DENSITY_BIAS");
    }

    #[test]
    fn test_unknown_bits_are_reported() {
        let (_, diagnostics) =
            run_with(translate_12_to_13, scenario("1", "1"), preserve_bug()).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::Dropped);
    }
}
