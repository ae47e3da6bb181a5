//! Shared tree access helpers for migration steps.
//!
//! Lookups that the schema guarantees to be unique fail with a structural
//! error when they are not, so a step never silently picks one of several
//! candidates.

use std::str::FromStr;

use tracing::trace;

use crate::document::Element;
use crate::error::StepError;

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `parent/child` path used in error messages.
pub fn path_of(parent: &Element, name: &str) -> String {
    format!("{}/{}", parent.name, name)
}

// ---------------------------------------------------------------------------
// Single-child lookup
// ---------------------------------------------------------------------------

fn single_child_index(parent: &Element, name: &str) -> Result<Option<usize>, StepError> {
    let mut found = None;
    for (index, node) in parent.children.iter().enumerate() {
        if node.as_element().is_some_and(|e| e.name == name) {
            if found.is_some() {
                return Err(StepError::structural(
                    path_of(parent, name),
                    "expected at most one such element",
                ));
            }
            found = Some(index);
        }
    }
    Ok(found)
}

/// The unique direct child named `name`, if present.
pub fn child<'a>(parent: &'a Element, name: &str) -> Result<Option<&'a Element>, StepError> {
    Ok(single_child_index(parent, name)?.and_then(|i| parent.children[i].as_element()))
}

pub fn child_mut<'a>(
    parent: &'a mut Element,
    name: &str,
) -> Result<Option<&'a mut Element>, StepError> {
    Ok(single_child_index(parent, name)?.and_then(|i| parent.children[i].as_element_mut()))
}

/// The unique direct child named `name`; missing is a structural error.
pub fn require_child<'a>(parent: &'a Element, name: &str) -> Result<&'a Element, StepError> {
    child(parent, name)?
        .ok_or_else(|| StepError::structural(path_of(parent, name), "required element is missing"))
}

pub fn require_child_mut<'a>(
    parent: &'a mut Element,
    name: &str,
) -> Result<&'a mut Element, StepError> {
    let path = path_of(parent, name);
    child_mut(parent, name)?
        .ok_or_else(|| StepError::structural(path, "required element is missing"))
}

/// The unique direct child named `name`, appending an empty one when absent.
pub fn get_or_create_child<'a>(
    parent: &'a mut Element,
    name: &str,
) -> Result<&'a mut Element, StepError> {
    let index = match single_child_index(parent, name)? {
        Some(index) => index,
        None => {
            trace!(parent = %parent.name, child = name, "creating element");
            parent.append(Element::new(name));
            parent.children.len() - 1
        }
    };
    parent.children[index]
        .as_element_mut()
        .ok_or_else(|| StepError::structural(name, "expected an element"))
}

/// Detach the unique direct child named `name`, if present.
pub fn take_unique_child(parent: &mut Element, name: &str) -> Result<Option<Element>, StepError> {
    single_child_index(parent, name)?;
    Ok(parent.take_child(name))
}

/// Detach the unique direct child named `name`; missing is a structural error.
pub fn take_required_child(parent: &mut Element, name: &str) -> Result<Element, StepError> {
    let path = path_of(parent, name);
    take_unique_child(parent, name)?
        .ok_or_else(|| StepError::structural(path, "required element is missing"))
}

/// First descendant named `name`; missing is a structural error.
pub fn require_descendant<'a>(root: &'a Element, name: &str) -> Result<&'a Element, StepError> {
    root.find(name)
        .ok_or_else(|| StepError::structural(path_of(root, name), "required element is missing"))
}

pub fn require_descendant_mut<'a>(
    root: &'a mut Element,
    name: &str,
) -> Result<&'a mut Element, StepError> {
    let path = path_of(root, name);
    root.find_mut(name)
        .ok_or_else(|| StepError::structural(path, "required element is missing"))
}

// ---------------------------------------------------------------------------
// Attribute and text access
// ---------------------------------------------------------------------------

pub fn require_attr<'a>(element: &'a Element, name: &str) -> Result<&'a str, StepError> {
    element.attr(name).ok_or_else(|| {
        StepError::structural(
            format!("{}@{}", element.name, name),
            "required attribute is missing",
        )
    })
}

/// Detach a required attribute.
pub fn take_attr(element: &mut Element, name: &str) -> Result<String, StepError> {
    require_attr(element, name)?;
    Ok(element.remove_attr(name).unwrap_or_default())
}

/// Parse a required attribute.
pub fn parse_attr<T: FromStr>(element: &Element, name: &str) -> Result<T, StepError> {
    let raw = require_attr(element, name)?;
    raw.trim().parse().map_err(|_| {
        StepError::structural(
            format!("{}@{}", element.name, name),
            format!("cannot parse {raw:?}"),
        )
    })
}

/// Parse an element's text content.
pub fn parse_text<T: FromStr>(element: &Element) -> Result<T, StepError> {
    let raw = element.text();
    raw.trim().parse().map_err(|_| {
        StepError::structural(element.name.clone(), format!("cannot parse text {raw:?}"))
    })
}

/// Boolean attribute value: `true` in any case is true, anything else false.
pub fn parse_bool(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("true")
}

/// Render a number the way the schema files write decimals (`1.0`, `0.078`).
pub fn format_number(value: f64) -> String {
    format!("{value:?}")
}

// ---------------------------------------------------------------------------
// Attribute-to-element promotion
// ---------------------------------------------------------------------------

/// Replace attribute `name` of `parent` with a child `<name value="..."/>`.
pub fn promote_attr(parent: &mut Element, name: &str) -> Result<(), StepError> {
    let value = take_attr(parent, name)?;
    parent.append(Element::new(name).with_attr("value", value));
    Ok(())
}

/// Replace attribute `name` of `parent` with `<name mean="..." variance="0"/>`.
pub fn promote_attr_to_beta_mean(parent: &mut Element, name: &str) -> Result<(), StepError> {
    let mean = take_attr(parent, name)?;
    parent.append(
        Element::new(name)
            .with_attr("mean", mean)
            .with_attr("variance", "0"),
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Option lists
// ---------------------------------------------------------------------------

/// Options whose absence means "on".
const OPTIONS_DEFAULT_ON: &[&str] = &["MAX_DENS_CORRECTION"];

/// `<option name="..." value="true|false"/>`
pub fn option_element(name: &str, value: bool) -> Element {
    Element::new("option")
        .with_attr("name", name)
        .with_attr("value", if value { "true" } else { "false" })
}

/// Whether an option list contains an entry named `name` (regardless of value).
pub fn contains_option(options: &Element, name: &str) -> bool {
    options
        .children_named("option")
        .any(|o| o.attr("name") == Some(name))
}

/// Whether the document's model options switch `name` on.
///
/// Absent options take their built-in default.
pub fn uses_option(root: &Element, name: &str) -> Result<bool, StepError> {
    let options = require_descendant(root, "ModelOptions")?;
    let explicit = options
        .children_named("option")
        .find(|o| o.attr("name") == Some(name));
    Ok(match explicit {
        Some(option) => parse_bool(option.attr("value").unwrap_or("true")),
        None => OPTIONS_DEFAULT_ON.contains(&name),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn root() -> Element {
        Element::new("scenario")
            .with_child(
                Element::new("ModelOptions")
                    .with_child(option_element("INNATE_MAX_DENS", false))
                    .with_child(option_element("IPTI_SP_MODEL", true)),
            )
            .with_child(Element::new("item"))
            .with_child(Element::new("item"))
    }

    #[test]
    fn test_child_rejects_duplicates() {
        let r = root();
        let err = child(&r, "item").unwrap_err();
        assert!(matches!(err, StepError::Structural { .. }));
        assert!(child(&r, "absent").unwrap().is_none());
    }

    #[test]
    fn test_require_child_missing() {
        let r = root();
        let err = require_child(&r, "monitoring").unwrap_err();
        assert_eq!(err.path(), Some("scenario/monitoring"));
    }

    #[test]
    fn test_get_or_create_child() {
        let mut r = root();
        get_or_create_child(&mut r, "model").unwrap().set_attr("x", "1");
        get_or_create_child(&mut r, "model").unwrap().set_attr("y", "2");
        assert_eq!(r.children_named("model").count(), 1);
        let model = r.find("model").unwrap();
        assert_eq!(model.attr("x"), Some("1"));
        assert_eq!(model.attr("y"), Some("2"));
    }

    #[test]
    fn test_uses_option_defaults() {
        let r = root();
        assert!(uses_option(&r, "IPTI_SP_MODEL").unwrap());
        assert!(!uses_option(&r, "INNATE_MAX_DENS").unwrap());
        assert!(uses_option(&r, "MAX_DENS_CORRECTION").unwrap());
        assert!(!uses_option(&r, "GARKI_DENSITY_BIAS").unwrap());
        assert!(contains_option(r.find("ModelOptions").unwrap(), "INNATE_MAX_DENS"));
    }

    #[test]
    fn test_promote_attr() {
        let mut mosq = Element::new("mosq")
            .with_attr("mosqRestDuration", "3")
            .with_attr("mosqProbBiting", "0.95");
        promote_attr(&mut mosq, "mosqRestDuration").unwrap();
        promote_attr_to_beta_mean(&mut mosq, "mosqProbBiting").unwrap();
        assert!(mosq.attributes.is_empty());
        let rest = mosq.find("mosqRestDuration").unwrap();
        assert_eq!(rest.attr("value"), Some("3"));
        let biting = mosq.find("mosqProbBiting").unwrap();
        assert_eq!(biting.attr("mean"), Some("0.95"));
        assert_eq!(biting.attr("variance"), Some("0"));
        assert!(promote_attr(&mut mosq, "mosqRestDuration").is_err());
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1.0), "1.0");
        assert_eq!(format_number(0.078), "0.078");
        assert_eq!(format_number(5.0 * 73.0), "365.0");
    }
}
