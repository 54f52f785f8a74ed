//! Recipe parameter expansion
//!
//! Expansion is textual: the spec is rendered to JSON, every `${name}` or
//! `$name` is replaced, and the result is parsed back. A parameter with
//! several values is joined with `","` so that `["${ns}"]` becomes
//! `["a","b"]`.

use std::collections::BTreeMap;

use kop_common::crd::RecipeSpec;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;

use crate::error::RecipeError;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([^}]*)\}|\$([A-Za-z0-9_]+)").expect("placeholder pattern is valid")
});

/// Expand parameters in a recipe spec.
///
/// Unknown placeholders expand to the empty string. Serialization errors,
/// including ones caused by values that break the JSON text, propagate.
pub fn expand_parameters(
    spec: &RecipeSpec,
    parameters: &BTreeMap<String, Vec<String>>,
) -> Result<RecipeSpec, RecipeError> {
    let text = serde_json::to_string(spec)?;
    let expanded = expand_text(&text, parameters);
    if expanded != text {
        debug!(parameters = ?parameters, "expanded recipe parameters");
    }
    Ok(serde_json::from_str(&expanded)?)
}

fn expand_text(text: &str, parameters: &BTreeMap<String, Vec<String>>) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| {
            let key = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            parameters
                .get(key)
                .map(|values| values.join(r#"",""#))
                .unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kop_common::crd::RecipeGroup;

    fn params(pairs: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    fn group(namespaces: &[&str], selector: &str) -> RecipeSpec {
        RecipeSpec {
            groups: vec![RecipeGroup {
                name: "config".to_string(),
                included_namespaces: namespaces.iter().map(|s| s.to_string()).collect(),
                label_selector: selector.to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_multi_value_fans_out_into_array() {
        let spec = group(&["${env}"], "");
        let out = expand_parameters(&spec, &params(&[("env", &["a", "b"])])).unwrap();
        assert_eq!(out.groups[0].included_namespaces, vec!["a", "b"]);
    }

    #[test]
    fn test_unknown_placeholder_is_empty() {
        let spec = group(&["${missing}"], "app=${app}");
        let out = expand_parameters(&spec, &BTreeMap::new()).unwrap();
        assert_eq!(out.groups[0].included_namespaces, vec![""]);
        assert_eq!(out.groups[0].label_selector, "app=");
    }

    #[test]
    fn test_bare_dollar_name() {
        let spec = group(&[], "app=$app");
        let out = expand_parameters(&spec, &params(&[("app", &["db"])])).unwrap();
        assert_eq!(out.groups[0].label_selector, "app=db");
    }

    #[test]
    fn test_no_placeholders_is_identity() {
        let spec = group(&["apps"], "tier=web");
        let out = expand_parameters(&spec, &params(&[("x", &["y"])])).unwrap();
        assert_eq!(out, spec);
    }

    #[test]
    fn test_value_breaking_json_propagates() {
        let spec = group(&["${bad}"], "");
        let err = expand_parameters(&spec, &params(&[("bad", &["a\"}"])])).unwrap_err();
        assert!(matches!(err, RecipeError::Serialization(_)));
    }

    #[test]
    fn test_expand_text_single_value() {
        let text = expand_text(r#"{"a":"${x}-$y"}"#, &params(&[("x", &["1"]), ("y", &["2"])]));
        assert_eq!(text, r#"{"a":"1-2"}"#);
    }
}
