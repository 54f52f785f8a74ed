//! Kubernetes label selectors
//!
//! Recipes carry selectors in the string form used by `kubectl -l`
//! (`app=db,tier in (a,b),!legacy`). Jobs need the structured form.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Operator for label selector requirements
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum LabelSelectorOperator {
    /// Label value must be in the specified set
    In,
    /// Label value must not be in the specified set
    NotIn,
    /// Label must exist (value ignored)
    Exists,
    /// Label must not exist (value ignored)
    DoesNotExist,
}

impl LabelSelectorOperator {
    /// Check if a label value matches this operator
    pub fn matches(&self, label_value: Option<&str>, values: &[String]) -> bool {
        match self {
            Self::In => label_value.is_some_and(|v| values.iter().any(|req| req == v)),
            Self::NotIn => {
                label_value.is_none() || !values.iter().any(|req| Some(req.as_str()) == label_value)
            }
            Self::Exists => label_value.is_some(),
            Self::DoesNotExist => label_value.is_none(),
        }
    }
}

/// One set-based selector requirement
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    /// The label key the requirement applies to
    pub key: String,

    /// Relationship between the label and values
    pub operator: LabelSelectorOperator,

    /// Values for `In`/`NotIn`; empty for `Exists`/`DoesNotExist`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl LabelSelectorRequirement {
    /// Check if a label set satisfies this requirement
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key).map(|s| s.as_str());
        self.operator.matches(value, &self.values)
    }
}

/// Structured label selector (`metav1.LabelSelector`)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Exact key/value matches
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    /// Set-based requirements, all of which must hold
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl LabelSelector {
    /// Parse the string form of a selector.
    ///
    /// An empty or all-whitespace string means "no selector" and yields `None`.
    pub fn parse(s: &str) -> Result<Option<Self>> {
        if s.trim().is_empty() {
            return Ok(None);
        }

        let mut selector = Self::default();
        for term in split_top_level(s)? {
            let term = term.trim();
            if term.is_empty() {
                return Err(invalid(s, "empty requirement"));
            }
            selector.push_term(s, term)?;
        }
        Ok(Some(selector))
    }

    fn push_term(&mut self, full: &str, term: &str) -> Result<()> {
        if let Some(key) = term.strip_prefix('!') {
            let key = valid_key(full, key.trim())?;
            self.match_expressions.push(LabelSelectorRequirement {
                key,
                operator: LabelSelectorOperator::DoesNotExist,
                values: Vec::new(),
            });
            return Ok(());
        }

        if let Some(open) = term.find('(') {
            let close = term
                .rfind(')')
                .filter(|c| *c == term.len() - 1 && *c > open)
                .ok_or_else(|| invalid(full, "unterminated value set"))?;
            let mut head = term[..open].split_whitespace();
            let key = valid_key(full, head.next().unwrap_or_default())?;
            let operator = match head.next() {
                Some("in") => LabelSelectorOperator::In,
                Some("notin") => LabelSelectorOperator::NotIn,
                _ => return Err(invalid(full, "expected 'in' or 'notin' before value set")),
            };
            if head.next().is_some() {
                return Err(invalid(full, "unexpected token before value set"));
            }
            let values: Vec<String> = term[open + 1..close]
                .split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            if values.is_empty() {
                return Err(invalid(full, "value set must not be empty"));
            }
            self.match_expressions.push(LabelSelectorRequirement {
                key,
                operator,
                values,
            });
            return Ok(());
        }

        if let Some((key, value)) = term.split_once("!=") {
            self.match_expressions.push(LabelSelectorRequirement {
                key: valid_key(full, key.trim())?,
                operator: LabelSelectorOperator::NotIn,
                values: vec![value.trim().to_string()],
            });
            return Ok(());
        }

        if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
            self.match_labels
                .insert(valid_key(full, key.trim())?, value.trim().to_string());
            return Ok(());
        }

        let key = valid_key(full, term)?;
        self.match_expressions.push(LabelSelectorRequirement {
            key,
            operator: LabelSelectorOperator::Exists,
            values: Vec::new(),
        });
        Ok(())
    }

    /// Check if a label set matches every clause of this selector
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
            && self.match_expressions.iter().all(|r| r.matches(labels))
    }
}

/// Split at commas that are not inside a parenthesized value set
fn split_top_level(s: &str) -> Result<Vec<&str>> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| invalid(s, "unbalanced ')'"))?
            }
            ',' if depth == 0 => {
                terms.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(invalid(s, "unbalanced '('"));
    }
    terms.push(&s[start..]);
    Ok(terms)
}

fn valid_key(full: &str, key: &str) -> Result<String> {
    if key.is_empty() || key.chars().any(|c| c.is_whitespace() || "=!(),".contains(c)) {
        return Err(invalid(full, format!("invalid label key '{}'", key)));
    }
    Ok(key.to_string())
}

fn invalid(selector: &str, msg: impl std::fmt::Display) -> Error {
    Error::validation(format!("invalid label selector '{}': {}", selector, msg))
}
