use crate::{labels::Selector, resource::KindRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of the policy object that owns a watch configuration.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRef {
    pub namespace: String,
    pub name: String,
}

impl PolicyRef {
    pub fn new(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for PolicyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Template handed to the render function for each in-scope object.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderTemplate {
    pub expr: String,
    pub output_field: String,
}

/// One (namespace, name-or-pattern) entry of a match rule.
///
/// The object's namespace must equal `namespace`. An explicit name list is
/// exact-string membership; otherwise a pattern is a regex full-match; an
/// entry with neither matches any name in the namespace.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEntry {
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_pattern: Option<String>,
}

/// Label/namespace selector sub-rule of a match rule.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelRule {
    /// Restricts eligible namespaces to those whose labels match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<Selector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<Selector>,
}

impl LabelRule {
    pub fn is_empty(&self) -> bool {
        self.namespace_selector.is_none() && self.label_selector.is_none()
    }
}

/// A request or ignore rule: a selector sub-rule and/or name-list entries.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<MatchEntry>,
}

impl MatchRule {
    pub fn is_empty(&self) -> bool {
        self.selector.as_ref().map_or(true, LabelRule::is_empty) && self.entries.is_empty()
    }
}

/// Configuration selecting which resources of a kind are in scope for
/// aggregation.
///
/// Many policies may target the same kind; the agent keys its running watch
/// controllers by `target`, and one controller serves every policy for that
/// kind.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchPolicy {
    pub id: PolicyRef,
    pub target: KindRef,
    /// Name of the aggregate rule whose template renders matched objects.
    pub rule: String,
    #[serde(default)]
    pub template: RenderTemplate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<MatchRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignores: Option<MatchRule>,
}
