//! Policy-driven resource-in-scope decisions.
//!
//! `is_in_scope` is a pure decision function over a policy and an observed
//! object; the only outside state it consults is a [`NamespaceLabels`] view
//! used to resolve namespace selectors.

use crate::{
    labels::Labels,
    policy::{LabelRule, MatchEntry, MatchRule, WatchPolicy},
    resource::ClusterObject,
};
use regex::Regex;

/// Read-only view of namespace labels, maintained by the caller (the agent
/// keeps one from its namespace feed).
pub trait NamespaceLabels {
    fn labels_of(&self, namespace: &str) -> Option<Labels>;
}

impl NamespaceLabels for std::collections::HashMap<String, Labels> {
    fn labels_of(&self, namespace: &str) -> Option<Labels> {
        self.get(namespace).cloned()
    }
}

/// Decides whether an observed object is in scope for a policy.
///
/// An absent or fully-empty limit means in scope. A non-empty `requests` rule
/// decides alone; otherwise a non-empty `ignores` rule decides, negated.
pub fn is_in_scope(
    policy: &WatchPolicy,
    obj: &ClusterObject,
    namespaces: &dyn NamespaceLabels,
) -> bool {
    if let Some(requests) = policy.requests.as_ref().filter(|r| !r.is_empty()) {
        return evaluate_rule(requests, obj, namespaces);
    }
    if let Some(ignores) = policy.ignores.as_ref().filter(|r| !r.is_empty()) {
        return !evaluate_rule(ignores, obj, namespaces);
    }
    true
}

/// Selector result and name-list result combine with OR: a name-list hit
/// overrides a negative selector match.
fn evaluate_rule(rule: &MatchRule, obj: &ClusterObject, namespaces: &dyn NamespaceLabels) -> bool {
    let mut is_match = false;
    if let Some(selector) = rule.selector.as_ref().filter(|s| !s.is_empty()) {
        is_match = selector_matches(selector, obj, namespaces);
    }
    is_match || match_by_name(&rule.entries, obj)
}

fn selector_matches(
    rule: &LabelRule,
    obj: &ClusterObject,
    namespaces: &dyn NamespaceLabels,
) -> bool {
    if let Some(ns_selector) = rule.namespace_selector.as_ref() {
        let eligible = namespaces
            .labels_of(&obj.namespace)
            .map(|labels| ns_selector.matches(&labels))
            .unwrap_or(false);
        if !eligible {
            return false;
        }
    }

    match rule.label_selector.as_ref() {
        Some(selector) => selector.matches(&obj.labels),
        None => true,
    }
}

fn match_by_name(entries: &[MatchEntry], obj: &ClusterObject) -> bool {
    entries.iter().any(|entry| entry_matches(entry, obj))
}

fn entry_matches(entry: &MatchEntry, obj: &ClusterObject) -> bool {
    if entry.namespace != obj.namespace {
        return false;
    }
    if !entry.names.is_empty() {
        return entry.names.iter().any(|name| *name == obj.name);
    }
    if let Some(pattern) = entry.name_pattern.as_ref() {
        return name_pattern_matches(pattern, &obj.name);
    }
    // No name constraint: any name in the namespace.
    true
}

fn name_pattern_matches(pattern: &str, name: &str) -> bool {
    match Regex::new(&format!("^(?:{pattern})$")) {
        Ok(re) => re.is_match(name),
        Err(error) => {
            tracing::warn!(%error, pattern, "Invalid name pattern");
            false
        }
    }
}
