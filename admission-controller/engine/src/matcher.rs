//! Decides whether a rule applies to the resource of a request.

use kyverno_admission_core::{context::operation_name, PolicyContext};
use kyverno_admission_k8s_api::{
    policy::{MatchResources, ResourceDescription, ResourceFilter, Rule},
    Labels,
};
use regex::Regex;
use serde_json::Value;

/// A rule applies when its `match` block selects the resource and its
/// `exclude` block, if any, does not.
pub fn rule_applies(rule: &Rule, ctx: &PolicyContext) -> bool {
    if !selects(&rule.match_resources, ctx) {
        return false;
    }
    !rule.exclude.as_ref().is_some_and(|ex| selects(ex, ctx))
}

/// An empty block selects nothing. Otherwise the top-level filter, every
/// `all` filter and at least one `any` filter must match.
fn selects(block: &MatchResources, ctx: &PolicyContext) -> bool {
    let top = (!is_empty(&block.filter)).then(|| filter_matches(&block.filter, ctx));
    let any = (!block.any.is_empty()).then(|| block.any.iter().any(|f| filter_matches(f, ctx)));
    let all = (!block.all.is_empty()).then(|| block.all.iter().all(|f| filter_matches(f, ctx)));

    let checks = [top, any, all];
    checks.iter().any(Option::is_some) && checks.into_iter().flatten().all(|ok| ok)
}

fn is_empty(filter: &ResourceFilter) -> bool {
    filter.resources.is_none()
        && non_empty(&filter.roles).is_none()
        && non_empty(&filter.cluster_roles).is_none()
}

fn filter_matches(filter: &ResourceFilter, ctx: &PolicyContext) -> bool {
    if let Some(resources) = filter.resources.as_ref() {
        if !description_matches(resources, ctx) {
            return false;
        }
    }

    let info = &ctx.admission_info;
    if let Some(roles) = non_empty(&filter.roles) {
        if !roles.iter().any(|r| info.roles.contains(r)) {
            return false;
        }
    }
    if let Some(roles) = non_empty(&filter.cluster_roles) {
        if !roles.iter().any(|r| info.cluster_roles.contains(r)) {
            return false;
        }
    }

    true
}

fn description_matches(desc: &ResourceDescription, ctx: &PolicyContext) -> bool {
    let resource = ctx.resource();
    let metadata = resource.get("metadata").unwrap_or(&Value::Null);
    let name = ["name", "generateName"]
        .iter()
        .find_map(|k| metadata.get(*k).and_then(Value::as_str))
        .unwrap_or_default();

    if let Some(kinds) = non_empty(&desc.kinds) {
        let kind_matches = kinds.iter().any(|k| {
            let k = k.rsplit('/').next().unwrap_or(k);
            k == "*" || k == ctx.kind
        });
        if !kind_matches {
            return false;
        }
    }

    if let Some(names) = non_empty(&desc.names) {
        if !names.iter().any(|p| glob_matches(p, name)) {
            return false;
        }
    }

    if let Some(namespaces) = non_empty(&desc.namespaces) {
        // A namespace is matched by its own name.
        let ns = if ctx.kind == "Namespace" {
            Some(name)
        } else {
            ctx.namespace.as_deref()
        };
        let Some(ns) = ns else {
            return false;
        };
        if !namespaces.iter().any(|p| glob_matches(p, ns)) {
            return false;
        }
    }

    if let Some(operations) = non_empty(&desc.operations) {
        let op = operation_name(&ctx.operation);
        if !operations.iter().any(|o| o.eq_ignore_ascii_case(op)) {
            return false;
        }
    }

    if let Some(selector) = desc.selector.as_ref() {
        let labels = metadata
            .get("labels")
            .and_then(Value::as_object)
            .into_iter()
            .flatten()
            .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
            .collect::<Labels>();
        if !selector.matches(&labels) {
            return false;
        }
    }

    true
}

fn non_empty(values: &Option<Vec<String>>) -> Option<&Vec<String>> {
    values.as_ref().filter(|v| !v.is_empty())
}

/// Matches `value` against a pattern where `*` matches any sequence and `?`
/// any single character.
pub fn glob_matches(pattern: &str, value: &str) -> bool {
    if !pattern.contains(|c| c == '*' || c == '?') {
        return pattern == value;
    }
    let re = format!(
        "^{}$",
        regex::escape(pattern)
            .replace(r"\*", ".*")
            .replace(r"\?", ".")
    );
    Regex::new(&re).is_ok_and(|re| re.is_match(value))
}
