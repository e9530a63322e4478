//! Affinity resolution — turns affinity rules and locality hints into
//! concrete near/far server sets.
//!
//! Rules name existing VMs by instance (alias, UUID, docker ID) or by
//! tag, and are resolved by scanning the VM listings of every candidate
//! server. The resulting server sets feed the locality filters; this
//! module never drops candidates itself.

use std::collections::HashSet;

use regex::Regex;
use tracing::warn;
use uuid::Uuid;

use nodegrid_core::{AffinityOperator, AffinityRule, AffinityValueType, VmOnServer, VmRequest};

use crate::candidate::Candidate;
use crate::context::LocalityHints;

/// Resolve a VM request's locality and affinity into server-UUID hints.
pub fn locality_hints(vm: &VmRequest, candidates: &[Candidate]) -> LocalityHints {
    let mut hints = LocalityHints::default();

    if let Some(locality) = &vm.locality {
        let near = servers_hosting(&locality.near.iter().copied().collect(), candidates);
        let far = servers_hosting(&locality.far.iter().copied().collect(), candidates);

        if locality.strict {
            if !locality.near.is_empty() {
                merge_near(&mut hints.near, near);
            }
            hints.far.extend(far);
        } else {
            if !locality.near.is_empty() {
                merge_near(&mut hints.soft_near, near);
            }
            hints.soft_far.extend(far);
        }
    }

    for rule in &vm.affinity {
        let matched = match_rule(rule, candidates);
        let servers = servers_hosting(&matched, candidates);

        match (rule.operator, rule.is_soft) {
            (AffinityOperator::Equal, false) => merge_near(&mut hints.near, servers),
            (AffinityOperator::Equal, true) => merge_near(&mut hints.soft_near, servers),
            (AffinityOperator::NotEqual, false) => hints.far.extend(servers),
            (AffinityOperator::NotEqual, true) => hints.soft_far.extend(servers),
        }
    }

    hints
}

/// An empty near set stays `Some` so the locality filters can tell
/// "constrained but unsatisfiable" apart from "unconstrained".
fn merge_near(slot: &mut Option<HashSet<Uuid>>, servers: HashSet<Uuid>) {
    match slot {
        Some(existing) => existing.extend(servers),
        None => *slot = Some(servers),
    }
}

/// Servers hosting any of the given VMs.
fn servers_hosting(vm_uuids: &HashSet<Uuid>, candidates: &[Candidate]) -> HashSet<Uuid> {
    candidates
        .iter()
        .filter(|c| vm_uuids.iter().any(|u| c.server.vms.contains_key(u)))
        .map(Candidate::uuid)
        .collect()
}

/// VMs across all candidate servers that a rule matches.
fn match_rule(rule: &AffinityRule, candidates: &[Candidate]) -> HashSet<Uuid> {
    let by_instance = rule.key == "instance" || rule.key == "container";

    if by_instance && rule.value_type == AffinityValueType::Exact {
        return match_instance_exact(rule, candidates);
    }

    let Some(re) = rule_regex(rule) else {
        return HashSet::new();
    };

    let mut matched = HashSet::new();
    for candidate in candidates {
        for (uuid, vm) in &candidate.server.vms {
            let hit = if by_instance {
                vm.alias.as_deref().is_some_and(|alias| re.is_match(alias))
            } else {
                tag_value(vm, &rule.key).is_some_and(|tag| re.is_match(&tag))
            };
            if hit {
                matched.insert(*uuid);
            }
        }
    }
    matched
}

/// Exact instance matching: a full UUID, a full alias, or an unambiguous
/// docker-ID prefix. A prefix matching several containers identifies
/// nothing.
fn match_instance_exact(rule: &AffinityRule, candidates: &[Candidate]) -> HashSet<Uuid> {
    let mut matched = HashSet::new();
    let mut docker_hits = HashSet::new();

    for candidate in candidates {
        for (uuid, vm) in &candidate.server.vms {
            if uuid.to_string() == rule.value || vm.alias.as_deref() == Some(rule.value.as_str()) {
                matched.insert(*uuid);
            } else if docker_id(vm).is_some_and(|id| id.starts_with(&rule.value)) {
                docker_hits.insert(*uuid);
            }
        }
    }

    if docker_hits.len() == 1 {
        matched.extend(docker_hits);
    }
    matched
}

fn rule_regex(rule: &AffinityRule) -> Option<Regex> {
    let pattern = match rule.value_type {
        AffinityValueType::Exact => format!("^{}$", regex::escape(&rule.value)),
        AffinityValueType::Glob => glob_pattern(&rule.value),
        AffinityValueType::Re => {
            let v = rule.value.as_str();
            let inner = v
                .strip_prefix('/')
                .and_then(|rest| rest.strip_suffix('/'))
                .unwrap_or(v);
            inner.to_string()
        }
    };

    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(err) => {
            warn!(key = %rule.key, value = %rule.value, %err, "unusable affinity pattern");
            None
        }
    }
}

fn glob_pattern(glob: &str) -> String {
    let mut pattern = String::from("^");
    for ch in glob.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    pattern
}

/// A VM tag in its string form, as rules are written against.
fn tag_value(vm: &VmOnServer, tag: &str) -> Option<String> {
    vm.tags.get(tag).map(|value| match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

fn docker_id(vm: &VmOnServer) -> Option<&str> {
    vm.internal_metadata.get("docker:id").and_then(|v| v.as_str())
}
