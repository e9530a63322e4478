//! Locality filters — enforce or prefer the near/far server sets the
//! affinity resolver produced.

use uuid::Uuid;

use crate::candidate::Candidate;
use crate::context::Context;

use super::{partition, Algorithm, StepResult};

/// Strict locality: far servers are removed outright, and when a near
/// constraint exists the VM may only land beside its named neighbors.
pub struct HardFilterLocalityHints;

impl Algorithm for HardFilterLocalityHints {
    fn name(&self) -> &'static str {
        "hard-filter-locality-hints"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        let hints = ctx.locality.clone();

        partition(candidates, |c| {
            let uuid = c.uuid();
            if hints.far.contains(&uuid) {
                return Some("server hosts a VM this one must be far from".to_string());
            }
            if let Some(near) = &hints.near {
                if !near.contains(&uuid) {
                    return Some("server hosts none of the VMs this one must be near".to_string());
                }
            }
            None
        })
    }
}

/// Non-strict locality: avoid far servers and prefer near ones, but only
/// as long as doing so leaves at least one candidate.
pub struct SoftFilterLocalityHints;

impl Algorithm for SoftFilterLocalityHints {
    fn name(&self) -> &'static str {
        "soft-filter-locality-hints"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        let hints = ctx.locality.clone();

        let mut result = StepResult::all(candidates);

        if !hints.soft_far.is_empty() {
            propose(&mut result, |c| {
                hints
                    .soft_far
                    .contains(&c.uuid())
                    .then(|| "server hosts a VM this one prefers to be far from".to_string())
            });
        }

        if let Some(near) = &hints.soft_near {
            propose(&mut result, |c| {
                (!near.contains(&c.uuid()))
                    .then(|| "server hosts none of the VMs this one prefers to be near".to_string())
            });
        }

        result
    }
}

/// Apply a rejection predicate only if it leaves at least one candidate;
/// an empty proposal leaves `result` untouched.
fn propose(result: &mut StepResult, reject: impl FnMut(&Candidate) -> Option<String>) {
    let input = result.kept.clone();
    let proposal = partition(std::mem::take(&mut result.kept), reject);

    if proposal.kept.is_empty() {
        result.kept = input;
    } else {
        result.reasons.extend(proposal.reasons);
        result.kept = proposal.kept;
    }
}

/// Docker `--volumes-from`: the chosen server must already hold every
/// container whose volumes the new one mounts.
pub struct HardFilterVolumesFrom;

impl Algorithm for HardFilterVolumesFrom {
    fn name(&self) -> &'static str {
        "hard-filter-volumes-from"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        let wanted = volumes_from(ctx);
        if wanted.is_empty() {
            return StepResult::all(candidates);
        }
        let owner = ctx.vm.owner_uuid;

        partition(candidates, |c| {
            wanted
                .iter()
                .find(|uuid| {
                    c.server
                        .vms
                        .get(uuid)
                        .is_none_or(|vm| vm.owner_uuid != owner)
                })
                .map(|uuid| format!("server does not hold container {uuid} for volumes-from"))
        })
    }
}

/// The `docker:volumesfrom` metadata value: a JSON-encoded UUID list.
fn volumes_from(ctx: &Context<'_>) -> Vec<Uuid> {
    let Some(value) = ctx.vm.internal_metadata.get("docker:volumesfrom") else {
        return Vec::new();
    };

    match value {
        serde_json::Value::String(encoded) => {
            serde_json::from_str(encoded).unwrap_or_default()
        }
        other => serde_json::from_value(other.clone()).unwrap_or_default(),
    }
}
