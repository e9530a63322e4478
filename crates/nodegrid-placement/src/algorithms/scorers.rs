//! Scorers — rank the survivors along one dimension each and add a
//! weighted, non-negative contribution to every server's score.
//!
//! A scorer never removes anything. Negative weights invert the ranking
//! (the formerly best-ranked server becomes worst) while the contribution
//! itself stays non-negative, so scores only ever grow.

use rand::Rng;
use uuid::Uuid;

use crate::candidate::Candidate;
use crate::context::Context;

use super::{Algorithm, StepResult};

/// Sort key for a platform far in the future, used when a server has no
/// reboot scheduled.
const NO_REBOOT_PLANNED: &str = "9999-12-31T23:59:59Z";

/// Rank candidates by a key and scale the normalized rank into scores.
///
/// Equal keys share a rank. With a single distinct key everyone receives
/// the full weight, a constant that cannot change the ordering.
fn apply_ranked<K, F>(
    ctx: &mut Context<'_>,
    candidates: &[Candidate],
    weight: f64,
    higher_is_better: bool,
    key: F,
) where
    K: PartialOrd,
    F: Fn(&Candidate) -> K,
{
    if weight == 0.0 || candidates.is_empty() {
        return;
    }
    let better_high = higher_is_better == (weight >= 0.0);

    let mut keyed: Vec<(Uuid, K)> = candidates.iter().map(|c| (c.uuid(), key(c))).collect();
    keyed.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    // Distinct ascending ranks; ties share.
    let mut ranks: Vec<usize> = Vec::with_capacity(keyed.len());
    let mut rank = 0usize;
    for i in 0..keyed.len() {
        if i > 0 && keyed[i].1.partial_cmp(&keyed[i - 1].1) != Some(std::cmp::Ordering::Equal) {
            rank += 1;
        }
        ranks.push(rank);
    }
    let max_rank = rank;

    for ((uuid, _), rank) in keyed.into_iter().zip(ranks) {
        let mut normalized = if max_rank == 0 {
            1.0
        } else {
            rank as f64 / max_rank as f64
        };
        if !better_high {
            normalized = 1.0 - normalized;
        }
        *ctx.scores.entry(uuid).or_insert(0.0) += weight.abs() * normalized;
    }
}

/// More unreserved RAM scores higher.
pub struct ScoreUnreservedRam;

impl Algorithm for ScoreUnreservedRam {
    fn name(&self) -> &'static str {
        "score-unreserved-ram"
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        let weight = ctx.defaults.weight_unreserved_ram;
        apply_ranked(ctx, &candidates, weight, true, |c| c.unreserved_ram);
        StepResult::all(candidates)
    }
}

/// More unreserved disk scores higher.
pub struct ScoreUnreservedDisk;

impl Algorithm for ScoreUnreservedDisk {
    fn name(&self) -> &'static str {
        "score-unreserved-disk"
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        let weight = ctx.defaults.weight_unreserved_disk;
        apply_ranked(ctx, &candidates, weight, true, |c| c.unreserved_disk);
        StepResult::all(candidates)
    }
}

/// Fewer VMs belonging to the requesting owner scores higher, spreading
/// one customer's instances across failure domains.
pub struct ScoreNumOwnerZones;

impl Algorithm for ScoreNumOwnerZones {
    fn name(&self) -> &'static str {
        "score-num-owner-zones"
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        let weight = ctx.defaults.weight_num_owner_zones;
        let owner = ctx.vm.owner_uuid;
        apply_ranked(ctx, &candidates, weight, false, |c| {
            c.server
                .vms
                .values()
                .filter(|vm| vm.owner_uuid == owner)
                .count()
        });
        StepResult::all(candidates)
    }
}

/// A newer booted platform scores higher.
pub struct ScoreCurrentPlatform;

impl Algorithm for ScoreCurrentPlatform {
    fn name(&self) -> &'static str {
        "score-current-platform"
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        let weight = ctx.defaults.weight_current_platform;
        apply_ranked(ctx, &candidates, weight, true, |c| {
            c.server.sysinfo.live_image.clone().unwrap_or_default()
        });
        StepResult::all(candidates)
    }
}

/// A reboot scheduled farther in the future scores higher; no scheduled
/// reboot is best of all.
pub struct ScoreNextReboot;

impl Algorithm for ScoreNextReboot {
    fn name(&self) -> &'static str {
        "score-next-reboot"
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        let weight = ctx.defaults.weight_next_reboot;
        apply_ranked(ctx, &candidates, weight, true, |c| {
            c.server
                .next_reboot
                .clone()
                .unwrap_or_else(|| NO_REBOOT_PLANNED.to_string())
        });
        StepResult::all(candidates)
    }
}

/// Adds a uniformly random contribution, de-synchronizing allocators
/// that would otherwise rank identical servers identically.
pub struct ScoreUniformRandom;

impl Algorithm for ScoreUniformRandom {
    fn name(&self) -> &'static str {
        "score-uniform-random"
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        let weight = ctx.defaults.weight_uniform_random;
        if weight == 0.0 {
            return StepResult::all(candidates);
        }
        for candidate in &candidates {
            let roll: f64 = ctx.state.rng.gen();
            *ctx.scores.entry(candidate.uuid()).or_insert(0.0) += weight.abs() * roll;
        }
        StepResult::all(candidates)
    }
}
