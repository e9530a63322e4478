//! Recent-server memory — spreads near-simultaneous identical provisions
//! without any cross-process coordination.
//!
//! The allocator remembers which servers it picked over the last few
//! seconds. The soft filter nudges the next allocation elsewhere; the
//! hard variant excludes recent picks entirely, for pipelines that accept
//! the risk of coming up empty.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::candidate::Candidate;
use crate::context::Context;

use super::{partition, Algorithm, StepResult};

/// How long a selection stays "recent", in milliseconds.
pub const RECENT_SERVER_WINDOW_MS: u64 = 5000;

/// Largest share of the candidate set the soft filter may drop.
pub const SOFT_RECENT_DROP_FRACTION: f64 = 0.25;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn purge_stale(ctx: &mut Context<'_>, now: u64) {
    ctx.state
        .recent_servers
        .retain(|_, last_used| now.saturating_sub(*last_used) < RECENT_SERVER_WINDOW_MS);
}

fn remember(ctx: &mut Context<'_>, chosen: &Candidate) {
    ctx.state.recent_servers.insert(chosen.uuid(), now_ms());
}

/// Excludes every recently selected server, possibly emptying the set.
pub struct HardFilterRecentServers;

impl Algorithm for HardFilterRecentServers {
    fn name(&self) -> &'static str {
        "hard-filter-recent-servers"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        purge_stale(ctx, now_ms());
        let recent = ctx.state.recent_servers.clone();

        partition(candidates, |c| {
            recent
                .contains_key(&c.uuid())
                .then(|| "server was selected moments ago".to_string())
        })
    }

    fn post(&self, ctx: &mut Context<'_>, chosen: &Candidate) {
        remember(ctx, chosen);
    }
}

/// Drops up to a quarter of the candidates, most recently selected
/// first, and backs off entirely rather than emptying the set.
pub struct SoftFilterRecentServers;

impl Algorithm for SoftFilterRecentServers {
    fn name(&self) -> &'static str {
        "soft-filter-recent-servers"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        purge_stale(ctx, now_ms());

        let mut recent: Vec<(usize, u64)> = candidates
            .iter()
            .enumerate()
            .filter_map(|(i, c)| {
                ctx.state
                    .recent_servers
                    .get(&c.uuid())
                    .map(|&last_used| (i, last_used))
            })
            .collect();
        if recent.is_empty() {
            return StepResult::all(candidates);
        }

        // Most recent first, capped at a quarter of the candidate set.
        recent.sort_by(|a, b| b.1.cmp(&a.1));
        let cap = (candidates.len() as f64 * SOFT_RECENT_DROP_FRACTION).ceil() as usize;
        let drop: std::collections::HashSet<usize> =
            recent.into_iter().take(cap).map(|(i, _)| i).collect();

        if drop.len() == candidates.len() {
            return StepResult::all(candidates);
        }

        let mut index = 0;
        partition(candidates, |_| {
            let rejected = drop
                .contains(&index)
                .then(|| "server was selected moments ago, spreading out".to_string());
            index += 1;
            rejected
        })
    }

    fn post(&self, ctx: &mut Context<'_>, chosen: &Candidate) {
        remember(ctx, chosen);
    }
}
