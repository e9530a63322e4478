//! Pipeline stages — the pluggable filters, scorers, and transforms the
//! interpreter composes.
//!
//! Every stage implements [`Algorithm`]: it receives the surviving
//! candidates and the call context, and returns the candidates it keeps
//! plus a reason for each one it rejected. Stages that need to remember
//! the final selection (the recent-server filters) also implement `post`.

use std::collections::HashMap;

use uuid::Uuid;

use crate::candidate::Candidate;
use crate::context::Context;

mod compat;
mod flags;
mod locality;
mod platforms;
mod recency;
mod resources;
mod scorers;
mod transforms;

pub use recency::{RECENT_SERVER_WINDOW_MS, SOFT_RECENT_DROP_FRACTION};

/// What one stage did with the candidate set.
pub struct StepResult {
    pub kept: Vec<Candidate>,
    /// Rejected server UUID → human-readable reason.
    pub reasons: HashMap<Uuid, String>,
}

impl StepResult {
    /// Keep everything; nothing to report.
    pub fn all(kept: Vec<Candidate>) -> Self {
        Self {
            kept,
            reasons: HashMap::new(),
        }
    }
}

/// Split candidates by a rejection predicate; `None` keeps the candidate.
pub fn partition(
    candidates: Vec<Candidate>,
    mut reject: impl FnMut(&Candidate) -> Option<String>,
) -> StepResult {
    let mut kept = Vec::with_capacity(candidates.len());
    let mut reasons = HashMap::new();

    for candidate in candidates {
        match reject(&candidate) {
            Some(reason) => {
                reasons.insert(candidate.uuid(), reason);
            }
            None => kept.push(candidate),
        }
    }

    StepResult { kept, reasons }
}

/// A named pipeline stage.
pub trait Algorithm: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this stage's result depends on the size of the request.
    /// Such stages are rewritten to annotate-only in capacity mode.
    fn affects_capacity(&self) -> bool {
        false
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult;

    /// Called with the chosen server after a successful allocation.
    fn post(&self, _ctx: &mut Context<'_>, _chosen: &Candidate) {}
}

/// The built-in stages, addressable by name from a pipeline description.
pub struct Registry {
    stages: HashMap<&'static str, Box<dyn Algorithm>>,
}

impl Registry {
    pub fn builtin() -> Self {
        let stages: Vec<Box<dyn Algorithm>> = vec![
            // transforms
            Box::new(transforms::OverrideOverprovisioning),
            Box::new(transforms::CalculateRecentVms),
            Box::new(transforms::CalculateServerUnreserved),
            Box::new(transforms::CalculateLocalityHints),
            // hard filters
            Box::new(flags::HardFilterSetup),
            Box::new(flags::HardFilterRunning),
            Box::new(flags::HardFilterReserved),
            Box::new(flags::HardFilterReservoir),
            Box::new(flags::HardFilterHeadnode),
            Box::new(flags::HardFilterVirtualServers),
            Box::new(flags::HardFilterInvalidServers),
            Box::new(flags::HardFilterVmCount),
            Box::new(flags::HardFilterForceFailure),
            Box::new(resources::HardFilterMinRam),
            Box::new(resources::HardFilterMinCpu),
            Box::new(resources::HardFilterMinDisk),
            Box::new(resources::HardFilterMinFreeDisk),
            Box::new(resources::HardFilterOverprovisionRatios),
            Box::new(resources::HardFilterLargeServers),
            Box::new(platforms::HardFilterPlatformVersions),
            Box::new(platforms::HardFilterFeatureMinPlatform),
            Box::new(compat::HardFilterTraits),
            Box::new(compat::HardFilterVlans),
            Box::new(locality::HardFilterLocalityHints),
            Box::new(locality::HardFilterVolumesFrom),
            Box::new(recency::HardFilterRecentServers),
            // soft filters
            Box::new(locality::SoftFilterLocalityHints),
            Box::new(recency::SoftFilterRecentServers),
            // scorers
            Box::new(scorers::ScoreUnreservedRam),
            Box::new(scorers::ScoreUnreservedDisk),
            Box::new(scorers::ScoreNumOwnerZones),
            Box::new(scorers::ScoreCurrentPlatform),
            Box::new(scorers::ScoreNextReboot),
            Box::new(scorers::ScoreUniformRandom),
        ];

        Self {
            stages: stages.into_iter().map(|s| (s.name(), s)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Algorithm> {
        self.stages.get(name).map(Box::as_ref)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }
}
