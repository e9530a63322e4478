//! Allocator facade — validates inputs, runs the pipeline, picks the
//! winner, and fires the post-selection hooks.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use nodegrid_core::{
    validate_defaults, validate_image, validate_package, validate_ticket, validate_vm, Defaults,
    Image, Package, Server, ServerSpread, Ticket, VmRequest,
};

use crate::algorithms::Registry;
use crate::candidate::Candidate;
use crate::context::{Context, State};
use crate::error::{AllocError, AllocResult};
use crate::pipeline::{self, Description, PipelineRun, StepSummary};

/// Weight large enough to dominate every other scorer, used to express
/// the deprecated `server_spread` knob as scorer weights.
const SPREAD_DOMINANT_WEIGHT: f64 = 1_000_000.0;

/// The outcome of one allocation call.
#[derive(Debug, Serialize)]
pub struct Allocation {
    /// The chosen server, or `None` with reasons when nothing qualified.
    pub server: Option<Server>,
    /// Ordered per-stage log of remaining candidates and rejections.
    pub steps: Vec<StepSummary>,
    /// Rejected server UUID → "stage: reason", first rejection wins.
    pub reasons: HashMap<Uuid, String>,
}

/// Per-server result of a capacity evaluation: the largest request each
/// dimension could still accept, and which request-independent filters
/// would exclude the server outright.
#[derive(Debug, Clone, Serialize)]
pub struct CapacityReport {
    /// MiB.
    pub ram: f64,
    /// Percent of a core; infinite when CPU is unbounded.
    pub cpu: f64,
    /// MiB.
    pub disk: f64,
    /// Stage name → why that stage would exclude this server.
    pub reasons: BTreeMap<String, String>,
}

/// The placement engine. One instance per control-plane worker; calls
/// are synchronous and must be serialized by the caller.
pub struct Allocator {
    description: Description,
    registry: Registry,
    defaults: Defaults,
    state: State,
}

impl Allocator {
    /// Build an allocator over a pipeline description. Fails if the
    /// defaults are malformed or the description names unknown stages.
    pub fn new(description: Description, defaults: Defaults) -> AllocResult<Self> {
        validate_defaults(&defaults).map_err(AllocError::InvalidDefaults)?;

        let registry = Registry::builtin();
        for name in description.stage_names() {
            if !registry.contains(name) {
                return Err(AllocError::UnknownAlgorithm(name.to_string()));
            }
        }

        Ok(Self {
            description,
            registry,
            defaults,
            state: State::new(),
        })
    }

    /// Build an allocator over the documented default pipeline.
    pub fn with_default_pipeline(defaults: Defaults) -> AllocResult<Self> {
        Self::new(Description::default_pipeline(), defaults)
    }

    /// Seed the uniform-random scorer, making allocations reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.state = State::with_seed(seed);
        self
    }

    pub fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    /// Choose a server for `vm`, or explain why none qualified.
    pub fn allocate(
        &mut self,
        servers: &[Server],
        vm: &VmRequest,
        image: &Image,
        package: Option<&Package>,
        tickets: &[Ticket],
    ) -> AllocResult<Allocation> {
        validate_vm(vm, image).map_err(AllocError::InvalidVm)?;
        validate_image(image).map_err(AllocError::InvalidImage)?;
        if let Some(pkg) = package {
            validate_package(pkg).map_err(AllocError::InvalidPackage)?;
        }
        for ticket in tickets {
            validate_ticket(ticket)
                .map_err(|err| AllocError::InvalidTicket { id: ticket.id, err })?;
        }

        let defaults = self.call_defaults(package);
        let mut ctx = Context::new(vm, image, package, tickets, defaults, &mut self.state);

        let candidates: Vec<Candidate> = servers.iter().cloned().map(Candidate::new).collect();
        let mut run = PipelineRun::default();
        let survivors =
            pipeline::execute(&self.description, &self.registry, &mut ctx, candidates, &mut run)?;

        let chosen = pick(&survivors, &ctx);
        match &chosen {
            Some(winner) => {
                let mut fired = HashSet::new();
                for name in self.description.stage_names() {
                    if fired.insert(name) {
                        if let Some(stage) = self.registry.get(name) {
                            stage.post(&mut ctx, winner);
                        }
                    }
                }
                info!(
                    server = %winner.uuid(),
                    vm = ?vm.vm_uuid,
                    candidates = servers.len(),
                    "server selected"
                );
            }
            None => {
                info!(vm = ?vm.vm_uuid, candidates = servers.len(), "no server qualified");
            }
        }

        Ok(Allocation {
            server: chosen.map(|c| c.server),
            reasons: consolidate_reasons(&run.steps),
            steps: run.steps,
        })
    }

    /// Evaluate how much each server could still accept, without placing
    /// anything. No server is dropped; disqualifying filters show up in
    /// each report's reasons instead.
    pub fn server_capacity(
        &mut self,
        servers: &[Server],
    ) -> AllocResult<HashMap<Uuid, CapacityReport>> {
        let vm = capacity_probe_vm();
        let image = Image::default();

        let mut ctx = Context::new(
            &vm,
            &image,
            None,
            &[],
            self.defaults.clone(),
            &mut self.state,
        );
        ctx.capacity = true;

        let candidates: Vec<Candidate> = servers.iter().cloned().map(Candidate::new).collect();
        let mut run = PipelineRun::default();
        let survivors =
            pipeline::execute(&self.description, &self.registry, &mut ctx, candidates, &mut run)?;

        let mut reports: HashMap<Uuid, CapacityReport> = survivors
            .into_iter()
            .map(|c| {
                let reasons = run.capacity_reasons.remove(&c.uuid()).unwrap_or_default();
                (
                    c.uuid(),
                    CapacityReport {
                        ram: c.unreserved_ram,
                        cpu: c.unreserved_cpu,
                        disk: c.unreserved_disk,
                        reasons,
                    },
                )
            })
            .collect();

        // A server a transform could not derive still gets a row.
        for server in servers {
            if !reports.contains_key(&server.uuid) {
                let mut reasons = BTreeMap::new();
                for step in &run.steps {
                    if let Some(reason) = step.reasons.get(&server.uuid) {
                        reasons.insert(step.step.clone(), reason.clone());
                    }
                }
                reports.insert(
                    server.uuid,
                    CapacityReport {
                        ram: 0.0,
                        cpu: 0.0,
                        disk: 0.0,
                        reasons,
                    },
                );
            }
        }

        Ok(reports)
    }

    /// Defaults for one call, with any server-spread sugar folded into
    /// the scorer weights.
    fn call_defaults(&self, package: Option<&Package>) -> Defaults {
        let mut defaults = self.defaults.clone();
        let spread = package
            .and_then(|p| p.alloc_server_spread)
            .or(defaults.server_spread);

        match spread {
            Some(ServerSpread::MinRam) => defaults.weight_unreserved_ram = -SPREAD_DOMINANT_WEIGHT,
            Some(ServerSpread::MaxRam) => defaults.weight_unreserved_ram = SPREAD_DOMINANT_WEIGHT,
            Some(ServerSpread::Random) => defaults.weight_uniform_random = SPREAD_DOMINANT_WEIGHT,
            Some(ServerSpread::MinOwner) => {
                defaults.weight_num_owner_zones = SPREAD_DOMINANT_WEIGHT
            }
            None => {}
        }
        defaults
    }
}

/// Highest score wins; equal scores go to the smallest UUID so repeated
/// calls stay deterministic.
fn pick(survivors: &[Candidate], ctx: &Context<'_>) -> Option<Candidate> {
    let mut best: Option<(&Candidate, f64)> = None;
    for candidate in survivors {
        let score = ctx.score(candidate.uuid());
        best = match best {
            None => Some((candidate, score)),
            Some((current, current_score)) => {
                if score > current_score
                    || (score == current_score && candidate.uuid() < current.uuid())
                {
                    Some((candidate, score))
                } else {
                    Some((current, current_score))
                }
            }
        };
    }
    best.map(|(c, _)| c.clone())
}

fn consolidate_reasons(steps: &[StepSummary]) -> HashMap<Uuid, String> {
    let mut reasons = HashMap::new();
    for step in steps {
        for (uuid, reason) in &step.reasons {
            reasons
                .entry(*uuid)
                .or_insert_with(|| format!("{}: {reason}", step.step));
        }
    }
    reasons
}

/// The request shape used to probe capacity: demands nothing, so only
/// request-independent filters can flag servers.
fn capacity_probe_vm() -> VmRequest {
    VmRequest {
        vm_uuid: None,
        owner_uuid: Uuid::nil(),
        ram: 0,
        quota: None,
        cpu_cap: None,
        traits: Default::default(),
        nic_tags: Vec::new(),
        locality: None,
        affinity: Vec::new(),
        internal_metadata: Default::default(),
        brand: None,
        volumes: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{image, server, vm_request};

    fn allocator() -> Allocator {
        Allocator::with_default_pipeline(Defaults::default())
            .unwrap()
            .with_seed(7)
    }

    #[test]
    fn bad_defaults_fail_construction() {
        let defaults = Defaults {
            overprovision_ratio_ram: -1.0,
            ..Defaults::default()
        };
        assert!(matches!(
            Allocator::with_default_pipeline(defaults),
            Err(AllocError::InvalidDefaults(_))
        ));
    }

    #[test]
    fn unknown_stage_fails_construction() {
        let desc = Description::Stage("hard-filter-unicorns".into());
        assert!(matches!(
            Allocator::new(desc, Defaults::default()),
            Err(AllocError::UnknownAlgorithm(_))
        ));
    }

    #[test]
    fn invalid_vm_fails_the_call() {
        let mut alloc = allocator();
        let mut vm = vm_request(1024);
        vm.ram = 0;

        let err = alloc
            .allocate(&[server()], &vm, &image(), None, &[])
            .unwrap_err();
        assert!(matches!(err, AllocError::InvalidVm(_)));
    }

    #[test]
    fn allocates_onto_a_fitting_server() {
        let mut alloc = allocator();
        let servers = vec![server()];
        let expected = servers[0].uuid;

        let result = alloc
            .allocate(&servers, &vm_request(2048), &image(), None, &[])
            .unwrap();
        assert_eq!(result.server.map(|s| s.uuid), Some(expected));
    }

    #[test]
    fn returns_reasons_when_nothing_fits() {
        let mut alloc = allocator();
        let mut tiny = server();
        tiny.memory_total_bytes = 2 * 1024 * 1024 * 1024; // ~1740 MiB unreserved
        tiny.memory_available_bytes = 1024 * 1024 * 1024;
        let uuid = tiny.uuid;

        let result = alloc
            .allocate(&[tiny], &vm_request(4096), &image(), None, &[])
            .unwrap();
        assert!(result.server.is_none());
        assert!(result.reasons[&uuid].starts_with("hard-filter-min-ram:"));
    }

    #[test]
    fn score_ties_break_to_smallest_uuid() {
        let mut alloc = Allocator::with_default_pipeline(Defaults {
            weight_uniform_random: 0.0,
            filter_large_servers: false,
            ..Defaults::default()
        })
        .unwrap();

        // Identical servers, identical scores.
        let servers = vec![server(), server(), server()];
        let smallest = servers.iter().map(|s| s.uuid).min().unwrap();

        let result = alloc
            .allocate(&servers, &vm_request(1024), &image(), None, &[])
            .unwrap();
        assert_eq!(result.server.map(|s| s.uuid), Some(smallest));
    }

    #[test]
    fn spread_sugar_overrides_weights() {
        let alloc = Allocator::with_default_pipeline(Defaults::default()).unwrap();

        let pkg = Package {
            alloc_server_spread: Some(ServerSpread::MinRam),
            ..Package::default()
        };
        let defaults = alloc.call_defaults(Some(&pkg));
        assert_eq!(defaults.weight_unreserved_ram, -SPREAD_DOMINANT_WEIGHT);

        let defaults = alloc.call_defaults(None);
        assert_eq!(defaults.weight_unreserved_ram, 2.0);
    }
}
