//! Per-call evaluation context and cross-call allocator state.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::SeedableRng;
use uuid::Uuid;

use nodegrid_core::{Defaults, Image, OverprovisionRatios, Package, Ticket, VmRequest};

/// Mutable state owned by the allocator and carried across calls.
///
/// The recent-server map is an optimization against provisioning
/// stampedes; losing it can never make an allocation wrong, only less
/// spread out.
#[derive(Debug)]
pub struct State {
    /// Server UUID → epoch milliseconds of the last allocation to it.
    pub recent_servers: HashMap<Uuid, u64>,
    /// PRNG for the uniform-random scorer. Seeded from entropy unless the
    /// allocator was built with an explicit seed.
    pub rng: StdRng,
}

impl State {
    pub fn new() -> Self {
        Self {
            recent_servers: HashMap::new(),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            recent_servers: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

/// Near/far server sets resolved from locality hints and affinity rules.
///
/// `near`/`soft_near` distinguish "no near constraint" (`None`) from
/// "constrained, but nothing matched" (`Some` of an empty set) — the
/// latter must empty the candidate list under strict locality.
#[derive(Debug, Clone, Default)]
pub struct LocalityHints {
    pub near: Option<HashSet<Uuid>>,
    pub far: HashSet<Uuid>,
    pub soft_near: Option<HashSet<Uuid>>,
    pub soft_far: HashSet<Uuid>,
}

/// Everything a pipeline stage may read or annotate during one call.
///
/// Inputs are borrows of the caller's records; stages must go through the
/// candidate copies to change anything server-shaped.
pub struct Context<'a> {
    pub vm: &'a VmRequest,
    pub image: &'a Image,
    pub package: Option<&'a Package>,
    pub tickets: &'a [Ticket],
    /// Defaults for this call, with any server-spread sugar already
    /// applied to the scorer weights.
    pub defaults: Defaults,
    /// True when evaluating fleet capacity rather than placing a VM.
    pub capacity: bool,
    /// Overprovision ratios the request demands of a server, from the
    /// package (or the operator override stage).
    pub requested_ratios: OverprovisionRatios,
    /// Filled in by `calculate-locality-hints`.
    pub locality: LocalityHints,
    /// Accumulated per-server scores.
    pub scores: HashMap<Uuid, f64>,
    pub state: &'a mut State,
}

impl<'a> Context<'a> {
    pub fn new(
        vm: &'a VmRequest,
        image: &'a Image,
        package: Option<&'a Package>,
        tickets: &'a [Ticket],
        defaults: Defaults,
        state: &'a mut State,
    ) -> Self {
        let requested_ratios = OverprovisionRatios {
            cpu: package.and_then(|p| p.overprovision_cpu),
            ram: package.and_then(|p| p.overprovision_memory),
            disk: package.and_then(|p| p.overprovision_storage),
        };

        Self {
            vm,
            image,
            package,
            tickets,
            defaults,
            capacity: false,
            requested_ratios,
            locality: LocalityHints::default(),
            scores: HashMap::new(),
            state,
        }
    }

    /// RAM the request needs, in MiB. The package overrides the VM's own
    /// figure when present.
    pub fn requested_ram(&self) -> u64 {
        self.package
            .and_then(|p| p.max_physical_memory)
            .unwrap_or(self.vm.ram)
    }

    /// CPU cap the request needs, in percent, if any dimension constrains
    /// it at all.
    pub fn requested_cpu_cap(&self) -> Option<u32> {
        self.vm
            .cpu_cap
            .or_else(|| self.package.and_then(|p| p.cpu_cap))
    }

    /// Disk the request needs, in MiB. HVM brands also carry their image's
    /// zvol, which is charged at nominal size.
    pub fn requested_disk(&self) -> Option<u64> {
        let quota = self
            .vm
            .quota
            .or_else(|| self.package.and_then(|p| p.quota))?;

        let image_size = match self.vm.brand.as_deref() {
            Some("kvm") | Some("bhyve") => self.image.image_size.unwrap_or(0),
            _ => 0,
        };
        Some(quota + image_size)
    }

    /// Current score for a candidate server.
    pub fn score(&self, uuid: Uuid) -> f64 {
        self.scores.get(&uuid).copied().unwrap_or(0.0)
    }
}
