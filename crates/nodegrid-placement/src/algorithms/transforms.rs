//! Transform stages — annotate candidates and context without filtering.

use tracing::debug;

use nodegrid_core::{OverprovisionRatios, VmOnServer};

use crate::affinity::locality_hints;
use crate::candidate::Candidate;
use crate::context::Context;
use crate::derive::derive;

use super::{partition, Algorithm, StepResult};

/// Replaces every advertised and requested overprovision ratio with the
/// operator defaults, giving the fleet one uniform overprovisioning
/// policy. Disabled via `disable_override_overprovisioning`, which lets
/// packages and servers negotiate their own ratios.
pub struct OverrideOverprovisioning;

impl Algorithm for OverrideOverprovisioning {
    fn name(&self) -> &'static str {
        "override-overprovisioning"
    }

    fn run(&self, ctx: &mut Context<'_>, mut candidates: Vec<Candidate>) -> StepResult {
        if ctx.defaults.disable_override_overprovisioning {
            return StepResult::all(candidates);
        }

        let ratios = OverprovisionRatios {
            cpu: Some(ctx.defaults.overprovision_ratio_cpu),
            ram: Some(ctx.defaults.overprovision_ratio_ram),
            disk: Some(ctx.defaults.overprovision_ratio_disk),
        };

        for candidate in &mut candidates {
            candidate.server.overprovision_ratios = ratios;
        }
        ctx.requested_ratios = ratios;

        StepResult::all(candidates)
    }
}

/// Projects open provision tickets onto their servers as phantom VMs, so
/// capacity committed by an in-flight provision is charged before the
/// inventory catches up.
pub struct CalculateRecentVms;

impl Algorithm for CalculateRecentVms {
    fn name(&self) -> &'static str {
        "calculate-recent-vms"
    }

    fn run(&self, ctx: &mut Context<'_>, mut candidates: Vec<Candidate>) -> StepResult {
        for candidate in &mut candidates {
            for ticket in ctx.tickets {
                if !ticket.is_open_provision() || ticket.server_uuid != candidate.uuid() {
                    continue;
                }
                let vm_uuid = ticket.vm_uuid.unwrap_or(ticket.id);
                if candidate.server.vms.contains_key(&vm_uuid) {
                    continue;
                }
                let Some(extra) = &ticket.extra else {
                    continue;
                };

                debug!(server = %candidate.uuid(), vm = %vm_uuid, "charging ticketed VM");
                candidate.server.vms.insert(
                    vm_uuid,
                    VmOnServer {
                        owner_uuid: extra.owner_uuid,
                        alias: None,
                        brand: extra.brand.clone(),
                        state: Some("provisioning".to_string()),
                        cpu_cap: extra.cpu_cap,
                        quota: extra.quota,
                        max_physical_memory: extra.max_physical_memory,
                        last_modified: None,
                        tags: Default::default(),
                        internal_metadata: Default::default(),
                    },
                );
            }
        }

        StepResult::all(candidates)
    }
}

/// Runs the derivation math and annotates each candidate with its
/// unreserved RAM/CPU/disk. Servers too broken to derive are demoted
/// with a reason; the allocation itself continues.
pub struct CalculateServerUnreserved;

impl Algorithm for CalculateServerUnreserved {
    fn name(&self) -> &'static str {
        "calculate-server-unreserved"
    }

    fn run(&self, ctx: &mut Context<'_>, mut candidates: Vec<Candidate>) -> StepResult {
        let capacity = ctx.capacity;

        for candidate in &mut candidates {
            match derive(&candidate.server) {
                Ok(derived) => {
                    candidate.unreserved_ram = derived.ram;
                    candidate.unreserved_cpu = derived.cpu;
                    candidate.unreserved_disk = derived.disk;
                    candidate.derived = true;
                }
                Err(_) => candidate.derived = false,
            }
        }

        if capacity {
            // Capacity reports carry the zeros rather than losing the row.
            return StepResult::all(candidates);
        }

        partition(candidates, |c| {
            (!c.derived).then(|| "server resources could not be derived".to_string())
        })
    }
}

/// Resolves affinity rules and locality hints into the near/far server
/// sets the locality filters consume.
pub struct CalculateLocalityHints;

impl Algorithm for CalculateLocalityHints {
    fn name(&self) -> &'static str {
        "calculate-locality-hints"
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        ctx.locality = locality_hints(ctx.vm, &candidates);
        StepResult::all(candidates)
    }
}
