//! Resource hard filters: unreserved RAM/CPU/disk, raw pool space,
//! overprovision-ratio agreement, and large-server preservation.

use crate::candidate::Candidate;
use crate::context::Context;

use super::{partition, Algorithm, StepResult};

const MIB: f64 = 1024.0 * 1024.0;

/// Tolerance when comparing overprovision ratios; CN agents round their
/// advertised ratios differently.
const RATIO_TOLERANCE: f64 = 0.01;

/// Fraction of the biggest survivors held back for large allocations.
const LARGE_SERVER_FRACTION: f64 = 0.15;

pub struct HardFilterMinRam;

impl Algorithm for HardFilterMinRam {
    fn name(&self) -> &'static str {
        "hard-filter-min-ram"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        if !ctx.defaults.filter_min_resources {
            return StepResult::all(candidates);
        }
        let wanted = ctx.requested_ram() as f64;
        partition(candidates, |c| {
            (c.unreserved_ram < wanted).then(|| {
                format!(
                    "VM needs {wanted} MiB RAM, server has {} MiB unreserved",
                    c.unreserved_ram
                )
            })
        })
    }
}

pub struct HardFilterMinCpu;

impl Algorithm for HardFilterMinCpu {
    fn name(&self) -> &'static str {
        "hard-filter-min-cpu"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        if !ctx.defaults.filter_min_resources {
            return StepResult::all(candidates);
        }
        let Some(wanted) = ctx.requested_cpu_cap() else {
            return StepResult::all(candidates);
        };
        let wanted = f64::from(wanted);

        partition(candidates, |c| {
            // Infinite means the server does not bound CPU at all.
            (c.unreserved_cpu.is_finite() && c.unreserved_cpu < wanted).then(|| {
                format!(
                    "VM needs {wanted}% CPU, server has {}% unreserved",
                    c.unreserved_cpu
                )
            })
        })
    }
}

pub struct HardFilterMinDisk;

impl Algorithm for HardFilterMinDisk {
    fn name(&self) -> &'static str {
        "hard-filter-min-disk"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        if !ctx.defaults.filter_min_resources {
            return StepResult::all(candidates);
        }
        let Some(wanted) = ctx.requested_disk() else {
            return StepResult::all(candidates);
        };
        let wanted = wanted as f64;

        partition(candidates, |c| {
            (c.unreserved_disk < wanted).then(|| {
                format!(
                    "VM needs {wanted} MiB disk, server has {} MiB unreserved",
                    c.unreserved_disk
                )
            })
        })
    }
}

/// Raw pool-space check, deliberately blind to overprovisioning: however
/// thin the zone quotas are sliced, the bytes must exist.
pub struct HardFilterMinFreeDisk;

impl Algorithm for HardFilterMinFreeDisk {
    fn name(&self) -> &'static str {
        "hard-filter-min-free-disk"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        if !ctx.defaults.filter_min_resources {
            return StepResult::all(candidates);
        }
        let Some(wanted) = ctx.requested_disk() else {
            return StepResult::all(candidates);
        };
        let wanted = wanted as f64;

        partition(candidates, |c| {
            let free = (c.server.disk_pool_size_bytes as f64
                - c.server.disk_pool_alloc_bytes as f64)
                / MIB;
            (free < wanted)
                .then(|| format!("VM needs {wanted} MiB disk, pool has {free} MiB free"))
        })
    }
}

/// A server can only take the request if it amortizes its hardware at
/// the ratios the request was billed under.
pub struct HardFilterOverprovisionRatios;

impl Algorithm for HardFilterOverprovisionRatios {
    fn name(&self) -> &'static str {
        "hard-filter-overprovision-ratios"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        let requested = ctx.requested_ratios;

        partition(candidates, |c| {
            let advertised = c.server.overprovision_ratios;

            if let Some(want) = requested.ram {
                let have = advertised.ram.unwrap_or(1.0);
                if (have - want).abs() >= RATIO_TOLERANCE {
                    return Some(format!(
                        "request wants RAM overprovisioned at {want}, server offers {have}"
                    ));
                }
            }
            if let Some(want) = requested.disk {
                let have = advertised.disk.unwrap_or(1.0);
                if (have - want).abs() >= RATIO_TOLERANCE {
                    return Some(format!(
                        "request wants disk overprovisioned at {want}, server offers {have}"
                    ));
                }
            }
            if let Some(want) = requested.cpu {
                match advertised.cpu {
                    Some(have) if (have - want).abs() < RATIO_TOLERANCE => {}
                    Some(have) => {
                        return Some(format!(
                            "request wants CPU overprovisioned at {want}, server offers {have}"
                        ));
                    }
                    None => {
                        return Some(format!(
                            "request wants CPU overprovisioned at {want}, server does not bound CPU"
                        ));
                    }
                }
            }
            None
        })
    }
}

/// Keeps the biggest 15% of survivors out of ordinary allocations so a
/// later 256 GiB request still has somewhere to land.
pub struct HardFilterLargeServers;

impl Algorithm for HardFilterLargeServers {
    fn name(&self) -> &'static str {
        "hard-filter-large-servers"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        if !ctx.defaults.filter_large_servers || candidates.len() < 2 {
            return StepResult::all(candidates);
        }

        let remove = (candidates.len() as f64 * LARGE_SERVER_FRACTION).ceil() as usize;

        let mut ordered = candidates;
        ordered.sort_by(|a, b| {
            b.unreserved_ram
                .partial_cmp(&a.unreserved_ram)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.uuid().cmp(&b.uuid()))
        });

        let kept = ordered.split_off(remove);
        let reasons = ordered
            .into_iter()
            .map(|c| {
                (
                    c.uuid(),
                    "server held back for large allocations".to_string(),
                )
            })
            .collect();

        StepResult { kept, reasons }
    }
}
