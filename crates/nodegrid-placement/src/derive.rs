//! Unreserved-resource derivation — the accounting math behind every
//! resource filter.
//!
//! Each figure starts from the server's physical capacity, applies the
//! reservation and overprovision ratios, subtracts what the inventory
//! (plus any ticket-projected VMs) has already committed, and clamps at
//! zero. Results are floored to whole units.

use nodegrid_core::Server;

const MIB: f64 = 1024.0 * 1024.0;

/// Derived unreserved figures for one server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Derived {
    /// MiB.
    pub ram: f64,
    /// Percent of a core; infinite when CPU is not ratio-bounded.
    pub cpu: f64,
    /// MiB.
    pub disk: f64,
}

/// Compute unreserved RAM/CPU/disk for a server.
///
/// Fails only on servers whose records are too broken to reason about;
/// the caller demotes those rather than failing the allocation.
pub fn derive(server: &Server) -> Result<Derived, String> {
    if !server.reservation_ratio.is_finite()
        || !(0.0..=1.0).contains(&server.reservation_ratio)
    {
        return Err(format!(
            "reservation_ratio {} is out of range",
            server.reservation_ratio
        ));
    }

    Ok(Derived {
        ram: unreserved_ram(server),
        cpu: unreserved_cpu(server),
        disk: unreserved_disk(server),
    })
}

fn unreserved_ram(server: &Server) -> f64 {
    let ratio = server.overprovision_ratios.ram.unwrap_or(1.0);
    let total_mib = server.memory_total_bytes as f64 / MIB;

    let committed: f64 = server
        .vms
        .values()
        .map(|vm| vm.max_physical_memory as f64)
        .sum();

    let unreserved = total_mib * (1.0 - server.reservation_ratio) * ratio - committed;
    unreserved.max(0.0).floor()
}

fn unreserved_cpu(server: &Server) -> f64 {
    // No advertised CPU ratio means CPU is not a constrained dimension.
    let Some(ratio) = server.overprovision_ratios.cpu else {
        return f64::INFINITY;
    };

    let total = server.sysinfo.cpu_online_count as f64 * 100.0 * ratio;
    let committed: f64 = server
        .vms
        .values()
        .filter_map(|vm| vm.cpu_cap)
        .map(f64::from)
        .sum();

    (total - committed).max(0.0).floor()
}

fn unreserved_disk(server: &Server) -> f64 {
    let ratio = server.overprovision_ratios.disk.unwrap_or(1.0);

    // KVM zvols and core dumps are charged at nominal size; only ordinary
    // zone quotas are thinned by the overprovision ratio.
    let pool = server.disk_pool_size_bytes as f64;
    let images = server.disk_installed_images_used_bytes as f64;
    let kvm = server.disk_kvm_quota_bytes as f64;
    let cores = server.disk_cores_quota_used_bytes as f64;
    let zones = server.disk_zone_quota_bytes as f64 / ratio;

    let unreserved = (pool - images - kvm - cores - zones) / MIB;
    unreserved.max(0.0).floor()
}
