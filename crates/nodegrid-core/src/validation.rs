//! Input validation — gates every payload before a placement decision.
//!
//! Each validator is a pure function returning `Ok(())` or a
//! [`ValidationError`] whose message names the offending field. A bad
//! VM/image/package/ticket/defaults record fails the whole call; a bad
//! server is tolerated and rejected individually by the
//! `hard-filter-invalid-servers` stage.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::types::{Defaults, Image, Package, PlatformMap, Server, Ticket, VmRequest};

/// ISO platform timestamp, e.g. `20210112T084020Z`.
static PLATFORM_STAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^20\d\d[01]\d[0123]\dT[012]\d[012345]\d\d\dZ$").unwrap());

/// SDC version key in a platform map, e.g. `7.0`.
static SDC_VERSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d\.\d$").unwrap());

/// Slack allowed when checking a VM's RAM against image requirements.
const RAM_EPSILON: f64 = 0.01;

/// VM lifecycle states the inventory is expected to report.
const KNOWN_VM_STATES: &[&str] = &[
    "running",
    "stopped",
    "failed",
    "provisioning",
    "configured",
    "incomplete",
    "receiving",
    "down",
];

/// A rejected input field and the reason it was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Whether `stamp` is a well-formed ISO platform timestamp.
pub fn is_platform_stamp(stamp: &str) -> bool {
    PLATFORM_STAMP.is_match(stamp)
}

/// Whether `version` is a well-formed SDC version key.
pub fn is_sdc_version(version: &str) -> bool {
    SDC_VERSION.is_match(version)
}

fn check_platform_map(field: &str, map: &PlatformMap) -> Result<(), ValidationError> {
    for (version, stamp) in map {
        if !is_sdc_version(version) {
            return Err(ValidationError::new(
                field,
                format!("\"{version}\" is not an SDC version"),
            ));
        }
        if !is_platform_stamp(stamp) {
            return Err(ValidationError::new(
                field,
                format!("\"{stamp}\" is not a platform timestamp"),
            ));
        }
    }
    Ok(())
}

fn check_ratio(field: &str, ratio: f64) -> Result<(), ValidationError> {
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(ValidationError::new(field, "must be a positive ratio"));
    }
    Ok(())
}

fn check_weight(field: &str, weight: f64) -> Result<(), ValidationError> {
    if weight.is_nan() || weight.is_infinite() {
        return Err(ValidationError::new(field, "must be a finite weight"));
    }
    Ok(())
}

/// Validate a VM request, including its RAM against the image's declared
/// min/max (with a small slack for control planes that round).
pub fn validate_vm(vm: &VmRequest, image: &Image) -> Result<(), ValidationError> {
    if vm.owner_uuid.is_nil() {
        return Err(ValidationError::new("vm.owner_uuid", "must not be nil"));
    }
    if vm.ram == 0 {
        return Err(ValidationError::new("vm.ram", "must be greater than 0"));
    }
    if vm.quota == Some(0) {
        return Err(ValidationError::new("vm.quota", "must be greater than 0"));
    }
    if vm.cpu_cap == Some(0) {
        return Err(ValidationError::new("vm.cpu_cap", "must be greater than 0"));
    }
    if vm.brand.as_deref() == Some("") {
        return Err(ValidationError::new("vm.brand", "must not be empty"));
    }
    for tag in &vm.nic_tags {
        if tag.is_empty() {
            return Err(ValidationError::new("vm.nic_tags", "tags must not be empty"));
        }
    }
    for rule in &vm.affinity {
        if rule.key.is_empty() {
            return Err(ValidationError::new("vm.affinity", "rule key must not be empty"));
        }
        if rule.value.is_empty() {
            return Err(ValidationError::new("vm.affinity", "rule value must not be empty"));
        }
    }

    if let Some(req) = &image.requirements {
        let ram = vm.ram as f64;
        if let Some(min_ram) = req.min_ram {
            if ram < min_ram - RAM_EPSILON {
                return Err(ValidationError::new(
                    "vm.ram",
                    format!("{} is below the image's min_ram of {min_ram}", vm.ram),
                ));
            }
        }
        if let Some(max_ram) = req.max_ram {
            if ram > max_ram + RAM_EPSILON {
                return Err(ValidationError::new(
                    "vm.ram",
                    format!("{} is above the image's max_ram of {max_ram}", vm.ram),
                ));
            }
        }
    }

    Ok(())
}

/// Validate an image manifest.
pub fn validate_image(image: &Image) -> Result<(), ValidationError> {
    if image.image_size == Some(0) {
        return Err(ValidationError::new(
            "image.image_size",
            "must be greater than 0",
        ));
    }

    if let Some(req) = &image.requirements {
        if let Some(min_ram) = req.min_ram {
            if !min_ram.is_finite() || min_ram <= 0.0 {
                return Err(ValidationError::new(
                    "image.requirements.min_ram",
                    "must be a positive number",
                ));
            }
        }
        if let Some(max_ram) = req.max_ram {
            if !max_ram.is_finite() || max_ram <= 0.0 {
                return Err(ValidationError::new(
                    "image.requirements.max_ram",
                    "must be a positive number",
                ));
            }
        }
        if let (Some(min_ram), Some(max_ram)) = (req.min_ram, req.max_ram) {
            if min_ram > max_ram {
                return Err(ValidationError::new(
                    "image.requirements.min_ram",
                    "must not exceed max_ram",
                ));
            }
        }
        if let Some(map) = &req.min_platform {
            check_platform_map("image.requirements.min_platform", map)?;
        }
        if let Some(map) = &req.max_platform {
            check_platform_map("image.requirements.max_platform", map)?;
        }
    }

    Ok(())
}

/// Validate a billing package.
pub fn validate_package(pkg: &Package) -> Result<(), ValidationError> {
    if pkg.max_physical_memory == Some(0) {
        return Err(ValidationError::new(
            "package.max_physical_memory",
            "must be greater than 0",
        ));
    }
    if pkg.quota == Some(0) {
        return Err(ValidationError::new("package.quota", "must be greater than 0"));
    }
    if pkg.cpu_cap == Some(0) {
        return Err(ValidationError::new("package.cpu_cap", "must be greater than 0"));
    }
    if let Some(map) = &pkg.min_platform {
        check_platform_map("package.min_platform", map)?;
    }
    for (field, ratio) in [
        ("package.overprovision_cpu", pkg.overprovision_cpu),
        ("package.overprovision_memory", pkg.overprovision_memory),
        ("package.overprovision_storage", pkg.overprovision_storage),
        ("package.overprovision_io", pkg.overprovision_io),
        ("package.overprovision_network", pkg.overprovision_network),
    ] {
        if let Some(ratio) = ratio {
            check_ratio(field, ratio)?;
        }
    }
    Ok(())
}

/// Validate a single server record. Failures here drop the server from
/// the candidate set; they never fail the allocation.
pub fn validate_server(server: &Server) -> Result<(), ValidationError> {
    if server.memory_available_bytes > server.memory_total_bytes {
        return Err(ValidationError::new(
            "server.memory_available_bytes",
            "exceeds memory_total_bytes",
        ));
    }
    if !server.reservation_ratio.is_finite()
        || server.reservation_ratio < 0.0
        || server.reservation_ratio > 1.0
    {
        return Err(ValidationError::new(
            "server.reservation_ratio",
            "must be between 0 and 1",
        ));
    }
    if server.sysinfo.cpu_online_count == 0 {
        return Err(ValidationError::new(
            "server.sysinfo",
            "\"CPU Online Count\" is missing or zero",
        ));
    }
    if let Some(live_image) = &server.sysinfo.live_image {
        if !is_platform_stamp(live_image) {
            return Err(ValidationError::new(
                "server.sysinfo",
                format!("\"Live Image\" \"{live_image}\" is not a platform timestamp"),
            ));
        }
    }
    for (field, ratio) in [
        ("server.overprovision_ratios.cpu", server.overprovision_ratios.cpu),
        ("server.overprovision_ratios.ram", server.overprovision_ratios.ram),
        ("server.overprovision_ratios.disk", server.overprovision_ratios.disk),
    ] {
        if let Some(ratio) = ratio {
            check_ratio(field, ratio)?;
        }
    }

    for (uuid, vm) in &server.vms {
        if vm.max_physical_memory == 0 {
            return Err(ValidationError::new(
                format!("server.vms.{uuid}"),
                "max_physical_memory must be greater than 0",
            ));
        }
        if let Some(state) = &vm.state {
            if !KNOWN_VM_STATES.contains(&state.as_str()) {
                return Err(ValidationError::new(
                    format!("server.vms.{uuid}"),
                    format!("unknown state \"{state}\""),
                ));
            }
        }
        if vm.cpu_cap == Some(0) {
            return Err(ValidationError::new(
                format!("server.vms.{uuid}"),
                "cpu_cap must be greater than 0",
            ));
        }
    }

    Ok(())
}

/// Validate a provision ticket.
pub fn validate_ticket(ticket: &Ticket) -> Result<(), ValidationError> {
    if ticket.scope.is_empty() {
        return Err(ValidationError::new("ticket.scope", "must not be empty"));
    }
    if ticket.action.is_empty() {
        return Err(ValidationError::new("ticket.action", "must not be empty"));
    }
    if ticket.status.is_empty() {
        return Err(ValidationError::new("ticket.status", "must not be empty"));
    }
    if let Some(extra) = &ticket.extra {
        if extra.max_physical_memory == 0 && extra.quota.is_none() && extra.cpu_cap.is_none() {
            return Err(ValidationError::new(
                "ticket.extra",
                "carries no resource shape",
            ));
        }
    }
    Ok(())
}

/// Validate the operator defaults record.
pub fn validate_defaults(defaults: &Defaults) -> Result<(), ValidationError> {
    check_ratio("defaults.overprovision_ratio_cpu", defaults.overprovision_ratio_cpu)?;
    check_ratio("defaults.overprovision_ratio_ram", defaults.overprovision_ratio_ram)?;
    check_ratio("defaults.overprovision_ratio_disk", defaults.overprovision_ratio_disk)?;

    for (field, weight) in [
        ("defaults.weight_current_platform", defaults.weight_current_platform),
        ("defaults.weight_next_reboot", defaults.weight_next_reboot),
        ("defaults.weight_num_owner_zones", defaults.weight_num_owner_zones),
        ("defaults.weight_uniform_random", defaults.weight_uniform_random),
        ("defaults.weight_unreserved_disk", defaults.weight_unreserved_disk),
        ("defaults.weight_unreserved_ram", defaults.weight_unreserved_ram),
    ] {
        check_weight(field, weight)?;
    }

    for (field, stamp) in [
        ("defaults.filter_docker_min_platform", &defaults.filter_docker_min_platform),
        (
            "defaults.filter_flexible_disk_min_platform",
            &defaults.filter_flexible_disk_min_platform,
        ),
        (
            "defaults.filter_docker_nfs_volumes_automount_min_platform",
            &defaults.filter_docker_nfs_volumes_automount_min_platform,
        ),
        (
            "defaults.filter_non_docker_nfs_volumes_automount_min_platform",
            &defaults.filter_non_docker_nfs_volumes_automount_min_platform,
        ),
    ] {
        if let Some(stamp) = stamp {
            if !is_platform_stamp(stamp) {
                return Err(ValidationError::new(
                    field,
                    format!("\"{stamp}\" is not a platform timestamp"),
                ));
            }
        }
    }

    Ok(())
}
