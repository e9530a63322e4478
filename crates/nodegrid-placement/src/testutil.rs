//! Fixtures shared by the stage tests.

use std::collections::HashMap;

use uuid::Uuid;

use nodegrid_core::{Image, OverprovisionRatios, Server, Sysinfo, VmOnServer, VmRequest};

use crate::candidate::Candidate;
use crate::derive;

pub const GIB: u64 = 1024 * 1024 * 1024;

/// A healthy 64 GiB / 16-core server that passes every filter.
pub fn server() -> Server {
    Server {
        uuid: Uuid::new_v4(),
        hostname: None,
        status: Some("running".into()),
        memory_total_bytes: 64 * GIB,
        memory_available_bytes: 48 * GIB,
        disk_pool_size_bytes: 3600 * GIB,
        disk_pool_alloc_bytes: 100 * GIB,
        disk_installed_images_used_bytes: 10 * GIB,
        disk_zone_quota_bytes: 0,
        disk_kvm_quota_bytes: 0,
        disk_cores_quota_used_bytes: 0,
        reservation_ratio: 0.15,
        overprovision_ratios: OverprovisionRatios {
            cpu: Some(4.0),
            ram: Some(1.0),
            disk: Some(1.0),
        },
        reserved: false,
        setup: true,
        headnode: false,
        reservoir: false,
        next_reboot: None,
        sysinfo: Sysinfo {
            cpu_online_count: 16,
            live_image: Some("20210112T084020Z".into()),
            ..Sysinfo::default()
        },
        traits: Default::default(),
        vms: HashMap::new(),
    }
}

/// A candidate for `server`, with derivation already applied.
pub fn candidate(server: Server) -> Candidate {
    let mut c = Candidate::new(server);
    if let Ok(d) = derive::derive(&c.server) {
        c.unreserved_ram = d.ram;
        c.unreserved_cpu = d.cpu;
        c.unreserved_disk = d.disk;
        c.derived = true;
    }
    c
}

pub fn vm_request(ram: u64) -> VmRequest {
    VmRequest {
        vm_uuid: Some(Uuid::new_v4()),
        owner_uuid: Uuid::new_v4(),
        ram,
        quota: None,
        cpu_cap: None,
        traits: Default::default(),
        nic_tags: Vec::new(),
        locality: None,
        affinity: Vec::new(),
        internal_metadata: HashMap::new(),
        brand: None,
        volumes: Vec::new(),
    }
}

pub fn image() -> Image {
    Image::default()
}

pub fn inventory_vm(owner: Uuid, ram_mib: u64) -> VmOnServer {
    VmOnServer {
        owner_uuid: owner,
        alias: None,
        brand: None,
        state: Some("running".into()),
        cpu_cap: None,
        quota: None,
        max_physical_memory: ram_mib,
        last_modified: None,
        tags: HashMap::new(),
        internal_metadata: HashMap::new(),
    }
}
