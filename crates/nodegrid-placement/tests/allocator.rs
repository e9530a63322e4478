//! End-to-end allocation scenarios through the public facade.

use std::collections::HashMap;

use uuid::Uuid;

use nodegrid_core::{
    Defaults, Image, Locality, OverprovisionRatios, Server, Sysinfo, Ticket, TicketVm, TraitValue,
    VmOnServer, VmRequest,
};
use nodegrid_placement::{Allocator, Description};

const GIB: u64 = 1024 * 1024 * 1024;

fn server(ram_gib: u64) -> Server {
    Server {
        uuid: Uuid::new_v4(),
        hostname: None,
        status: Some("running".into()),
        memory_total_bytes: ram_gib * GIB,
        memory_available_bytes: ram_gib * GIB / 2,
        disk_pool_size_bytes: 3600 * GIB,
        disk_pool_alloc_bytes: 100 * GIB,
        disk_installed_images_used_bytes: 10 * GIB,
        disk_zone_quota_bytes: 0,
        disk_kvm_quota_bytes: 0,
        disk_cores_quota_used_bytes: 0,
        reservation_ratio: 0.15,
        overprovision_ratios: OverprovisionRatios::default(),
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

fn vm(ram_mib: u64) -> VmRequest {
    VmRequest {
        vm_uuid: Some(Uuid::new_v4()),
        owner_uuid: Uuid::new_v4(),
        ram: ram_mib,
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

fn inventory_vm(owner: Uuid, ram_mib: u64) -> VmOnServer {
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

fn deterministic_allocator() -> Allocator {
    Allocator::with_default_pipeline(Defaults {
        weight_uniform_random: 0.0,
        ..Defaults::default()
    })
    .unwrap()
}

#[test]
fn trivial_fit_chooses_the_only_server() {
    let mut alloc = deterministic_allocator();
    let fleet = vec![server(64)];
    let expected = fleet[0].uuid;

    let result = alloc.allocate(&fleet, &vm(2048), &Image::default(), None, &[]).unwrap();
    assert_eq!(result.server.map(|s| s.uuid), Some(expected));

    // 65536 MiB * (1 - 0.15) * 1.0, floored.
    let capacity = alloc.server_capacity(&fleet).unwrap();
    assert_eq!(capacity[&expected].ram, 55705.0);
    assert!(capacity[&expected].reasons.is_empty());
}

#[test]
fn no_fit_returns_insufficient_ram_reason() {
    let mut alloc = deterministic_allocator();
    let tiny = server(2); // ~1740 MiB unreserved
    let uuid = tiny.uuid;

    let result = alloc.allocate(&[tiny], &vm(2048), &Image::default(), None, &[]).unwrap();
    assert!(result.server.is_none());
    let reason = &result.reasons[&uuid];
    assert!(reason.starts_with("hard-filter-min-ram:"), "got: {reason}");
    assert!(reason.contains("RAM"));
}

#[test]
fn trait_mismatch_drops_the_bare_server() {
    let mut alloc = deterministic_allocator();

    let mut with_ssd = server(64);
    with_ssd.traits.insert("ssd".into(), TraitValue::Bool(true));
    let bare = server(64);
    let with_ssd_uuid = with_ssd.uuid;
    let bare_uuid = bare.uuid;

    let mut request = vm(2048);
    request.traits.insert("ssd".into(), TraitValue::Bool(true));

    let result = alloc
        .allocate(&[with_ssd, bare], &request, &Image::default(), None, &[])
        .unwrap();
    assert_eq!(result.server.map(|s| s.uuid), Some(with_ssd_uuid));
    assert!(result.reasons[&bare_uuid].starts_with("hard-filter-traits:"));
}

#[test]
fn strict_far_locality_excludes_the_hosting_server() {
    let mut alloc = deterministic_allocator();

    let avoid_vm = Uuid::new_v4();
    let owner = Uuid::new_v4();
    let mut hosting = server(64);
    hosting.vms.insert(avoid_vm, inventory_vm(owner, 1024));
    let other = server(64);
    let hosting_uuid = hosting.uuid;
    let other_uuid = other.uuid;

    let mut request = vm(2048);
    request.owner_uuid = owner;
    request.locality = Some(Locality {
        near: Vec::new(),
        far: vec![avoid_vm],
        strict: true,
    });

    let result = alloc
        .allocate(
            &[hosting.clone(), other],
            &request,
            &Image::default(),
            None,
            &[],
        )
        .unwrap();
    assert_eq!(result.server.map(|s| s.uuid), Some(other_uuid));
    assert!(result.reasons[&hosting_uuid].starts_with("hard-filter-locality-hints:"));

    // With the hosting server as the only candidate, allocation fails.
    let result = alloc
        .allocate(&[hosting], &request, &Image::default(), None, &[])
        .unwrap();
    assert!(result.server.is_none());
}

#[test]
fn large_servers_are_preserved() {
    // RAM 100, 95, 90, ..., 55 GiB: ceil(10 * 0.15) = 2 biggest dropped.
    let fleet: Vec<Server> = (0..10).map(|i| server(100 - i * 5)).collect();
    let biggest: Vec<Uuid> = fleet.iter().take(2).map(|s| s.uuid).collect();

    let desc = Description::Pipe(vec![
        Description::Stage("calculate-server-unreserved".into()),
        Description::Stage("hard-filter-large-servers".into()),
    ]);
    let mut alloc = Allocator::new(desc, Defaults::default()).unwrap();

    let result = alloc.allocate(&fleet, &vm(2048), &Image::default(), None, &[]).unwrap();
    for uuid in biggest {
        assert!(result.reasons[&uuid].starts_with("hard-filter-large-servers:"));
    }
    let survivors: usize = result
        .steps
        .iter()
        .find(|s| s.step == "hard-filter-large-servers")
        .unwrap()
        .remaining;
    assert_eq!(survivors, 8);
}

#[test]
fn recent_selection_is_avoided_on_the_next_call() {
    let mut alloc = deterministic_allocator();
    let fleet: Vec<Server> = (0..10).map(|_| server(64)).collect();

    let first = alloc
        .allocate(&fleet, &vm(2048), &Image::default(), None, &[])
        .unwrap();
    let winner = first.server.unwrap().uuid;

    let second = alloc
        .allocate(&fleet, &vm(2048), &Image::default(), None, &[])
        .unwrap();
    let next_winner = second.server.unwrap().uuid;

    assert_ne!(winner, next_winner);
    assert!(second.reasons[&winner].starts_with("soft-filter-recent-servers:"));
}

#[test]
fn deterministic_without_the_random_scorer() {
    let fleet: Vec<Server> = (0..5).map(|_| server(64)).collect();
    let request = vm(2048);

    let mut picks = Vec::new();
    for _ in 0..3 {
        // Fresh allocator per call: no recent-server carryover.
        let mut alloc = deterministic_allocator();
        let result = alloc
            .allocate(&fleet, &request, &Image::default(), None, &[])
            .unwrap();
        picks.push(result.server.unwrap().uuid);
    }
    assert_eq!(picks[0], picks[1]);
    assert_eq!(picks[1], picks[2]);
}

#[test]
fn seeded_allocators_agree_with_the_random_scorer_on() {
    let fleet: Vec<Server> = (0..5).map(|_| server(64)).collect();
    let request = vm(2048);

    let pick = |seed: u64| {
        let mut alloc = Allocator::with_default_pipeline(Defaults::default())
            .unwrap()
            .with_seed(seed);
        alloc
            .allocate(&fleet, &request, &Image::default(), None, &[])
            .unwrap()
            .server
            .unwrap()
            .uuid
    };

    assert_eq!(pick(99), pick(99));
}

#[test]
fn pipe_output_never_grows() {
    let mut alloc = deterministic_allocator();

    let mut fleet: Vec<Server> = (0..6).map(|_| server(64)).collect();
    fleet[0].setup = false;
    fleet[1].reserved = true;
    fleet[2].traits.insert("gpu".into(), TraitValue::Bool(true));

    let result = alloc.allocate(&fleet, &vm(2048), &Image::default(), None, &[]).unwrap();

    let mut last = fleet.len();
    for step in &result.steps {
        assert!(step.remaining <= last, "{} grew the candidate set", step.step);
        last = step.remaining;
    }
}

#[test]
fn or_falls_back_to_the_last_alternative() {
    // Both candidates are unsetup, so the first two branches come up
    // empty; the reserved filter passes everything through verbatim.
    let desc = Description::Or(vec![
        Description::Stage("hard-filter-setup".into()),
        Description::Stage("hard-filter-setup".into()),
        Description::Stage("hard-filter-reserved".into()),
    ]);
    let mut alloc = Allocator::new(desc, Defaults::default()).unwrap();

    let mut a = server(64);
    a.setup = false;
    let mut b = server(64);
    b.setup = false;
    let uuids: Vec<Uuid> = vec![a.uuid, b.uuid];

    let result = alloc.allocate(&[a, b], &vm(2048), &Image::default(), None, &[]).unwrap();
    let winner = result.server.unwrap().uuid;
    assert!(uuids.contains(&winner));
}

#[test]
fn tickets_pre_charge_the_named_server() {
    let mut alloc = deterministic_allocator();

    let big = server(64); // ~55705 MiB unreserved
    let small = server(32); // ~27852 MiB unreserved
    let big_uuid = big.uuid;
    let small_uuid = small.uuid;

    // An in-flight 50000 MiB provision is landing on the big server.
    let tickets = vec![Ticket {
        id: Uuid::new_v4(),
        server_uuid: big_uuid,
        scope: "vm".into(),
        action: "provision".into(),
        status: "active".into(),
        vm_uuid: Some(Uuid::new_v4()),
        extra: Some(TicketVm {
            owner_uuid: Uuid::new_v4(),
            max_physical_memory: 50000,
            cpu_cap: None,
            quota: None,
            brand: None,
        }),
    }];

    let result = alloc
        .allocate(&[big, small], &vm(10000), &Image::default(), None, &tickets)
        .unwrap();
    assert_eq!(result.server.map(|s| s.uuid), Some(small_uuid));
}

#[test]
fn capacity_mode_keeps_every_server() {
    // Large-server preservation is off so a healthy server's report is
    // annotation-free.
    let mut alloc = Allocator::with_default_pipeline(Defaults {
        weight_uniform_random: 0.0,
        filter_large_servers: false,
        ..Defaults::default()
    })
    .unwrap();

    let healthy = server(64);
    let mut unsetup = server(64);
    unsetup.setup = false;
    let mut reserved = server(32);
    reserved.reserved = true;
    let fleet = vec![healthy.clone(), unsetup.clone(), reserved.clone()];

    let reports = alloc.server_capacity(&fleet).unwrap();
    assert_eq!(reports.len(), 3);

    assert!(reports[&healthy.uuid].reasons.is_empty());
    assert_eq!(reports[&healthy.uuid].ram, 55705.0);

    let unsetup_report = &reports[&unsetup.uuid];
    assert_eq!(
        unsetup_report.reasons.get("hard-filter-setup").map(String::as_str),
        Some("server is not setup")
    );
    // The report still carries what the hardware could hold.
    assert_eq!(unsetup_report.ram, 55705.0);

    assert!(reports[&reserved.uuid]
        .reasons
        .contains_key("hard-filter-reserved"));
}

#[test]
fn allocation_steps_form_an_ordered_log() {
    let mut alloc = deterministic_allocator();
    let fleet = vec![server(64)];

    let result = alloc.allocate(&fleet, &vm(2048), &Image::default(), None, &[]).unwrap();
    assert!(!result.steps.is_empty());
    assert_eq!(result.steps[0].step, "hard-filter-force-failure");
    assert!(result
        .steps
        .iter()
        .any(|s| s.step == "score-unreserved-ram"));
}
