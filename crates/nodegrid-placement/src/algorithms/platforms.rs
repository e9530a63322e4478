//! Platform-version hard filters.

use crate::candidate::Candidate;
use crate::context::Context;
use crate::platform::{meets_max_platforms, meets_min_platforms, meets_min_stamp};

use super::{partition, Algorithm, StepResult};

/// Enforces the image's and package's min/max platform maps against the
/// platform each server booted.
pub struct HardFilterPlatformVersions;

impl Algorithm for HardFilterPlatformVersions {
    fn name(&self) -> &'static str {
        "hard-filter-platform-versions"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        let image_req = ctx.image.requirements.as_ref();
        let min_maps: Vec<_> = image_req
            .and_then(|r| r.min_platform.as_ref())
            .into_iter()
            .chain(ctx.package.and_then(|p| p.min_platform.as_ref()))
            .collect();
        let max_maps: Vec<_> = image_req
            .and_then(|r| r.max_platform.as_ref())
            .into_iter()
            .collect();

        if min_maps.is_empty() && max_maps.is_empty() {
            return StepResult::all(candidates);
        }

        partition(candidates, |c| {
            let live = c.server.sysinfo.live_image.as_deref();
            for map in &min_maps {
                if let Err(reason) = meets_min_platforms(live, map) {
                    return Some(reason);
                }
            }
            for map in &max_maps {
                if let Err(reason) = meets_max_platforms(live, map) {
                    return Some(reason);
                }
            }
            None
        })
    }
}

/// Minimum platforms gated on features the VM actually uses: docker
/// brand, NFS volume automounts, flexible disk sizing. Each gate is an
/// operator default; unset gates don't constrain anything.
pub struct HardFilterFeatureMinPlatform;

impl Algorithm for HardFilterFeatureMinPlatform {
    fn name(&self) -> &'static str {
        "hard-filter-feature-min-platform"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        let is_docker = ctx.vm.brand.as_deref() == Some("docker");
        let has_volumes = !ctx.vm.volumes.is_empty();
        let flexible_disk = ctx.package.and_then(|p| p.flexible_disk) == Some(true);
        let d = &ctx.defaults;

        let mut required: Vec<(&str, &String)> = Vec::new();
        if is_docker {
            if let Some(stamp) = &d.filter_docker_min_platform {
                required.push(("docker VMs", stamp));
            }
        }
        if flexible_disk {
            if let Some(stamp) = &d.filter_flexible_disk_min_platform {
                required.push(("flexible disk sizing", stamp));
            }
        }
        if has_volumes {
            let gate = if is_docker {
                &d.filter_docker_nfs_volumes_automount_min_platform
            } else {
                &d.filter_non_docker_nfs_volumes_automount_min_platform
            };
            if let Some(stamp) = gate {
                required.push(("NFS volume automounts", stamp));
            }
        }

        if required.is_empty() {
            return StepResult::all(candidates);
        }

        partition(candidates, |c| {
            let live = c.server.sysinfo.live_image.as_deref();
            for (feature, stamp) in &required {
                if let Err(reason) = meets_min_stamp(live, stamp) {
                    return Some(format!("{reason} (needed for {feature})"));
                }
            }
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::State;
    use crate::testutil::{candidate, image, server, vm_request};
    use nodegrid_core::{Defaults, Image, ImageRequirements};
    use std::collections::HashMap;

    #[test]
    fn image_min_platform_enforced() {
        let vm = vm_request(1024);
        let image = Image {
            requirements: Some(ImageRequirements {
                min_platform: Some(HashMap::from([(
                    "7.0".to_string(),
                    "20220101T000000Z".to_string(),
                )])),
                ..ImageRequirements::default()
            }),
            ..Image::default()
        };
        let mut state = State::with_seed(1);
        let mut ctx = Context::new(&vm, &image, None, &[], Defaults::default(), &mut state);

        // Fixture server boots 20210112T084020Z, older than required.
        let old = candidate(server());
        let old_uuid = old.uuid();
        let mut newer = server();
        newer.sysinfo.live_image = Some("20220601T000000Z".into());

        let result =
            HardFilterPlatformVersions.run(&mut ctx, vec![old, candidate(newer)]);
        assert_eq!(result.kept.len(), 1);
        assert!(result.reasons[&old_uuid].contains("older"));
    }

    #[test]
    fn no_requirements_is_a_noop() {
        let vm = vm_request(1024);
        let image = image();
        let mut state = State::with_seed(1);
        let mut ctx = Context::new(&vm, &image, None, &[], Defaults::default(), &mut state);

        let result = HardFilterPlatformVersions.run(&mut ctx, vec![candidate(server())]);
        assert_eq!(result.kept.len(), 1);
    }

    #[test]
    fn docker_gate_applies_to_docker_vms_only() {
        let image = image();
        let mut state = State::with_seed(1);
        let defaults = Defaults {
            filter_docker_min_platform: Some("20220101T000000Z".into()),
            ..Defaults::default()
        };

        let mut docker_vm = vm_request(1024);
        docker_vm.brand = Some("docker".into());
        let mut ctx = Context::new(&docker_vm, &image, None, &[], defaults.clone(), &mut state);
        let result = HardFilterFeatureMinPlatform.run(&mut ctx, vec![candidate(server())]);
        assert!(result.kept.is_empty());

        let plain_vm = vm_request(1024);
        let mut ctx = Context::new(&plain_vm, &image, None, &[], defaults, &mut state);
        let result = HardFilterFeatureMinPlatform.run(&mut ctx, vec![candidate(server())]);
        assert_eq!(result.kept.len(), 1);
    }

    #[test]
    fn volume_gate_picks_brand_specific_default() {
        let image = image();
        let mut state = State::with_seed(1);
        let defaults = Defaults {
            filter_non_docker_nfs_volumes_automount_min_platform: Some("20220101T000000Z".into()),
            ..Defaults::default()
        };

        let mut vm = vm_request(1024);
        vm.volumes.push(nodegrid_core::VmVolume {
            name: Some("data".into()),
            kind: Some("tritonnfs".into()),
            mountpoint: Some("/data".into()),
        });

        let mut ctx = Context::new(&vm, &image, None, &[], defaults, &mut state);
        let c = candidate(server());
        let uuid = c.uuid();
        let result = HardFilterFeatureMinPlatform.run(&mut ctx, vec![c]);
        assert!(result.kept.is_empty());
        assert!(result.reasons[&uuid].contains("NFS volume automounts"));
    }
}
