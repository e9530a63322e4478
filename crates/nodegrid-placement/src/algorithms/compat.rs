//! Workload/host compatibility filters: traits and NIC tags.

use crate::candidate::Candidate;
use crate::context::Context;
use crate::traits_match::{match_traits, requested_traits};

use super::{partition, Algorithm, StepResult};

/// Matches the VM+image+package trait union against each server's traits.
pub struct HardFilterTraits;

impl Algorithm for HardFilterTraits {
    fn name(&self) -> &'static str {
        "hard-filter-traits"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        let requested = requested_traits(ctx.vm, ctx.image, ctx.package);

        partition(candidates, |c| {
            match_traits(&requested, &c.server.traits).err()
        })
    }
}

/// Every NIC tag the VM needs must be present on at least one interface
/// whose link is up.
pub struct HardFilterVlans;

impl Algorithm for HardFilterVlans {
    fn name(&self) -> &'static str {
        "hard-filter-vlans"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        if ctx.vm.nic_tags.is_empty() {
            return StepResult::all(candidates);
        }
        let tags = &ctx.vm.nic_tags;

        partition(candidates, |c| {
            let nics = &c.server.sysinfo.network_interfaces;
            tags.iter()
                .find(|tag| {
                    !nics
                        .values()
                        .any(|nic| nic.is_up() && nic.nic_names.iter().any(|n| n == *tag))
                })
                .map(|tag| format!("server has no up interface with NIC tag \"{tag}\""))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::State;
    use crate::testutil::{candidate, image, server, vm_request};
    use nodegrid_core::{Defaults, NetworkInterface, TraitValue};

    #[test]
    fn traits_mismatch_drops_server() {
        let mut vm = vm_request(1024);
        vm.traits.insert("ssd".into(), TraitValue::Bool(true));
        let image = image();
        let mut state = State::with_seed(1);
        let mut ctx = Context::new(&vm, &image, None, &[], Defaults::default(), &mut state);

        let mut with_ssd = server();
        with_ssd.traits.insert("ssd".into(), TraitValue::Bool(true));
        let without = candidate(server());
        let without_uuid = without.uuid();

        let result = HardFilterTraits.run(&mut ctx, vec![candidate(with_ssd), without]);
        assert_eq!(result.kept.len(), 1);
        assert!(result.reasons[&without_uuid].contains("ssd"));
    }

    #[test]
    fn untraited_request_avoids_dedicated_servers() {
        let vm = vm_request(1024);
        let image = image();
        let mut state = State::with_seed(1);
        let mut ctx = Context::new(&vm, &image, None, &[], Defaults::default(), &mut state);

        let mut dedicated = server();
        dedicated
            .traits
            .insert("customer".into(), TraitValue::Str("acme".into()));

        let result =
            HardFilterTraits.run(&mut ctx, vec![candidate(dedicated), candidate(server())]);
        assert_eq!(result.kept.len(), 1);
    }

    #[test]
    fn nic_tag_must_be_on_an_up_interface() {
        let mut vm = vm_request(1024);
        vm.nic_tags.push("external".into());
        let image = image();
        let mut state = State::with_seed(1);
        let mut ctx = Context::new(&vm, &image, None, &[], Defaults::default(), &mut state);

        let mut good = server();
        good.sysinfo.network_interfaces.insert(
            "ixgbe0".into(),
            NetworkInterface {
                nic_names: vec!["external".into(), "internal".into()],
                link_status: Some("up".into()),
            },
        );

        let mut down = server();
        down.sysinfo.network_interfaces.insert(
            "ixgbe0".into(),
            NetworkInterface {
                nic_names: vec!["external".into()],
                link_status: Some("down".into()),
            },
        );

        let untagged = server();

        let result = HardFilterVlans.run(
            &mut ctx,
            vec![candidate(good), candidate(down), candidate(untagged)],
        );
        assert_eq!(result.kept.len(), 1);
        assert_eq!(result.reasons.len(), 2);
    }

    #[test]
    fn no_nic_tags_is_a_noop() {
        let vm = vm_request(1024);
        let image = image();
        let mut state = State::with_seed(1);
        let mut ctx = Context::new(&vm, &image, None, &[], Defaults::default(), &mut state);

        let result = HardFilterVlans.run(&mut ctx, vec![candidate(server())]);
        assert_eq!(result.kept.len(), 1);
    }
}
