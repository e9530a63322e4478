//! Flag-driven hard filters: server lifecycle, roles, inventory health.

use nodegrid_core::validation::validate_server;

use crate::candidate::Candidate;
use crate::context::Context;

use super::{partition, Algorithm, StepResult};

pub struct HardFilterSetup;

impl Algorithm for HardFilterSetup {
    fn name(&self) -> &'static str {
        "hard-filter-setup"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, _ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        partition(candidates, |c| {
            (!c.server.setup).then(|| "server is not setup".to_string())
        })
    }
}

pub struct HardFilterRunning;

impl Algorithm for HardFilterRunning {
    fn name(&self) -> &'static str {
        "hard-filter-running"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, _ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        partition(candidates, |c| {
            let status = c.server.status.as_deref().unwrap_or("unknown");
            (status != "running").then(|| format!("server status is \"{status}\""))
        })
    }
}

pub struct HardFilterReserved;

impl Algorithm for HardFilterReserved {
    fn name(&self) -> &'static str {
        "hard-filter-reserved"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, _ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        partition(candidates, |c| {
            c.server.reserved.then(|| "server is reserved".to_string())
        })
    }
}

pub struct HardFilterReservoir;

impl Algorithm for HardFilterReservoir {
    fn name(&self) -> &'static str {
        "hard-filter-reservoir"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, _ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        partition(candidates, |c| {
            c.server.reservoir.then(|| "server is a reservoir".to_string())
        })
    }
}

pub struct HardFilterHeadnode;

impl Algorithm for HardFilterHeadnode {
    fn name(&self) -> &'static str {
        "hard-filter-headnode"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        if !ctx.defaults.filter_headnode {
            return StepResult::all(candidates);
        }
        partition(candidates, |c| {
            c.server.headnode.then(|| "server is a headnode".to_string())
        })
    }
}

pub struct HardFilterVirtualServers;

impl Algorithm for HardFilterVirtualServers {
    fn name(&self) -> &'static str {
        "hard-filter-virtual-servers"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, _ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        partition(candidates, |c| {
            (c.server.sysinfo.system_type.as_deref() == Some("Virtual"))
                .then(|| "server is a virtual machine".to_string())
        })
    }
}

/// Runs the server validator per candidate; malformed servers are
/// rejected individually rather than failing the call.
pub struct HardFilterInvalidServers;

impl Algorithm for HardFilterInvalidServers {
    fn name(&self) -> &'static str {
        "hard-filter-invalid-servers"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, _ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        partition(candidates, |c| validate_server(&c.server).err().map(|e| e.to_string()))
    }
}

pub struct HardFilterVmCount;

impl Algorithm for HardFilterVmCount {
    fn name(&self) -> &'static str {
        "hard-filter-vm-count"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        let limit = ctx.defaults.filter_vm_limit as usize;
        partition(candidates, |c| {
            let count = c.server.vms.len();
            (count >= limit).then(|| format!("server already hosts {count} VMs (limit is {limit})"))
        })
    }
}

/// Empties the candidate set when the VM carries the
/// `force_designation_failure` metadata flag. Exists so operators can
/// exercise failure handling end to end.
pub struct HardFilterForceFailure;

impl Algorithm for HardFilterForceFailure {
    fn name(&self) -> &'static str {
        "hard-filter-force-failure"
    }

    fn affects_capacity(&self) -> bool {
        true
    }

    fn run(&self, ctx: &mut Context<'_>, candidates: Vec<Candidate>) -> StepResult {
        let forced = ctx
            .vm
            .internal_metadata
            .get("force_designation_failure")
            .is_some_and(|v| match v {
                serde_json::Value::Null => false,
                serde_json::Value::Bool(b) => *b,
                serde_json::Value::String(s) => !s.is_empty(),
                _ => true,
            });

        if !forced {
            return StepResult::all(candidates);
        }
        partition(candidates, |_| {
            Some("failure forced by VM metadata".to_string())
        })
    }
}
