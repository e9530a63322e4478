//! Pipeline descriptions and their interpreter.
//!
//! A description is a small expression tree over stage names:
//! `pipe` composes stages left to right, narrowing the candidate set;
//! `or` tries alternatives and takes the first that leaves any servers.
//! The control plane configures descriptions as JSON arrays of the form
//! `["pipe", "stage", ["or", ...], ...]`.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::algorithms::Registry;
use crate::candidate::Candidate;
use crate::context::Context;
use crate::error::{AllocError, AllocResult};

/// A pipeline expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Description {
    /// A named stage from the registry.
    Stage(String),
    /// Run children in sequence, each fed the previous survivors.
    Pipe(Vec<Description>),
    /// Run children on the same input; first non-empty result wins.
    Or(Vec<Description>),
}

impl Description {
    /// Parse the JSON wire form.
    pub fn from_value(value: &Value) -> AllocResult<Self> {
        match value {
            Value::String(name) => Ok(Description::Stage(name.clone())),
            Value::Array(items) => {
                let combinator = items
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| bad_description("combinator must be \"pipe\" or \"or\""))?;
                let children = items[1..]
                    .iter()
                    .map(Description::from_value)
                    .collect::<AllocResult<Vec<_>>>()?;
                if children.is_empty() {
                    return Err(bad_description(format!("\"{combinator}\" needs children")));
                }
                match combinator {
                    "pipe" => Ok(Description::Pipe(children)),
                    "or" => Ok(Description::Or(children)),
                    other => Err(bad_description(format!("unknown combinator \"{other}\""))),
                }
            }
            other => Err(bad_description(format!("unexpected value {other}"))),
        }
    }

    /// The documented complete pipeline: hard filters first, then soft
    /// filters, then scorers.
    pub fn default_pipeline() -> Self {
        let stages = [
            "hard-filter-force-failure",
            "hard-filter-setup",
            "hard-filter-running",
            "hard-filter-invalid-servers",
            "hard-filter-virtual-servers",
            "calculate-recent-vms",
            "override-overprovisioning",
            "calculate-server-unreserved",
            "hard-filter-reserved",
            "hard-filter-reservoir",
            "hard-filter-headnode",
            "hard-filter-vm-count",
            "hard-filter-vlans",
            "hard-filter-platform-versions",
            "hard-filter-feature-min-platform",
            "hard-filter-traits",
            "hard-filter-overprovision-ratios",
            "hard-filter-min-ram",
            "hard-filter-min-cpu",
            "hard-filter-min-disk",
            "hard-filter-min-free-disk",
            "calculate-locality-hints",
            "hard-filter-locality-hints",
            "hard-filter-volumes-from",
            "hard-filter-large-servers",
            "soft-filter-recent-servers",
            "soft-filter-locality-hints",
            "score-unreserved-ram",
            "score-unreserved-disk",
            "score-num-owner-zones",
            "score-current-platform",
            "score-next-reboot",
            "score-uniform-random",
        ];
        Description::Pipe(
            stages
                .into_iter()
                .map(|s| Description::Stage(s.to_string()))
                .collect(),
        )
    }

    /// Stage names in evaluation order, duplicates included.
    pub fn stage_names(&self) -> Vec<&str> {
        match self {
            Description::Stage(name) => vec![name.as_str()],
            Description::Pipe(children) | Description::Or(children) => {
                children.iter().flat_map(Description::stage_names).collect()
            }
        }
    }
}

fn bad_description(msg: impl Into<String>) -> AllocError {
    AllocError::InvalidDescription(msg.into())
}

/// What one stage did, for the caller's debug log.
#[derive(Debug, Clone, Serialize)]
pub struct StepSummary {
    pub step: String,
    /// Candidates left after the stage ran.
    pub remaining: usize,
    /// Rejected server UUID → reason.
    pub reasons: HashMap<Uuid, String>,
}

/// Accumulated output of a pipeline evaluation.
#[derive(Debug, Default)]
pub struct PipelineRun {
    pub steps: Vec<StepSummary>,
    /// Capacity mode only: server UUID → stage name → why the stage
    /// would have excluded it.
    pub capacity_reasons: HashMap<Uuid, BTreeMap<String, String>>,
}

/// Evaluate a description over the candidate set.
pub fn execute(
    description: &Description,
    registry: &Registry,
    ctx: &mut Context<'_>,
    candidates: Vec<Candidate>,
    run: &mut PipelineRun,
) -> AllocResult<Vec<Candidate>> {
    match description {
        Description::Stage(name) => run_stage(name, registry, ctx, candidates, run),
        Description::Pipe(children) => {
            let mut current = candidates;
            for child in children {
                current = execute(child, registry, ctx, current, run)?;
                if current.is_empty() && !ctx.capacity {
                    break;
                }
            }
            Ok(current)
        }
        Description::Or(children) => {
            let mut last = Vec::new();
            for child in children {
                let out = execute(child, registry, ctx, candidates.clone(), run)?;
                if !out.is_empty() {
                    return Ok(out);
                }
                last = out;
            }
            Ok(last)
        }
    }
}

fn run_stage(
    name: &str,
    registry: &Registry,
    ctx: &mut Context<'_>,
    candidates: Vec<Candidate>,
    run: &mut PipelineRun,
) -> AllocResult<Vec<Candidate>> {
    let stage = registry
        .get(name)
        .ok_or_else(|| AllocError::UnknownAlgorithm(name.to_string()))?;

    if ctx.capacity && stage.affects_capacity() {
        // Annotate-only: record who the stage would have excluded, keep
        // everyone.
        let input = candidates.clone();
        let result = stage.run(ctx, candidates);
        for (uuid, reason) in result.reasons {
            run.capacity_reasons
                .entry(uuid)
                .or_default()
                .insert(name.to_string(), reason);
        }
        run.steps.push(StepSummary {
            step: name.to_string(),
            remaining: input.len(),
            reasons: HashMap::new(),
        });
        return Ok(input);
    }

    let before = candidates.len();
    let result = stage.run(ctx, candidates);
    debug!(
        step = name,
        remaining = result.kept.len(),
        removed = before - result.kept.len(),
        "pipeline step"
    );
    run.steps.push(StepSummary {
        step: name.to_string(),
        remaining: result.kept.len(),
        reasons: result.reasons,
    });
    Ok(result.kept)
}
