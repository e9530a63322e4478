//! nodegrid-placement — the compute-node placement engine.
//!
//! Given a fleet of compute nodes and a VM to provision, this crate
//! decides which node the VM should land on. It is a pure decision
//! library: no RPC, no persistence, no reservation. The control plane
//! owns those and handles the race between selection and provisioning
//! with its own ticketing protocol.
//!
//! # Components
//!
//! - **`allocator`** — the facade: validate, run the pipeline, pick
//! - **`pipeline`** — `pipe`/`or` descriptions and their interpreter
//! - **`algorithms`** — the built-in filter/scorer/transform stages
//! - **`derive`** — unreserved RAM/CPU/disk accounting
//! - **`affinity`** — affinity rules → near/far server sets
//! - **`traits_match`** / **`platform`** — compatibility checks

pub mod affinity;
pub mod algorithms;
pub mod allocator;
pub mod candidate;
pub mod context;
pub mod derive;
pub mod error;
pub mod pipeline;
pub mod platform;
pub mod traits_match;

#[cfg(test)]
mod testutil;

pub use allocator::{Allocation, Allocator, CapacityReport};
pub use candidate::Candidate;
pub use context::{Context, LocalityHints, State};
pub use error::{AllocError, AllocResult};
pub use pipeline::{Description, PipelineRun, StepSummary};
