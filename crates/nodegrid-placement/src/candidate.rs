//! Candidate servers — per-call working copies with derived capacity.
//!
//! Pipeline stages operate on candidates, never on the caller's server
//! records. The derived unreserved figures are filled in by the
//! `calculate-server-unreserved` stage and read by the resource filters
//! and scorers downstream.

use uuid::Uuid;

use nodegrid_core::Server;

/// A server flowing through the pipeline, annotated with what the
/// derivation math says is still available on it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub server: Server,
    /// RAM still allocatable, in MiB, with overprovisioning applied.
    pub unreserved_ram: f64,
    /// CPU still allocatable, in percent of a core. Infinite when the
    /// server's CPU is not ratio-bounded.
    pub unreserved_cpu: f64,
    /// Disk still allocatable, in MiB.
    pub unreserved_disk: f64,
    /// Whether derivation succeeded for this server.
    pub derived: bool,
}

impl Candidate {
    pub fn new(server: Server) -> Self {
        Self {
            server,
            unreserved_ram: 0.0,
            unreserved_cpu: 0.0,
            unreserved_disk: 0.0,
            derived: false,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.server.uuid
    }
}
