//! nodegrid-core — data model for the NodeGrid placement engine.
//!
//! The control plane hands the engine JSON-shaped descriptions of compute
//! nodes, the VM to provision, its image and package, in-flight provision
//! tickets, and an operator defaults record. This crate owns those wire
//! shapes plus the validation rules that gate them before a placement
//! decision runs.
//!
//! Everything here is pure data: no I/O, no clocks, no global state.

pub mod types;
pub mod validation;

pub use types::*;
pub use validation::{
    validate_defaults, validate_image, validate_package, validate_server, validate_ticket,
    validate_vm, ValidationError,
};
