//! Use case orchestration for polstate.
//!
//! This crate provides the application layer: use cases that coordinate the policy file,
//! registry text and domain crates. It stays thin and delegates the heavy lifting.
//!
//! The CLI crate depends on this; it only handles argument parsing and I/O.

#![forbid(unsafe_code)]

mod catalog;
mod save;
mod script;
mod transfer;

pub use catalog::{load_catalog, parse_definitions};
pub use save::{PolicyChange, SaveBuffers, save_policies};
pub use script::apply_script;
pub use transfer::{PolicyStatus, export_reg, import_reg, policy_states};
