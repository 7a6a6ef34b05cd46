//! Pure policy state engine (no IO).
//!
//! Input: immutable policy definitions built elsewhere, and any [`PolicySource`] backend.
//! Output: the inferred [`PolicyState`] of a definition, the element options it currently
//! holds, and the writes that move it to a desired state.
//!
//! [`PolicySource`]: polstate_types::PolicySource

#![forbid(unsafe_code)]

pub mod catalog;
pub mod model;
pub mod options;

mod apply;
mod cache;
mod evaluate;
mod matching;
mod read;
mod walker;

#[cfg(test)]
mod proptest;
#[cfg(test)]
mod test_support;

pub use apply::{ApplyError, apply_state};
pub use cache::CachedReader;
pub use evaluate::evaluate;
pub use read::read_options;
pub use walker::{forget, referenced_locations};
