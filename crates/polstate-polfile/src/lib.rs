//! The binary policy file backend (`Registry.pol`).
//!
//! The in-memory model is an ordered map of lower-cased `key\\value` composites to raw
//! (type, bytes) entries, with a side table that keeps the original casing for
//! re-serialization. Deletion intents are stored as specially named values
//! (tombstones) rather than by removing data.
//!
//! This crate is IO-free: it converts between bytes and the model. Reading and
//! writing files is the loader's job.

#![forbid(unsafe_code)]

mod error;
mod file;
mod format;
mod tombstone;

pub use error::PolFileError;
pub use file::{PolEntry, PolEntryRef, PolFile};
pub use format::{SIGNATURE, VERSION};
pub use tombstone::{
    DELETE_KEYS, DELETE_VALUES, DELETE_VALUE_PREFIX, DELVALS_MARKER, DELVALS_PREFIX, Tombstone,
};
