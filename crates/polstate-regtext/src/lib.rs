//! The registry text backend (`.reg` files).
//!
//! A [`RegFile`] holds an ordered list of key sections. Each section is either a normal
//! key with values, or a deleter (`[-Key]`). Values can be deleters too (`"name"=-`).
//! Keys are stored relative to an optional prefix, which is stripped on parse and
//! re-attached on write, so a file can be scoped to one hive or subtree.

#![forbid(unsafe_code)]

mod canonical;
mod error;
mod file;
mod text;

pub use canonical::canonicalize_key;
pub use error::RegTextError;
pub use file::{RegFile, RegKey, RegValue};
pub use text::{HEADER, WRAP_COLUMN};
