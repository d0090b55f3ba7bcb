// src/errors.rs

//! Crate-wide error aliases.
//!
//! Domain errors live next to their modules ([`crate::dag::LoadError`],
//! [`crate::history::StoreError`]); application-level plumbing uses `anyhow`.

pub use anyhow::{Error, Result};
