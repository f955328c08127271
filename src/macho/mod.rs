//! Mach-O object file decoding.
//!
//! This module provides the on-disk structures of 64-bit Mach-O files, a
//! validating decoder for the load command stream, and a view over the
//! `nlist_64` symbol table.

mod constants;
mod context;
mod structs;
mod symbols;

pub use constants::*;
pub use context::*;
pub use structs::*;
pub use symbols::*;
