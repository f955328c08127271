//! BSD `ar` archive decoding.
//!
//! Archives are a signature followed by self-describing, variable-length
//! members. Long member names use the BSD `#1/<len>` convention, and the
//! `__.SYMDEF` member holds a directory from exported symbol to member.

mod constants;
mod context;
mod structs;

pub use constants::*;
pub use context::*;
pub use structs::*;
