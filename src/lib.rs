//! machdump - A bounds-checked decoder for BSD archives and 64-bit Mach-O files.
//!
//! The library turns a borrowed byte buffer into typed records without copying
//! it: archive members and their `__.SYMDEF` symbol directory, or a Mach-O
//! header, its load commands, and its `nlist_64` symbols. Every read is checked
//! against the buffer, and malformed input is reported as an [`Error`].
//!
//! # Features
//!
//! - Zero-copy records that borrow from the caller's buffer
//! - BSD extended (`#1/<len>`) member names
//! - Sorted and unsorted symbol directories
//! - Symtab, dylinker, dylib, segment and UUID load commands
//! - Restartable lazy sequences that are safe to share across threads
//!
//! # Example
//!
//! ```no_run
//! use machdump::{Archive, ObjectFile};
//!
//! fn main() -> machdump::Result<()> {
//!     let data = std::fs::read("libfoo.a")?;
//!     let archive = Archive::open(&data)?;
//!     for member in archive.members() {
//!         let member = member?;
//!         println!("{} ({} bytes)", member.name, member.size());
//!
//!         if let Ok(object) = ObjectFile::open(member.payload) {
//!             if let Some(symtab) = object.symtab()? {
//!                 for symbol in object.symbol_table(&symtab)?.symbols() {
//!                     println!("  {}", symbol?.name.unwrap_or("(null)"));
//!                 }
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod archive;
pub mod error;
pub mod macho;
pub mod util;

// Re-export main types
pub use archive::{Archive, Member, RanlibEntry, SymbolDirectory};
pub use error::{Error, Result};
pub use macho::{CommandPayload, LoadCommand, ObjectFile, Symbol, SymbolTable};
pub use util::ByteCursor;
