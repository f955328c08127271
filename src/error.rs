//! Error types for archive and Mach-O decoding.
//!
//! Every decode step reports failure through [`Error`]; nothing in the library
//! panics or exits on malformed input.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for decoding operations.
#[derive(Error, Debug)]
pub enum Error {
    // ==================== I/O Errors ====================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open file '{path}': {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to memory map file '{path}': {source}")]
    MemoryMap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ==================== Primitive Read Errors ====================
    #[error("read of {len} bytes at offset {offset:#x} exceeds buffer (size: {available:#x})")]
    OutOfBounds {
        offset: usize,
        len: usize,
        available: usize,
    },

    #[error("text field at offset {offset:#x} is not valid UTF-8")]
    InvalidText { offset: usize },

    // ==================== Signature Errors ====================
    #[error("file does not start with the archive signature \"!<arch>\\n\"")]
    BadArchiveMagic,

    #[error("invalid Mach-O magic: {0:#x}")]
    BadMachoMagic(u32),

    #[error("unsupported format variant: {0}")]
    UnsupportedVariant(&'static str),

    // ==================== Header Errors ====================
    #[error("corrupt header at offset {offset:#x}: {reason}")]
    CorruptHeader { offset: usize, reason: String },

    // ==================== Archive Errors ====================
    #[error("archive member at offset {offset:#x} needs {needed:#x} bytes, buffer has {available:#x}")]
    TruncatedMember {
        offset: usize,
        needed: usize,
        available: usize,
    },

    // ==================== Symbol Table Errors ====================
    #[error("corrupt symbol table at offset {offset:#x}: {reason}")]
    CorruptSymbolTable { offset: usize, reason: String },

    // ==================== Load Command Errors ====================
    #[error("load command at offset {offset:#x} has size {cmdsize}, minimum is {minimum}")]
    InvalidCommandSize {
        offset: usize,
        cmdsize: u32,
        minimum: usize,
    },

    #[error("load commands overrun declared size at offset {offset:#x} (consumed {consumed}, declared {declared})")]
    CommandOverrun {
        offset: usize,
        consumed: usize,
        declared: usize,
    },

    #[error("load commands cover {consumed} bytes, header declares {declared}")]
    CommandSizeMismatch { consumed: usize, declared: usize },
}

/// A specialized Result type for decoding operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true if the input is a recognized format this crate does not handle,
    /// as opposed to a broken input.
    #[inline]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::UnsupportedVariant(_))
    }

    /// Creates an out-of-bounds error.
    #[inline]
    pub fn out_of_bounds(offset: usize, len: usize, available: usize) -> Self {
        Error::OutOfBounds {
            offset,
            len,
            available,
        }
    }

    /// Creates a corrupt header error with a formatted message.
    #[inline]
    pub fn corrupt_header(offset: usize, reason: impl Into<String>) -> Self {
        Error::CorruptHeader {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates a corrupt symbol table error with a formatted message.
    #[inline]
    pub fn corrupt_symtab(offset: usize, reason: impl Into<String>) -> Self {
        Error::CorruptSymbolTable {
            offset,
            reason: reason.into(),
        }
    }
}
