//! Symbol table view over an `LC_SYMTAB` command.
//!
//! Symbols are decoded on demand from the `nlist_64` array; names are borrowed
//! straight out of the string table.

use super::constants::*;
use super::structs::{Nlist64, SymtabCommand};
use crate::error::{Error, Result};
use crate::util::ByteCursor;

/// Primary symbol type (the `N_TYPE` bits of `n_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// N_UNDF
    Undefined,
    /// N_ABS
    Absolute,
    /// N_SECT
    Section,
    /// N_PBUD
    PreboundUndefined,
    /// N_INDR
    Indirect,
    /// Any other value of the type bits
    Other(u8),
}

impl SymbolKind {
    /// Extracts the primary type from an `n_type` byte.
    pub fn from_n_type(n_type: u8) -> Self {
        match n_type & N_TYPE {
            N_UNDF => SymbolKind::Undefined,
            N_ABS => SymbolKind::Absolute,
            N_SECT => SymbolKind::Section,
            N_PBUD => SymbolKind::PreboundUndefined,
            N_INDR => SymbolKind::Indirect,
            other => SymbolKind::Other(other),
        }
    }
}

/// One decoded symbol table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol<'a> {
    /// Position in the symbol table
    pub index: usize,
    /// Name, or `None` when the string index is 0
    pub name: Option<&'a str>,
    /// Raw type byte
    pub n_type: u8,
    /// 1-based section index, or NO_SECT
    pub n_sect: u8,
    /// Description field
    pub n_desc: u16,
    /// Value
    pub n_value: u64,
    /// For N_INDR symbols, the name `n_value` points at
    pub indirect_name: Option<&'a str>,
}

impl Symbol<'_> {
    /// Returns true if this is a symbolic debugging entry.
    #[inline]
    pub fn is_debug(&self) -> bool {
        (self.n_type & N_STAB) != 0
    }

    /// Returns true if the private external bit is set.
    #[inline]
    pub fn is_private_external(&self) -> bool {
        (self.n_type & N_PEXT) != 0
    }

    /// Returns true if the external bit is set.
    #[inline]
    pub fn is_external(&self) -> bool {
        (self.n_type & N_EXT) != 0
    }

    /// Returns the primary type. Not meaningful for debugging entries.
    #[inline]
    pub fn kind(&self) -> SymbolKind {
        SymbolKind::from_n_type(self.n_type)
    }
}

/// A bounds-checked view of a symbol table and its string table.
#[derive(Debug, Clone, Copy)]
pub struct SymbolTable<'a> {
    entries: ByteCursor<'a>,
    strings: ByteCursor<'a>,
    count: usize,
}

impl<'a> SymbolTable<'a> {
    /// Creates a view over the regions `symtab` names in `file`.
    ///
    /// Both the entry array and the string table must lie inside the buffer, so
    /// a corrupt `nsyms` is rejected before any entry is read.
    pub fn new(file: ByteCursor<'a>, symtab: &SymtabCommand) -> Result<Self> {
        let count = symtab.nsyms as usize;
        let entries_len = count.checked_mul(Nlist64::SIZE).ok_or_else(|| {
            Error::corrupt_symtab(symtab.symoff as usize, "symbol count overflows")
        })?;

        Ok(Self {
            entries: file.sub(symtab.symoff as usize, entries_len)?,
            strings: file.sub(symtab.stroff as usize, symtab.strsize as usize)?,
            count,
        })
    }

    /// Returns the number of symbols.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns true if the table has no symbols.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Decodes the symbol at `index`.
    pub fn get(&self, index: usize) -> Result<Symbol<'a>> {
        if index >= self.count {
            return Err(Error::corrupt_symtab(
                self.entries.base(),
                format!("symbol index {index} out of range (count: {})", self.count),
            ));
        }

        let nlist = self.entries.read::<Nlist64>(index * Nlist64::SIZE)?;
        let name = match nlist.n_strx {
            0 => None,
            strx => Some(self.string_at(strx as u64)?),
        };

        let mut symbol = Symbol {
            index,
            name,
            n_type: nlist.n_type,
            n_sect: nlist.n_sect,
            n_desc: nlist.n_desc,
            n_value: nlist.n_value,
            indirect_name: None,
        };
        if !symbol.is_debug() && symbol.kind() == SymbolKind::Indirect {
            symbol.indirect_name = Some(self.string_at(nlist.n_value)?);
        }
        Ok(symbol)
    }

    /// Reads the NUL-terminated string at `strx` within the string table.
    pub fn string_at(&self, strx: u64) -> Result<&'a str> {
        let size = self.strings.len();
        let start = usize::try_from(strx)
            .ok()
            .filter(|&start| start < size)
            .ok_or_else(|| {
                Error::corrupt_symtab(
                    self.strings.base(),
                    format!("string index {strx} out of range (size: {size})"),
                )
            })?;
        self.strings.read_c_string(start, size - start)
    }

    /// Returns the symbol sequence. Each call starts again from the first entry.
    pub fn symbols(&self) -> Symbols<'a> {
        Symbols {
            table: *self,
            index: 0,
            failed: false,
        }
    }
}

/// Lazy sequence of symbols; ends after the first error.
#[derive(Debug, Clone)]
pub struct Symbols<'a> {
    table: SymbolTable<'a>,
    index: usize,
    failed: bool,
}

impl<'a> Iterator for Symbols<'a> {
    type Item = Result<Symbol<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.index >= self.table.count {
            return None;
        }
        let result = self.table.get(self.index);
        self.index += 1;
        self.failed = result.is_err();
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (0, Some(0));
        }
        let left = self.table.count - self.index;
        (0, Some(left))
    }
}
