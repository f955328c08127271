//! BSD archive binary structures.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Archive member header. Every field is space-padded ASCII.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct ArHeader {
    /// Member name, or `#1/<len>` for an extended name
    pub name: [u8; 16],
    /// Modification time (decimal seconds)
    pub date: [u8; 12],
    /// Owner user id (decimal)
    pub uid: [u8; 6],
    /// Owner group id (decimal)
    pub gid: [u8; 6],
    /// File mode (octal)
    pub mode: [u8; 8],
    /// Size of the member data, including an extended name (decimal)
    pub size: [u8; 10],
    /// End-of-header marker
    pub fmag: [u8; 2],
}

impl ArHeader {
    /// Size of a member header.
    pub const SIZE: usize = 60;
}

/// Symbol directory entry.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Ranlib {
    /// Offset of the symbol name within the directory's string blob
    pub ran_strx: u32,
    /// Archive offset of the header of the member defining the symbol
    pub ran_off: u32,
}

impl Ranlib {
    /// Size of a directory entry.
    pub const SIZE: usize = 8;
}
