//! Mach-O binary structures.
//!
//! These structures match the on-disk format of 64-bit Mach-O files in the
//! host's byte order. They are always read by value through
//! [`ByteCursor::read`](crate::util::ByteCursor::read), never cast in place.

use std::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::constants::*;
use crate::util::memchr_null;

// =============================================================================
// Header Structures
// =============================================================================

/// 64-bit Mach-O header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct MachHeader64 {
    /// Magic number (MH_MAGIC_64)
    pub magic: u32,
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File type
    pub filetype: u32,
    /// Number of load commands
    pub ncmds: u32,
    /// Size of load commands
    pub sizeofcmds: u32,
    /// Flags
    pub flags: u32,
    /// Reserved
    pub reserved: u32,
}

impl MachHeader64 {
    /// Size of the header in bytes.
    pub const SIZE: usize = 32;

    /// Returns the decoded file type.
    #[inline]
    pub fn file_type(&self) -> FileType {
        FileType::from_raw(self.filetype)
    }

    /// Returns the header flags.
    #[inline]
    pub fn flags(&self) -> MachOFlags {
        MachOFlags::from_bits_retain(self.flags)
    }

    /// Returns true if this is an ARM64e binary (with pointer authentication).
    #[inline]
    pub fn is_arm64e(&self) -> bool {
        self.cputype == CPU_TYPE_ARM64 && (self.cpusubtype & 0xFF) == CPU_SUBTYPE_ARM64E
    }

    /// Returns the architecture as a string.
    pub fn arch_name(&self) -> &'static str {
        match self.cputype {
            CPU_TYPE_ARM64 if self.is_arm64e() => "arm64e",
            CPU_TYPE_ARM64 => "arm64",
            CPU_TYPE_X86_64 => "x86_64",
            CPU_TYPE_ARM => "arm",
            CPU_TYPE_X86 => "i386",
            _ => "unknown",
        }
    }
}

/// Mach-O file type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum FileType {
    Object,
    Execute,
    FvmLib,
    Core,
    Preload,
    Dylib,
    Dylinker,
    Bundle,
    DylibStub,
    Dsym,
    KextBundle,
    Fileset,
    Unknown(u32),
}

impl FileType {
    /// Maps a raw `filetype` header field.
    pub fn from_raw(value: u32) -> Self {
        match value {
            MH_OBJECT => FileType::Object,
            MH_EXECUTE => FileType::Execute,
            MH_FVMLIB => FileType::FvmLib,
            MH_CORE => FileType::Core,
            MH_PRELOAD => FileType::Preload,
            MH_DYLIB => FileType::Dylib,
            MH_DYLINKER => FileType::Dylinker,
            MH_BUNDLE => FileType::Bundle,
            MH_DYLIB_STUB => FileType::DylibStub,
            MH_DSYM => FileType::Dsym,
            MH_KEXT_BUNDLE => FileType::KextBundle,
            MH_FILESET => FileType::Fileset,
            other => FileType::Unknown(other),
        }
    }

    /// Returns the `MH_*` name, or `None` for an unknown type.
    pub fn name(&self) -> Option<&'static str> {
        let name = match self {
            FileType::Object => "MH_OBJECT",
            FileType::Execute => "MH_EXECUTE",
            FileType::FvmLib => "MH_FVMLIB",
            FileType::Core => "MH_CORE",
            FileType::Preload => "MH_PRELOAD",
            FileType::Dylib => "MH_DYLIB",
            FileType::Dylinker => "MH_DYLINKER",
            FileType::Bundle => "MH_BUNDLE",
            FileType::DylibStub => "MH_DYLIB_STUB",
            FileType::Dsym => "MH_DSYM",
            FileType::KextBundle => "MH_KEXT_BUNDLE",
            FileType::Fileset => "MH_FILESET",
            FileType::Unknown(_) => return None,
        };
        Some(name)
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.name(), self) {
            (Some(name), _) => f.write_str(name),
            (None, FileType::Unknown(raw)) => write!(f, "unknown {raw:#x}"),
            (None, _) => f.write_str("unknown"),
        }
    }
}

// =============================================================================
// Load Command Header
// =============================================================================

/// Generic load command header.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct LoadCommandHeader {
    /// Type of load command
    pub cmd: u32,
    /// Size of load command
    pub cmdsize: u32,
}

impl LoadCommandHeader {
    /// Size of the load command header, and the smallest legal command.
    pub const SIZE: usize = 8;
}

// =============================================================================
// Segment Command
// =============================================================================

/// 64-bit segment command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SegmentCommand64 {
    /// LC_SEGMENT_64
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Virtual memory address
    pub vmaddr: u64,
    /// Virtual memory size
    pub vmsize: u64,
    /// File offset
    pub fileoff: u64,
    /// Amount of file to map
    pub filesize: u64,
    /// Maximum VM protection
    pub maxprot: u32,
    /// Initial VM protection
    pub initprot: u32,
    /// Number of sections
    pub nsects: u32,
    /// Flags
    pub flags: u32,
}

impl SegmentCommand64 {
    /// Size of the segment command (without sections).
    pub const SIZE: usize = 72;

    /// Returns the segment name as a string.
    pub fn name(&self) -> &str {
        fixed_name(&self.segname)
    }
}

/// 64-bit section.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Section64 {
    /// Section name (16 bytes, null-padded)
    pub sectname: [u8; 16],
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Virtual memory address
    pub addr: u64,
    /// Size in bytes
    pub size: u64,
    /// File offset
    pub offset: u32,
    /// Alignment (power of 2)
    pub align: u32,
    /// File offset of relocation entries
    pub reloff: u32,
    /// Number of relocation entries
    pub nreloc: u32,
    /// Flags
    pub flags: u32,
    /// Reserved (for runtime use)
    pub reserved1: u32,
    /// Reserved (for runtime use)
    pub reserved2: u32,
    /// Reserved
    pub reserved3: u32,
}

impl Section64 {
    /// Size of a section entry.
    pub const SIZE: usize = 80;

    /// Returns the section name as a string.
    pub fn name(&self) -> &str {
        fixed_name(&self.sectname)
    }

    /// Returns the segment name as a string.
    pub fn segment_name(&self) -> &str {
        fixed_name(&self.segname)
    }
}

/// Reads a NUL-padded name field. A name that is not UTF-8 reads as empty.
fn fixed_name(field: &[u8; 16]) -> &str {
    std::str::from_utf8(&field[..memchr_null(field)]).unwrap_or("")
}

// =============================================================================
// Symbol Table Command
// =============================================================================

/// Symbol table command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SymtabCommand {
    /// LC_SYMTAB
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// Symbol table offset
    pub symoff: u32,
    /// Number of symbol table entries
    pub nsyms: u32,
    /// String table offset
    pub stroff: u32,
    /// String table size in bytes
    pub strsize: u32,
}

impl SymtabCommand {
    /// Size of this command.
    pub const SIZE: usize = 24;
}

/// 64-bit symbol table entry.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Nlist64 {
    /// Index into string table
    pub n_strx: u32,
    /// Type flag
    pub n_type: u8,
    /// Section number or NO_SECT
    pub n_sect: u8,
    /// Flags (see <mach-o/stab.h>)
    pub n_desc: u16,
    /// Value
    pub n_value: u64,
}

impl Nlist64 {
    /// Size of an nlist entry.
    pub const SIZE: usize = 16;
}

// =============================================================================
// Dylinker and Dylib Commands
// =============================================================================

/// Dynamic linker command (LC_LOAD_DYLINKER, LC_ID_DYLINKER, LC_DYLD_ENVIRONMENT).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DylinkerCommand {
    /// Command type
    pub cmd: u32,
    /// Total size (includes path string)
    pub cmdsize: u32,
    /// Path name offset from the start of the command
    pub name_offset: u32,
}

impl DylinkerCommand {
    /// Minimum size of this command (without path string).
    pub const SIZE: usize = 12;
}

/// Dylib reference (shared by several load commands).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Dylib {
    /// Library's path name offset
    pub name_offset: u32,
    /// Library's build timestamp
    pub timestamp: u32,
    /// Library's current version number
    pub current_version: u32,
    /// Library's compatibility version number
    pub compatibility_version: u32,
}

/// Dylib load command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DylibCommand {
    /// LC_LOAD_DYLIB, LC_ID_DYLIB, etc.
    pub cmd: u32,
    /// Total size (includes path string)
    pub cmdsize: u32,
    /// Library identification
    pub dylib: Dylib,
}

impl DylibCommand {
    /// Minimum size of this command (without path string).
    pub const SIZE: usize = 24;
}

/// A version packed as `xxxx.yy.zz` into 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(pub u32);

impl Version {
    /// Major component (top 16 bits).
    #[inline]
    pub fn major(self) -> u32 {
        self.0 >> 16
    }

    /// Minor component (next 8 bits).
    #[inline]
    pub fn minor(self) -> u32 {
        (self.0 >> 8) & 0xFF
    }

    /// Patch component (low 8 bits).
    #[inline]
    pub fn patch(self) -> u32 {
        self.0 & 0xFF
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

// =============================================================================
// UUID Command
// =============================================================================

/// UUID command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct UuidCommand {
    /// LC_UUID
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// UUID
    pub uuid: [u8; 16],
}

impl UuidCommand {
    /// Size of this command.
    pub const SIZE: usize = 24;
}

// =============================================================================
// Display Implementations
// =============================================================================

impl fmt::Display for MachHeader64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MachO {{ arch: {}, type: {}, cmds: {}, flags: {:#x} }}",
            self.arch_name(),
            self.file_type(),
            self.ncmds,
            self.flags
        )
    }
}

impl fmt::Display for SegmentCommand64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Segment {{ name: \"{}\", vm: {:#x}+{:#x}, file: {:#x}+{:#x}, sects: {} }}",
            self.name(),
            self.vmaddr,
            self.vmsize,
            self.fileoff,
            self.filesize,
            self.nsects
        )
    }
}

impl fmt::Display for Section64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Section {{ name: \"{},{}\", addr: {:#x}+{:#x}, offset: {:#x} }}",
            self.segment_name(),
            self.name(),
            self.addr,
            self.size,
            self.offset
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::FromZeros;

    #[test]
    fn test_struct_sizes_match_disk_layout() {
        assert_eq!(std::mem::size_of::<MachHeader64>(), MachHeader64::SIZE);
        assert_eq!(
            std::mem::size_of::<LoadCommandHeader>(),
            LoadCommandHeader::SIZE
        );
        assert_eq!(
            std::mem::size_of::<SegmentCommand64>(),
            SegmentCommand64::SIZE
        );
        assert_eq!(std::mem::size_of::<Section64>(), Section64::SIZE);
        assert_eq!(std::mem::size_of::<SymtabCommand>(), SymtabCommand::SIZE);
        assert_eq!(std::mem::size_of::<Nlist64>(), Nlist64::SIZE);
        assert_eq!(std::mem::size_of::<DylinkerCommand>(), DylinkerCommand::SIZE);
        assert_eq!(std::mem::size_of::<DylibCommand>(), DylibCommand::SIZE);
        assert_eq!(std::mem::size_of::<UuidCommand>(), UuidCommand::SIZE);
    }

    #[test]
    fn test_version_unpacking() {
        let v = Version(0x0001_0203);
        assert_eq!((v.major(), v.minor(), v.patch()), (1, 2, 3));
        assert_eq!(v.to_string(), "1.2.3");
        assert_eq!(Version(0x04CF_0000).to_string(), "1231.0.0");
    }

    #[test]
    fn test_file_type_names() {
        assert_eq!(FileType::from_raw(MH_OBJECT), FileType::Object);
        assert_eq!(FileType::from_raw(MH_KEXT_BUNDLE).to_string(), "MH_KEXT_BUNDLE");
        assert_eq!(FileType::from_raw(0x42), FileType::Unknown(0x42));
        assert_eq!(FileType::from_raw(0x42).to_string(), "unknown 0x42");
    }

    #[test]
    fn test_fixed_name_fields() {
        let mut section = Section64::new_zeroed();
        section.sectname[..6].copy_from_slice(b"__text");
        section.segname = *b"__SIXTEEN_CHARS_";
        assert_eq!(section.name(), "__text");
        assert_eq!(section.segment_name(), "__SIXTEEN_CHARS_");

        section.sectname[0] = 0xFF;
        assert_eq!(section.name(), "");
    }

    #[test]
    fn test_arch_name() {
        let mut header = MachHeader64::new_zeroed();
        header.cputype = CPU_TYPE_ARM64;
        header.cpusubtype = CPU_SUBTYPE_ARM64E;
        assert_eq!(header.arch_name(), "arm64e");
        header.cpusubtype = CPU_SUBTYPE_ARM64_ALL;
        assert_eq!(header.arch_name(), "arm64");
        header.cputype = CPU_TYPE_X86_64;
        assert_eq!(header.arch_name(), "x86_64");
    }
}
