//! Object file context: header validation and the load command stream.

use tracing::{debug, trace};

use super::constants::*;
use super::structs::*;
use super::symbols::SymbolTable;
use crate::error::{Error, Result};
use crate::util::ByteCursor;

// =============================================================================
// Load Command Info
// =============================================================================

/// Which dylib relationship a dylib-style command expresses.
///
/// All of these share one payload layout and differ only by command kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum DylibKind {
    Id,
    Load,
    Weak,
    Reexport,
    Upward,
    Lazy,
}

impl DylibKind {
    fn from_cmd(cmd: u32) -> Option<Self> {
        match cmd {
            LC_ID_DYLIB => Some(DylibKind::Id),
            LC_LOAD_DYLIB => Some(DylibKind::Load),
            LC_LOAD_WEAK_DYLIB => Some(DylibKind::Weak),
            LC_REEXPORT_DYLIB => Some(DylibKind::Reexport),
            LC_LOAD_UPWARD_DYLIB => Some(DylibKind::Upward),
            LC_LAZY_LOAD_DYLIB => Some(DylibKind::Lazy),
            _ => None,
        }
    }
}

/// A decoded dylib reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DylibInfo<'a> {
    /// Relationship to the library
    pub kind: DylibKind,
    /// Install name of the library
    pub name: &'a str,
    /// Build timestamp
    pub timestamp: u32,
    /// Current version
    pub current_version: Version,
    /// Compatibility version
    pub compatibility_version: Version,
}

/// A decoded 64-bit segment and the raw bytes of its section headers.
#[derive(Debug, Clone, Copy)]
pub struct SegmentInfo<'a> {
    /// The segment command
    pub command: SegmentCommand64,
    sections: ByteCursor<'a>,
}

impl<'a> SegmentInfo<'a> {
    /// Returns the segment name.
    pub fn name(&self) -> &str {
        self.command.name()
    }

    /// Returns the section headers that follow the segment command.
    pub fn sections(&self) -> Sections<'a> {
        Sections {
            cursor: self.sections,
            index: 0,
            count: self.command.nsects as usize,
        }
    }
}

/// Iterator over the sections of a segment.
#[derive(Debug, Clone)]
pub struct Sections<'a> {
    cursor: ByteCursor<'a>,
    index: usize,
    count: usize,
}

impl Iterator for Sections<'_> {
    type Item = Result<Section64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.count {
            return None;
        }
        let offset = self.index * Section64::SIZE;
        self.index += 1;
        Some(self.cursor.read::<Section64>(offset))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.count - self.index;
        (left, Some(left))
    }
}

/// Payload of a load command, decoded according to its kind.
#[derive(Debug, Clone, Copy)]
pub enum CommandPayload<'a> {
    /// LC_SYMTAB
    Symtab(SymtabCommand),
    /// LC_LOAD_DYLINKER, LC_ID_DYLINKER, LC_DYLD_ENVIRONMENT
    Dylinker {
        /// Path (or environment string) named by the command
        name: &'a str,
    },
    /// Any dylib-style command
    Dylib(DylibInfo<'a>),
    /// LC_SEGMENT_64
    Segment(SegmentInfo<'a>),
    /// LC_UUID
    Uuid([u8; 16]),
    /// Any other kind, preserved verbatim
    Unknown {
        /// Command kind
        cmd: u32,
        /// Command bytes after the (kind, size) header
        bytes: &'a [u8],
    },
}

/// One load command record.
#[derive(Debug, Clone, Copy)]
pub struct LoadCommand<'a> {
    /// Offset of the command within the file
    pub offset: usize,
    /// Command kind
    pub cmd: u32,
    /// Declared command size, including the header
    pub cmdsize: u32,
    /// Decoded payload
    pub payload: CommandPayload<'a>,
    extent: &'a [u8],
}

impl<'a> LoadCommand<'a> {
    /// Returns all bytes of the command, including the (kind, size) header.
    #[inline]
    pub fn bytes(&self) -> &'a [u8] {
        self.extent
    }

    /// Returns the `cmdsize - 8` bytes following the (kind, size) header.
    #[inline]
    pub fn payload_bytes(&self) -> &'a [u8] {
        &self.extent[LoadCommandHeader::SIZE..]
    }

    /// Returns the `LC_*` name of this command, if known.
    pub fn name(&self) -> Option<&'static str> {
        load_command_name(self.cmd)
    }

    /// Decodes the command occupying all of `extent`.
    fn parse(header: LoadCommandHeader, extent: ByteCursor<'a>) -> Result<Self> {
        let cmd = header.cmd;
        let payload = match cmd {
            LC_SYMTAB => {
                require_size(&extent, header.cmdsize, SymtabCommand::SIZE)?;
                CommandPayload::Symtab(extent.read::<SymtabCommand>(0)?)
            }

            LC_LOAD_DYLINKER | LC_ID_DYLINKER | LC_DYLD_ENVIRONMENT => {
                require_size(&extent, header.cmdsize, DylinkerCommand::SIZE)?;
                let command = extent.read::<DylinkerCommand>(0)?;
                CommandPayload::Dylinker {
                    name: read_lc_str(&extent, command.name_offset)?,
                }
            }

            LC_SEGMENT_64 => {
                require_size(&extent, header.cmdsize, SegmentCommand64::SIZE)?;
                let command = extent.read::<SegmentCommand64>(0)?;
                let sections_len = (command.nsects as usize)
                    .checked_mul(Section64::SIZE)
                    .and_then(|len| len.checked_add(SegmentCommand64::SIZE))
                    .unwrap_or(usize::MAX);
                require_size(&extent, header.cmdsize, sections_len)?;
                CommandPayload::Segment(SegmentInfo {
                    command,
                    sections: extent.sub(
                        SegmentCommand64::SIZE,
                        sections_len - SegmentCommand64::SIZE,
                    )?,
                })
            }

            LC_UUID => {
                require_size(&extent, header.cmdsize, UuidCommand::SIZE)?;
                CommandPayload::Uuid(extent.read::<UuidCommand>(0)?.uuid)
            }

            _ => match DylibKind::from_cmd(cmd) {
                Some(kind) => {
                    require_size(&extent, header.cmdsize, DylibCommand::SIZE)?;
                    let command = extent.read::<DylibCommand>(0)?;
                    CommandPayload::Dylib(DylibInfo {
                        kind,
                        name: read_lc_str(&extent, command.dylib.name_offset)?,
                        timestamp: command.dylib.timestamp,
                        current_version: Version(command.dylib.current_version),
                        compatibility_version: Version(command.dylib.compatibility_version),
                    })
                }
                None => CommandPayload::Unknown {
                    cmd,
                    bytes: extent.slice(
                        LoadCommandHeader::SIZE,
                        extent.len() - LoadCommandHeader::SIZE,
                    )?,
                },
            },
        };

        Ok(Self {
            offset: extent.base(),
            cmd,
            cmdsize: header.cmdsize,
            payload,
            extent: extent.as_bytes(),
        })
    }
}

fn require_size(extent: &ByteCursor<'_>, cmdsize: u32, minimum: usize) -> Result<()> {
    if extent.len() < minimum {
        return Err(Error::InvalidCommandSize {
            offset: extent.base(),
            cmdsize,
            minimum,
        });
    }
    Ok(())
}

/// Reads a string addressed by an offset from the start of its command.
fn read_lc_str<'a>(extent: &ByteCursor<'a>, name_offset: u32) -> Result<&'a str> {
    let name_offset = name_offset as usize;
    let width = extent.len().checked_sub(name_offset).ok_or_else(|| {
        Error::corrupt_header(
            extent.base(),
            format!(
                "name offset {name_offset} lies outside command of size {}",
                extent.len()
            ),
        )
    })?;
    extent.read_c_string(name_offset, width)
}

// =============================================================================
// Object File
// =============================================================================

/// A validated 64-bit Mach-O object file over a borrowed buffer.
#[derive(Debug, Clone, Copy)]
pub struct ObjectFile<'a> {
    cursor: ByteCursor<'a>,
    header: MachHeader64,
}

impl<'a> ObjectFile<'a> {
    /// Validates the header of `data`.
    ///
    /// Only native-endian, single-architecture 64-bit files are accepted. Other
    /// recognized Mach-O flavours are reported as [`Error::UnsupportedVariant`].
    pub fn open(data: &'a [u8]) -> Result<Self> {
        let cursor = ByteCursor::new(data);

        match cursor.read_u32(0)? {
            MH_MAGIC_64 => {}
            MH_MAGIC => return Err(Error::UnsupportedVariant("32-bit")),
            MH_CIGAM | MH_CIGAM_64 => return Err(Error::UnsupportedVariant("non-host byte order")),
            FAT_MAGIC | FAT_CIGAM => return Err(Error::UnsupportedVariant("fat binary")),
            other => return Err(Error::BadMachoMagic(other)),
        }

        let header = cursor.read::<MachHeader64>(0)?;

        // Every command is at least a header, so ncmds is capped by sizeofcmds.
        let min_cmds_size = (header.ncmds as usize).saturating_mul(LoadCommandHeader::SIZE);
        if min_cmds_size > header.sizeofcmds as usize {
            return Err(Error::CommandOverrun {
                offset: MachHeader64::SIZE,
                consumed: min_cmds_size,
                declared: header.sizeofcmds as usize,
            });
        }
        if header.ncmds == 0 && header.sizeofcmds != 0 {
            return Err(Error::CommandSizeMismatch {
                consumed: 0,
                declared: header.sizeofcmds as usize,
            });
        }
        cursor.range(MachHeader64::SIZE, header.sizeofcmds as usize)?;

        debug!(
            "Opened Mach-O: {}, {} load commands ({} bytes)",
            header, header.ncmds, header.sizeofcmds
        );

        Ok(Self { cursor, header })
    }

    /// Returns the file header.
    #[inline]
    pub fn header(&self) -> &MachHeader64 {
        &self.header
    }

    /// Returns the decoded file type.
    #[inline]
    pub fn file_type(&self) -> FileType {
        self.header.file_type()
    }

    /// Returns the header flags.
    #[inline]
    pub fn flags(&self) -> MachOFlags {
        self.header.flags()
    }

    /// Returns the underlying buffer.
    #[inline]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.cursor.as_bytes()
    }

    /// Returns the load command sequence.
    ///
    /// Each call starts again from the first command.
    pub fn load_commands(&self) -> LoadCommands<'a> {
        LoadCommands {
            cursor: self.cursor,
            offset: MachHeader64::SIZE,
            remaining: self.header.ncmds,
            consumed: 0,
            declared: self.header.sizeofcmds as usize,
            failed: false,
        }
    }

    /// Returns the first symbol table command, if any.
    pub fn symtab(&self) -> Result<Option<SymtabCommand>> {
        for lc in self.load_commands() {
            if let CommandPayload::Symtab(command) = lc?.payload {
                return Ok(Some(command));
            }
        }
        Ok(None)
    }

    /// Returns a view of the symbols described by `symtab`.
    pub fn symbol_table(&self, symtab: &SymtabCommand) -> Result<SymbolTable<'a>> {
        SymbolTable::new(self.cursor, symtab)
    }

    /// Returns an iterator over dylib dependencies.
    pub fn dylibs(&self) -> impl Iterator<Item = Result<DylibInfo<'a>>> + 'a {
        self.load_commands().filter_map(|lc| match lc {
            Ok(LoadCommand {
                payload: CommandPayload::Dylib(info),
                ..
            }) => Some(Ok(info)),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })
    }
}

/// Lazy sequence of load commands.
///
/// Ends after `ncmds` commands, or after yielding the first error.
#[derive(Debug, Clone)]
pub struct LoadCommands<'a> {
    cursor: ByteCursor<'a>,
    offset: usize,
    remaining: u32,
    consumed: usize,
    declared: usize,
    failed: bool,
}

impl<'a> LoadCommands<'a> {
    fn step(&mut self) -> Result<LoadCommand<'a>> {
        let offset = self.offset;
        let header = self.cursor.read::<LoadCommandHeader>(offset)?;
        let cmdsize = header.cmdsize as usize;

        if cmdsize < LoadCommandHeader::SIZE {
            return Err(Error::InvalidCommandSize {
                offset,
                cmdsize: header.cmdsize,
                minimum: LoadCommandHeader::SIZE,
            });
        }

        let consumed = self.consumed.saturating_add(cmdsize);
        if consumed > self.declared {
            return Err(Error::CommandOverrun {
                offset,
                consumed,
                declared: self.declared,
            });
        }
        if self.remaining == 1 && consumed != self.declared {
            return Err(Error::CommandSizeMismatch {
                consumed,
                declared: self.declared,
            });
        }

        let extent = self.cursor.sub(offset, cmdsize)?;
        let command = LoadCommand::parse(header, extent)?;

        trace!(
            "Load command {:#x} ({}) at {:#x}, size {}",
            command.cmd,
            command.name().unwrap_or("unknown"),
            offset,
            cmdsize
        );

        self.offset = offset + cmdsize;
        self.consumed = consumed;
        self.remaining -= 1;
        Ok(command)
    }
}

impl<'a> Iterator for LoadCommands<'a> {
    type Item = Result<LoadCommand<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == 0 {
            return None;
        }
        let result = self.step();
        self.failed = result.is_err();
        Some(result)
    }
}
