//! Archive context: the member stream and the symbol directory.

use tracing::{debug, trace};

use super::constants::*;
use super::structs::*;
use crate::error::{Error, Result};
use crate::macho::{FAT_CIGAM, FAT_MAGIC};
use crate::util::{checked_align_up, parse_ascii_number, ByteCursor};

// =============================================================================
// Member
// =============================================================================

/// One decoded archive member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member<'a> {
    /// Offset of the member header within the archive
    pub offset: usize,
    /// Resolved member name
    pub name: &'a str,
    /// Length parsed from a `#1/<len>` name field, if the name is extended
    pub extended_name_len: Option<usize>,
    /// Modification time
    pub mtime: u64,
    /// Owner user id
    pub uid: u32,
    /// Owner group id
    pub gid: u32,
    /// File mode
    pub mode: u32,
    /// Offset of the payload within the archive
    pub payload_offset: usize,
    /// Payload bytes, excluding any extended name
    pub payload: &'a [u8],
    /// Bytes from the header start to the next member, including padding
    pub record_size: usize,
}

impl<'a> Member<'a> {
    /// Returns the payload size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Returns the offset of the following member.
    #[inline]
    pub fn next_offset(&self) -> usize {
        self.offset + self.record_size
    }

    /// Returns true if the name was stored with the `#1/<len>` convention.
    #[inline]
    pub fn has_extended_name(&self) -> bool {
        self.extended_name_len.is_some()
    }

    /// Returns true if this member is a symbol directory.
    #[inline]
    pub fn is_symbol_directory(&self) -> bool {
        self.name == SYMDEF || self.name == SYMDEF_SORTED
    }

    /// Decodes the member whose header starts at `offset`.
    fn parse(cursor: ByteCursor<'a>, offset: usize) -> Result<Self> {
        let len = cursor.len();
        let available = len.saturating_sub(offset);
        if available < ArHeader::SIZE {
            return Err(Error::TruncatedMember {
                offset,
                needed: ArHeader::SIZE,
                available,
            });
        }

        let header = cursor.read::<ArHeader>(offset)?;
        if &header.fmag != ARFMAG {
            return Err(Error::corrupt_header(
                offset,
                format!("unexpected end-of-header marker {:?}", header.fmag),
            ));
        }

        let declared = parse_ascii_number(&header.size, 10)
            .and_then(|size| usize::try_from(size).ok())
            .ok_or_else(|| Error::corrupt_header(offset, "member size is not a decimal number"))?;

        let data_offset = offset + ArHeader::SIZE;
        let next = data_offset
            .checked_add(declared)
            .and_then(|end| checked_align_up(end, MEMBER_ALIGNMENT));
        let record_size = match next {
            Some(next) if next <= len => next - offset,
            _ => {
                return Err(Error::TruncatedMember {
                    offset,
                    needed: next.map_or(usize::MAX, |next| next - offset),
                    available,
                })
            }
        };

        let (name, extended_name_len) = match header.name.strip_prefix(AR_EFMT1.as_slice()) {
            Some(digits) => {
                let name_len = parse_ascii_number(digits, 10)
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| {
                        Error::corrupt_header(offset, "extended name length is not a decimal number")
                    })?;
                if name_len > declared {
                    return Err(Error::corrupt_header(
                        offset,
                        format!("extended name length {name_len} exceeds member size {declared}"),
                    ));
                }
                (cursor.read_c_string(data_offset, name_len)?, Some(name_len))
            }
            None => {
                let name = cursor.read_c_string(offset, header.name.len())?;
                (name.trim_end_matches(' '), None)
            }
        };

        let name_len = extended_name_len.unwrap_or(0);
        let payload_offset = data_offset + name_len;
        let payload = cursor.slice(payload_offset, declared - name_len)?;

        Ok(Self {
            offset,
            name,
            extended_name_len,
            mtime: metadata_field(offset, &header.date, 10, "date")?,
            uid: metadata_field(offset, &header.uid, 10, "uid")?,
            gid: metadata_field(offset, &header.gid, 10, "gid")?,
            mode: metadata_field(offset, &header.mode, 8, "mode")?,
            payload_offset,
            payload,
            record_size,
        })
    }
}

/// Parses a numeric metadata field; an all-blank field reads as zero.
fn metadata_field<T: TryFrom<u64>>(
    offset: usize,
    field: &[u8],
    radix: u32,
    what: &str,
) -> Result<T> {
    let value = if field.iter().all(|&b| b == b' ') {
        Some(0u64)
    } else {
        parse_ascii_number(field, radix)
    };
    value
        .and_then(|value| T::try_from(value).ok())
        .ok_or_else(|| Error::corrupt_header(offset, format!("invalid {what} field")))
}

// =============================================================================
// Archive
// =============================================================================

/// A validated BSD archive over a borrowed buffer.
#[derive(Debug, Clone, Copy)]
pub struct Archive<'a> {
    cursor: ByteCursor<'a>,
}

impl<'a> Archive<'a> {
    /// Checks the archive signature of `data`.
    pub fn open(data: &'a [u8]) -> Result<Self> {
        let cursor = ByteCursor::new(data);

        if !data.starts_with(ARMAG) {
            return match cursor.read_u32(0) {
                Ok(FAT_MAGIC | FAT_CIGAM) => Err(Error::UnsupportedVariant("fat archive")),
                _ => Err(Error::BadArchiveMagic),
            };
        }

        debug!("Opened archive: {} bytes", data.len());
        Ok(Self { cursor })
    }

    /// Returns the underlying buffer.
    #[inline]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.cursor.as_bytes()
    }

    /// Returns the member sequence. Each call starts again from the first member.
    pub fn members(&self) -> Members<'a> {
        Members {
            cursor: self.cursor,
            offset: SARMAG,
            failed: false,
        }
    }

    /// Decodes the member whose header starts at `offset`.
    pub fn member_at(&self, offset: usize) -> Result<Member<'a>> {
        Member::parse(self.cursor, offset)
    }

    /// Finds and decodes the first symbol directory member, if any.
    pub fn symbol_directory(&self) -> Result<Option<SymbolDirectory<'a>>> {
        for member in self.members() {
            let member = member?;
            if member.is_symbol_directory() {
                return self.decode_symbol_directory(&member).map(Some);
            }
        }
        Ok(None)
    }

    /// Decodes a symbol directory member.
    ///
    /// The payload is a byte length and that many bytes of [`Ranlib`] entries,
    /// followed by a byte length and that many bytes of NUL-terminated names.
    pub fn decode_symbol_directory(&self, member: &Member<'a>) -> Result<SymbolDirectory<'a>> {
        let offset = member.payload_offset;
        if !member.is_symbol_directory() {
            return Err(Error::corrupt_symtab(
                member.offset,
                format!("member '{}' is not a symbol directory", member.name),
            ));
        }

        let payload = self.cursor.sub(offset, member.size())?;
        let corrupt = |reason: &str| Error::corrupt_symtab(offset, reason);

        let entries_len = payload
            .read_u32(0)
            .map_err(|_| corrupt("missing directory length"))? as usize;
        if entries_len % Ranlib::SIZE != 0 {
            return Err(corrupt("directory length is not a multiple of the entry size"));
        }
        let entries = payload
            .sub(4, entries_len)
            .map_err(|_| corrupt("directory entries exceed the member"))?;

        let strings_offset = 4 + entries_len;
        let strings_len = payload
            .read_u32(strings_offset)
            .map_err(|_| corrupt("missing string table length"))? as usize;
        let strings = payload
            .sub(strings_offset + 4, strings_len)
            .map_err(|_| corrupt("string table exceeds the member"))?;

        debug!(
            "Symbol directory '{}': {} entries, {} string bytes",
            member.name,
            entries_len / Ranlib::SIZE,
            strings_len
        );

        Ok(SymbolDirectory {
            entries,
            strings,
            count: entries_len / Ranlib::SIZE,
            archive_len: self.cursor.len(),
            sorted: member.name == SYMDEF_SORTED,
        })
    }
}

/// Lazy sequence of archive members; ends at the buffer end or after the first error.
#[derive(Debug, Clone)]
pub struct Members<'a> {
    cursor: ByteCursor<'a>,
    offset: usize,
    failed: bool,
}

impl<'a> Iterator for Members<'a> {
    type Item = Result<Member<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.cursor.len() {
            return None;
        }

        let result = Member::parse(self.cursor, self.offset);
        match &result {
            Ok(member) => {
                trace!(
                    "Member '{}' at {:#x}, {} bytes",
                    member.name,
                    member.offset,
                    member.size()
                );
                self.offset = member.next_offset();
            }
            Err(_) => self.failed = true,
        }
        Some(result)
    }
}

// =============================================================================
// Symbol Directory
// =============================================================================

/// One resolved symbol directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RanlibEntry<'a> {
    /// Position in the directory
    pub index: usize,
    /// Exported symbol name
    pub name: &'a str,
    /// Offset of the name within the string blob
    pub string_index: u32,
    /// Archive offset of the header of the defining member
    pub member_offset: usize,
}

/// A decoded `__.SYMDEF` or `__.SYMDEF SORTED` member.
#[derive(Debug, Clone, Copy)]
pub struct SymbolDirectory<'a> {
    entries: ByteCursor<'a>,
    strings: ByteCursor<'a>,
    count: usize,
    archive_len: usize,
    sorted: bool,
}

impl<'a> SymbolDirectory<'a> {
    /// Returns the number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns true if the directory has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns true for the sorted directory variant.
    #[inline]
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Returns the raw string blob.
    #[inline]
    pub fn strings(&self) -> &'a [u8] {
        self.strings.as_bytes()
    }

    /// Decodes and validates the entry at `index`.
    pub fn get(&self, index: usize) -> Result<RanlibEntry<'a>> {
        if index >= self.count {
            return Err(Error::corrupt_symtab(
                self.entries.base(),
                format!("entry index {index} out of range (count: {})", self.count),
            ));
        }

        let ranlib = self.entries.read::<Ranlib>(index * Ranlib::SIZE)?;
        let entry_offset = self.entries.base() + index * Ranlib::SIZE;

        let strx = ranlib.ran_strx as usize;
        let size = self.strings.len();
        if strx >= size {
            return Err(Error::corrupt_symtab(
                entry_offset,
                format!("string index {strx} out of range (size: {size})"),
            ));
        }

        let member_offset = ranlib.ran_off as usize;
        if member_offset < SARMAG || member_offset >= self.archive_len {
            return Err(Error::corrupt_symtab(
                entry_offset,
                format!(
                    "member offset {member_offset:#x} outside archive (size: {:#x})",
                    self.archive_len
                ),
            ));
        }

        Ok(RanlibEntry {
            index,
            name: self.strings.read_c_string(strx, size - strx)?,
            string_index: ranlib.ran_strx,
            member_offset,
        })
    }

    /// Returns the entry sequence. Each call starts again from the first entry.
    pub fn entries(&self) -> RanlibEntries<'a> {
        RanlibEntries {
            directory: *self,
            index: 0,
            failed: false,
        }
    }
}

/// Lazy sequence of symbol directory entries; ends after the first error.
#[derive(Debug, Clone)]
pub struct RanlibEntries<'a> {
    directory: SymbolDirectory<'a>,
    index: usize,
    failed: bool,
}

impl<'a> Iterator for RanlibEntries<'a> {
    type Item = Result<RanlibEntry<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.index >= self.directory.count {
            return None;
        }
        let result = self.directory.get(self.index);
        self.index += 1;
        self.failed = result.is_err();
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(name: &str, size: usize) -> Vec<u8> {
        let text = format!(
            "{:<16}{:<12}{:<6}{:<6}{:<8}{:<10}`\n",
            name, 1487552916, 501, 20, 100644, size
        );
        assert_eq!(text.len(), ArHeader::SIZE);
        text.into_bytes()
    }

    fn pad(mut data: Vec<u8>) -> Vec<u8> {
        if data.len() % 2 != 0 {
            data.push(b'\n');
        }
        data
    }

    fn inline_member(name: &str, payload: &[u8]) -> Vec<u8> {
        let mut data = header(name, payload.len());
        data.extend_from_slice(payload);
        pad(data)
    }

    fn bsd_member(name: &str, name_field_len: usize, payload: &[u8]) -> Vec<u8> {
        let mut data = header(
            &format!("#1/{name_field_len}"),
            name_field_len + payload.len(),
        );
        let mut name_field = name.as_bytes().to_vec();
        name_field.resize(name_field_len, 0);
        data.extend_from_slice(&name_field);
        data.extend_from_slice(payload);
        pad(data)
    }

    fn archive(members: &[Vec<u8>]) -> Vec<u8> {
        let mut data = ARMAG.to_vec();
        for member in members {
            data.extend_from_slice(member);
        }
        data
    }

    fn symdef_payload(entries: &[(u32, u32)], strings: &[u8]) -> Vec<u8> {
        let mut data = ((entries.len() * Ranlib::SIZE) as u32).to_ne_bytes().to_vec();
        for &(strx, off) in entries {
            data.extend_from_slice(&strx.to_ne_bytes());
            data.extend_from_slice(&off.to_ne_bytes());
        }
        data.extend_from_slice(&(strings.len() as u32).to_ne_bytes());
        data.extend_from_slice(strings);
        data
    }

    #[test]
    fn test_single_inline_member() {
        let data = archive(&[inline_member("foo.o", b"ABCD")]);
        let archive = Archive::open(&data).unwrap();

        let members: Vec<_> = archive.members().collect::<Result<_>>().unwrap();
        assert_eq!(members.len(), 1);

        let member = &members[0];
        assert_eq!(member.name, "foo.o");
        assert_eq!(member.payload, b"ABCD");
        assert!(!member.has_extended_name());
        assert_eq!(member.mtime, 1487552916);
        assert_eq!(member.uid, 501);
        assert_eq!(member.gid, 20);
        assert_eq!(member.mode, 0o100644);
        assert_eq!(member.next_offset(), data.len());
    }

    #[test]
    fn test_extended_names() {
        let data = archive(&[
            bsd_member("this_is_a_very_long_filename.txt", 32, b"foobar\n"),
            bsd_member("and_this_is_another_very_long_filename.txt", 44, b"baz\n"),
        ]);
        let archive = Archive::open(&data).unwrap();
        let members: Vec<_> = archive.members().collect::<Result<_>>().unwrap();

        assert_eq!(members[0].name, "this_is_a_very_long_filename.txt");
        assert_eq!(members[0].extended_name_len, Some(32));
        assert_eq!(members[0].payload, b"foobar\n");
        assert_eq!(members[0].payload_offset, members[0].offset + ArHeader::SIZE + 32);

        assert_eq!(members[1].name, "and_this_is_another_very_long_filename.txt");
        assert_eq!(members[1].extended_name_len, Some(44));
        assert_eq!(members[1].payload, b"baz\n");
        assert_eq!(members[1].payload_offset, members[1].offset + ArHeader::SIZE + 44);
    }

    #[test]
    fn test_members_consume_buffer_exactly() {
        let data = archive(&[
            inline_member("a.o", b"odd"),
            bsd_member("name with space", 16, b"xyz"),
            inline_member("b.o", b""),
            inline_member("c.o", b"even"),
        ]);
        let archive = Archive::open(&data).unwrap();
        let members: Vec<_> = archive.members().collect::<Result<_>>().unwrap();

        assert_eq!(members.len(), 4);
        assert_eq!(members[1].name, "name with space");
        let consumed: usize = members.iter().map(|m| m.record_size).sum();
        assert_eq!(consumed, data.len() - SARMAG);

        let mut offset = SARMAG;
        for member in &members {
            assert_eq!(member.offset, offset);
            offset = member.next_offset();
        }
    }

    #[test]
    fn test_empty_archive_has_no_members() {
        let archive = Archive::open(ARMAG).unwrap();
        assert!(archive.members().next().is_none());
    }

    #[test]
    fn test_bad_signatures() {
        assert!(matches!(
            Archive::open(b"!<arch>"),
            Err(Error::BadArchiveMagic)
        ));
        assert!(matches!(
            Archive::open(b"\x7fELF\x02\x01\x01\x00"),
            Err(Error::BadArchiveMagic)
        ));
        assert!(matches!(Archive::open(b""), Err(Error::BadArchiveMagic)));

        for magic in [FAT_MAGIC, FAT_CIGAM] {
            let mut data = magic.to_ne_bytes().to_vec();
            data.extend_from_slice(&[0; 16]);
            let err = Archive::open(&data).unwrap_err();
            assert!(matches!(err, Error::UnsupportedVariant("fat archive")));
        }
    }

    #[test]
    fn test_bad_end_marker_is_corrupt_header() {
        let mut data = archive(&[inline_member("foo.o", b"ABCD")]);
        data[SARMAG + 58] = b'X';
        let archive = Archive::open(&data).unwrap();
        assert!(matches!(
            archive.members().next(),
            Some(Err(Error::CorruptHeader { offset: SARMAG, .. }))
        ));
    }

    #[test]
    fn test_non_numeric_size_is_corrupt_header() {
        let mut data = archive(&[inline_member("foo.o", b"ABCD")]);
        data[SARMAG + 48] = b'x';
        let archive = Archive::open(&data).unwrap();
        let mut members = archive.members();
        assert!(matches!(
            members.next(),
            Some(Err(Error::CorruptHeader { .. }))
        ));
        assert!(members.next().is_none());
    }

    #[test]
    fn test_extended_name_longer_than_member() {
        let mut data = archive(&[bsd_member("abc", 4, b"zz")]);
        // Size field now says 3 while the name claims 4 bytes.
        data[SARMAG + 48] = b'3';
        data.pop();
        let archive = Archive::open(&data).unwrap();
        assert!(matches!(
            archive.members().next(),
            Some(Err(Error::CorruptHeader { .. }))
        ));
    }

    #[test]
    fn test_oversized_member_is_truncated() {
        let mut data = archive(&[inline_member("foo.o", b"ABCD")]);
        data[SARMAG + 48] = b'9';
        let archive = Archive::open(&data).unwrap();
        assert!(matches!(
            archive.members().next(),
            Some(Err(Error::TruncatedMember { offset: SARMAG, .. }))
        ));
    }

    #[test]
    fn test_truncation_at_any_member_boundary_fails() {
        let data = archive(&[
            inline_member("a.o", b"ABCD"),
            bsd_member("long_member_name.o", 20, b"payload"),
            inline_member("c.o", b"xyz"),
        ]);
        let archive = Archive::open(&data).unwrap();
        let ends: Vec<usize> = archive
            .members()
            .map(|m| m.unwrap().next_offset())
            .collect();

        for end in ends {
            let truncated = Archive::open(&data[..end - 1]).unwrap();
            let result = truncated.members().collect::<Result<Vec<_>>>();
            assert!(
                matches!(
                    result,
                    Err(Error::TruncatedMember { .. }) | Err(Error::OutOfBounds { .. })
                ),
                "truncating at {end:#x} gave {result:?}"
            );
        }
    }

    #[test]
    fn test_members_are_restartable() {
        let data = archive(&[inline_member("a.o", b"1"), inline_member("b.o", b"22")]);
        let archive = Archive::open(&data).unwrap();
        let first: Vec<_> = archive.members().collect::<Result<_>>().unwrap();
        let second: Vec<_> = archive.members().collect::<Result<_>>().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_symbol_directory() {
        // The directory member is 60 + 12 + 48 bytes, so foo.o starts at 128.
        let payload = symdef_payload(&[(0, 128), (7, 128), (11, 128)], b"foobar\0baz\0quux\0");
        let data = archive(&[
            bsd_member(SYMDEF, 12, &payload),
            inline_member("foo.o", b"foobar,baz,quux\n"),
        ]);
        let archive = Archive::open(&data).unwrap();

        let directory = archive.symbol_directory().unwrap().expect("directory present");
        assert!(!directory.is_sorted());
        assert_eq!(directory.len(), 3);

        let entries: Vec<_> = directory.entries().collect::<Result<_>>().unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name).collect();
        assert_eq!(names, ["foobar", "baz", "quux"]);

        for entry in &entries {
            let start = entry.string_index as usize;
            assert!(start + entry.name.len() <= directory.strings().len());
            assert_eq!(archive.member_at(entry.member_offset).unwrap().name, "foo.o");
        }
    }

    #[test]
    fn test_sorted_symbol_directory_with_inline_name() {
        let payload = symdef_payload(&[(0, 8)], b"sym\0");
        let data = archive(&[inline_member(SYMDEF_SORTED, &payload)]);
        let archive = Archive::open(&data).unwrap();

        let member = archive.members().next().unwrap().unwrap();
        assert_eq!(member.name, SYMDEF_SORTED);
        assert!(member.is_symbol_directory());

        let directory = archive.decode_symbol_directory(&member).unwrap();
        assert!(directory.is_sorted());
        assert_eq!(directory.get(0).unwrap().name, "sym");
    }

    #[test]
    fn test_symbol_directory_corruption() {
        let cases: [(Vec<u8>, &str); 4] = [
            (symdef_payload(&[(99, 8)], b"a\0"), "string index"),
            (symdef_payload(&[(0, 0x10000)], b"a\0"), "member offset"),
            (symdef_payload(&[(0, 4)], b"a\0"), "member offset"),
            (
                {
                    let mut p = symdef_payload(&[(0, 8)], b"a\0");
                    p[..4].copy_from_slice(&7u32.to_ne_bytes());
                    p
                },
                "multiple",
            ),
        ];

        for (payload, expected) in cases {
            let data = archive(&[bsd_member(SYMDEF, 12, &payload)]);
            let archive = Archive::open(&data).unwrap();
            let result = archive
                .symbol_directory()
                .and_then(|dir| dir.unwrap().entries().collect::<Result<Vec<_>>>());
            match result {
                Err(Error::CorruptSymbolTable { reason, .. }) => {
                    assert!(reason.contains(expected), "{reason}")
                }
                other => panic!("expected corrupt symbol table, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_entry_index_past_directory_fails() {
        let payload = symdef_payload(&[(0, 8)], b"sym\0");
        let data = archive(&[inline_member(SYMDEF, &payload)]);
        let archive = Archive::open(&data).unwrap();
        let directory = archive.symbol_directory().unwrap().unwrap();

        assert!(directory.get(0).is_ok());
        assert!(matches!(
            directory.get(directory.len()),
            Err(Error::CorruptSymbolTable { .. })
        ));
        assert!(matches!(
            directory.get(usize::MAX / 4),
            Err(Error::CorruptSymbolTable { .. })
        ));
    }

    #[test]
    fn test_decode_non_directory_member_fails() {
        let data = archive(&[inline_member("foo.o", b"ABCD")]);
        let archive = Archive::open(&data).unwrap();
        let member = archive.members().next().unwrap().unwrap();
        assert!(matches!(
            archive.decode_symbol_directory(&member),
            Err(Error::CorruptSymbolTable { .. })
        ));
        assert!(archive.symbol_directory().unwrap().is_none());
    }
}
