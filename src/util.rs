//! Bounds-checked primitives for reading binary data.
//!
//! Every decoder in this crate reads through [`ByteCursor`], which turns each
//! "cast and dereference" into an explicit, fallible read. Offset arithmetic is
//! checked; a read that would overflow or pass the end of the buffer returns
//! [`Error::OutOfBounds`] instead of panicking.
//!
//! Multi-byte integers are read in the host's native byte order. Containers in
//! the foreign byte order are rejected by the format decoders before any field
//! is interpreted.

use std::ops::Range;

use byteorder::{ByteOrder, NativeEndian};
use zerocopy::FromBytes;

use crate::error::{Error, Result};

// =============================================================================
// Byte Cursor
// =============================================================================

/// A bounds-checked view over an immutable byte buffer.
///
/// The cursor never copies the buffer; everything it returns borrows from it.
/// A cursor created by [`ByteCursor::sub`] remembers where it sits in the
/// original buffer so that errors report absolute offsets.
#[derive(Debug, Clone, Copy)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    base: usize,
}

impl<'a> ByteCursor<'a> {
    /// Creates a cursor over the whole buffer.
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, base: 0 }
    }

    /// Returns the length of the viewed region.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the viewed region is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the absolute offset of this view within the original buffer.
    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    /// Returns the viewed bytes.
    #[inline]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Validates `offset..offset + len` against the viewed region.
    pub fn range(&self, offset: usize, len: usize) -> Result<Range<usize>> {
        match offset.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(offset..end),
            _ => Err(Error::out_of_bounds(
                self.base.saturating_add(offset),
                len,
                self.base + self.data.len(),
            )),
        }
    }

    /// Returns `len` bytes starting at `offset`.
    #[inline]
    pub fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        let range = self.range(offset, len)?;
        Ok(&self.data[range])
    }

    /// Returns a cursor over `len` bytes starting at `offset`.
    #[inline]
    pub fn sub(&self, offset: usize, len: usize) -> Result<ByteCursor<'a>> {
        let data = self.slice(offset, len)?;
        Ok(ByteCursor {
            data,
            base: self.base + offset,
        })
    }

    /// Reads a fixed-size byte field.
    #[inline]
    pub fn read_fixed_bytes<const N: usize>(&self, offset: usize) -> Result<&'a [u8; N]> {
        let bytes = self.slice(offset, N)?;
        bytes
            .try_into()
            .map_err(|_| Error::out_of_bounds(self.base + offset, N, self.base + self.len()))
    }

    /// Reads a native-endian u16.
    #[inline]
    pub fn read_u16(&self, offset: usize) -> Result<u16> {
        Ok(NativeEndian::read_u16(self.slice(offset, 2)?))
    }

    /// Reads a native-endian u32.
    #[inline]
    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        Ok(NativeEndian::read_u32(self.slice(offset, 4)?))
    }

    /// Reads a native-endian u64.
    #[inline]
    pub fn read_u64(&self, offset: usize) -> Result<u64> {
        Ok(NativeEndian::read_u64(self.slice(offset, 8)?))
    }

    /// Reads an on-disk structure by value.
    ///
    /// The structure is copied out of the buffer, so the read has no alignment
    /// requirement.
    pub fn read<T: FromBytes>(&self, offset: usize) -> Result<T> {
        let size = std::mem::size_of::<T>();
        let bytes = self.slice(offset, size)?;
        T::read_from_bytes(bytes)
            .map_err(|_| Error::out_of_bounds(self.base + offset, size, self.base + self.len()))
    }

    /// Reads a text field of at most `max_width` bytes, ending at the first NUL.
    ///
    /// The whole `max_width` window must lie inside the buffer. If it contains
    /// no NUL, the text is the full window.
    pub fn read_c_string(&self, offset: usize, max_width: usize) -> Result<&'a str> {
        let window = self.slice(offset, max_width)?;
        let text = &window[..memchr_null(window)];
        std::str::from_utf8(text).map_err(|_| Error::InvalidText {
            offset: self.base + offset,
        })
    }
}

// =============================================================================
// Text Field Helpers
// =============================================================================

/// Finds the position of the first null byte in a slice, or its length.
#[inline(always)]
pub fn memchr_null(data: &[u8]) -> usize {
    memchr::memchr(0, data).unwrap_or(data.len())
}

/// Trims trailing ASCII spaces from a fixed-width field.
#[inline]
pub fn trim_trailing_spaces(field: &[u8]) -> &[u8] {
    let end = field
        .iter()
        .rposition(|&b| b != b' ')
        .map_or(0, |pos| pos + 1);
    &field[..end]
}

/// Parses a space-padded ASCII number in the given radix.
///
/// Returns `None` for an empty field, a non-digit character, or overflow.
pub fn parse_ascii_number(field: &[u8], radix: u32) -> Option<u64> {
    let digits = trim_trailing_spaces(field);
    if digits.is_empty() {
        return None;
    }

    let mut value: u64 = 0;
    for &byte in digits {
        let digit = (byte as char).to_digit(radix)?;
        value = value
            .checked_mul(radix as u64)?
            .checked_add(digit as u64)?;
    }
    Some(value)
}

/// Aligns a value up to the given power-of-two alignment, or `None` on overflow.
#[inline(always)]
pub const fn checked_align_up(value: usize, alignment: usize) -> Option<usize> {
    debug_assert!(alignment.is_power_of_two());
    match value.checked_add(alignment - 1) {
        Some(v) => Some(v & !(alignment - 1)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_integers() {
        let value: u32 = 0xFEEDFACF;
        let mut data = value.to_ne_bytes().to_vec();
        data.extend_from_slice(&0x1234u16.to_ne_bytes());
        data.extend_from_slice(&0x0102_0304_0506_0708u64.to_ne_bytes());

        let cursor = ByteCursor::new(&data);
        assert_eq!(cursor.read_u32(0).unwrap(), 0xFEEDFACF);
        assert_eq!(cursor.read_u16(4).unwrap(), 0x1234);
        assert_eq!(cursor.read_u64(6).unwrap(), 0x0102_0304_0506_0708);
    }

    #[test]
    fn test_reads_past_end_fail() {
        let data = [0u8; 6];
        let cursor = ByteCursor::new(&data);

        assert!(cursor.read_u32(2).is_ok());
        assert!(matches!(
            cursor.read_u32(3),
            Err(Error::OutOfBounds {
                offset: 3,
                len: 4,
                available: 6
            })
        ));
        assert!(cursor.read_u64(0).is_err());
        assert!(cursor.slice(6, 0).is_ok());
        assert!(cursor.slice(7, 0).is_err());
    }

    #[test]
    fn test_offset_overflow_is_out_of_bounds() {
        let data = [0u8; 16];
        let cursor = ByteCursor::new(&data);
        assert!(matches!(
            cursor.slice(usize::MAX, 2),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(cursor.read_u32(usize::MAX - 1).is_err());
    }

    #[test]
    fn test_sub_cursor_reports_absolute_offsets() {
        let data = [0u8; 32];
        let cursor = ByteCursor::new(&data);
        let sub = cursor.sub(16, 8).unwrap();
        assert_eq!(sub.base(), 16);
        assert_eq!(sub.len(), 8);

        match sub.read_u64(4) {
            Err(Error::OutOfBounds { offset, .. }) => assert_eq!(offset, 20),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_read_c_string() {
        let data = b"main\0pad\xffxy";
        let cursor = ByteCursor::new(data);

        assert_eq!(cursor.read_c_string(0, 8).unwrap(), "main");
        assert_eq!(cursor.read_c_string(5, 3).unwrap(), "pad");
        assert_eq!(cursor.read_c_string(0, 2).unwrap(), "ma");
        assert!(matches!(
            cursor.read_c_string(5, 4),
            Err(Error::InvalidText { offset: 5 })
        ));
        assert!(cursor.read_c_string(9, 8).is_err());
    }

    #[test]
    fn test_read_fixed_bytes() {
        let data = b"!<arch>\nrest";
        let cursor = ByteCursor::new(data);
        assert_eq!(cursor.read_fixed_bytes::<8>(0).unwrap(), b"!<arch>\n");
        assert!(cursor.read_fixed_bytes::<8>(8).is_err());
    }

    #[test]
    fn test_parse_ascii_number() {
        assert_eq!(parse_ascii_number(b"4         ", 10), Some(4));
        assert_eq!(parse_ascii_number(b"1487552916  ", 10), Some(1487552916));
        assert_eq!(parse_ascii_number(b"100644  ", 8), Some(0o100644));
        assert_eq!(parse_ascii_number(b"          ", 10), None);
        assert_eq!(parse_ascii_number(b"12a       ", 10), None);
        assert_eq!(parse_ascii_number(b" 12       ", 10), None);
        assert_eq!(parse_ascii_number(b"8", 8), None);
        assert_eq!(parse_ascii_number(b"99999999999999999999999", 10), None);
    }

    #[test]
    fn test_memchr_null() {
        assert_eq!(memchr_null(b"hello\0world"), 5);
        assert_eq!(memchr_null(b"\0"), 0);
        assert_eq!(memchr_null(b"hello"), 5);
    }

    #[test]
    fn test_checked_align_up() {
        assert_eq!(checked_align_up(0, 2), Some(0));
        assert_eq!(checked_align_up(7, 2), Some(8));
        assert_eq!(checked_align_up(8, 2), Some(8));
        assert_eq!(checked_align_up(usize::MAX, 2), None);
    }
}
