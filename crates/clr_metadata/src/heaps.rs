//! The `#Strings` and `#US` heaps.

use crate::error::{MetadataError, Result};
use crate::reader::{read_u8, slice};

/// Identifier strings: NUL-terminated UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct StringHeap<'a>(pub(crate) &'a [u8]);

impl<'a> StringHeap<'a> {
    pub(crate) fn get(&self, index: u32) -> Result<&'a str> {
        let start = index as usize;
        let rest = self.0.get(start..).ok_or(MetadataError::Truncated {
            offset: start,
            needed: 1,
        })?;
        // Index 0 of an absent heap is the empty string.
        if rest.is_empty() && start == 0 {
            return Ok("");
        }
        let len = rest
            .iter()
            .position(|byte| *byte == 0)
            .ok_or(MetadataError::Truncated {
                offset: start,
                needed: rest.len().saturating_add(1),
            })?;
        std::str::from_utf8(slice(rest, 0, len)?).map_err(|_| MetadataError::InvalidString { index })
    }
}

/// User strings: length-prefixed UTF-16LE referenced by `ldstr` tokens.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct UserStringHeap<'a>(pub(crate) &'a [u8]);

impl UserStringHeap<'_> {
    pub(crate) fn get(&self, offset: u32) -> Result<String> {
        let start = offset as usize;
        let (len, header) = read_compressed_length(self.0, start)?;
        let blob = slice(self.0, start + header, len)?;
        // The final byte is a terminal flag, not character data.
        let text = blob.get(..len.saturating_sub(1)).unwrap_or_default();
        let units: Vec<u16> = text
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }
}

/// Decode an ECMA-335 compressed unsigned length, returning the value and
/// the number of header bytes it occupied.
pub(crate) fn read_compressed_length(bytes: &[u8], offset: usize) -> Result<(usize, usize)> {
    let first = read_u8(bytes, offset)?;
    if first & 0x80 == 0 {
        return Ok((usize::from(first), 1));
    }
    if first & 0xC0 == 0x80 {
        let second = read_u8(bytes, offset + 1)?;
        let value = (usize::from(first & 0x3F) << 8) | usize::from(second);
        return Ok((value, 2));
    }
    let raw = slice(bytes, offset, 4)?;
    let value = (usize::from(raw[0] & 0x1F) << 24)
        | (usize::from(raw[1]) << 16)
        | (usize::from(raw[2]) << 8)
        | usize::from(raw[3]);
    Ok((value, 4))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::one_byte(&[0x03], (3, 1))]
    #[case::two_bytes(&[0x80, 0x80], (0x80, 2))]
    #[case::two_bytes_max(&[0xBF, 0xFF], (0x3FFF, 2))]
    #[case::four_bytes(&[0xC0, 0x00, 0x40, 0x00], (0x4000, 4))]
    fn decodes_compressed_lengths(#[case] bytes: &[u8], #[case] expected: (usize, usize)) {
        assert_eq!(read_compressed_length(bytes, 0), Ok(expected));
    }

    #[test]
    fn reads_nul_terminated_identifiers() {
        let heap = StringHeap(b"\0ResoniteMod\0Link\0");
        assert_eq!(heap.get(0), Ok(""));
        assert_eq!(heap.get(1), Ok("ResoniteMod"));
        assert_eq!(heap.get(13), Ok("Link"));
    }

    #[test]
    fn identifier_without_terminator_is_truncated() {
        let heap = StringHeap(b"\0Link");
        assert!(matches!(heap.get(1), Err(MetadataError::Truncated { .. })));
    }

    #[test]
    fn decodes_utf16_user_string() {
        // "Hi" = 2 UTF-16 units + terminal flag byte.
        let heap = UserStringHeap(&[0x00, 0x05, b'H', 0x00, b'i', 0x00, 0x00]);
        assert_eq!(heap.get(1), Ok("Hi".to_owned()));
    }

    #[test]
    fn empty_user_string_has_zero_length() {
        let heap = UserStringHeap(&[0x00]);
        assert_eq!(heap.get(0), Ok(String::new()));
    }

    #[test]
    fn user_string_past_heap_end_is_truncated() {
        let heap = UserStringHeap(&[0x00, 0x09, b'H', 0x00]);
        assert!(heap.get(1).is_err());
    }
}
