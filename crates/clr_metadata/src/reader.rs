//! Bounds-checked little-endian reads over borrowed byte slices.

use crate::error::{MetadataError, Result};

/// Borrow `len` bytes starting at `offset`.
pub(crate) fn slice(bytes: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| bytes.get(offset..end))
        .ok_or(MetadataError::Truncated {
            offset,
            needed: len,
        })
}

/// Read a fixed-size array starting at `offset`.
fn array<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N]> {
    let raw = slice(bytes, offset, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(raw);
    Ok(out)
}

pub(crate) fn read_u8(bytes: &[u8], offset: usize) -> Result<u8> {
    bytes.get(offset).copied().ok_or(MetadataError::Truncated {
        offset,
        needed: 1,
    })
}

pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> Result<u16> {
    array(bytes, offset).map(u16::from_le_bytes)
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    array(bytes, offset).map(u32::from_le_bytes)
}

pub(crate) fn read_u64(bytes: &[u8], offset: usize) -> Result<u64> {
    array(bytes, offset).map(u64::from_le_bytes)
}

/// Read an unsigned index stored in either two or four bytes.
pub(crate) fn read_index(bytes: &[u8], offset: usize, width: usize) -> Result<u32> {
    match width {
        2 => read_u16(bytes, offset).map(u32::from),
        _ => read_u32(bytes, offset),
    }
}

/// Sequential reader used for headers whose fields are laid out back to back.
#[derive(Debug, Clone)]
pub(crate) struct Cursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) const fn new(bytes: &'a [u8], position: usize) -> Self {
        Self { bytes, position }
    }

    pub(crate) const fn position(&self) -> usize {
        self.position
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        let value = read_u8(self.bytes, self.position)?;
        self.position += 1;
        Ok(value)
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        let value = read_u16(self.bytes, self.position)?;
        self.position += 2;
        Ok(value)
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        let value = read_u32(self.bytes, self.position)?;
        self.position += 4;
        Ok(value)
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        let value = read_u64(self.bytes, self.position)?;
        self.position += 8;
        Ok(value)
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let value = slice(self.bytes, self.position, len)?;
        self.position += len;
        Ok(value)
    }

    /// Read a NUL-terminated ASCII name whose terminator is padded out to a
    /// multiple of four bytes, as stream headers store their names.
    pub(crate) fn padded_name(&mut self) -> Result<&'a [u8]> {
        let rest = self.bytes.get(self.position..).unwrap_or_default();
        let len = rest
            .iter()
            .position(|byte| *byte == 0)
            .ok_or(MetadataError::Truncated {
                offset: self.position,
                needed: rest.len().saturating_add(1),
            })?;
        let name = self.take(len)?;
        let consumed = len + 1;
        self.position += consumed.next_multiple_of(4) - len;
        Ok(name)
    }
}
