//! Portable executable headers and RVA translation.
//!
//! Only the parts of the PE format needed to reach the CLI header are
//! decoded: the DOS stub pointer, the COFF header, the data directories of
//! the optional header, and the section table.

use crate::error::{MetadataError, Result};
use crate::reader::{read_u16, read_u32, slice};

const DOS_SIGNATURE: u16 = 0x5A4D;
const PE_SIGNATURE: u32 = 0x0000_4550;
const LFANEW_OFFSET: usize = 0x3C;
const COFF_HEADER_LEN: usize = 20;
const SECTION_HEADER_LEN: usize = 40;

const PE32_MAGIC: u16 = 0x10B;
const PE32_PLUS_MAGIC: u16 = 0x20B;

/// Index of the CLI header in the data directory array.
const CLI_DIRECTORY_INDEX: u32 = 14;

/// Offset of the metadata directory inside the CLI header.
const CLI_METADATA_OFFSET: usize = 8;

#[derive(Debug, Clone, Copy)]
struct Section {
    virtual_address: u32,
    virtual_size: u32,
    raw_offset: u32,
    raw_size: u32,
}

impl Section {
    fn contains(&self, rva: u32) -> bool {
        let extent = self.virtual_size.max(self.raw_size);
        rva >= self.virtual_address && rva - self.virtual_address < extent
    }
}

/// A parsed PE image borrowing the underlying bytes.
#[derive(Debug, Clone)]
pub(crate) struct PeImage<'a> {
    bytes: &'a [u8],
    sections: Vec<Section>,
    cli_header_rva: u32,
}

impl<'a> PeImage<'a> {
    /// Parse the headers of a PE image and locate its CLI header.
    pub(crate) fn parse(bytes: &'a [u8]) -> Result<Self> {
        if read_u16(bytes, 0).ok() != Some(DOS_SIGNATURE) {
            return Err(MetadataError::NotPeImage {
                reason: "missing MZ signature",
            });
        }
        let pe_offset = read_u32(bytes, LFANEW_OFFSET)? as usize;
        if read_u32(bytes, pe_offset).ok() != Some(PE_SIGNATURE) {
            return Err(MetadataError::NotPeImage {
                reason: "missing PE signature",
            });
        }

        let coff = pe_offset + 4;
        let section_count = read_u16(bytes, coff + 2)?;
        let optional_len = usize::from(read_u16(bytes, coff + 16)?);
        let optional = coff + COFF_HEADER_LEN;

        let (count_offset, directories_offset) = match read_u16(bytes, optional)? {
            PE32_MAGIC => (92, 96),
            PE32_PLUS_MAGIC => (108, 112),
            _ => {
                return Err(MetadataError::NotPeImage {
                    reason: "unknown optional header magic",
                });
            }
        };
        let directory_count = read_u32(bytes, optional + count_offset)?;
        if directory_count <= CLI_DIRECTORY_INDEX {
            return Err(MetadataError::NotCliImage);
        }
        let cli_entry = optional + directories_offset + CLI_DIRECTORY_INDEX as usize * 8;
        let cli_header_rva = read_u32(bytes, cli_entry)?;
        if cli_header_rva == 0 {
            return Err(MetadataError::NotCliImage);
        }

        let table = optional + optional_len;
        let sections = (0..usize::from(section_count))
            .map(|index| read_section(bytes, table + index * SECTION_HEADER_LEN))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            bytes,
            sections,
            cli_header_rva,
        })
    }

    /// Translate an RVA into a file offset.
    pub(crate) fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        let section = self
            .sections
            .iter()
            .find(|section| section.contains(rva))
            .ok_or(MetadataError::UnmappedRva { rva })?;
        let offset = section.raw_offset as usize + (rva - section.virtual_address) as usize;
        if offset >= self.bytes.len() {
            return Err(MetadataError::UnmappedRva { rva });
        }
        Ok(offset)
    }

    /// Borrow everything from `rva` to the end of its section's raw data.
    pub(crate) fn data_at(&self, rva: u32) -> Result<&'a [u8]> {
        let offset = self.rva_to_offset(rva)?;
        let section_end = self
            .sections
            .iter()
            .find(|section| section.contains(rva))
            .map_or(self.bytes.len(), |section| {
                section.raw_offset as usize + section.raw_size as usize
            });
        let end = section_end.min(self.bytes.len());
        Ok(self.bytes.get(offset..end).unwrap_or_default())
    }

    /// Borrow exactly `len` bytes at `rva`.
    pub(crate) fn slice_at(&self, rva: u32, len: usize) -> Result<&'a [u8]> {
        let offset = self.rva_to_offset(rva)?;
        slice(self.bytes, offset, len)
    }

    /// Borrow the metadata block referenced by the CLI header.
    pub(crate) fn metadata(&self) -> Result<&'a [u8]> {
        let header = self.data_at(self.cli_header_rva)?;
        let rva = read_u32(header, CLI_METADATA_OFFSET)?;
        let size = read_u32(header, CLI_METADATA_OFFSET + 4)?;
        self.slice_at(rva, size as usize)
    }
}

fn read_section(bytes: &[u8], offset: usize) -> Result<Section> {
    Ok(Section {
        virtual_size: read_u32(bytes, offset + 8)?,
        virtual_address: read_u32(bytes, offset + 12)?,
        raw_size: read_u32(bytes, offset + 16)?,
        raw_offset: read_u32(bytes, offset + 20)?,
    })
}
