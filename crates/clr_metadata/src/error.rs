//! Error types for PE and ECMA-335 metadata decoding.
//!
//! Every variant describes a structural problem with the input image. None of
//! them are recoverable inside the reader; callers decide whether a malformed
//! assembly aborts anything beyond the current file.

use crate::tables::TableId;
use thiserror::Error;

/// Errors arising while decoding an assembly image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    /// The input does not carry the DOS/PE signatures of a portable executable.
    #[error("not a PE image: {reason}")]
    NotPeImage {
        /// Which header check failed.
        reason: &'static str,
    },

    /// The PE image has no CLI header, so it is a native binary.
    #[error("PE image has no CLI header")]
    NotCliImage,

    /// The metadata root does not start with the `BSJB` signature.
    #[error("metadata root signature {found:#010x} is not BSJB")]
    BadMetadataSignature {
        /// The four bytes found where the signature was expected.
        found: u32,
    },

    /// A metadata stream required for decoding is absent.
    #[error("metadata stream {name} is missing")]
    MissingStream {
        /// Name of the stream, including the leading `#`.
        name: &'static str,
    },

    /// A read ran past the end of the available data.
    #[error("data truncated at offset {offset} (needed {needed} bytes)")]
    Truncated {
        /// Offset of the attempted read within its region.
        offset: usize,
        /// Number of bytes the read required.
        needed: usize,
    },

    /// A relative virtual address falls outside every section.
    #[error("RVA {rva:#x} does not map to any section")]
    UnmappedRva {
        /// The unmapped address.
        rva: u32,
    },

    /// A row identifier points outside its table.
    #[error("row {row} is outside table {table:?} ({rows} rows)")]
    RowOutOfRange {
        /// The table being indexed.
        table: TableId,
        /// The requested one-based row.
        row: u32,
        /// Number of rows actually present.
        rows: u32,
    },

    /// A `#Strings` heap entry is not valid UTF-8.
    #[error("string heap index {index} is not valid UTF-8")]
    InvalidString {
        /// Offset of the entry within the heap.
        index: u32,
    },

    /// A method body starts with neither a tiny nor a fat header.
    #[error("unsupported method header byte {byte:#04x}")]
    UnsupportedMethodHeader {
        /// The first byte of the body.
        byte: u8,
    },

    /// The IL stream contains an opcode this reader does not know.
    #[error("invalid opcode {opcode:#04x} at IL offset {offset}")]
    InvalidInstruction {
        /// The offending opcode byte (the second byte for `0xFE` prefixed opcodes).
        opcode: u8,
        /// Offset of the opcode within the method's code.
        offset: usize,
    },
}

/// Result type alias using [`MetadataError`].
pub type Result<T> = std::result::Result<T, MetadataError>;
