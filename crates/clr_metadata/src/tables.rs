//! The compressed metadata table stream (`#~`).
//!
//! Tables are stored back to back in table-number order, so locating any one
//! of them requires the row size of every table that precedes it. Row sizes
//! in turn depend on heap index widths and on the row counts that decide
//! whether simple and coded indices are two or four bytes wide. This module
//! carries the full ECMA-335 partition II schema for that reason, even though
//! the reader only ever looks inside a handful of tables.

use crate::error::{MetadataError, Result};
use crate::reader::{Cursor, read_index};

/// Number of table slots addressable by the `Valid` bit vector.
const TABLE_SLOTS: usize = 64;

const HEAP_STRINGS_WIDE: u8 = 0x01;
const HEAP_GUID_WIDE: u8 = 0x02;
const HEAP_BLOB_WIDE: u8 = 0x04;
const HEAP_EXTRA_DATA: u8 = 0x40;

/// Metadata table identifiers, numbered as in ECMA-335 §II.22.
#[expect(missing_docs, reason = "variant names are the ECMA-335 table names")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TableId {
    Module = 0x00,
    TypeRef = 0x01,
    TypeDef = 0x02,
    FieldPtr = 0x03,
    Field = 0x04,
    MethodPtr = 0x05,
    MethodDef = 0x06,
    ParamPtr = 0x07,
    Param = 0x08,
    InterfaceImpl = 0x09,
    MemberRef = 0x0A,
    Constant = 0x0B,
    CustomAttribute = 0x0C,
    FieldMarshal = 0x0D,
    DeclSecurity = 0x0E,
    ClassLayout = 0x0F,
    FieldLayout = 0x10,
    StandAloneSig = 0x11,
    EventMap = 0x12,
    EventPtr = 0x13,
    Event = 0x14,
    PropertyMap = 0x15,
    PropertyPtr = 0x16,
    Property = 0x17,
    MethodSemantics = 0x18,
    MethodImpl = 0x19,
    ModuleRef = 0x1A,
    TypeSpec = 0x1B,
    ImplMap = 0x1C,
    FieldRva = 0x1D,
    EncLog = 0x1E,
    EncMap = 0x1F,
    Assembly = 0x20,
    AssemblyProcessor = 0x21,
    AssemblyOs = 0x22,
    AssemblyRef = 0x23,
    AssemblyRefProcessor = 0x24,
    AssemblyRefOs = 0x25,
    File = 0x26,
    ExportedType = 0x27,
    ManifestResource = 0x28,
    NestedClass = 0x29,
    GenericParam = 0x2A,
    MethodSpec = 0x2B,
    GenericParamConstraint = 0x2C,
}

impl TableId {
    /// Every table with a known schema, in storage order.
    pub const ALL: [Self; 45] = [
        Self::Module,
        Self::TypeRef,
        Self::TypeDef,
        Self::FieldPtr,
        Self::Field,
        Self::MethodPtr,
        Self::MethodDef,
        Self::ParamPtr,
        Self::Param,
        Self::InterfaceImpl,
        Self::MemberRef,
        Self::Constant,
        Self::CustomAttribute,
        Self::FieldMarshal,
        Self::DeclSecurity,
        Self::ClassLayout,
        Self::FieldLayout,
        Self::StandAloneSig,
        Self::EventMap,
        Self::EventPtr,
        Self::Event,
        Self::PropertyMap,
        Self::PropertyPtr,
        Self::Property,
        Self::MethodSemantics,
        Self::MethodImpl,
        Self::ModuleRef,
        Self::TypeSpec,
        Self::ImplMap,
        Self::FieldRva,
        Self::EncLog,
        Self::EncMap,
        Self::Assembly,
        Self::AssemblyProcessor,
        Self::AssemblyOs,
        Self::AssemblyRef,
        Self::AssemblyRefProcessor,
        Self::AssemblyRefOs,
        Self::File,
        Self::ExportedType,
        Self::ManifestResource,
        Self::NestedClass,
        Self::GenericParam,
        Self::MethodSpec,
        Self::GenericParamConstraint,
    ];

    /// The table number used in tokens and in the `Valid` bit vector.
    #[must_use]
    pub const fn number(self) -> usize {
        self as usize
    }
}

/// Coded index kinds (§II.24.2.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CodedIndex {
    TypeDefOrRef,
    HasConstant,
    HasCustomAttribute,
    HasFieldMarshal,
    HasDeclSecurity,
    MemberRefParent,
    HasSemantics,
    MethodDefOrRef,
    MemberForwarded,
    Implementation,
    CustomAttributeType,
    ResolutionScope,
    TypeOrMethodDef,
}

impl CodedIndex {
    /// Candidate tables in tag order; `None` marks a reserved tag.
    fn tables(self) -> &'static [Option<TableId>] {
        use TableId as T;
        match self {
            Self::TypeDefOrRef => &[Some(T::TypeDef), Some(T::TypeRef), Some(T::TypeSpec)],
            Self::HasConstant => &[Some(T::Field), Some(T::Param), Some(T::Property)],
            Self::HasCustomAttribute => &[
                Some(T::MethodDef),
                Some(T::Field),
                Some(T::TypeRef),
                Some(T::TypeDef),
                Some(T::Param),
                Some(T::InterfaceImpl),
                Some(T::MemberRef),
                Some(T::Module),
                Some(T::DeclSecurity),
                Some(T::Property),
                Some(T::Event),
                Some(T::StandAloneSig),
                Some(T::ModuleRef),
                Some(T::TypeSpec),
                Some(T::Assembly),
                Some(T::AssemblyRef),
                Some(T::File),
                Some(T::ExportedType),
                Some(T::ManifestResource),
                Some(T::GenericParam),
                Some(T::GenericParamConstraint),
                Some(T::MethodSpec),
            ],
            Self::HasFieldMarshal => &[Some(T::Field), Some(T::Param)],
            Self::HasDeclSecurity => &[Some(T::TypeDef), Some(T::MethodDef), Some(T::Assembly)],
            Self::MemberRefParent => &[
                Some(T::TypeDef),
                Some(T::TypeRef),
                Some(T::ModuleRef),
                Some(T::MethodDef),
                Some(T::TypeSpec),
            ],
            Self::HasSemantics => &[Some(T::Event), Some(T::Property)],
            Self::MethodDefOrRef => &[Some(T::MethodDef), Some(T::MemberRef)],
            Self::MemberForwarded => &[Some(T::Field), Some(T::MethodDef)],
            Self::Implementation => &[Some(T::File), Some(T::AssemblyRef), Some(T::ExportedType)],
            Self::CustomAttributeType => &[
                None,
                None,
                Some(T::MethodDef),
                Some(T::MemberRef),
                None,
            ],
            Self::ResolutionScope => &[
                Some(T::Module),
                Some(T::ModuleRef),
                Some(T::AssemblyRef),
                Some(T::TypeRef),
            ],
            Self::TypeOrMethodDef => &[Some(T::TypeDef), Some(T::MethodDef)],
        }
    }

    /// Number of low bits holding the tag.
    fn tag_bits(self) -> u32 {
        match self {
            Self::HasFieldMarshal
            | Self::HasSemantics
            | Self::MethodDefOrRef
            | Self::MemberForwarded
            | Self::TypeOrMethodDef => 1,
            Self::TypeDefOrRef
            | Self::HasConstant
            | Self::HasDeclSecurity
            | Self::Implementation
            | Self::ResolutionScope => 2,
            Self::MemberRefParent | Self::CustomAttributeType => 3,
            Self::HasCustomAttribute => 5,
        }
    }

    /// Split a raw coded value into its target table and one-based row.
    ///
    /// Returns `None` for a reserved tag or a null (row zero) reference.
    pub(crate) fn decode(self, value: u32) -> Option<(TableId, u32)> {
        let bits = self.tag_bits();
        let tag = (value & ((1 << bits) - 1)) as usize;
        let row = value >> bits;
        let table = self.tables().get(tag).copied().flatten()?;
        (row != 0).then_some((table, row))
    }
}

/// Column kinds of the table schema.
#[derive(Debug, Clone, Copy)]
enum Column {
    Fixed(usize),
    Str,
    Guid,
    Blob,
    Index(TableId),
    Coded(CodedIndex),
}

fn schema(table: TableId) -> &'static [Column] {
    use CodedIndex as C;
    use Column::{Blob, Coded, Fixed, Guid, Index, Str};
    use TableId as T;
    match table {
        T::Module => &[Fixed(2), Str, Guid, Guid, Guid],
        T::TypeRef => &[Coded(C::ResolutionScope), Str, Str],
        T::TypeDef => &[
            Fixed(4),
            Str,
            Str,
            Coded(C::TypeDefOrRef),
            Index(T::Field),
            Index(T::MethodDef),
        ],
        T::FieldPtr => &[Index(T::Field)],
        T::Field => &[Fixed(2), Str, Blob],
        T::MethodPtr => &[Index(T::MethodDef)],
        T::MethodDef => &[Fixed(4), Fixed(2), Fixed(2), Str, Blob, Index(T::Param)],
        T::ParamPtr => &[Index(T::Param)],
        T::Param => &[Fixed(2), Fixed(2), Str],
        T::InterfaceImpl => &[Index(T::TypeDef), Coded(C::TypeDefOrRef)],
        T::MemberRef => &[Coded(C::MemberRefParent), Str, Blob],
        T::Constant => &[Fixed(2), Coded(C::HasConstant), Blob],
        T::CustomAttribute => &[
            Coded(C::HasCustomAttribute),
            Coded(C::CustomAttributeType),
            Blob,
        ],
        T::FieldMarshal => &[Coded(C::HasFieldMarshal), Blob],
        T::DeclSecurity => &[Fixed(2), Coded(C::HasDeclSecurity), Blob],
        T::ClassLayout => &[Fixed(2), Fixed(4), Index(T::TypeDef)],
        T::FieldLayout => &[Fixed(4), Index(T::Field)],
        T::StandAloneSig => &[Blob],
        T::EventMap => &[Index(T::TypeDef), Index(T::Event)],
        T::EventPtr => &[Index(T::Event)],
        T::Event => &[Fixed(2), Str, Coded(C::TypeDefOrRef)],
        T::PropertyMap => &[Index(T::TypeDef), Index(T::Property)],
        T::PropertyPtr => &[Index(T::Property)],
        T::Property => &[Fixed(2), Str, Blob],
        T::MethodSemantics => &[Fixed(2), Index(T::MethodDef), Coded(C::HasSemantics)],
        T::MethodImpl => &[
            Index(T::TypeDef),
            Coded(C::MethodDefOrRef),
            Coded(C::MethodDefOrRef),
        ],
        T::ModuleRef => &[Str],
        T::TypeSpec => &[Blob],
        T::ImplMap => &[Fixed(2), Coded(C::MemberForwarded), Str, Index(T::ModuleRef)],
        T::FieldRva => &[Fixed(4), Index(T::Field)],
        T::EncLog => &[Fixed(4), Fixed(4)],
        T::EncMap => &[Fixed(4)],
        T::Assembly => &[
            Fixed(4),
            Fixed(2),
            Fixed(2),
            Fixed(2),
            Fixed(2),
            Fixed(4),
            Blob,
            Str,
            Str,
        ],
        T::AssemblyProcessor => &[Fixed(4)],
        T::AssemblyOs => &[Fixed(4), Fixed(4), Fixed(4)],
        T::AssemblyRef => &[
            Fixed(2),
            Fixed(2),
            Fixed(2),
            Fixed(2),
            Fixed(4),
            Blob,
            Str,
            Str,
            Blob,
        ],
        T::AssemblyRefProcessor => &[Fixed(4), Index(T::AssemblyRef)],
        T::AssemblyRefOs => &[Fixed(4), Fixed(4), Fixed(4), Index(T::AssemblyRef)],
        T::File => &[Fixed(4), Str, Blob],
        T::ExportedType => &[Fixed(4), Fixed(4), Str, Str, Coded(C::Implementation)],
        T::ManifestResource => &[Fixed(4), Fixed(4), Str, Coded(C::Implementation)],
        T::NestedClass => &[Index(T::TypeDef), Index(T::TypeDef)],
        T::GenericParam => &[Fixed(2), Fixed(2), Coded(C::TypeOrMethodDef), Str],
        T::MethodSpec => &[Coded(C::MethodDefOrRef), Blob],
        T::GenericParamConstraint => &[Index(T::GenericParam), Coded(C::TypeDefOrRef)],
    }
}

#[derive(Debug, Clone)]
struct TableLayout {
    offset: usize,
    rows: u32,
    widths: Vec<usize>,
    row_size: usize,
}

/// Decoded `#~` stream header with per-table layouts.
#[derive(Debug, Clone)]
pub(crate) struct TableStream<'a> {
    data: &'a [u8],
    layouts: Vec<TableLayout>,
}

impl<'a> TableStream<'a> {
    pub(crate) fn parse(data: &'a [u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data, 4);
        let _major = cursor.u8()?;
        let _minor = cursor.u8()?;
        let heap_sizes = cursor.u8()?;
        let _reserved = cursor.u8()?;
        let valid = cursor.u64()?;
        let _sorted = cursor.u64()?;

        let mut row_counts = [0u32; TABLE_SLOTS];
        for (slot, count) in row_counts.iter_mut().enumerate() {
            if valid & (1u64 << slot) != 0 {
                *count = cursor.u32()?;
            }
        }
        if heap_sizes & HEAP_EXTRA_DATA != 0 {
            cursor.u32()?;
        }

        let widths = IndexWidths {
            heap_sizes,
            row_counts: &row_counts,
        };
        let mut offset = cursor.position();
        let mut layouts = Vec::with_capacity(TableId::ALL.len());
        for table in TableId::ALL {
            let column_widths: Vec<usize> = schema(table)
                .iter()
                .map(|column| widths.column(*column))
                .collect();
            let row_size = column_widths.iter().sum();
            let rows = row_counts[table.number()];
            layouts.push(TableLayout {
                offset,
                rows,
                widths: column_widths,
                row_size,
            });
            offset = offset.saturating_add(row_size.saturating_mul(rows as usize));
        }

        Ok(Self { data, layouts })
    }

    /// Number of rows present in `table`.
    pub(crate) fn row_count(&self, table: TableId) -> u32 {
        self.layouts
            .get(table.number())
            .map_or(0, |layout| layout.rows)
    }

    /// Read one column of a one-based row.
    pub(crate) fn cell(&self, table: TableId, row: u32, column: usize) -> Result<u32> {
        let layout = self
            .layouts
            .get(table.number())
            .ok_or(MetadataError::RowOutOfRange {
                table,
                row,
                rows: 0,
            })?;
        if row == 0 || row > layout.rows {
            return Err(MetadataError::RowOutOfRange {
                table,
                row,
                rows: layout.rows,
            });
        }
        let row_start = layout.offset + (row as usize - 1) * layout.row_size;
        let column_start: usize = layout.widths.iter().take(column).sum();
        let width = layout.widths.get(column).copied().unwrap_or(4);
        read_index(self.data, row_start + column_start, width)
    }
}

struct IndexWidths<'r> {
    heap_sizes: u8,
    row_counts: &'r [u32; TABLE_SLOTS],
}

impl IndexWidths<'_> {
    fn column(&self, column: Column) -> usize {
        match column {
            Column::Fixed(width) => width,
            Column::Str => self.heap(HEAP_STRINGS_WIDE),
            Column::Guid => self.heap(HEAP_GUID_WIDE),
            Column::Blob => self.heap(HEAP_BLOB_WIDE),
            Column::Index(table) => {
                if self.row_counts[table.number()] < (1 << 16) {
                    2
                } else {
                    4
                }
            }
            Column::Coded(coded) => {
                let largest = coded
                    .tables()
                    .iter()
                    .flatten()
                    .map(|table| self.row_counts[table.number()])
                    .max()
                    .unwrap_or(0);
                if largest < (1 << (16 - coded.tag_bits())) {
                    2
                } else {
                    4
                }
            }
        }
    }

    const fn heap(&self, flag: u8) -> usize {
        if self.heap_sizes & flag == 0 { 2 } else { 4 }
    }
}
