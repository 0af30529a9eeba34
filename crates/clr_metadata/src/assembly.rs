//! Typed navigation over a parsed assembly.

use log::trace;

use crate::error::{MetadataError, Result};
use crate::heaps::{StringHeap, UserStringHeap};
use crate::il;
use crate::pe::PeImage;
use crate::reader::{Cursor, read_u32};
use crate::tables::{CodedIndex, TableId, TableStream};

const METADATA_SIGNATURE: u32 = 0x424A_5342;
const SEMANTICS_GETTER: u32 = 0x0002;

// Column positions within the rows this module reads.
const TYPEDEF_NAME: usize = 1;
const TYPEDEF_NAMESPACE: usize = 2;
const TYPEDEF_EXTENDS: usize = 3;
const TYPEREF_NAME: usize = 1;
const TYPEREF_NAMESPACE: usize = 2;
const METHOD_RVA: usize = 0;
const METHOD_NAME: usize = 3;
const PROPERTY_NAME: usize = 1;
const PROPERTY_MAP_PARENT: usize = 0;
const PROPERTY_MAP_LIST: usize = 1;
const SEMANTICS_FLAGS: usize = 0;
const SEMANTICS_METHOD: usize = 1;
const SEMANTICS_ASSOCIATION: usize = 2;

/// A namespace-qualified type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeName<'a> {
    /// Namespace, empty for the global namespace.
    pub namespace: &'a str,
    /// Simple name.
    pub name: &'a str,
}

/// A row of the `TypeDef` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeDefinition<'a> {
    /// One-based row in the `TypeDef` table.
    pub row: u32,
    /// The type's own name.
    pub name: TypeName<'a>,
    /// The type named by `Extends`, when it is a `TypeDef` or `TypeRef`.
    pub base_type: Option<TypeName<'a>>,
}

/// A row of the `Property` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyDefinition<'a> {
    /// One-based row in the `Property` table.
    pub row: u32,
    /// Property name.
    pub name: &'a str,
}

/// A row of the `MethodDef` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDefinition<'a> {
    /// One-based row in the `MethodDef` table.
    pub row: u32,
    /// Method name.
    pub name: &'a str,
    /// RVA of the method body, zero for abstract or extern methods.
    pub rva: u32,
}

/// A CLI assembly image borrowed from memory.
///
/// Parsing validates the PE headers, the metadata root and the table stream
/// header eagerly. Rows and heap entries are decoded lazily, and every
/// lookup is bounds checked, so a corrupt image surfaces as a
/// [`MetadataError`] from whichever accessor first touches the bad region.
///
/// # Examples
///
/// ```
/// use clr_metadata::Assembly;
///
/// let err = Assembly::parse(b"plain text").unwrap_err();
/// assert!(err.to_string().starts_with("not a PE image"));
/// ```
#[derive(Debug, Clone)]
pub struct Assembly<'a> {
    image: PeImage<'a>,
    tables: TableStream<'a>,
    strings: StringHeap<'a>,
    user_strings: UserStringHeap<'a>,
}

impl<'a> Assembly<'a> {
    /// Parse the headers and metadata streams of an assembly image.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError`] when the bytes are not a CLI image or when
    /// its metadata root or stream headers are malformed.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let image = PeImage::parse(bytes)?;
        let metadata = image.metadata()?;
        let streams = Streams::parse(metadata)?;
        let table_data = streams.tables.ok_or(MetadataError::MissingStream { name: "#~" })?;
        let strings = streams
            .strings
            .ok_or(MetadataError::MissingStream { name: "#Strings" })?;
        let tables = TableStream::parse(table_data)?;
        trace!(
            "parsed metadata: {} types, {} methods, {} properties",
            tables.row_count(TableId::TypeDef),
            tables.row_count(TableId::MethodDef),
            tables.row_count(TableId::Property),
        );
        Ok(Self {
            image,
            tables,
            strings: StringHeap(strings),
            user_strings: UserStringHeap(streams.user_strings.unwrap_or_default()),
        })
    }

    /// Every type defined in the assembly, in table order.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError`] if a row or name cannot be decoded.
    pub fn type_definitions(&self) -> Result<Vec<TypeDefinition<'a>>> {
        (1..=self.tables.row_count(TableId::TypeDef))
            .map(|row| self.type_definition(row))
            .collect()
    }

    fn type_definition(&self, row: u32) -> Result<TypeDefinition<'a>> {
        let name = self.type_def_name(row)?;
        let extends = self.tables.cell(TableId::TypeDef, row, TYPEDEF_EXTENDS)?;
        let base_type = match CodedIndex::TypeDefOrRef.decode(extends) {
            Some((TableId::TypeDef, base)) => Some(self.type_def_name(base)?),
            Some((TableId::TypeRef, base)) => Some(TypeName {
                namespace: self.string(TableId::TypeRef, base, TYPEREF_NAMESPACE)?,
                name: self.string(TableId::TypeRef, base, TYPEREF_NAME)?,
            }),
            _ => None,
        };
        Ok(TypeDefinition {
            row,
            name,
            base_type,
        })
    }

    fn type_def_name(&self, row: u32) -> Result<TypeName<'a>> {
        Ok(TypeName {
            namespace: self.string(TableId::TypeDef, row, TYPEDEF_NAMESPACE)?,
            name: self.string(TableId::TypeDef, row, TYPEDEF_NAME)?,
        })
    }

    /// Properties declared by `owner`, found through its `PropertyMap` row.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError`] if the property map or a property row is
    /// malformed.
    pub fn properties(&self, owner: &TypeDefinition<'_>) -> Result<Vec<PropertyDefinition<'a>>> {
        let map_rows = self.tables.row_count(TableId::PropertyMap);
        let property_rows = self.tables.row_count(TableId::Property);
        let mut found = None;
        for map_row in 1..=map_rows {
            if self
                .tables
                .cell(TableId::PropertyMap, map_row, PROPERTY_MAP_PARENT)?
                == owner.row
            {
                found = Some(map_row);
                break;
            }
        }
        let Some(map_row) = found else {
            return Ok(Vec::new());
        };

        let first = self
            .tables
            .cell(TableId::PropertyMap, map_row, PROPERTY_MAP_LIST)?;
        let end = if map_row < map_rows {
            self.tables
                .cell(TableId::PropertyMap, map_row + 1, PROPERTY_MAP_LIST)?
        } else {
            property_rows + 1
        };

        (first..end.min(property_rows + 1))
            .map(|slot| {
                let row = self.property_row(slot)?;
                Ok(PropertyDefinition {
                    row,
                    name: self.string(TableId::Property, row, PROPERTY_NAME)?,
                })
            })
            .collect()
    }

    /// Resolve a property list slot through `PropertyPtr` when the
    /// uncompressed table layout is in use.
    fn property_row(&self, slot: u32) -> Result<u32> {
        if self.tables.row_count(TableId::PropertyPtr) == 0 {
            Ok(slot)
        } else {
            self.tables.cell(TableId::PropertyPtr, slot, 0)
        }
    }

    /// The getter of `property`, if `MethodSemantics` declares one.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError`] if a semantics or method row is malformed.
    pub fn getter(&self, property: &PropertyDefinition<'_>) -> Result<Option<MethodDefinition<'a>>> {
        for row in 1..=self.tables.row_count(TableId::MethodSemantics) {
            let flags = self
                .tables
                .cell(TableId::MethodSemantics, row, SEMANTICS_FLAGS)?;
            if flags & SEMANTICS_GETTER == 0 {
                continue;
            }
            let association = self
                .tables
                .cell(TableId::MethodSemantics, row, SEMANTICS_ASSOCIATION)?;
            if CodedIndex::HasSemantics.decode(association) != Some((TableId::Property, property.row)) {
                continue;
            }
            let method = self
                .tables
                .cell(TableId::MethodSemantics, row, SEMANTICS_METHOD)?;
            return self.method_definition(method).map(Some);
        }
        Ok(None)
    }

    fn method_definition(&self, row: u32) -> Result<MethodDefinition<'a>> {
        Ok(MethodDefinition {
            row,
            name: self.string(TableId::MethodDef, row, METHOD_NAME)?,
            rva: self.tables.cell(TableId::MethodDef, row, METHOD_RVA)?,
        })
    }

    /// String literals loaded by `ldstr` in the method's body, in
    /// instruction order. A method without a body has none.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError`] if the body, its IL or a referenced user
    /// string is malformed.
    pub fn string_literals(&self, method: &MethodDefinition<'_>) -> Result<Vec<String>> {
        if method.rva == 0 {
            return Ok(Vec::new());
        }
        let body = self.image.data_at(method.rva)?;
        let code = il::method_code(body)?;
        il::user_string_offsets(code)?
            .into_iter()
            .map(|offset| self.user_strings.get(offset))
            .collect()
    }

    /// Literals of the getter of the first property named `property` on any
    /// type whose direct base type is called `base_type`.
    ///
    /// Returns `Ok(None)` when no such type, property or getter exists.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError`] if any structure on the way is malformed.
    pub fn property_getter_literals(
        &self,
        base_type: &str,
        property: &str,
    ) -> Result<Option<Vec<String>>> {
        for ty in self.type_definitions()? {
            if ty.base_type.map(|base| base.name) != Some(base_type) {
                continue;
            }
            trace!("type {}.{} derives from {base_type}", ty.name.namespace, ty.name.name);
            let Some(found) = self
                .properties(&ty)?
                .into_iter()
                .find(|candidate| candidate.name == property)
            else {
                continue;
            };
            return match self.getter(&found)? {
                Some(getter) => self.string_literals(&getter).map(Some),
                None => Ok(None),
            };
        }
        Ok(None)
    }

    fn string(&self, table: TableId, row: u32, column: usize) -> Result<&'a str> {
        let index = self.tables.cell(table, row, column)?;
        self.strings.get(index)
    }
}

/// The streams named in the metadata root.
#[derive(Debug, Default)]
struct Streams<'a> {
    tables: Option<&'a [u8]>,
    strings: Option<&'a [u8]>,
    user_strings: Option<&'a [u8]>,
}

impl<'a> Streams<'a> {
    fn parse(metadata: &'a [u8]) -> Result<Self> {
        let signature = read_u32(metadata, 0)?;
        if signature != METADATA_SIGNATURE {
            return Err(MetadataError::BadMetadataSignature { found: signature });
        }
        let version_len = read_u32(metadata, 12)? as usize;
        let mut cursor = Cursor::new(metadata, 16);
        cursor.take(version_len)?;
        let _flags = cursor.u16()?;
        let count = cursor.u16()?;

        let mut streams = Self::default();
        for _ in 0..count {
            let offset = cursor.u32()? as usize;
            let size = cursor.u32()? as usize;
            let name = cursor.padded_name()?;
            let data = crate::reader::slice(metadata, offset, size)?;
            match name {
                b"#~" | b"#-" => streams.tables = Some(data),
                b"#Strings" => streams.strings = Some(data),
                b"#US" => streams.user_strings = Some(data),
                _ => {}
            }
        }
        Ok(streams)
    }
}
