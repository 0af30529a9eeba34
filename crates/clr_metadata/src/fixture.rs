//! Synthetic assembly images for tests.
//!
//! [`AssemblyBuilder`] emits a minimal but well-formed PE32 (or PE32+) image
//! with a single `.text` section holding the CLI header, method bodies and a
//! metadata root with the five standard streams. Only the tables the reader
//! navigates are populated.

use std::collections::HashMap;

const FILE_ALIGNMENT: usize = 0x200;
const TEXT_RVA: u32 = 0x2000;
const DOS_HEADER_LEN: usize = 0x80;
const CLI_HEADER_LEN: usize = 72;
const METADATA_VERSION: &[u8] = b"v4.0.30319\0\0";

const TYPE_FLAGS: u32 = 0x0010_0001;
const GETTER_FLAGS: u16 = 0x0886;
const SEMANTICS_GETTER: u16 = 0x0002;

const PROPERTY_SIGNATURE: &[u8] = &[0x28, 0x00, 0x0E];
const GETTER_SIGNATURE: &[u8] = &[0x20, 0x00, 0x0E];

const TABLE_MODULE: u32 = 0x00;
const TABLE_TYPEREF: u32 = 0x01;
const TABLE_TYPEDEF: u32 = 0x02;
const TABLE_METHODDEF: u32 = 0x06;
const TABLE_PROPERTYMAP: u32 = 0x15;
const TABLE_PROPERTY: u32 = 0x17;
const TABLE_METHODSEMANTICS: u32 = 0x18;

/// One IL instruction of a fixture method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// `ldstr` of a literal interned into `#US`.
    Ldstr(String),
    /// A single-byte opcode without operand.
    Op(u8),
    /// Raw bytes copied into the body unchanged.
    Raw(Vec<u8>),
}

impl Instruction {
    /// `pop`
    pub const POP: Self = Self::Op(0x26);
    /// `ret`
    pub const RET: Self = Self::Op(0x2A);
}

/// The getter attached to a fixture property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Getter {
    /// A getter with an IL body.
    Body(Vec<Instruction>),
    /// Same as [`Getter::Body`] but always encoded with a fat header.
    FatBody(Vec<Instruction>),
    /// A getter method whose RVA is zero.
    Abstract,
    /// No getter method or semantics row at all.
    Missing,
}

/// A property declared on a fixture type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyFixture {
    name: String,
    getter: Getter,
}

impl PropertyFixture {
    /// Property with an explicit getter.
    #[must_use]
    pub fn new(name: impl Into<String>, getter: Getter) -> Self {
        Self {
            name: name.into(),
            getter,
        }
    }

    /// Property whose getter is `ldstr literal; ret`.
    #[must_use]
    pub fn returning(name: impl Into<String>, literal: impl Into<String>) -> Self {
        Self::new(
            name,
            Getter::Body(vec![Instruction::Ldstr(literal.into()), Instruction::RET]),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BaseType {
    None,
    External { namespace: String, name: String },
    Local(String),
}

/// A type definition in a fixture assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeFixture {
    namespace: String,
    name: String,
    base: BaseType,
    properties: Vec<PropertyFixture>,
}

impl TypeFixture {
    /// A type with no base type and no properties.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            base: BaseType::None,
            properties: Vec::new(),
        }
    }

    /// Derive from a type referenced through `TypeRef`.
    #[must_use]
    pub fn extends(mut self, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        self.base = BaseType::External {
            namespace: namespace.into(),
            name: name.into(),
        };
        self
    }

    /// Derive from another fixture type, looked up by simple name.
    #[must_use]
    pub fn extends_local(mut self, name: impl Into<String>) -> Self {
        self.base = BaseType::Local(name.into());
        self
    }

    /// Append a property.
    #[must_use]
    pub fn with_property(mut self, property: PropertyFixture) -> Self {
        self.properties.push(property);
        self
    }
}

/// Builder for synthetic assembly images.
#[derive(Debug, Clone, Default)]
pub struct AssemblyBuilder {
    types: Vec<TypeFixture>,
    pe32_plus: bool,
    wide_heaps: bool,
}

impl AssemblyBuilder {
    /// An assembly containing only the `<Module>` type.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a type definition.
    #[must_use]
    pub fn with_type(mut self, ty: TypeFixture) -> Self {
        self.types.push(ty);
        self
    }

    /// Emit a PE32+ optional header instead of PE32.
    #[must_use]
    pub const fn pe32_plus(mut self) -> Self {
        self.pe32_plus = true;
        self
    }

    /// Store every heap index in four bytes.
    #[must_use]
    pub const fn wide_heaps(mut self) -> Self {
        self.wide_heaps = true;
        self
    }

    /// Serialise the image.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let mut heaps = Heaps::new(self.wide_heaps);
        let mut bodies = Vec::new();
        let method_rvas = self.encode_bodies(&mut heaps, &mut bodies);

        let text_metadata_offset = (CLI_HEADER_LEN + bodies.len()).next_multiple_of(4);
        let tables = self.encode_tables(&mut heaps, &method_rvas);
        let metadata = heaps.into_metadata(&tables);

        let mut text = Vec::new();
        put_u32(&mut text, CLI_HEADER_LEN as u32);
        put_u16(&mut text, 2);
        put_u16(&mut text, 5);
        put_u32(&mut text, TEXT_RVA + text_metadata_offset as u32);
        put_u32(&mut text, metadata.len() as u32);
        put_u32(&mut text, 1);
        text.resize(CLI_HEADER_LEN, 0);
        text.extend_from_slice(&bodies);
        text.resize(text_metadata_offset, 0);
        text.extend_from_slice(&metadata);

        self.wrap_in_pe(&text)
    }

    /// Emit getter bodies, returning the RVA of each getter in declaration
    /// order (zero for abstract getters, absent for missing ones).
    fn encode_bodies(&self, heaps: &mut Heaps, bodies: &mut Vec<u8>) -> Vec<Option<u32>> {
        let mut rvas = Vec::new();
        for property in self.types.iter().flat_map(|ty| &ty.properties) {
            let (instructions, fat) = match &property.getter {
                Getter::Body(instructions) => (instructions, false),
                Getter::FatBody(instructions) => (instructions, true),
                Getter::Abstract => {
                    rvas.push(Some(0));
                    continue;
                }
                Getter::Missing => {
                    rvas.push(None);
                    continue;
                }
            };
            let mut code = Vec::new();
            for instruction in instructions {
                match instruction {
                    Instruction::Ldstr(literal) => {
                        code.push(0x72);
                        put_u32(&mut code, 0x7000_0000 | heaps.user_string(literal));
                    }
                    Instruction::Op(opcode) => code.push(*opcode),
                    Instruction::Raw(raw) => code.extend_from_slice(raw),
                }
            }
            bodies.resize(bodies.len().next_multiple_of(4), 0);
            rvas.push(Some(TEXT_RVA + (CLI_HEADER_LEN + bodies.len()) as u32));
            if fat || code.len() >= 64 {
                put_u16(bodies, 0x3013);
                put_u16(bodies, 8);
                put_u32(bodies, code.len() as u32);
                put_u32(bodies, 0);
            } else {
                bodies.push(((code.len() as u8) << 2) | 0x2);
            }
            bodies.extend_from_slice(&code);
        }
        rvas
    }

    fn encode_tables(&self, heaps: &mut Heaps, method_rvas: &[Option<u32>]) -> Vec<u8> {
        let mut type_refs: Vec<(String, String)> = Vec::new();
        let mut module = Vec::new();
        let mut type_ref_rows = Vec::new();
        let mut type_def_rows = Vec::new();
        let mut method_rows = Vec::new();
        let mut map_rows = Vec::new();
        let mut property_rows = Vec::new();
        let mut semantics_rows = Vec::new();

        let mvid = heaps.guid();
        put_u16(&mut module, 0);
        heaps.put_string(&mut module, "Fixture.dll");
        heaps.put_index(&mut module, mvid);
        heaps.put_index(&mut module, 0);
        heaps.put_index(&mut module, 0);

        let local_rows: HashMap<&str, u32> = self
            .types
            .iter()
            .enumerate()
            .map(|(index, ty)| (ty.name.as_str(), index as u32 + 2))
            .collect();

        let mut module_type = Vec::new();
        put_u32(&mut module_type, 0);
        heaps.put_string(&mut module_type, "<Module>");
        heaps.put_string(&mut module_type, "");
        put_u16(&mut module_type, 0);
        put_u16(&mut module_type, 1);
        put_u16(&mut module_type, 1);
        type_def_rows.push(module_type);

        let mut next_method = 1u32;
        let mut next_property = 1u32;
        let mut rvas = method_rvas.iter();
        for (index, ty) in self.types.iter().enumerate() {
            let type_row = index as u32 + 2;
            let extends = match &ty.base {
                BaseType::None => 0,
                BaseType::Local(name) => local_rows.get(name.as_str()).map_or(0, |row| row << 2),
                BaseType::External { namespace, name } => {
                    let key = (namespace.clone(), name.clone());
                    let row = match type_refs.iter().position(|known| *known == key) {
                        Some(position) => position as u32 + 1,
                        None => {
                            type_refs.push(key);
                            let mut row = Vec::new();
                            put_u16(&mut row, 0);
                            heaps.put_string(&mut row, name);
                            heaps.put_string(&mut row, namespace);
                            type_ref_rows.push(row);
                            type_refs.len() as u32
                        }
                    };
                    (row << 2) | 1
                }
            };

            let mut row = Vec::new();
            put_u32(&mut row, TYPE_FLAGS);
            heaps.put_string(&mut row, &ty.name);
            heaps.put_string(&mut row, &ty.namespace);
            put_u16(&mut row, extends as u16);
            put_u16(&mut row, 1);
            put_u16(&mut row, next_method as u16);
            type_def_rows.push(row);

            if !ty.properties.is_empty() {
                let mut map = Vec::new();
                put_u16(&mut map, type_row as u16);
                put_u16(&mut map, next_property as u16);
                map_rows.push(map);
            }

            for property in &ty.properties {
                let mut prop = Vec::new();
                put_u16(&mut prop, 0);
                heaps.put_string(&mut prop, &property.name);
                heaps.put_blob(&mut prop, PROPERTY_SIGNATURE);
                property_rows.push(prop);

                if let Some(rva) = rvas.next().copied().flatten() {
                    let mut method = Vec::new();
                    put_u32(&mut method, rva);
                    put_u16(&mut method, 0);
                    put_u16(&mut method, GETTER_FLAGS);
                    heaps.put_string(&mut method, &format!("get_{}", property.name));
                    heaps.put_blob(&mut method, GETTER_SIGNATURE);
                    put_u16(&mut method, 1);
                    method_rows.push(method);

                    let mut semantics = Vec::new();
                    put_u16(&mut semantics, SEMANTICS_GETTER);
                    put_u16(&mut semantics, next_method as u16);
                    put_u16(&mut semantics, ((next_property << 1) | 1) as u16);
                    semantics_rows.push(semantics);
                    next_method += 1;
                }
                next_property += 1;
            }
        }

        let tables: [(u32, Vec<Vec<u8>>); 7] = [
            (TABLE_MODULE, vec![module]),
            (TABLE_TYPEREF, type_ref_rows),
            (TABLE_TYPEDEF, type_def_rows),
            (TABLE_METHODDEF, method_rows),
            (TABLE_PROPERTYMAP, map_rows),
            (TABLE_PROPERTY, property_rows),
            (TABLE_METHODSEMANTICS, semantics_rows),
        ];

        let mut stream = Vec::new();
        put_u32(&mut stream, 0);
        stream.push(2);
        stream.push(0);
        stream.push(if self.wide_heaps { 0x07 } else { 0x00 });
        stream.push(1);
        let valid = tables
            .iter()
            .filter(|(_, rows)| !rows.is_empty())
            .fold(0u64, |bits, (number, _)| bits | (1u64 << number));
        put_u64(&mut stream, valid);
        put_u64(&mut stream, 0);
        for (_, rows) in tables.iter().filter(|(_, rows)| !rows.is_empty()) {
            put_u32(&mut stream, rows.len() as u32);
        }
        for (_, rows) in &tables {
            for row in rows {
                stream.extend_from_slice(row);
            }
        }
        stream.resize(stream.len().next_multiple_of(4), 0);
        stream
    }

    fn wrap_in_pe(&self, text: &[u8]) -> Vec<u8> {
        let optional_len: u16 = if self.pe32_plus { 240 } else { 224 };
        let mut image = vec![0u8; DOS_HEADER_LEN];
        image[0] = b'M';
        image[1] = b'Z';
        image[0x3C..0x40].copy_from_slice(&(DOS_HEADER_LEN as u32).to_le_bytes());
        image.extend_from_slice(b"PE\0\0");

        put_u16(&mut image, 0x014C);
        put_u16(&mut image, 1);
        put_u32(&mut image, 0);
        put_u32(&mut image, 0);
        put_u32(&mut image, 0);
        put_u16(&mut image, optional_len);
        put_u16(&mut image, 0x2102);

        let optional_start = image.len();
        let raw_size = text.len().next_multiple_of(FILE_ALIGNMENT);
        image.resize(optional_start + usize::from(optional_len), 0);
        let optional = &mut image[optional_start..];
        let (magic, count_offset, directories_offset) = if self.pe32_plus {
            (0x20Bu16, 108, 112)
        } else {
            (0x10Bu16, 92, 96)
        };
        optional[0..2].copy_from_slice(&magic.to_le_bytes());
        optional[32..36].copy_from_slice(&TEXT_RVA.to_le_bytes());
        optional[36..40].copy_from_slice(&(FILE_ALIGNMENT as u32).to_le_bytes());
        optional[56..60].copy_from_slice(&(TEXT_RVA + raw_size as u32).to_le_bytes());
        optional[60..64].copy_from_slice(&(FILE_ALIGNMENT as u32).to_le_bytes());
        optional[count_offset..count_offset + 4].copy_from_slice(&16u32.to_le_bytes());
        let cli = directories_offset + 14 * 8;
        optional[cli..cli + 4].copy_from_slice(&TEXT_RVA.to_le_bytes());
        optional[cli + 4..cli + 8].copy_from_slice(&(CLI_HEADER_LEN as u32).to_le_bytes());

        image.extend_from_slice(b".text\0\0\0");
        put_u32(&mut image, text.len() as u32);
        put_u32(&mut image, TEXT_RVA);
        put_u32(&mut image, raw_size as u32);
        put_u32(&mut image, FILE_ALIGNMENT as u32);
        image.extend_from_slice(&[0u8; 12]);
        put_u32(&mut image, 0x6000_0020);

        image.resize(FILE_ALIGNMENT, 0);
        image.extend_from_slice(text);
        image.resize(FILE_ALIGNMENT + raw_size, 0);
        image
    }
}

/// A single-type assembly whose `ResoniteMod` subclass returns `link` from
/// its `Link` getter.
#[must_use]
pub fn mod_assembly(link: &str) -> Vec<u8> {
    AssemblyBuilder::new()
        .with_type(
            TypeFixture::new("ExampleMod", "ExampleMod")
                .extends("ResoniteModLoader", "ResoniteMod")
                .with_property(PropertyFixture::returning("Name", "ExampleMod"))
                .with_property(PropertyFixture::returning("Author", "someone"))
                .with_property(PropertyFixture::returning("Version", "1.0.0"))
                .with_property(PropertyFixture::returning("Link", link)),
        )
        .build()
}

struct Heaps {
    wide: bool,
    strings: Vec<u8>,
    interned: HashMap<String, u32>,
    user_strings: Vec<u8>,
    guids: Vec<u8>,
    blobs: Vec<u8>,
}

impl Heaps {
    fn new(wide: bool) -> Self {
        Self {
            wide,
            strings: vec![0],
            interned: HashMap::new(),
            user_strings: vec![0],
            guids: Vec::new(),
            blobs: vec![0],
        }
    }

    fn put_index(&self, out: &mut Vec<u8>, index: u32) {
        if self.wide {
            put_u32(out, index);
        } else {
            put_u16(out, index as u16);
        }
    }

    fn put_string(&mut self, out: &mut Vec<u8>, value: &str) {
        let index = if value.is_empty() {
            0
        } else if let Some(index) = self.interned.get(value) {
            *index
        } else {
            let index = self.strings.len() as u32;
            self.strings.extend_from_slice(value.as_bytes());
            self.strings.push(0);
            self.interned.insert(value.to_owned(), index);
            index
        };
        self.put_index(out, index);
    }

    fn put_blob(&mut self, out: &mut Vec<u8>, value: &[u8]) {
        let index = self.blobs.len() as u32;
        put_compressed(&mut self.blobs, value.len());
        self.blobs.extend_from_slice(value);
        self.put_index(out, index);
    }

    fn guid(&mut self) -> u32 {
        self.guids.extend_from_slice(&[0x5A; 16]);
        (self.guids.len() / 16) as u32
    }

    fn user_string(&mut self, value: &str) -> u32 {
        let offset = self.user_strings.len() as u32;
        let units: Vec<u16> = value.encode_utf16().collect();
        put_compressed(&mut self.user_strings, units.len() * 2 + 1);
        for unit in units {
            put_u16(&mut self.user_strings, unit);
        }
        self.user_strings.push(0);
        offset
    }

    fn into_metadata(self, tables: &[u8]) -> Vec<u8> {
        let mut streams: Vec<(&[u8], Vec<u8>)> = vec![
            (&b"#~"[..], tables.to_vec()),
            (&b"#Strings"[..], self.strings),
            (&b"#US"[..], self.user_strings),
            (&b"#GUID"[..], self.guids),
            (&b"#Blob"[..], self.blobs),
        ];
        for (_, data) in &mut streams {
            data.resize(data.len().next_multiple_of(4), 0);
        }

        let header_len = 16
            + METADATA_VERSION.len()
            + 4
            + streams
                .iter()
                .map(|(name, _)| 8 + (name.len() + 1).next_multiple_of(4))
                .sum::<usize>();

        let mut root = Vec::new();
        put_u32(&mut root, 0x424A_5342);
        put_u16(&mut root, 1);
        put_u16(&mut root, 1);
        put_u32(&mut root, 0);
        put_u32(&mut root, METADATA_VERSION.len() as u32);
        root.extend_from_slice(METADATA_VERSION);
        put_u16(&mut root, 0);
        put_u16(&mut root, streams.len() as u16);

        let mut offset = header_len;
        for (name, data) in &streams {
            put_u32(&mut root, offset as u32);
            put_u32(&mut root, data.len() as u32);
            root.extend_from_slice(name);
            let padded = (name.len() + 1).next_multiple_of(4);
            root.resize(root.len() + padded - name.len(), 0);
            offset += data.len();
        }
        for (_, data) in &streams {
            root.extend_from_slice(data);
        }
        root
    }
}

fn put_compressed(out: &mut Vec<u8>, value: usize) {
    if value < 0x80 {
        out.push(value as u8);
    } else if value < 0x4000 {
        out.push(0x80 | (value >> 8) as u8);
        out.push(value as u8);
    } else {
        out.extend_from_slice(&((value as u32) | 0xC000_0000).to_be_bytes());
    }
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}
