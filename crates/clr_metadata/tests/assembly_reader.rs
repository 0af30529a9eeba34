//! Reads synthetic assemblies end to end through the public API.

use clr_metadata::fixture::{
    AssemblyBuilder, Getter, Instruction, PropertyFixture, TypeFixture, mod_assembly,
};
use clr_metadata::{Assembly, MetadataError};
use rstest::rstest;

const LINK: &str = "https://github.com/acme/foo";

fn link_type(getter: Getter) -> TypeFixture {
    TypeFixture::new("Acme", "FooMod")
        .extends("ResoniteModLoader", "ResoniteMod")
        .with_property(PropertyFixture::new("Link", getter))
}

fn link_literals(bytes: &[u8]) -> Result<Option<Vec<String>>, MetadataError> {
    Assembly::parse(bytes)?.property_getter_literals("ResoniteMod", "Link")
}

#[test]
fn reads_link_from_mod_assembly() {
    let bytes = mod_assembly(LINK);
    assert_eq!(link_literals(&bytes), Ok(Some(vec![LINK.to_owned()])));
}

#[rstest]
#[case::pe32(AssemblyBuilder::new())]
#[case::pe32_plus(AssemblyBuilder::new().pe32_plus())]
#[case::wide_heaps(AssemblyBuilder::new().wide_heaps())]
#[case::both(AssemblyBuilder::new().pe32_plus().wide_heaps())]
fn header_and_heap_variants_decode(#[case] builder: AssemblyBuilder) {
    let bytes = builder
        .with_type(link_type(Getter::Body(vec![
            Instruction::Ldstr(LINK.into()),
            Instruction::RET,
        ])))
        .build();
    assert_eq!(link_literals(&bytes), Ok(Some(vec![LINK.to_owned()])));
}

#[test]
fn fat_method_header_is_decoded() {
    let bytes = AssemblyBuilder::new()
        .with_type(link_type(Getter::FatBody(vec![
            Instruction::Ldstr(LINK.into()),
            Instruction::RET,
        ])))
        .build();
    assert_eq!(link_literals(&bytes), Ok(Some(vec![LINK.to_owned()])));
}

#[test]
fn long_body_uses_fat_header_and_skips_branch_operands() {
    let mut body = vec![Instruction::Raw(vec![0x16, 0x2D, 0x00])]; // ldc.i4.0; brtrue.s +0
    body.extend((0..30).map(|_| Instruction::Raw(vec![0x00, 0x00])));
    body.push(Instruction::Raw(vec![0xFE, 0x0C, 0x00, 0x00])); // ldloc 0
    body.push(Instruction::POP);
    body.push(Instruction::Ldstr("https://github.com/acme/long".into()));
    body.push(Instruction::RET);
    let bytes = AssemblyBuilder::new().with_type(link_type(Getter::Body(body))).build();
    assert_eq!(
        link_literals(&bytes),
        Ok(Some(vec!["https://github.com/acme/long".to_owned()]))
    );
}

#[test]
fn non_ascii_literals_survive() {
    let bytes = mod_assembly("https://github.com/acme/caf\u{e9}");
    assert_eq!(
        link_literals(&bytes),
        Ok(Some(vec!["https://github.com/acme/caf\u{e9}".to_owned()]))
    );
}

#[test]
fn first_deriving_type_with_link_wins() {
    let bytes = AssemblyBuilder::new()
        .with_type(
            TypeFixture::new("Acme", "NoLink")
                .extends("ResoniteModLoader", "ResoniteMod")
                .with_property(PropertyFixture::returning("Name", "x")),
        )
        .with_type(
            TypeFixture::new("Acme", "First")
                .extends("ResoniteModLoader", "ResoniteMod")
                .with_property(PropertyFixture::returning("Link", "https://github.com/a/one")),
        )
        .with_type(
            TypeFixture::new("Acme", "Second")
                .extends("ResoniteModLoader", "ResoniteMod")
                .with_property(PropertyFixture::returning("Link", "https://github.com/a/two")),
        )
        .build();
    assert_eq!(
        link_literals(&bytes),
        Ok(Some(vec!["https://github.com/a/one".to_owned()]))
    );
}

#[test]
fn assembly_without_mod_type_has_no_link() {
    let bytes = AssemblyBuilder::new()
        .with_type(TypeFixture::new("Acme", "Library"))
        .build();
    assert_eq!(link_literals(&bytes), Ok(None));
}

#[rstest]
#[case::empty(0)]
#[case::dos_header_only(0x40)]
#[case::headers_only(0x200)]
#[case::half(usize::MAX)]
fn truncated_images_fail_cleanly(#[case] keep: usize) {
    let bytes = mod_assembly(LINK);
    let keep = if keep == usize::MAX { bytes.len() / 2 } else { keep };
    assert!(link_literals(&bytes[..keep]).is_err());
}

#[test]
fn native_image_is_not_cli() {
    let mut bytes = mod_assembly(LINK);
    // Zero the CLI data directory of the PE32 optional header.
    let cli_entry = 0x80 + 4 + 20 + 96 + 14 * 8;
    bytes[cli_entry..cli_entry + 8].fill(0);
    assert_eq!(link_literals(&bytes), Err(MetadataError::NotCliImage));
}
