//! Extraction of the embedded upstream link from a mod assembly.
//!
//! Mods declare their origin by overriding the `Link` property of
//! `ResoniteMod`. The getter almost always returns a string literal, so the
//! link can be recovered by reading the getter's IL without loading or
//! running the assembly.

use clr_metadata::{Assembly, MetadataError};
use log::trace;
use thiserror::Error;

use crate::link::UpdateLink;

/// Base type every mod derives from.
pub const MOD_BASE_TYPE: &str = "ResoniteMod";
/// Property whose getter returns the upstream link.
pub const LINK_PROPERTY: &str = "Link";

/// A module whose metadata could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot read assembly metadata: {0}")]
pub struct ScanError(#[from] pub MetadataError);

/// Reads the upstream link out of an assembly image.
#[cfg_attr(test, mockall::automock)]
pub trait LinkExtractor {
    /// The first qualifying link literal in `bytes`, or `None` when the
    /// module declares none.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError`] when `bytes` is not a readable .NET assembly.
    fn extract_embedded_link(&self, bytes: &[u8]) -> Result<Option<String>, ScanError>;
}

/// [`LinkExtractor`] backed by the `clr-metadata` reader.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClrLinkExtractor;

impl LinkExtractor for ClrLinkExtractor {
    fn extract_embedded_link(&self, bytes: &[u8]) -> Result<Option<String>, ScanError> {
        let assembly = Assembly::parse(bytes)?;
        let Some(literals) = assembly.property_getter_literals(MOD_BASE_TYPE, LINK_PROPERTY)? else {
            trace!("no {MOD_BASE_TYPE}.{LINK_PROPERTY} getter found");
            return Ok(None);
        };
        trace!("{LINK_PROPERTY} getter loads {} literals", literals.len());
        Ok(literals
            .into_iter()
            .find(|literal| UpdateLink::qualifies(literal)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clr_metadata::fixture::{
        AssemblyBuilder, Getter, Instruction, PropertyFixture, TypeFixture, mod_assembly,
    };

    #[test]
    fn finds_link_of_mod_type() {
        let bytes = mod_assembly("https://github.com/acme/foo");
        let link = ClrLinkExtractor
            .extract_embedded_link(&bytes)
            .expect("scan");
        assert_eq!(link.as_deref(), Some("https://github.com/acme/foo"));
    }

    #[test]
    fn unqualified_literal_is_no_link() {
        let bytes = mod_assembly("https://github.com/acme");
        assert_eq!(ClrLinkExtractor.extract_embedded_link(&bytes).expect("scan"), None);
    }

    #[test]
    fn first_qualifying_literal_wins() {
        let getter = Getter::Body(vec![
            Instruction::Ldstr("not a link".to_owned()),
            Instruction::POP,
            Instruction::Ldstr("https://github.com/acme/first".to_owned()),
            Instruction::POP,
            Instruction::Ldstr("https://github.com/acme/second".to_owned()),
            Instruction::RET,
        ]);
        let bytes = AssemblyBuilder::new()
            .with_type(
                TypeFixture::new("Acme", "Foo")
                    .extends("ResoniteModLoader", "ResoniteMod")
                    .with_property(PropertyFixture::new("Link", getter)),
            )
            .build();
        let link = ClrLinkExtractor.extract_embedded_link(&bytes).expect("scan");
        assert_eq!(link.as_deref(), Some("https://github.com/acme/first"));
    }

    #[test]
    fn types_with_other_bases_are_skipped() {
        let bytes = AssemblyBuilder::new()
            .with_type(
                TypeFixture::new("Acme", "Helper")
                    .extends("System", "Object")
                    .with_property(PropertyFixture::returning("Link", "https://github.com/acme/foo")),
            )
            .build();
        assert_eq!(ClrLinkExtractor.extract_embedded_link(&bytes).expect("scan"), None);
    }

    #[test]
    fn non_assembly_is_a_scan_error() {
        let err = ClrLinkExtractor
            .extract_embedded_link(b"definitely not a PE file")
            .expect_err("not PE");
        assert!(matches!(err.0, MetadataError::NotPeImage { .. } | MetadataError::Truncated { .. }));
    }
}
