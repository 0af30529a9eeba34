//! Read-only access to the ECMA-335 metadata of .NET assemblies.
//!
//! The crate walks PE headers to the CLI metadata root, decodes the
//! compressed table stream, and exposes just enough navigation to answer one
//! question without loading the assembly: which string literals does a given
//! property getter load? Every read is bounds checked, so truncated or
//! hostile images surface as [`MetadataError`] values rather than panics.
//!
//! ```no_run
//! use clr_metadata::Assembly;
//!
//! let bytes = std::fs::read("Mods/Example.dll")?;
//! let assembly = Assembly::parse(&bytes)?;
//! if let Some(literals) = assembly.property_getter_literals("ResoniteMod", "Link")? {
//!     println!("{literals:?}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod assembly;
mod error;
mod heaps;
mod il;
mod pe;
mod reader;
mod tables;

#[cfg(any(test, feature = "fixture"))]
pub mod fixture;

pub use assembly::{Assembly, MethodDefinition, PropertyDefinition, TypeDefinition, TypeName};
pub use error::{MetadataError, Result};
pub use tables::TableId;
