//! Resonite mod updater library.
//!
//! Keeps a folder of Resonite mods in line with the releases their authors
//! publish on GitHub. Each mod names its repository through the `Link`
//! property of its `ResoniteMod` subclass; the updater reads that link from
//! the assembly metadata, finds the latest matching release asset and
//! replaces the local file when the content differs.
//!
//! # Modules
//!
//! - [`cli`] - Command-line argument definitions
//! - [`config`] - Layered configuration resolution
//! - [`digest`] - SHA-256 content digests
//! - [`dirs`] - Platform directory lookup
//! - [`error`] - Run-level error types
//! - [`http`] - HTTP client abstraction and `ureq` implementation
//! - [`libraries`] - Mod loader and Harmony updates
//! - [`link`] - Upstream link validation
//! - [`locator`] - Release API and tag feed artefact lookup
//! - [`module`] - Mod discovery
//! - [`orchestrator`] - The per-module update run
//! - [`outcome`] - Per-module results
//! - [`output`] - Console status lines
//! - [`retry`] - Rate-limit retries and cancellation
//! - [`scanner`] - Link extraction from assembly metadata
//! - [`sync`] - Hash-gated atomic file replacement

pub mod cli;
pub mod config;
pub mod digest;
pub mod dirs;
pub mod error;
pub mod http;
pub mod libraries;
pub mod link;
pub mod locator;
pub mod module;
pub mod orchestrator;
pub mod outcome;
pub mod output;
pub mod retry;
pub mod scanner;
pub mod sync;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
