//! Discovery of mod assemblies in the mods folder.

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, warn};

use crate::error::{Result, UpdaterError};

/// File name prefix marking a module the user wants left alone.
pub const IGNORE_PREFIX: char = '_';

const MODULE_EXTENSION: &str = "dll";

/// A mod assembly on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalModule {
    path: Utf8PathBuf,
    file_name: String,
}

impl LocalModule {
    /// A module at `path`, or `None` when the path has no file name.
    #[must_use]
    pub fn new(path: Utf8PathBuf) -> Option<Self> {
        let file_name = path.file_name()?.to_owned();
        Some(Self { path, file_name })
    }

    /// Full path of the assembly.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// File name, which is also the release asset name searched for.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Whether the file name carries the ignore marker.
    #[must_use]
    pub fn is_ignored(&self) -> bool {
        self.file_name.starts_with(IGNORE_PREFIX)
    }

    /// Read the assembly's current bytes.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the file cannot be read.
    pub fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        std::fs::read(&self.path)
    }
}

/// List every `*.dll` file directly inside `dir`, sorted by path.
///
/// Symlinks count when they resolve to a regular file.
///
/// The extension match ignores ASCII case. Entries that are not valid UTF-8
/// are skipped with a warning.
///
/// # Errors
///
/// Returns [`UpdaterError::ModsFolderUnreadable`] when the folder cannot be
/// listed.
pub fn discover_modules(dir: &Utf8Path) -> Result<Vec<LocalModule>> {
    let unreadable = |source| UpdaterError::ModsFolderUnreadable {
        path: dir.to_owned(),
        source,
    };
    let mut modules = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(unreadable)? {
        let entry = entry.map_err(unreadable)?;
        let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
            warn!("skipping non UTF-8 path {}", entry.path().display());
            continue;
        };
        // Follows symlinks; dangling links are skipped.
        if !path.is_file() {
            continue;
        }
        let is_module = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(MODULE_EXTENSION));
        if let Some(module) = LocalModule::new(path).filter(|_| is_module) {
            modules.push(module);
        }
    }
    modules.sort_by(|left, right| left.path.cmp(&right.path));
    debug!("found {} modules in {dir}", modules.len());
    Ok(modules)
}
