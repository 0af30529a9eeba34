//! Updates of the mod loader and its patching library.
//!
//! These files live beside the mods folder rather than in it and carry no
//! embedded link, so they are resolved against a fixed source repository.

use camino::{Utf8Path, Utf8PathBuf};
use log::{info, warn};

use crate::error::Result;
use crate::orchestrator::{RunObserver, RunSummary, UpdateOrchestrator};
use crate::outcome::ModuleReport;

/// A library installed next to the mods folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportLibrary {
    /// Folder below the game directory holding the library.
    pub folder: &'static str,
    /// File name, which is also the release asset name.
    pub file_name: &'static str,
}

/// The libraries kept up to date after the mods.
pub const SUPPORT_LIBRARIES: [SupportLibrary; 2] = [
    SupportLibrary {
        folder: "Libraries",
        file_name: "ResoniteModLoader.dll",
    },
    SupportLibrary {
        folder: "rml_libs",
        file_name: "0Harmony.dll",
    },
];

impl SupportLibrary {
    /// Where this library lives for a game whose mods are in `mods_dir`.
    ///
    /// Returns `None` when `mods_dir` has no parent.
    #[must_use]
    pub fn path_for(&self, mods_dir: &Utf8Path) -> Option<Utf8PathBuf> {
        let game_dir = mods_dir.parent()?;
        Some(game_dir.join(self.folder).join(self.file_name))
    }
}

/// Message reported for a library that is not installed.
#[must_use]
pub fn skipped_message(file_name: &str) -> String {
    format!("{file_name} not found. Skipping..")
}

/// Bring each installed support library in line with `source`.
///
/// Libraries that are not installed are reported through
/// [`RunObserver::library_skipped`] and recorded in `summary`.
///
/// # Errors
///
/// Returns the fatal errors of [`UpdateOrchestrator::process_linked`] and
/// [`UpdaterError::Cancelled`](crate::error::UpdaterError::Cancelled).
pub fn update_libraries(
    orchestrator: &UpdateOrchestrator<'_>,
    mods_dir: &Utf8Path,
    source: &str,
    observer: &mut dyn RunObserver,
    summary: &mut RunSummary,
) -> Result<()> {
    for library in SUPPORT_LIBRARIES {
        orchestrator.ensure_not_cancelled()?;
        let Some(path) = library.path_for(mods_dir).filter(|path| path.is_file()) else {
            warn!("{}", skipped_message(library.file_name));
            observer.library_skipped(library.file_name);
            summary.skipped_libraries.push(library.file_name.to_owned());
            continue;
        };
        info!("checking {path} against {source}");
        let outcome = orchestrator.process_linked(&path, library.file_name, source)?;
        let report = ModuleReport::new(library.file_name, outcome);
        observer.module_finished(&report);
        summary.reports.push(report);
    }
    Ok(())
}
