//! The update run.
//!
//! Each module walks the same path: ignore marker, link extraction, link
//! validation, artefact location and finally synchronisation. Whatever goes
//! wrong for one module becomes that module's [`SyncOutcome`]; only a
//! rejected token, exhausted rate-limit retries or cancellation stop the
//! run.

use camino::Utf8Path;
use log::{debug, info};

use crate::config::UpdaterConfig;
use crate::error::{Result, UpdaterError};
use crate::http::HttpClient;
use crate::libraries;
use crate::locator::{LocateError, SourceResolver};
use crate::module::{LocalModule, discover_modules};
use crate::outcome::{ModuleError, ModuleReport, SyncOutcome};
use crate::retry::{CancellationToken, RateLimitBudget, RetryingClient, Sleeper};
use crate::scanner::LinkExtractor;
use crate::sync::{ArtefactSynchronizer, SyncAction, SyncError};

/// Receives progress as the run advances.
pub trait RunObserver {
    /// A module (or support library) reached its outcome.
    fn module_finished(&mut self, report: &ModuleReport);

    /// A support library is not installed and was skipped.
    fn library_skipped(&mut self, file_name: &str);
}

/// Every report produced by a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Reports in processing order.
    pub reports: Vec<ModuleReport>,
    /// Support libraries that were not found.
    pub skipped_libraries: Vec<String>,
}

impl RunSummary {
    /// Modules that failed, with their causes.
    pub fn errors(&self) -> impl Iterator<Item = (&str, &ModuleError)> {
        self.reports.iter().filter_map(|report| match &report.outcome {
            SyncOutcome::Error(err) => Some((report.file_name.as_str(), err)),
            _ => None,
        })
    }

    /// Number of modules that were (or, in a dry run, would be) updated.
    #[must_use]
    pub fn updated_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|report| matches!(report.outcome, SyncOutcome::Updated { .. }))
            .count()
    }
}

/// Collaborators the run talks to.
#[derive(Clone, Copy)]
pub struct UpdateServices<'a> {
    /// HTTP transport for queries and downloads.
    pub client: &'a dyn HttpClient,
    /// Waits between rate-limited retries.
    pub sleeper: &'a dyn Sleeper,
    /// Reads embedded links.
    pub extractor: &'a dyn LinkExtractor,
}

/// Drives modules through extraction, location and synchronisation.
pub struct UpdateOrchestrator<'a> {
    extractor: &'a dyn LinkExtractor,
    resolver: SourceResolver,
    http: RetryingClient<'a>,
    synchronizer: ArtefactSynchronizer<'a>,
    token: CancellationToken,
}

impl<'a> UpdateOrchestrator<'a> {
    /// Build an orchestrator for `config`.
    ///
    /// The locator strategy is fixed here from the presence of a
    /// credential and stays the same for the whole run.
    #[must_use]
    pub fn new(
        config: &UpdaterConfig,
        services: UpdateServices<'a>,
        token: CancellationToken,
    ) -> Self {
        let resolver = SourceResolver::for_credential(config.credential.clone(), &config.endpoints);
        let http = RetryingClient::new(
            services.client,
            services.sleeper,
            config.retry,
            RateLimitBudget::default(),
            token.clone(),
        );
        Self {
            extractor: services.extractor,
            resolver,
            http,
            synchronizer: ArtefactSynchronizer::new(services.client, config.dry_run, token.clone()),
            token,
        }
    }

    /// Process `modules` in order, reporting each to `observer`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdaterError::Cancelled`], [`UpdaterError::Unauthorized`]
    /// or [`UpdaterError::RateLimited`] when the run must stop. Modules
    /// already reported keep their outcomes.
    pub fn run(
        &self,
        modules: &[LocalModule],
        observer: &mut dyn RunObserver,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for module in modules {
            self.ensure_not_cancelled()?;
            let outcome = self.process_module(module)?;
            let report = ModuleReport::new(module.file_name(), outcome);
            observer.module_finished(&report);
            summary.reports.push(report);
        }
        Ok(summary)
    }

    /// Outcome of a single module.
    ///
    /// # Errors
    ///
    /// Returns an [`UpdaterError`] only for conditions that end the run.
    pub fn process_module(&self, module: &LocalModule) -> Result<SyncOutcome> {
        if module.is_ignored() {
            debug!("{}: ignored", module.file_name());
            return Ok(SyncOutcome::Ignored);
        }
        let bytes = match module.read_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                return Ok(SyncOutcome::Error(ModuleError::new(format!(
                    "failed to read {}: {err}",
                    module.path()
                ))));
            }
        };
        let link = match self.extractor.extract_embedded_link(&bytes) {
            Ok(Some(link)) => link,
            Ok(None) => {
                debug!("{}: no link", module.file_name());
                return Ok(SyncOutcome::NoLinkFound);
            }
            Err(err) => return Ok(SyncOutcome::Error(ModuleError::new(err.to_string()))),
        };
        debug!("{}: link {link}", module.file_name());
        self.process_linked(module.path(), module.file_name(), &link)
    }

    /// Locate and synchronise a file whose upstream link is already known.
    ///
    /// # Errors
    ///
    /// Returns an [`UpdaterError`] only for conditions that end the run.
    pub fn process_linked(&self, path: &Utf8Path, file_name: &str, link: &str) -> Result<SyncOutcome> {
        let artefact = match self.resolver.resolve(link, file_name, &self.http) {
            Ok(artefact) => artefact,
            Err(err) => return classify_locate_error(err),
        };
        let outcome = match self.synchronizer.synchronize(path, &artefact) {
            Ok(SyncAction::Replaced) => SyncOutcome::Updated {
                source_url: artefact.download_url,
            },
            Ok(SyncAction::Unchanged) => SyncOutcome::UpToDate,
            Err(SyncError::Cancelled { .. }) => return Err(UpdaterError::Cancelled),
            Err(err) => SyncOutcome::Error(ModuleError::at(err.to_string(), artefact.download_url)),
        };
        Ok(outcome)
    }

    /// Fail with [`UpdaterError::Cancelled`] once the run's token fires.
    ///
    /// # Errors
    ///
    /// Returns [`UpdaterError::Cancelled`] when cancelled.
    pub fn ensure_not_cancelled(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(UpdaterError::Cancelled);
        }
        Ok(())
    }
}

fn classify_locate_error(err: LocateError) -> Result<SyncOutcome> {
    match err {
        LocateError::AssetNotFound { .. } => Ok(SyncOutcome::NoLinkFound),
        LocateError::BadLink(_) | LocateError::Unresolvable { .. } => {
            debug!("{err}");
            Ok(SyncOutcome::InvalidLink)
        }
        LocateError::Unauthorized { url } => Err(UpdaterError::Unauthorized { url }),
        LocateError::RateLimited { url, attempts } => {
            Err(UpdaterError::RateLimited { url, attempts })
        }
        LocateError::Cancelled { .. } => Err(UpdaterError::Cancelled),
        other => {
            let url = other.url().map(str::to_owned);
            Ok(SyncOutcome::Error(ModuleError {
                message: other.to_string(),
                url,
            }))
        }
    }
}

/// Update every mod in the configured folder, then the support libraries.
///
/// # Errors
///
/// Returns [`UpdaterError::ModsFolderUnreadable`] or
/// [`UpdaterError::NoModules`] when there is nothing to process, and the
/// fatal errors of [`UpdateOrchestrator::run`].
pub fn run_update(
    config: &UpdaterConfig,
    services: UpdateServices<'_>,
    observer: &mut dyn RunObserver,
    token: CancellationToken,
) -> Result<RunSummary> {
    let modules = discover_modules(&config.mods_dir)?;
    if modules.is_empty() {
        return Err(UpdaterError::NoModules {
            path: config.mods_dir.clone(),
        });
    }
    info!("checking {} mods in {}", modules.len(), config.mods_dir);

    let orchestrator = UpdateOrchestrator::new(config, services, token);
    let mut summary = orchestrator.run(&modules, observer)?;
    if config.update_libraries {
        libraries::update_libraries(
            &orchestrator,
            &config.mods_dir,
            &config.library_source,
            observer,
            &mut summary,
        )?;
    }
    Ok(summary)
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
