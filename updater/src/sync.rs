//! Hash-gated replacement of a module with its upstream artefact.
//!
//! The artefact is always downloaded in full and compared against the file
//! on disk by SHA-256. Differing content is written to a temporary file in
//! the module's own directory and renamed over the module, so readers see
//! either the old bytes or the new ones.

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::digest::ContentDigest;
use crate::http::{HttpClient, HttpRequest, TransportError};
use crate::locator::ResolvedArtefact;
use crate::retry::CancellationToken;

const ACCEPT: &str = "application/octet-stream";

/// Why a module could not be synchronised.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The download produced no response.
    #[error(transparent)]
    Download(#[from] TransportError),

    /// The download answered with a non-success status.
    #[error("download of {url} failed with HTTP {status}")]
    Status {
        /// The artefact URL.
        url: String,
        /// Status received.
        status: u16,
    },

    /// The current module could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// The module path.
        path: Utf8PathBuf,
        /// The underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// The new content could not be written.
    #[error("failed to write {path}: {source}")]
    Write {
        /// The module path.
        path: Utf8PathBuf,
        /// The underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// The run was cancelled before the module could be replaced.
    #[error("update from {url} cancelled")]
    Cancelled {
        /// The artefact URL.
        url: String,
    },
}

/// What a successful synchronisation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// The content differed; it was replaced unless running dry.
    Replaced,
    /// The content already matched.
    Unchanged,
}

/// Downloads artefacts and replaces modules whose content changed.
pub struct ArtefactSynchronizer<'a> {
    client: &'a dyn HttpClient,
    dry_run: bool,
    token: CancellationToken,
}

impl<'a> ArtefactSynchronizer<'a> {
    /// A synchroniser downloading through `client`. With `dry_run` set no
    /// file is ever written. Downloads are bounded by the deadline of
    /// `token`, and nothing is written once it fires.
    #[must_use]
    pub fn new(client: &'a dyn HttpClient, dry_run: bool, token: CancellationToken) -> Self {
        Self {
            client,
            dry_run,
            token,
        }
    }

    /// Bring `target` in line with `artefact`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the download fails or the module cannot be
    /// read or replaced, and [`SyncError::Cancelled`] when the run is
    /// cancelled first. The module is left untouched in every error case.
    pub fn synchronize(
        &self,
        target: &Utf8Path,
        artefact: &ResolvedArtefact,
    ) -> Result<SyncAction, SyncError> {
        self.ensure_not_cancelled(artefact)?;
        let request = self
            .token
            .bound(HttpRequest::get(artefact.download_url.as_str()).header("Accept", ACCEPT));
        let response = match self.client.get(&request) {
            Ok(response) => response,
            Err(err) => {
                self.ensure_not_cancelled(artefact)?;
                return Err(err.into());
            }
        };
        self.ensure_not_cancelled(artefact)?;
        if !response.is_success() {
            return Err(SyncError::Status {
                url: artefact.download_url.clone(),
                status: response.status,
            });
        }

        let upstream = ContentDigest::of(&response.body);
        let local = ContentDigest::of_file(target).map_err(|source| SyncError::Read {
            path: target.to_owned(),
            source,
        })?;
        if upstream == local {
            debug!("{target} matches {upstream}");
            return Ok(SyncAction::Unchanged);
        }

        if self.dry_run {
            info!("{target} differs from {}; dry run, not writing", artefact.download_url);
        } else {
            self.ensure_not_cancelled(artefact)?;
            replace_atomically(target, &response.body).map_err(|source| SyncError::Write {
                path: target.to_owned(),
                source,
            })?;
            info!("{target} updated from {}", artefact.download_url);
        }
        Ok(SyncAction::Replaced)
    }

    fn ensure_not_cancelled(&self, artefact: &ResolvedArtefact) -> Result<(), SyncError> {
        if self.token.is_cancelled() {
            return Err(SyncError::Cancelled {
                url: artefact.download_url.clone(),
            });
        }
        Ok(())
    }
}

fn replace_atomically(target: &Utf8Path, content: &[u8]) -> std::io::Result<()> {
    let parent = target
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let permissions = std::fs::metadata(target)?.permissions();
    let mut staged = NamedTempFile::new_in(parent)?;
    staged.as_file().set_permissions(permissions)?;
    staged.write_all(content)?;
    staged.as_file().sync_all()?;
    staged.persist(target).map_err(|err| err.error)?;
    Ok(())
}
