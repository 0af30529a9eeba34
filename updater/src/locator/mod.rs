//! Resolution of an upstream link to a downloadable artefact.
//!
//! Two strategies exist. With a token the authenticated REST API reports
//! the latest release and its assets ([`ReleaseLocator`]). Without one the
//! public tag feed names the latest tag and the download URL is built by
//! convention ([`FeedLocator`]). [`SourceResolver`] picks one per run.

pub mod feed;
pub mod release;

use thiserror::Error;

use crate::config::{Credential, UpstreamEndpoints};
use crate::http::TransportError;
use crate::link::{LinkError, UpdateLink, UpstreamIdentity};
use crate::retry::{RetryError, RetryingClient};

pub use feed::FeedLocator;
pub use release::ReleaseLocator;

/// A concrete artefact replacing one local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtefact {
    /// Where to download the new content.
    pub download_url: String,
    /// The local file name the artefact replaces.
    pub file_name: String,
}

/// Why an artefact could not be located.
#[derive(Debug, Error)]
pub enum LocateError {
    /// The latest release has no asset with the module's file name.
    #[error("release at {url} has no asset named {asset}")]
    AssetNotFound {
        /// The release query.
        url: String,
        /// The asset name searched for.
        asset: String,
    },

    /// The link does not name a repository.
    #[error(transparent)]
    BadLink(#[from] LinkError),

    /// The repository has no release or tag that can be used.
    #[error("no releases found at {url}: {reason}")]
    Unresolvable {
        /// The query that failed.
        url: String,
        /// What was wrong.
        reason: String,
    },

    /// The token was rejected.
    #[error("invalid token provided (HTTP 401 from {url})")]
    Unauthorized {
        /// The rejected query.
        url: String,
    },

    /// The query stayed rate limited past the retry allowance.
    #[error("{url} still rate limited after {attempts} attempts")]
    RateLimited {
        /// The throttled query.
        url: String,
        /// Consecutive rate-limited attempts.
        attempts: u32,
    },

    /// The run was cancelled while the query was pending.
    #[error("request to {url} cancelled")]
    Cancelled {
        /// The abandoned query.
        url: String,
    },

    /// The query produced no response.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with an unexpected status.
    #[error("HTTP {status} from {url}")]
    UnexpectedStatus {
        /// The query.
        url: String,
        /// Status received.
        status: u16,
    },

    /// The response body could not be understood.
    #[error("malformed response from {url}: {reason}")]
    MalformedResponse {
        /// The query.
        url: String,
        /// Parser diagnostic.
        reason: String,
    },
}

impl LocateError {
    /// Whether this error ends the whole run rather than one module.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized { .. } | Self::RateLimited { .. } | Self::Cancelled { .. }
        )
    }

    /// The URL being queried, when the error carries one.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::AssetNotFound { url, .. }
            | Self::Unresolvable { url, .. }
            | Self::Unauthorized { url }
            | Self::RateLimited { url, .. }
            | Self::Cancelled { url }
            | Self::UnexpectedStatus { url, .. }
            | Self::MalformedResponse { url, .. } => Some(url),
            Self::Transport(err) => Some(&err.url),
            Self::BadLink(_) => None,
        }
    }
}

impl From<RetryError> for LocateError {
    fn from(err: RetryError) -> Self {
        match err {
            RetryError::Exhausted { url, attempts } => Self::RateLimited { url, attempts },
            RetryError::Transport(err) => Self::Transport(err),
            RetryError::Cancelled { url } => Self::Cancelled { url },
        }
    }
}

/// A strategy for turning a repository into an artefact URL.
pub trait ArtefactLocator {
    /// Find the latest published `file_name` of `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`LocateError`] describing why no artefact was found.
    fn locate(
        &self,
        identity: &UpstreamIdentity,
        file_name: &str,
        http: &RetryingClient<'_>,
    ) -> Result<ResolvedArtefact, LocateError>;
}

/// The locator chosen for a run.
#[derive(Debug, Clone)]
pub enum SourceResolver {
    /// Authenticated release API.
    Release(ReleaseLocator),
    /// Public tag feed.
    Feed(FeedLocator),
}

impl SourceResolver {
    /// Use the release API when a credential is present, the feed otherwise.
    #[must_use]
    pub fn for_credential(credential: Option<Credential>, endpoints: &UpstreamEndpoints) -> Self {
        match credential {
            Some(credential) => Self::Release(ReleaseLocator::new(credential, &endpoints.api_base)),
            None => Self::Feed(FeedLocator::new(&endpoints.web_base)),
        }
    }

    /// Validate `link` and locate the artefact for `file_name`.
    ///
    /// # Errors
    ///
    /// Returns [`LocateError::BadLink`] when the link does not parse or
    /// lacks an owner and repository, otherwise whatever the strategy
    /// reports.
    pub fn resolve(
        &self,
        link: &str,
        file_name: &str,
        http: &RetryingClient<'_>,
    ) -> Result<ResolvedArtefact, LocateError> {
        let identity = UpdateLink::parse(link)?.identity()?;
        self.locate(&identity, file_name, http)
    }
}

impl ArtefactLocator for SourceResolver {
    fn locate(
        &self,
        identity: &UpstreamIdentity,
        file_name: &str,
        http: &RetryingClient<'_>,
    ) -> Result<ResolvedArtefact, LocateError> {
        match self {
            Self::Release(locator) => locator.locate(identity, file_name, http),
            Self::Feed(locator) => locator.locate(identity, file_name, http),
        }
    }
}
