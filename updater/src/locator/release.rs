//! Authenticated lookup of the latest release through the REST API.

use log::debug;
use serde::Deserialize;

use super::{ArtefactLocator, LocateError, ResolvedArtefact};
use crate::config::Credential;
use crate::http::HttpRequest;
use crate::link::UpstreamIdentity;
use crate::retry::RetryingClient;

const ACCEPT: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";

/// The parts of a release document this crate reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Release {
    /// Tag the release was cut from.
    #[serde(default)]
    pub tag_name: Option<String>,
    /// Files attached to the release.
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// A file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseAsset {
    /// Asset file name.
    pub name: String,
    /// Public download URL.
    #[serde(alias = "download_url")]
    pub browser_download_url: String,
}

impl Release {
    /// The asset whose name equals `file_name` exactly.
    #[must_use]
    pub fn asset_named(&self, file_name: &str) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|asset| asset.name == file_name)
    }
}

/// Queries `GET /repos/{owner}/{repo}/releases/latest` with a bearer token.
#[derive(Debug, Clone)]
pub struct ReleaseLocator {
    credential: Credential,
    api_base: String,
}

impl ReleaseLocator {
    /// A locator authenticating with `credential` against `api_base`.
    #[must_use]
    pub fn new(credential: Credential, api_base: &str) -> Self {
        Self {
            credential,
            api_base: api_base.trim_end_matches('/').to_owned(),
        }
    }

    /// URL of the latest-release document of `identity`.
    #[must_use]
    pub fn latest_release_url(&self, identity: &UpstreamIdentity) -> String {
        format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_base, identity.owner, identity.repository
        )
    }
}

impl ArtefactLocator for ReleaseLocator {
    fn locate(
        &self,
        identity: &UpstreamIdentity,
        file_name: &str,
        http: &RetryingClient<'_>,
    ) -> Result<ResolvedArtefact, LocateError> {
        let url = self.latest_release_url(identity);
        let request = HttpRequest::get(url.as_str())
            .header("Authorization", format!("Bearer {}", self.credential.expose()))
            .header("Accept", ACCEPT)
            .header("X-GitHub-Api-Version", API_VERSION);
        let response = http.get(&request)?;

        match response.status {
            200..=299 => {}
            401 => return Err(LocateError::Unauthorized { url }),
            status @ 400..=499 => {
                return Err(LocateError::Unresolvable {
                    url,
                    reason: format!("HTTP {status}"),
                });
            }
            status => return Err(LocateError::UnexpectedStatus { url, status }),
        }

        let release: Release =
            serde_json::from_slice(&response.body).map_err(|err| LocateError::MalformedResponse {
                url: url.clone(),
                reason: err.to_string(),
            })?;
        debug!(
            "{identity}: latest release {} has {} assets",
            release.tag_name.as_deref().unwrap_or("<untagged>"),
            release.assets.len()
        );
        let asset = release
            .asset_named(file_name)
            .ok_or_else(|| LocateError::AssetNotFound {
                url: url.clone(),
                asset: file_name.to_owned(),
            })?;
        Ok(ResolvedArtefact {
            download_url: asset.browser_download_url.clone(),
            file_name: file_name.to_owned(),
        })
    }
}
