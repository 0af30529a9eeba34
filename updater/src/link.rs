//! Upstream links embedded in mods.
//!
//! A mod advertises where it came from with a URL such as
//! `https://github.com/owner/repo`. Only links on the upstream host with an
//! owner and a repository in the path are usable; anything else is treated
//! as if the mod had no link at all.

use std::fmt;

use thiserror::Error;
use ureq::http::Uri;

/// Host suffix every usable link must carry.
pub const UPSTREAM_DOMAIN: &str = "github.com";

/// Parts a qualifying link must split into: scheme, the empty authority
/// separator, host, owner and repository.
const MIN_LINK_PARTS: usize = 5;

/// Why a link cannot be turned into an [`UpstreamIdentity`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The text is not an absolute URL.
    #[error("{link} is not an absolute URL")]
    Unparseable {
        /// The rejected text.
        link: String,
    },

    /// The URL is not an `http`/`https` link on the upstream host.
    #[error("{link} is not a github.com link")]
    WrongHost {
        /// The rejected text.
        link: String,
    },

    /// The path lacks an owner or a repository.
    #[error("{link} does not name an owner and a repository")]
    MissingRepository {
        /// The rejected text.
        link: String,
    },
}

/// A validated upstream link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateLink {
    raw: String,
    uri: Uri,
}

impl UpdateLink {
    /// Parse `raw` as an absolute `http`/`https` URL on the upstream host.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Unparseable`] for text that is not an absolute
    /// URL and [`LinkError::WrongHost`] for other schemes or hosts.
    pub fn parse(raw: &str) -> Result<Self, LinkError> {
        let uri: Uri = raw.parse().map_err(|_| LinkError::Unparseable {
            link: raw.to_owned(),
        })?;
        let (Some(scheme), Some(host)) = (uri.scheme_str(), uri.host()) else {
            return Err(LinkError::Unparseable {
                link: raw.to_owned(),
            });
        };
        let web_scheme = scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https");
        if !web_scheme || !host.to_ascii_lowercase().ends_with(UPSTREAM_DOMAIN) {
            return Err(LinkError::WrongHost {
                link: raw.to_owned(),
            });
        }
        Ok(Self {
            raw: raw.to_owned(),
            uri,
        })
    }

    /// Whether `raw` is worth following: an upstream-host URL that is deep
    /// enough to carry an owner and a repository.
    ///
    /// # Examples
    ///
    /// ```
    /// use resonite_mod_updater::link::UpdateLink;
    ///
    /// assert!(UpdateLink::qualifies("https://github.com/acme/foo"));
    /// assert!(!UpdateLink::qualifies("https://github.com/acme/"));
    /// assert!(!UpdateLink::qualifies("https://example.com/acme/foo"));
    /// ```
    #[must_use]
    pub fn qualifies(raw: &str) -> bool {
        // Depth only counts raw `/` parts, so deep links such as
        // `owner/repo/blob/main/file` qualify and resolve to `owner/repo`.
        Self::parse(raw).is_ok() && raw.trim_end_matches('/').split('/').count() >= MIN_LINK_PARTS
    }

    /// The link as it was embedded.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Owner and repository named by the first two path segments.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::MissingRepository`] when either segment is
    /// absent or empty.
    pub fn identity(&self) -> Result<UpstreamIdentity, LinkError> {
        let mut segments = self.uri.path().split('/').skip(1);
        match (segments.next(), segments.next()) {
            (Some(owner), Some(repository)) if !owner.is_empty() && !repository.is_empty() => {
                Ok(UpstreamIdentity {
                    owner: owner.to_owned(),
                    repository: repository.to_owned(),
                })
            }
            _ => Err(LinkError::MissingRepository {
                link: self.raw.clone(),
            }),
        }
    }
}

impl fmt::Display for UpdateLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Owner and repository of an upstream project.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpstreamIdentity {
    /// Account or organisation owning the repository.
    pub owner: String,
    /// Repository name.
    pub repository: String,
}

impl fmt::Display for UpstreamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repository)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::bare_host("https://github.com/", false)]
    #[case::owner_only("https://github.com/ownerX", false)]
    #[case::owner_trailing_slash("https://github.com/ownerX/", false)]
    #[case::repository("https://github.com/ownerX/repoY", true)]
    #[case::release_asset("https://github.com/ownerX/repoY/releases/download/v1/thing.dll", true)]
    #[case::blob("https://github.com/ownerX/repoY/blob/main/file", true)]
    #[case::plain_http("http://github.com/ownerX/repoY", true)]
    #[case::subdomain("https://www.github.com/ownerX/repoY", true)]
    #[case::upper_case_host("https://GitHub.com/ownerX/repoY", true)]
    #[case::other_host("https://gitlab.com/ownerX/repoY", false)]
    #[case::other_scheme("ftp://github.com/ownerX/repoY", false)]
    #[case::relative("github.com/ownerX/repoY", false)]
    #[case::empty("", false)]
    #[case::prose("see the readme", false)]
    fn qualification(#[case] raw: &str, #[case] expected: bool) {
        assert_eq!(UpdateLink::qualifies(raw), expected, "{raw}");
    }

    #[rstest]
    #[case("https://github.com/acme/foo", "acme", "foo")]
    #[case("https://github.com/acme/foo/releases/tag/v1.0.0", "acme", "foo")]
    #[case("https://github.com/acme/foo/", "acme", "foo")]
    fn identity_comes_from_first_two_segments(
        #[case] raw: &str,
        #[case] owner: &str,
        #[case] repository: &str,
    ) {
        let identity = UpdateLink::parse(raw)
            .and_then(|link| link.identity())
            .expect("identity");
        assert_eq!(identity.owner, owner);
        assert_eq!(identity.repository, repository);
        assert_eq!(identity.to_string(), format!("{owner}/{repository}"));
    }

    #[rstest]
    #[case("https://github.com/acme")]
    #[case("https://github.com//foo")]
    #[case("https://github.com")]
    fn short_paths_have_no_identity(#[case] raw: &str) {
        let err = UpdateLink::parse(raw)
            .and_then(|link| link.identity())
            .expect_err("no identity");
        assert!(matches!(err, LinkError::MissingRepository { .. }));
    }

    #[test]
    fn wrong_host_is_reported() {
        let err = UpdateLink::parse("https://example.com/acme/foo").expect_err("host");
        assert_eq!(err.to_string(), "https://example.com/acme/foo is not a github.com link");
    }
}
