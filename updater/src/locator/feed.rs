//! Unauthenticated lookup through the public tag feed.
//!
//! `https://github.com/{owner}/{repo}/tags.atom` lists tags newest first.
//! The first entry names the latest tag and the asset URL is built by the
//! download convention `releases/download/{tag}/{file}`.

use log::debug;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::{ArtefactLocator, LocateError, ResolvedArtefact};
use crate::http::HttpRequest;
use crate::link::UpstreamIdentity;
use crate::retry::RetryingClient;

const ACCEPT: &str = "application/atom+xml";
const TAG_MARKERS: [&str; 2] = ["/releases/tag/", "/tree/"];
const TAG_ID_MARKER: &str = ":Repository/";

/// Link and id of the newest feed entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedEntry {
    /// `href` of the entry's `<link>`.
    pub link: Option<String>,
    /// Text of the entry's `<id>`.
    pub id: Option<String>,
}

impl FeedEntry {
    /// The tag this entry refers to, taken from the link or else the id.
    #[must_use]
    pub fn tag(&self) -> Option<String> {
        self.link
            .as_deref()
            .and_then(tag_from_path)
            .or_else(|| self.id.as_deref().and_then(tag_from_id))
    }
}

fn tag_from_path(text: &str) -> Option<String> {
    TAG_MARKERS.iter().find_map(|marker| {
        let (_, rest) = text.split_once(marker)?;
        non_empty(rest.trim_matches('/'))
    })
}

fn tag_from_id(id: &str) -> Option<String> {
    if let Some(tag) = tag_from_path(id) {
        return Some(tag);
    }
    let (_, rest) = id.split_once(TAG_ID_MARKER)?;
    let (_, tag) = rest.split_once('/')?;
    non_empty(tag)
}

fn non_empty(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_owned())
}

/// Read the first `<entry>` of an Atom document.
///
/// Returns `Ok(None)` for a feed without entries.
///
/// # Errors
///
/// Returns the parser's diagnostic when the document is not well-formed.
pub fn first_entry(xml: &str) -> Result<Option<FeedEntry>, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entry: Option<FeedEntry> = None;
    let mut in_id = false;
    loop {
        match reader.read_event().map_err(|err| err.to_string())? {
            Event::Start(element) => match element.local_name().as_ref() {
                b"entry" if entry.is_none() => entry = Some(FeedEntry::default()),
                b"link" => record_link(&element, entry.as_mut())?,
                b"id" => in_id = entry.is_some(),
                _ => {}
            },
            Event::Empty(element) if element.local_name().as_ref() == b"link" => {
                record_link(&element, entry.as_mut())?;
            }
            Event::Text(text) if in_id => {
                if let Some(current) = entry.as_mut() {
                    current.id = Some(text.unescape().map_err(|err| err.to_string())?.into_owned());
                }
            }
            Event::End(element) => match element.local_name().as_ref() {
                b"entry" => return Ok(entry),
                b"id" => in_id = false,
                _ => {}
            },
            Event::Eof => return Ok(entry),
            _ => {}
        }
    }
}

fn record_link(element: &BytesStart<'_>, entry: Option<&mut FeedEntry>) -> Result<(), String> {
    let Some(entry) = entry else {
        return Ok(());
    };
    if entry.link.is_some() {
        return Ok(());
    }
    let href = element
        .try_get_attribute("href")
        .map_err(|err| err.to_string())?;
    if let Some(href) = href {
        let value = href.unescape_value().map_err(|err| err.to_string())?;
        entry.link = Some(value.into_owned());
    }
    Ok(())
}

/// Resolves artefacts from the tag feed without credentials.
#[derive(Debug, Clone)]
pub struct FeedLocator {
    web_base: String,
}

impl FeedLocator {
    /// A locator reading feeds below `web_base`.
    #[must_use]
    pub fn new(web_base: &str) -> Self {
        Self {
            web_base: web_base.trim_end_matches('/').to_owned(),
        }
    }

    /// URL of the tag feed of `identity`.
    #[must_use]
    pub fn feed_url(&self, identity: &UpstreamIdentity) -> String {
        format!(
            "{}/{}/{}/tags.atom",
            self.web_base, identity.owner, identity.repository
        )
    }

    /// Conventional download URL of `file_name` in release `tag`.
    #[must_use]
    pub fn download_url(&self, identity: &UpstreamIdentity, tag: &str, file_name: &str) -> String {
        format!(
            "{}/{}/{}/releases/download/{tag}/{file_name}",
            self.web_base, identity.owner, identity.repository
        )
    }
}

impl ArtefactLocator for FeedLocator {
    fn locate(
        &self,
        identity: &UpstreamIdentity,
        file_name: &str,
        http: &RetryingClient<'_>,
    ) -> Result<ResolvedArtefact, LocateError> {
        let url = self.feed_url(identity);
        let response = http.get(&HttpRequest::get(url.as_str()).header("Accept", ACCEPT))?;
        match response.status {
            200..=299 => {}
            status @ 400..=499 => {
                return Err(LocateError::Unresolvable {
                    url,
                    reason: format!("HTTP {status}"),
                });
            }
            status => return Err(LocateError::UnexpectedStatus { url, status }),
        }

        let unresolvable = |reason: String| LocateError::Unresolvable {
            url: url.clone(),
            reason,
        };
        let entry = first_entry(&response.text())
            .map_err(|err| unresolvable(format!("malformed feed: {err}")))?
            .ok_or_else(|| unresolvable("feed has no entries".to_owned()))?;
        let tag = entry
            .tag()
            .ok_or_else(|| unresolvable("latest entry names no tag".to_owned()))?;
        debug!("{identity}: latest tag {tag}");
        Ok(ResolvedArtefact {
            download_url: self.download_url(identity, &tag, file_name),
            file_name: file_name.to_owned(),
        })
    }
}

#[cfg(test)]
#[path = "feed_tests.rs"]
mod tests;
