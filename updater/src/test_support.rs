//! Deterministic collaborators for tests.
//!
//! [`ScriptedHttpClient`] answers from per-URL queues of canned responses
//! and records every request it sees. [`RecordingSleeper`] records the
//! delays it was asked to wait without waiting.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::http::{HttpClient, HttpRequest, HttpResponse, TransportError};
use crate::retry::{CancellationToken, Sleeper};

/// An [`HttpClient`] replaying scripted responses.
///
/// Each URL has a queue. Responses are consumed in order; the last one is
/// repeated once the queue is down to a single entry. URLs without a script
/// answer 404.
#[derive(Debug, Default)]
pub struct ScriptedHttpClient {
    scripts: Mutex<HashMap<String, VecDeque<Result<HttpResponse, String>>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    /// A client with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `response` for `url`.
    pub fn respond(&self, url: impl Into<String>, response: HttpResponse) {
        self.push(url.into(), Ok(response));
    }

    /// Queue a transport failure for `url`.
    pub fn fail(&self, url: impl Into<String>, reason: impl Into<String>) {
        self.push(url.into(), Err(reason.into()));
    }

    fn push(&self, url: String, entry: Result<HttpResponse, String>) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.entry(url).or_default().push_back(entry);
        }
    }

    /// Every request sent so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// URLs requested so far, in order.
    #[must_use]
    pub fn requested_urls(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|request| request.url)
            .collect()
    }
}

impl HttpClient for ScriptedHttpClient {
    fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let entry = self.scripts.lock().ok().and_then(|mut scripts| {
            let queue = scripts.get_mut(&request.url)?;
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        });
        match entry {
            Some(Ok(response)) => Ok(response),
            Some(Err(reason)) => Err(TransportError {
                url: request.url.clone(),
                reason,
            }),
            None => Ok(HttpResponse::new(404, "Not Found")),
        }
    }
}

/// A [`Sleeper`] that records delays and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// A sleeper with no recorded delays.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far.
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|delays| delays.clone())
            .unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration, token: &CancellationToken) -> bool {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
        !token.is_cancelled()
    }
}
