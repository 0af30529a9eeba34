//! Tests for the per-module state machine and run-level escalation.

use super::*;
use crate::config::{Credential, UpstreamEndpoints};
use crate::http::{HttpClient, HttpRequest, HttpResponse, TransportError};
use crate::retry::RetryPolicy;
use crate::scanner::{MockLinkExtractor, ScanError};
use crate::test_support::{RecordingSleeper, ScriptedHttpClient};
use camino::Utf8PathBuf;
use clr_metadata::MetadataError;
use std::time::Duration;

const FOO_FEED: &str = "https://github.com/acme/foo/tags.atom";
const FOO_DOWNLOAD: &str = "https://github.com/acme/foo/releases/download/v2.0.0/Foo.dll";
const FOO_RELEASE: &str = "https://api.github.com/repos/acme/foo/releases/latest";

fn feed(tag: &str) -> HttpResponse {
    HttpResponse::new(
        200,
        format!(
            r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry><id>tag:github.com,2008:Repository/1/{tag}</id><link rel="alternate" href="https://github.com/acme/foo/releases/tag/{tag}"/></entry></feed>"#
        ),
    )
}

#[derive(Default)]
struct Recorder {
    reports: Vec<ModuleReport>,
    skipped: Vec<String>,
}

impl RunObserver for Recorder {
    fn module_finished(&mut self, report: &ModuleReport) {
        self.reports.push(report.clone());
    }

    fn library_skipped(&mut self, file_name: &str) {
        self.skipped.push(file_name.to_owned());
    }
}

struct Fixture {
    _temp: tempfile::TempDir,
    mods_dir: Utf8PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempfile::tempdir().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("UTF-8 path");
        let mods_dir = root.join("rml_mods");
        std::fs::create_dir(&mods_dir).expect("mkdir");
        Self {
            _temp: temp,
            mods_dir,
        }
    }

    fn module(&self, name: &str, content: &[u8]) -> LocalModule {
        let path = self.mods_dir.join(name);
        std::fs::write(&path, content).expect("write");
        LocalModule::new(path).expect("module")
    }

    fn config(&self, credential: Option<&str>, dry_run: bool) -> UpdaterConfig {
        UpdaterConfig {
            mods_dir: self.mods_dir.clone(),
            credential: credential.and_then(Credential::new),
            dry_run,
            library_source: "https://github.com/acme/loader".to_owned(),
            update_libraries: false,
            endpoints: UpstreamEndpoints::default(),
            request_timeout: Duration::from_secs(5),
            run_timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

fn extractor_returning(link: Option<&'static str>) -> MockLinkExtractor {
    let mut extractor = MockLinkExtractor::new();
    extractor
        .expect_extract_embedded_link()
        .returning(move |_| Ok(link.map(str::to_owned)));
    extractor
}

fn run_one(
    config: &UpdaterConfig,
    module: &LocalModule,
    client: &ScriptedHttpClient,
    extractor: &MockLinkExtractor,
) -> Result<SyncOutcome> {
    let sleeper = RecordingSleeper::new();
    let services = UpdateServices {
        client,
        sleeper: &sleeper,
        extractor,
    };
    UpdateOrchestrator::new(config, services, CancellationToken::new()).process_module(module)
}

#[test]
fn feed_scenario_updates_with_conventional_url() {
    let fixture = Fixture::new();
    let module = fixture.module("Foo.dll", b"old");
    let client = ScriptedHttpClient::new();
    client.respond(FOO_FEED, feed("v2.0.0"));
    client.respond(FOO_DOWNLOAD, HttpResponse::new(200, "new"));
    let extractor = extractor_returning(Some("https://github.com/acme/foo/releases"));

    let outcome = run_one(&fixture.config(None, false), &module, &client, &extractor)
        .expect("outcome");
    assert_eq!(
        outcome,
        SyncOutcome::Updated {
            source_url: FOO_DOWNLOAD.to_owned()
        }
    );
    assert_eq!(std::fs::read(module.path()).expect("read"), b"new");
    assert!(
        client
            .requests()
            .iter()
            .all(|request| request.header_value("Authorization").is_none())
    );
}

#[test]
fn ignored_module_makes_no_calls() {
    let fixture = Fixture::new();
    let module = fixture.module("_Foo.dll", b"old");
    let client = ScriptedHttpClient::new();
    let mut extractor = MockLinkExtractor::new();
    extractor.expect_extract_embedded_link().never();

    let outcome = run_one(&fixture.config(None, false), &module, &client, &extractor)
        .expect("outcome");
    assert_eq!(outcome, SyncOutcome::Ignored);
    assert!(client.requests().is_empty());
}

#[test]
fn missing_link_is_reported() {
    let fixture = Fixture::new();
    let module = fixture.module("Foo.dll", b"old");
    let client = ScriptedHttpClient::new();
    let outcome = run_one(
        &fixture.config(None, false),
        &module,
        &client,
        &extractor_returning(None),
    )
    .expect("outcome");
    assert_eq!(outcome, SyncOutcome::NoLinkFound);
}

#[test]
fn unreadable_metadata_is_a_module_error() {
    let fixture = Fixture::new();
    let module = fixture.module("Foo.dll", b"old");
    let client = ScriptedHttpClient::new();
    let mut extractor = MockLinkExtractor::new();
    extractor
        .expect_extract_embedded_link()
        .returning(|_| Err(ScanError(MetadataError::NotCliImage)));

    let outcome = run_one(&fixture.config(None, false), &module, &client, &extractor)
        .expect("outcome");
    assert!(outcome.is_error());
}

#[test]
fn unknown_repository_is_an_invalid_link() {
    let fixture = Fixture::new();
    let module = fixture.module("Foo.dll", b"old");
    let client = ScriptedHttpClient::new();
    let outcome = run_one(
        &fixture.config(None, false),
        &module,
        &client,
        &extractor_returning(Some("https://github.com/acme/foo")),
    )
    .expect("outcome");
    assert_eq!(outcome, SyncOutcome::InvalidLink);
}

#[test]
fn release_without_matching_asset_has_no_link() {
    let fixture = Fixture::new();
    let module = fixture.module("Foo.dll", b"old");
    let client = ScriptedHttpClient::new();
    client.respond(
        FOO_RELEASE,
        HttpResponse::new(200, r#"{"assets": [{"name": "Other.dll", "browser_download_url": "https://x.test"}]}"#),
    );
    let outcome = run_one(
        &fixture.config(Some("ghp_token"), false),
        &module,
        &client,
        &extractor_returning(Some("https://github.com/acme/foo")),
    )
    .expect("outcome");
    assert_eq!(outcome, SyncOutcome::NoLinkFound);
}

#[test]
fn rejected_token_stops_the_run() {
    let fixture = Fixture::new();
    let module = fixture.module("Foo.dll", b"old");
    let client = ScriptedHttpClient::new();
    client.respond(FOO_RELEASE, HttpResponse::new(401, "{}"));
    let err = run_one(
        &fixture.config(Some("ghp_token"), false),
        &module,
        &client,
        &extractor_returning(Some("https://github.com/acme/foo")),
    )
    .expect_err("fatal");
    assert!(matches!(err, UpdaterError::Unauthorized { ref url } if url == FOO_RELEASE));
}

#[test]
fn failed_download_keeps_the_url() {
    let fixture = Fixture::new();
    let module = fixture.module("Foo.dll", b"old");
    let client = ScriptedHttpClient::new();
    client.respond(FOO_FEED, feed("v2.0.0"));
    client.respond(FOO_DOWNLOAD, HttpResponse::new(500, ""));
    let outcome = run_one(
        &fixture.config(None, false),
        &module,
        &client,
        &extractor_returning(Some("https://github.com/acme/foo")),
    )
    .expect("outcome");
    let SyncOutcome::Error(err) = outcome else {
        panic!("expected an error outcome, got {outcome:?}");
    };
    assert_eq!(err.url.as_deref(), Some(FOO_DOWNLOAD));
    assert_eq!(std::fs::read(module.path()).expect("read"), b"old");
}

#[test]
fn run_reports_every_module_in_order() {
    let fixture = Fixture::new();
    let modules = vec![
        fixture.module("A.dll", b"a"),
        fixture.module("_B.dll", b"b"),
    ];
    let client = ScriptedHttpClient::new();
    let sleeper = RecordingSleeper::new();
    let extractor = extractor_returning(None);
    let services = UpdateServices {
        client: &client,
        sleeper: &sleeper,
        extractor: &extractor,
    };
    let mut recorder = Recorder::default();
    let summary = UpdateOrchestrator::new(&fixture.config(None, false), services, CancellationToken::new())
        .run(&modules, &mut recorder)
        .expect("summary");

    assert_eq!(summary.reports, recorder.reports);
    assert_eq!(
        summary.reports,
        [
            ModuleReport::new("A.dll", SyncOutcome::NoLinkFound),
            ModuleReport::new("_B.dll", SyncOutcome::Ignored),
        ]
    );
}

#[test]
fn cancelled_run_processes_nothing() {
    let fixture = Fixture::new();
    let modules = vec![fixture.module("A.dll", b"a")];
    let client = ScriptedHttpClient::new();
    let sleeper = RecordingSleeper::new();
    let mut extractor = MockLinkExtractor::new();
    extractor.expect_extract_embedded_link().never();
    let token = CancellationToken::new();
    token.cancel();
    let services = UpdateServices {
        client: &client,
        sleeper: &sleeper,
        extractor: &extractor,
    };
    let mut recorder = Recorder::default();
    let err = UpdateOrchestrator::new(&fixture.config(None, false), services, token)
        .run(&modules, &mut recorder)
        .expect_err("cancelled");
    assert!(matches!(err, UpdaterError::Cancelled));
    assert!(recorder.reports.is_empty());
}

#[test]
fn empty_folder_has_no_modules() {
    let fixture = Fixture::new();
    let client = ScriptedHttpClient::new();
    let sleeper = RecordingSleeper::new();
    let extractor = MockLinkExtractor::new();
    let services = UpdateServices {
        client: &client,
        sleeper: &sleeper,
        extractor: &extractor,
    };
    let err = run_update(
        &fixture.config(None, false),
        services,
        &mut Recorder::default(),
        CancellationToken::new(),
    )
    .expect_err("no modules");
    assert!(matches!(err, UpdaterError::NoModules { .. }));
}

#[test]
fn missing_libraries_are_skipped_after_mods() {
    let fixture = Fixture::new();
    fixture.module("A.dll", b"a");
    let harmony_dir = fixture.mods_dir.parent().expect("game dir").join("rml_libs");
    std::fs::create_dir(&harmony_dir).expect("mkdir");
    std::fs::write(harmony_dir.join("0Harmony.dll"), b"harmony").expect("write");

    let client = ScriptedHttpClient::new();
    client.respond("https://github.com/acme/loader/tags.atom", feed("v3.0.0"));
    client.respond(
        "https://github.com/acme/loader/releases/download/v3.0.0/0Harmony.dll",
        HttpResponse::new(200, "harmony"),
    );
    let sleeper = RecordingSleeper::new();
    let extractor = extractor_returning(None);
    let services = UpdateServices {
        client: &client,
        sleeper: &sleeper,
        extractor: &extractor,
    };
    let config = UpdaterConfig {
        update_libraries: true,
        ..fixture.config(None, false)
    };
    let mut recorder = Recorder::default();
    let summary = run_update(&config, services, &mut recorder, CancellationToken::new())
        .expect("summary");

    assert_eq!(recorder.skipped, ["ResoniteModLoader.dll"]);
    assert_eq!(summary.skipped_libraries, ["ResoniteModLoader.dll"]);
    assert_eq!(
        summary.reports.last(),
        Some(&ModuleReport::new("0Harmony.dll", SyncOutcome::UpToDate))
    );
}

/// Serves scripted responses and fires the token when `trigger` is fetched.
struct CancellingClient {
    inner: ScriptedHttpClient,
    token: CancellationToken,
    trigger: &'static str,
}

impl HttpClient for CancellingClient {
    fn get(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        if request.url == self.trigger {
            self.token.cancel();
        }
        self.inner.get(request)
    }
}

#[test]
fn cancellation_during_download_stops_before_writing() {
    let fixture = Fixture::new();
    let modules = vec![fixture.module("Foo.dll", b"old"), fixture.module("Zed.dll", b"zed")];
    let token = CancellationToken::new();
    let client = CancellingClient {
        inner: ScriptedHttpClient::new(),
        token: token.clone(),
        trigger: FOO_DOWNLOAD,
    };
    client.inner.respond(FOO_FEED, feed("v2.0.0"));
    client.inner.respond(FOO_DOWNLOAD, HttpResponse::new(200, "new"));
    let sleeper = RecordingSleeper::new();
    let extractor = extractor_returning(Some("https://github.com/acme/foo"));
    let services = UpdateServices {
        client: &client,
        sleeper: &sleeper,
        extractor: &extractor,
    };
    let mut recorder = Recorder::default();

    let err = UpdateOrchestrator::new(&fixture.config(None, false), services, token)
        .run(&modules, &mut recorder)
        .expect_err("cancelled");
    assert!(matches!(err, UpdaterError::Cancelled));
    assert!(recorder.reports.is_empty());
    assert_eq!(std::fs::read(modules[0].path()).expect("read"), b"old");
}
