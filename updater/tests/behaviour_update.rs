//! BDD tests for complete update runs against scripted upstream responses.

use std::collections::HashMap;
use std::time::Duration;

use camino::Utf8PathBuf;
use clr_metadata::fixture::{AssemblyBuilder, PropertyFixture, TypeFixture, mod_assembly};
use resonite_mod_updater::config::{Credential, UpdaterConfig, UpstreamEndpoints};
use resonite_mod_updater::error::UpdaterError;
use resonite_mod_updater::http::HttpResponse;
use resonite_mod_updater::orchestrator::{RunSummary, UpdateServices, run_update};
use resonite_mod_updater::outcome::{ModuleReport, SyncOutcome};
use resonite_mod_updater::output::{ConsoleObserver, status_text};
use resonite_mod_updater::retry::{CancellationToken, RetryPolicy};
use resonite_mod_updater::scanner::ClrLinkExtractor;
use resonite_mod_updater::test_support::{RecordingSleeper, ScriptedHttpClient};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

type RunResult = Result<RunSummary, UpdaterError>;

#[derive(Default)]
struct UpdateWorld {
    _temp_dir: Option<tempfile::TempDir>,
    mods_dir: Option<Utf8PathBuf>,
    links: HashMap<String, String>,
    originals: HashMap<String, Vec<u8>>,
    new_builds: HashMap<String, Vec<u8>>,
    client: ScriptedHttpClient,
    sleeper: RecordingSleeper,
    token: Option<String>,
    dry_run: bool,
    first_run: Option<RunResult>,
    result: Option<RunResult>,
}

impl UpdateWorld {
    fn mods_dir(&self) -> &Utf8PathBuf {
        self.mods_dir.as_ref().expect("mods_dir set")
    }

    fn install(&mut self, name: &str, bytes: Vec<u8>) {
        std::fs::write(self.mods_dir().join(name), &bytes).expect("write mod");
        self.originals.insert(name.to_owned(), bytes);
    }

    fn config(&self) -> UpdaterConfig {
        UpdaterConfig {
            mods_dir: self.mods_dir().clone(),
            credential: self.token.clone().and_then(Credential::new),
            dry_run: self.dry_run,
            library_source: "https://github.com/acme/loader".to_owned(),
            update_libraries: false,
            endpoints: UpstreamEndpoints::default(),
            request_timeout: Duration::from_secs(5),
            run_timeout: None,
            retry: RetryPolicy::default(),
        }
    }

    fn run_once(&self) -> RunResult {
        let services = UpdateServices {
            client: &self.client,
            sleeper: &self.sleeper,
            extractor: &ClrLinkExtractor,
        };
        let mut output = Vec::new();
        let mut observer = ConsoleObserver::new(&mut output, self.dry_run);
        run_update(&self.config(), services, &mut observer, CancellationToken::new())
    }

    fn new_build_for(&mut self, file_name: &str) -> Vec<u8> {
        let link = self.links.get(file_name).cloned().expect("mod installed");
        let bytes = new_build(&link);
        self.new_builds.insert(file_name.to_owned(), bytes.clone());
        bytes
    }

    fn file_content(&self, name: &str) -> Vec<u8> {
        std::fs::read(self.mods_dir().join(name)).expect("read mod")
    }
}

fn new_build(link: &str) -> Vec<u8> {
    AssemblyBuilder::new()
        .with_type(
            TypeFixture::new("ExampleMod", "ExampleMod")
                .extends("ResoniteModLoader", "ResoniteMod")
                .with_property(PropertyFixture::returning("Version", "2.0.0"))
                .with_property(PropertyFixture::returning("Link", link)),
        )
        .build()
}

fn report<'a>(summary: &'a RunSummary, name: &str) -> &'a ModuleReport {
    summary
        .reports
        .iter()
        .find(|report| report.file_name == name)
        .unwrap_or_else(|| panic!("no report for {name}"))
}

#[fixture]
fn world() -> UpdateWorld {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).expect("UTF-8 path");
    let mods_dir = root.join("rml_mods");
    std::fs::create_dir(&mods_dir).expect("create mods dir");
    UpdateWorld {
        _temp_dir: Some(temp_dir),
        mods_dir: Some(mods_dir),
        ..Default::default()
    }
}

#[given("a mod \"{name}\" linking to \"{link}\"")]
fn given_linked_mod(world: &mut UpdateWorld, name: String, link: String) {
    world.install(&name, mod_assembly(&link));
    world.links.insert(name, link);
}

#[given("an ignored mod \"{name}\" linking to \"{link}\"")]
fn given_ignored_mod(world: &mut UpdateWorld, name: String, link: String) {
    world.install(&name, mod_assembly(&link));
    world.links.insert(name, link);
}

#[given("a mod \"{name}\" without a link")]
fn given_unlinked_mod(world: &mut UpdateWorld, name: String) {
    world.install(&name, mod_assembly("https://resonite.com"));
}

#[given("the tag feed of \"{repo}\" lists \"{tag}\"")]
fn given_tag_feed(world: &mut UpdateWorld, repo: String, tag: String) {
    let feed = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<feed xmlns="http://www.w3.org/2005/Atom">"#,
            r#"<entry><id>tag:github.com,2008:Repository/1/{tag}</id>"#,
            r#"<link rel="alternate" type="text/html" href="https://github.com/{repo}/releases/tag/{tag}"/>"#,
            r#"<title>{tag}</title></entry></feed>"#
        ),
        repo = repo,
        tag = tag,
    );
    world
        .client
        .respond(format!("https://github.com/{repo}/tags.atom"), HttpResponse::new(200, feed));
}

#[given("release \"{tag}\" of \"{repo}\" publishes a new build of \"{file}\"")]
fn given_release_download(world: &mut UpdateWorld, tag: String, repo: String, file: String) {
    let bytes = world.new_build_for(&file);
    world.client.respond(
        format!("https://github.com/{repo}/releases/download/{tag}/{file}"),
        HttpResponse::new(200, bytes),
    );
}

#[given("dry-run mode")]
fn given_dry_run(world: &mut UpdateWorld) {
    world.dry_run = true;
}

#[given("the token \"{token}\"")]
fn given_token(world: &mut UpdateWorld, token: String) {
    world.token = Some(token);
}

#[given("the release API for \"{repo}\" is rate limited \"{count}\" times")]
fn given_rate_limited(world: &mut UpdateWorld, repo: String, count: String) {
    let count: usize = count.parse().expect("numeric count");
    let url = format!("https://api.github.com/repos/{repo}/releases/latest");
    for _ in 0..count {
        world.client.respond(
            url.as_str(),
            HttpResponse::new(403, "API rate limit exceeded").with_retry_after(Duration::from_secs(1)),
        );
    }
}

#[given("the latest release of \"{repo}\" offers a new build of \"{file}\"")]
fn given_latest_release(world: &mut UpdateWorld, repo: String, file: String) {
    let download = format!("https://github.com/{repo}/releases/download/v1.0.0/{file}");
    let body = format!(
        r#"{{"tag_name": "v1.0.0", "assets": [{{"name": "{file}", "browser_download_url": "{download}"}}]}}"#
    );
    world.client.respond(
        format!("https://api.github.com/repos/{repo}/releases/latest"),
        HttpResponse::new(200, body),
    );
    let bytes = world.new_build_for(&file);
    world.client.respond(download, HttpResponse::new(200, bytes));
}

#[when("the update runs")]
fn when_update_runs(world: &mut UpdateWorld) {
    world.result = Some(world.run_once());
}

#[when("the update runs twice")]
fn when_update_runs_twice(world: &mut UpdateWorld) {
    world.first_run = Some(world.run_once());
    world.result = Some(world.run_once());
}

#[then("\"{name}\" is reported as \"{status}\"")]
fn then_reported_as(world: &mut UpdateWorld, name: String, status: String) {
    let summary = world
        .result
        .as_ref()
        .expect("result set")
        .as_ref()
        .expect("run succeeded");
    let report = report(summary, &name);
    assert_eq!(status_text(&report.outcome, world.dry_run), status);
}

#[then("the first run reported \"{name}\" as \"{status}\"")]
fn then_first_run_reported(world: &mut UpdateWorld, name: String, status: String) {
    let summary = world
        .first_run
        .as_ref()
        .expect("first run set")
        .as_ref()
        .expect("first run succeeded");
    assert_eq!(status_text(&report(summary, &name).outcome, world.dry_run), status);
}

#[then("\"{name}\" was updated from \"{url}\"")]
fn then_updated_from(world: &mut UpdateWorld, name: String, url: String) {
    let summary = world
        .result
        .as_ref()
        .expect("result set")
        .as_ref()
        .expect("run succeeded");
    assert_eq!(
        report(summary, &name).outcome,
        SyncOutcome::Updated { source_url: url }
    );
}

#[then("\"{name}\" holds the new build")]
fn then_holds_new_build(world: &mut UpdateWorld, name: String) {
    let expected = world.new_builds.get(&name).cloned().expect("new build published");
    assert_eq!(world.file_content(&name), expected);
}

#[then("\"{name}\" still holds its original build")]
fn then_holds_original(world: &mut UpdateWorld, name: String) {
    let expected = world.originals.get(&name).cloned().expect("mod installed");
    assert_eq!(world.file_content(&name), expected);
}

#[then("no request was sent")]
fn then_no_request(world: &mut UpdateWorld) {
    assert!(world.client.requests().is_empty());
}

#[then("\"{count}\" retry waits were recorded")]
fn then_retry_waits(world: &mut UpdateWorld, count: String) {
    let count: usize = count.parse().expect("numeric count");
    assert_eq!(world.sleeper.delays(), vec![Duration::from_secs(1); count]);
}

#[then("the run fails because access stayed rate limited")]
fn then_rate_limited(world: &mut UpdateWorld) {
    let result = world.result.as_ref().expect("result set");
    assert!(
        matches!(result, Err(UpdaterError::RateLimited { attempts: 4, .. })),
        "unexpected result: {result:?}"
    );
}

#[scenario(
    path = "tests/features/update_run.feature",
    name = "A newer tag replaces the mod"
)]
fn scenario_newer_tag(world: UpdateWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/update_run.feature",
    name = "A dry run only reports the update"
)]
fn scenario_dry_run(world: UpdateWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/update_run.feature",
    name = "Updating twice leaves the mod up to date"
)]
fn scenario_idempotent(world: UpdateWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/update_run.feature",
    name = "Ignored mods are never checked"
)]
fn scenario_ignored(world: UpdateWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/update_run.feature",
    name = "Rate limiting is retried until the API answers"
)]
fn scenario_rate_limit_recovers(world: UpdateWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/update_run.feature",
    name = "Persistent rate limiting aborts the run"
)]
fn scenario_rate_limit_exhausted(world: UpdateWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/update_run.feature",
    name = "Mods without usable links are reported"
)]
fn scenario_unusable_links(world: UpdateWorld) {
    let _ = world;
}
