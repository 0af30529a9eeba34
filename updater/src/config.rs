//! Configuration resolution.
//!
//! Settings are layered, highest precedence first:
//!
//! 1. command-line flags;
//! 2. the environment (`GITHUB_TOKEN` for the credential);
//! 3. a TOML file, either the one named by `--config` or `config.toml` in
//!    the platform configuration directory;
//! 4. built-in defaults.
//!
//! The file is only ever read. Blank strings at any layer count as unset.

use std::fmt;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use log::debug;
use serde::Deserialize;

use crate::cli::Cli;
use crate::dirs::BaseDirs;
use crate::error::{Result, UpdaterError};
use crate::retry::RetryPolicy;

/// Environment variable consulted for the GitHub token.
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";
/// Default GitHub REST API base.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";
/// Default GitHub web base, used for feeds and release downloads.
pub const DEFAULT_WEB_BASE: &str = "https://github.com";
/// Repository publishing ResoniteModLoader and its Harmony build.
pub const DEFAULT_LIBRARY_SOURCE: &str =
    "https://github.com/resonite-modding-group/ResoniteModLoader";
/// Per-request timeout used when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const CONFIG_FILE_NAME: &str = "config.toml";
const STEAM_MODS_SUFFIX: [&str; 4] = ["steamapps", "common", "Resonite", "rml_mods"];

/// A GitHub token.
///
/// The value is only reachable through [`Credential::expose`]; both `Debug`
/// and `Display` print a fixed mask.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap `token`, returning `None` when it is blank.
    ///
    /// # Examples
    ///
    /// ```
    /// use resonite_mod_updater::config::Credential;
    ///
    /// assert!(Credential::new("  ").is_none());
    /// let token = Credential::new("ghp_secret").unwrap();
    /// assert_eq!(token.to_string(), "********");
    /// assert_eq!(token.expose(), "ghp_secret");
    /// ```
    #[must_use]
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        let trimmed = token.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_owned()))
    }

    /// The raw token, for building the `Authorization` header.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(********)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("********")
    }
}

/// Base URLs of the upstream host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamEndpoints {
    /// REST API base, without a trailing slash.
    pub api_base: String,
    /// Web base, without a trailing slash.
    pub web_base: String,
}

impl Default for UpstreamEndpoints {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_owned(),
            web_base: DEFAULT_WEB_BASE.to_owned(),
        }
    }
}

/// Contents of the optional TOML settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Mods folder.
    pub mods_folder: Option<Utf8PathBuf>,
    /// GitHub token.
    pub token: Option<String>,
    /// Dry-run mode.
    pub dry_run: Option<bool>,
    /// Repository publishing the support libraries.
    pub library_source: Option<String>,
    /// Skip support library updates.
    pub skip_libraries: Option<bool>,
    /// GitHub REST API base URL.
    pub api_base_url: Option<String>,
    /// GitHub web base URL.
    pub web_base_url: Option<String>,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: Option<u64>,
    /// Whole-run timeout in seconds.
    pub run_timeout_secs: Option<u64>,
    /// Retries after the first rate-limited response.
    pub max_retries: Option<u32>,
    /// Step of the escalating rate-limit delay in seconds.
    pub retry_base_delay_secs: Option<u64>,
}

impl FileConfig {
    /// Parse settings from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`UpdaterError::Config`] for malformed TOML or unknown keys.
    pub fn from_toml(text: &str, origin: &Utf8Path) -> Result<Self> {
        toml::from_str(text).map_err(|err| UpdaterError::Config {
            reason: format!("{origin}: {err}"),
        })
    }
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterConfig {
    /// Folder holding the mod assemblies.
    pub mods_dir: Utf8PathBuf,
    /// Token selecting the authenticated release API.
    pub credential: Option<Credential>,
    /// Report updates without writing files.
    pub dry_run: bool,
    /// Repository link used for the support libraries.
    pub library_source: String,
    /// Whether support libraries are updated after the mods.
    pub update_libraries: bool,
    /// Upstream base URLs.
    pub endpoints: UpstreamEndpoints,
    /// Timeout applied to each HTTP request.
    pub request_timeout: Duration,
    /// Deadline for the whole run.
    pub run_timeout: Option<Duration>,
    /// Rate-limit retry policy.
    pub retry: RetryPolicy,
}

impl UpdaterConfig {
    /// Resolve settings from the command line, environment, settings file
    /// and defaults.
    ///
    /// # Errors
    ///
    /// Returns [`UpdaterError::Config`] when an explicitly named settings
    /// file cannot be read, any settings file is malformed, no mods folder
    /// can be determined, or the mods folder is not a directory.
    pub fn resolve(cli: &Cli, dirs: &dyn BaseDirs) -> Result<Self> {
        let file = load_file_config(cli.config.as_deref(), dirs)?;
        let env_token = std::env::var(TOKEN_ENV).ok();
        let config = Self::merge(cli, env_token, file, dirs)?;
        if !config.mods_dir.is_dir() {
            return Err(UpdaterError::Config {
                reason: format!("mods folder {} is not a directory", config.mods_dir),
            });
        }
        Ok(config)
    }

    /// Combine the layers without touching the filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`UpdaterError::Config`] when no mods folder is configured and
    /// no default can be derived.
    pub fn merge(
        cli: &Cli,
        env_token: Option<String>,
        file: FileConfig,
        dirs: &dyn BaseDirs,
    ) -> Result<Self> {
        let mods_dir = non_blank_path(cli.mods_folder.clone())
            .or_else(|| non_blank_path(file.mods_folder))
            .or_else(|| default_mods_dir(dirs))
            .ok_or_else(|| UpdaterError::Config {
                reason: "mods folder path is not configured; pass it as an argument".to_owned(),
            })?;

        let credential = cli
            .token
            .clone()
            .and_then(Credential::new)
            .or_else(|| env_token.and_then(Credential::new))
            .or_else(|| file.token.and_then(Credential::new));

        let library_source = non_blank(cli.library_source.clone())
            .or_else(|| non_blank(file.library_source))
            .unwrap_or_else(|| DEFAULT_LIBRARY_SOURCE.to_owned());

        let defaults = UpstreamEndpoints::default();
        let endpoints = UpstreamEndpoints {
            api_base: base_url(file.api_base_url, defaults.api_base),
            web_base: base_url(file.web_base_url, defaults.web_base),
        };

        let default_retry = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: file.max_retries.unwrap_or(default_retry.max_retries),
            base_delay: file
                .retry_base_delay_secs
                .map_or(default_retry.base_delay, Duration::from_secs),
            max_delay: default_retry.max_delay,
        };

        let config = Self {
            mods_dir,
            credential,
            dry_run: cli.dry_run || file.dry_run.unwrap_or(false),
            library_source,
            update_libraries: !(cli.skip_libraries || file.skip_libraries.unwrap_or(false)),
            endpoints,
            request_timeout: file
                .request_timeout_secs
                .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_secs),
            run_timeout: cli
                .timeout
                .or(file.run_timeout_secs)
                .map(Duration::from_secs),
            retry,
        };
        debug!(
            "resolved configuration: mods_dir={}, authenticated={}, dry_run={}",
            config.mods_dir,
            config.credential.is_some(),
            config.dry_run
        );
        Ok(config)
    }
}

/// Load the settings file named on the command line, or the default one if
/// it exists.
///
/// # Errors
///
/// Returns [`UpdaterError::Config`] when the explicit file is missing or any
/// file cannot be read or parsed.
pub fn load_file_config(explicit: Option<&Utf8Path>, dirs: &dyn BaseDirs) -> Result<FileConfig> {
    let path = match explicit {
        Some(path) => path.to_owned(),
        None => match default_config_path(dirs) {
            Some(path) if path.is_file() => path,
            _ => return Ok(FileConfig::default()),
        },
    };
    debug!("reading settings from {path}");
    let text = std::fs::read_to_string(&path).map_err(|err| UpdaterError::Config {
        reason: format!("cannot read {path}: {err}"),
    })?;
    FileConfig::from_toml(&text, &path)
}

/// `config.toml` inside the platform configuration directory.
#[must_use]
pub fn default_config_path(dirs: &dyn BaseDirs) -> Option<Utf8PathBuf> {
    let dir = Utf8PathBuf::from_path_buf(dirs.updater_config_dir()?).ok()?;
    Some(dir.join(CONFIG_FILE_NAME))
}

/// The mods folder of a default Steam install of Resonite.
#[must_use]
pub fn default_mods_dir(dirs: &dyn BaseDirs) -> Option<Utf8PathBuf> {
    let steam_root = steam_root(dirs)?;
    Some(
        STEAM_MODS_SUFFIX
            .iter()
            .fold(steam_root, |path, part| path.join(part)),
    )
}

#[cfg(windows)]
fn steam_root(_dirs: &dyn BaseDirs) -> Option<Utf8PathBuf> {
    let program_files = std::env::var("ProgramFiles(x86)")
        .unwrap_or_else(|_| r"C:\Program Files (x86)".to_owned());
    Some(Utf8PathBuf::from(program_files).join("Steam"))
}

#[cfg(not(windows))]
fn steam_root(dirs: &dyn BaseDirs) -> Option<Utf8PathBuf> {
    let home = Utf8PathBuf::from_path_buf(dirs.home_dir()?).ok()?;
    Some(home.join(".steam").join("steam"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

fn non_blank_path(value: Option<Utf8PathBuf>) -> Option<Utf8PathBuf> {
    value.filter(|path| !path.as_str().trim().is_empty())
}

fn base_url(value: Option<String>, default: String) -> String {
    non_blank(value)
        .map(|url| url.trim_end_matches('/').to_owned())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
