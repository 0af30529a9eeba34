//! CLI argument definitions for the updater.
//!
//! Every option is optional: anything left unset falls back to the
//! configuration file, then the environment, then built-in defaults. See
//! [`crate::config`] for the precedence rules.

use camino::Utf8PathBuf;
use clap::Parser;

/// Update Resonite mods from their GitHub releases.
#[derive(Parser, Debug, Clone, Default, PartialEq, Eq)]
#[command(name = "resonite-mod-updater")]
#[command(version, about)]
#[command(long_about = concat!(
    "Update Resonite mods from their GitHub releases.\n\n",
    "Each mod in the mods folder is inspected for the Link property of its ",
    "ResoniteMod subclass. Linked mods are compared against the latest release ",
    "of that repository and replaced only when the published file differs.\n\n",
    "Without a token the public tags feed is used; with a token the GitHub ",
    "releases API is queried instead. Files whose names start with an ",
    "underscore are left alone.",
))]
#[command(after_help = concat!(
    "EXAMPLES:\n",
    "  Update mods in the default Steam location:\n",
    "    $ resonite-mod-updater\n\n",
    "  Check a specific folder without changing anything:\n",
    "    $ resonite-mod-updater ~/Resonite/rml_mods --dry\n\n",
    "  Use the GitHub API with a token:\n",
    "    $ resonite-mod-updater --token ghp_xxxxxxxx\n",
))]
pub struct Cli {
    /// Path to the Resonite mods folder [default: Steam install location].
    #[arg(value_name = "MODS_FOLDER")]
    pub mods_folder: Option<Utf8PathBuf>,

    /// GitHub token for the official API; falls back to GITHUB_TOKEN.
    #[arg(short, long, value_name = "TOKEN")]
    pub token: Option<String>,

    /// Check for updates without installing them.
    #[arg(short, long = "dry")]
    pub dry_run: bool,

    /// Read settings from this TOML file instead of the default location.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<Utf8PathBuf>,

    /// Repository that publishes ResoniteModLoader and Harmony.
    #[arg(long, value_name = "URL")]
    pub library_source: Option<String>,

    /// Do not update ResoniteModLoader and Harmony after the mods.
    #[arg(long)]
    pub skip_libraries: bool,

    /// Abort the whole run after this many seconds.
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Increase log verbosity (repeatable: -v, -vv, -vvv).
    #[arg(
        short,
        long = "verbose",
        action = clap::ArgAction::Count,
        conflicts_with = "quiet"
    )]
    pub verbosity: u8,

    /// Only log errors.
    #[arg(short, long, conflicts_with = "verbosity")]
    pub quiet: bool,
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
