//! Resonite mod updater CLI entrypoint.
//!
//! Resolves the configuration, checks every mod in the mods folder against
//! its upstream releases and prints one status line per mod. Logs go to
//! stderr; status output goes to stdout.

use std::io::Write;

use clap::Parser;
use resonite_mod_updater::cli::Cli;
use resonite_mod_updater::config::UpdaterConfig;
use resonite_mod_updater::dirs::SystemBaseDirs;
use resonite_mod_updater::error::Result;
use resonite_mod_updater::http::UreqClient;
use resonite_mod_updater::orchestrator::{UpdateServices, run_update};
use resonite_mod_updater::output::{ConsoleObserver, write_line};
use resonite_mod_updater::retry::{CancellationToken, ThreadSleeper};
use resonite_mod_updater::scanner::ClrLinkExtractor;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);
    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    let run_result = run(&cli, &mut stdout);
    let exit_code = exit_code_for_run_result(run_result, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn run(cli: &Cli, out: &mut dyn Write) -> Result<()> {
    let config = UpdaterConfig::resolve(cli, &SystemBaseDirs)?;
    let token = config
        .run_timeout
        .map_or_else(CancellationToken::new, CancellationToken::with_timeout);

    let client = UreqClient::new(config.request_timeout);
    let services = UpdateServices {
        client: &client,
        sleeper: &ThreadSleeper,
        extractor: &ClrLinkExtractor,
    };

    let mut observer = ConsoleObserver::new(out, config.dry_run);
    let summary = run_update(&config, services, &mut observer, token)?;
    observer.finish(&summary);
    Ok(())
}

/// Install the stderr subscriber. `RUST_LOG` wins over `-v`/`-q`.
fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_directive(cli.verbosity, cli.quiet)));
    // Fails only when a subscriber is already installed.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn log_directive(verbosity: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn exit_code_for_run_result(result: Result<()>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            write_line(stderr, format!("error: {err}"));
            1
        }
    }
}
