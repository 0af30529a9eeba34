//! Console presentation of run progress.
//!
//! One status line is printed per finished module. After the batch the
//! failures are listed together, followed by a closing line.

use std::fmt::Display;
use std::io::Write;

use crate::libraries::skipped_message;
use crate::orchestrator::{RunObserver, RunSummary};
use crate::outcome::{ModuleReport, SyncOutcome};

/// Symbol for a module that was or would be updated.
pub const SYMBOL_UPDATE: &str = "+";
/// Symbol for a module left as it was.
pub const SYMBOL_NO_CHANGE: &str = "-";
/// Symbol for a module that needs attention.
pub const SYMBOL_ISSUE: &str = "/";

/// Symbol printed in front of `outcome`.
#[must_use]
pub const fn status_symbol(outcome: &SyncOutcome) -> &'static str {
    match outcome {
        SyncOutcome::Updated { .. } => SYMBOL_UPDATE,
        SyncOutcome::UpToDate | SyncOutcome::Ignored => SYMBOL_NO_CHANGE,
        SyncOutcome::NoLinkFound | SyncOutcome::InvalidLink | SyncOutcome::Error(_) => {
            SYMBOL_ISSUE
        }
    }
}

/// Human-readable status of `outcome`.
#[must_use]
pub const fn status_text(outcome: &SyncOutcome, dry_run: bool) -> &'static str {
    match outcome {
        SyncOutcome::Updated { .. } if dry_run => "Update Available",
        SyncOutcome::Updated { .. } => "Updated",
        SyncOutcome::UpToDate => "Up To Date",
        SyncOutcome::NoLinkFound => "No Link variable found",
        SyncOutcome::InvalidLink => "Invalid Link variable, no releases found",
        SyncOutcome::Ignored => "Ignored",
        SyncOutcome::Error(_) => "Something went Wrong",
    }
}

/// The status line for one finished module.
///
/// # Examples
///
/// ```
/// use resonite_mod_updater::outcome::{ModuleReport, SyncOutcome};
/// use resonite_mod_updater::output::status_line;
///
/// let report = ModuleReport::new("Foo.dll", SyncOutcome::UpToDate);
/// assert_eq!(status_line(&report, false), "- Foo.dll: Up To Date");
/// ```
#[must_use]
pub fn status_line(report: &ModuleReport, dry_run: bool) -> String {
    let mut line = format!(
        "{} {}: {}",
        status_symbol(&report.outcome),
        report.file_name,
        status_text(&report.outcome, dry_run)
    );
    if let SyncOutcome::Updated { source_url } = &report.outcome {
        line.push(' ');
        line.push_str(source_url);
    }
    line
}

/// The list of failed modules, or `None` when nothing failed.
#[must_use]
pub fn error_summary(summary: &RunSummary) -> Option<String> {
    let lines: Vec<String> = summary
        .errors()
        .map(|(file_name, err)| match &err.url {
            Some(url) => format!("  {file_name}: {} [{url}]", err.message),
            None => format!("  {file_name}: {}", err.message),
        })
        .collect();
    (!lines.is_empty()).then(|| format!("Errors:\n{}", lines.join("\n")))
}

/// Line printed once the batch is complete.
#[must_use]
pub const fn closing_line(dry_run: bool) -> &'static str {
    if dry_run {
        "Finished checking mod updates."
    } else {
        "Finished updating mods."
    }
}

/// Write `message` and a newline, ignoring write failures.
pub fn write_line(out: &mut dyn Write, message: impl Display) {
    if writeln!(out, "{message}").is_err() {
        // Console output is best effort.
    }
}

/// [`RunObserver`] printing status lines as modules finish.
pub struct ConsoleObserver<'w> {
    out: &'w mut dyn Write,
    dry_run: bool,
}

impl<'w> ConsoleObserver<'w> {
    /// An observer writing to `out`.
    #[must_use]
    pub fn new(out: &'w mut dyn Write, dry_run: bool) -> Self {
        Self { out, dry_run }
    }

    /// Print the error list and the closing line for `summary`.
    pub fn finish(&mut self, summary: &RunSummary) {
        if let Some(errors) = error_summary(summary) {
            write_line(self.out, "");
            write_line(self.out, errors);
        }
        write_line(self.out, "");
        write_line(self.out, closing_line(self.dry_run));
    }
}

impl RunObserver for ConsoleObserver<'_> {
    fn module_finished(&mut self, report: &ModuleReport) {
        write_line(self.out, status_line(report, self.dry_run));
    }

    fn library_skipped(&mut self, file_name: &str) {
        write_line(self.out, skipped_message(file_name));
    }
}
