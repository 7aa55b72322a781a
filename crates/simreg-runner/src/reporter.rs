//! Warning and error accounting
//!
//! Every component funnels user-facing diagnostics through one [`Reporter`].
//! The final counts decide the process exit status.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Process exit status of a regression run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// No errors and no warnings
    Success,
    /// At least one error was reported
    ErrorsReported,
    /// Only warnings were reported
    WarningsOnly,
    /// The library root is not a valid library
    InvalidLibrary,
    /// Results differ from the references, or extracting them failed
    ReferenceMismatch,
    /// The simulator executable could not be located
    SimulatorNotFound,
}

impl ExitStatus {
    /// Numeric process exit code
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::ErrorsReported => 1,
            Self::WarningsOnly => 2,
            Self::InvalidLibrary => 3,
            Self::ReferenceMismatch => 4,
            Self::SimulatorNotFound => 5,
        }
    }

    /// True for [`ExitStatus::Success`]
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

#[derive(Debug, Default)]
struct Counts {
    warnings: usize,
    errors: usize,
}

/// Collects warnings, errors and plain output for one run
///
/// Created at run start, flushed at run end. Shared by reference; the
/// counters are behind a mutex so worker slots may report concurrently.
#[derive(Debug)]
pub struct Reporter {
    log_file: Option<PathBuf>,
    verbose: bool,
    echo: bool,
    counts: Mutex<Counts>,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Reporter {
    /// Reporter that appends to `log_file`, deleting any previous log
    #[must_use]
    pub fn new(log_file: impl Into<PathBuf>) -> Self {
        let log_file = log_file.into();
        if log_file.is_file() {
            if let Err(e) = std::fs::remove_file(&log_file) {
                tracing::debug!(path = %log_file.display(), error = %e, "could not remove old log");
            }
        }
        Self {
            log_file: Some(log_file),
            verbose: true,
            echo: true,
            counts: Mutex::new(Counts::default()),
        }
    }

    /// Reporter that only counts, without log file or console echo
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            log_file: None,
            verbose: true,
            echo: false,
            counts: Mutex::new(Counts::default()),
        }
    }

    /// Enable or disable the `*** Error: ` / `*** Warning: ` prefixes
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Path of the log file, if any
    #[must_use]
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    /// Record an error
    pub fn error(&self, message: impl AsRef<str>) {
        if let Ok(mut counts) = self.counts.lock() {
            counts.errors += 1;
        }
        self.write_diagnostic(true, message.as_ref());
    }

    /// Record a warning
    pub fn warning(&self, message: impl AsRef<str>) {
        if let Ok(mut counts) = self.counts.lock() {
            counts.warnings += 1;
        }
        self.write_diagnostic(false, message.as_ref());
    }

    /// Write an informational line; does not affect the counts
    pub fn output(&self, message: impl AsRef<str>) {
        let msg = format!("{}\n", message.as_ref());
        self.append_to_log(&msg);
        if self.echo {
            print!("{msg}");
        }
    }

    /// Number of errors reported so far
    #[must_use]
    pub fn errors(&self) -> usize {
        self.counts.lock().map_or(0, |c| c.errors)
    }

    /// Number of warnings reported so far
    #[must_use]
    pub fn warnings(&self) -> usize {
        self.counts.lock().map_or(0, |c| c.warnings)
    }

    /// Exit status implied by the counts
    #[must_use]
    pub fn exit_status(&self) -> ExitStatus {
        if self.errors() > 0 {
            ExitStatus::ErrorsReported
        } else if self.warnings() > 0 {
            ExitStatus::WarningsOnly
        } else {
            ExitStatus::Success
        }
    }

    /// Write the closing summary and return the implied exit status
    pub fn flush_summary(&self) -> ExitStatus {
        self.output(format!(
            "Script that runs unit tests had {} warnings and {} errors.",
            self.warnings(),
            self.errors()
        ));
        let status = self.exit_status();
        if status.is_success() {
            self.output("Unit tests completed successfully.");
        }
        if let Some(log) = &self.log_file {
            println!("See '{}' for details.", log.display());
        }
        status
    }

    fn write_diagnostic(&self, is_error: bool, message: &str) {
        let mut msg = String::new();
        if self.verbose {
            msg.push_str(if is_error { "*** Error: " } else { "*** Warning: " });
        }
        msg.push_str(message);
        msg.push('\n');
        if self.echo {
            eprint!("{msg}");
        }
        self.append_to_log(&msg);
    }

    fn append_to_log(&self, msg: &str) {
        let Some(path) = &self.log_file else {
            return;
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(msg.as_bytes()));
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to append to log file");
        }
    }
}
