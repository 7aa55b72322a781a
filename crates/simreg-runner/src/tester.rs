//! Regression test driver
//!
//! Runs the stages of one regression run in order: library check, catalog,
//! parallel simulation, feed check, verification and cleanup.

#![allow(clippy::cast_possible_truncation)]

use crate::catalog::{CatalogOptions, SCRIPT_SUBDIR, TestCatalog};
use crate::command::{RealSimulatorRunner, SimulatorRunner};
use crate::config::RunnerConfig;
use crate::error::{Error, Result};
use crate::feed::{FeedSummary, check_feed};
use crate::parallel::{ParallelConfig, ParallelRunner};
use crate::reporter::{ExitStatus, Reporter};
use crate::review::ReviewPolicy;
use crate::sandbox::STATISTICS_FILE;
use crate::verify::{VerificationSummary, Verifier, VerifyOptions};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Check that `root` looks like a library
///
/// # Errors
///
/// Returns [`Error::InvalidLibrary`] if `package.mo` or the `Resources/Scripts`
/// directory is missing.
pub fn validate_library(root: &Path) -> Result<()> {
    if !root.join("package.mo").is_file() {
        return Err(Error::InvalidLibrary(format!(
            "{} is not a library: package.mo is missing.",
            root.display()
        )));
    }
    let scripts = root.join(SCRIPT_SUBDIR);
    let resources = scripts.parent().unwrap_or(&scripts);
    if !resources.is_dir() {
        return Err(Error::InvalidLibrary(format!(
            "{} is not a library: {} is missing.",
            root.display(),
            resources.display()
        )));
    }
    Ok(())
}

/// What one run produced, kept for inspection after [`Tester::run`]
#[derive(Debug, Clone, Default)]
pub struct TestRun {
    /// Tests sent to the simulator
    pub dispatched: usize,
    /// Slots used
    pub slots: usize,
    /// Scripts whose slot failed
    pub failed_scripts: Vec<String>,
    /// Result of checking the statistics feed
    pub feed: Option<FeedSummary>,
    /// Result of the verification stage, unless it was skipped
    pub verification: Option<VerificationSummary>,
    /// Wall time in milliseconds
    pub duration_ms: u64,
}

/// Runs the regression tests of one library
pub struct Tester {
    library_root: PathBuf,
    config: RunnerConfig,
    runner: Box<dyn SimulatorRunner>,
    policy: ReviewPolicy,
    log_dir: PathBuf,
    sandbox_parent: Option<PathBuf>,
    reporter: Reporter,
    last_run: Option<TestRun>,
}

impl std::fmt::Debug for Tester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tester")
            .field("library_root", &self.library_root)
            .field("config", &self.config)
            .field("policy", &self.policy)
            .field("log_dir", &self.log_dir)
            .finish_non_exhaustive()
    }
}

impl Tester {
    /// Tester that launches the configured simulator and writes logs to the
    /// current directory
    #[must_use]
    pub fn new(library_root: impl Into<PathBuf>, config: RunnerConfig) -> Self {
        let policy = if config.batch {
            ReviewPolicy::batch()
        } else {
            ReviewPolicy::interactive()
        };
        let runner = Box::new(RealSimulatorRunner::new(config.simulator.clone()));
        let log_dir = PathBuf::from(".");
        let reporter = Reporter::new(log_dir.join(config.unit_test_log()));
        Self {
            library_root: library_root.into(),
            config,
            runner,
            policy,
            log_dir,
            sandbox_parent: None,
            reporter,
            last_run: None,
        }
    }

    /// Use another simulator runner
    #[must_use]
    pub fn with_runner(mut self, runner: Box<dyn SimulatorRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Use another review policy
    #[must_use]
    pub fn with_policy(mut self, policy: ReviewPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Write the logs into `dir`
    #[must_use]
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self.reporter = Reporter::new(self.log_dir.join(self.config.unit_test_log()));
        self
    }

    /// Create the sandboxes below `dir` instead of the system temporary directory
    #[must_use]
    pub fn with_sandbox_parent(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sandbox_parent = Some(dir.into());
        self
    }

    /// Reporter of this tester
    #[must_use]
    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Review policy after the last run; answers like `Y` are sticky
    #[must_use]
    pub fn policy(&self) -> &ReviewPolicy {
        &self.policy
    }

    /// Details of the last run, if it got past the catalog
    #[must_use]
    pub fn last_run(&self) -> Option<&TestRun> {
        self.last_run.as_ref()
    }

    /// Path of a log file inside the log directory
    #[must_use]
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.log_dir.join(name)
    }

    /// Run all stages and return the process exit status
    pub fn run(&mut self) -> ExitStatus {
        let start = Instant::now();
        let status = self.run_stages(start);
        self.reporter.output(format!(
            "Execution time = {:.3} s",
            start.elapsed().as_secs_f64()
        ));
        status
    }

    fn run_stages(&mut self, start: Instant) -> ExitStatus {
        if let Err(e) = validate_library(&self.library_root) {
            self.reporter.error(e.to_string());
            return ExitStatus::InvalidLibrary;
        }
        if self.config.use_existing_results.is_empty() && !self.runner.is_available() {
            self.reporter.error(format!(
                "Executable '{}' not found. Add it to PATH or set 'simulator'.",
                self.config.simulator
            ));
            return ExitStatus::SimulatorNotFound;
        }

        let options = CatalogOptions::from_config(&self.config);
        let catalog = match TestCatalog::build(&self.library_root, &options, &self.reporter) {
            Ok(catalog) => catalog,
            // each catalog problem has been reported already
            Err(Error::Catalog(_)) => return self.reporter.flush_summary(),
            Err(e) => {
                self.reporter.error(e.to_string());
                return self.reporter.flush_summary();
            }
        };

        let parallel = ParallelConfig {
            sandbox_parent: self.sandbox_parent.clone(),
            ..ParallelConfig::from_config(&self.config)
        };
        let mut result = match ParallelRunner::new(parallel, self.runner.as_ref()).run(&catalog, &self.reporter) {
            Ok(result) => result,
            Err(e) => {
                self.reporter.error(e.to_string());
                return self.reporter.flush_summary();
            }
        };

        let mut run = TestRun {
            dispatched: result.outcomes.len(),
            slots: result.slot_count(),
            failed_scripts: result.failed_scripts().into_iter().map(str::to_string).collect(),
            ..TestRun::default()
        };

        let simulator_log = self.log_path(&self.config.simulator_log());
        if let Err(e) = result.write_simulator_log(&simulator_log) {
            self.reporter.error(format!("Failed to write {}: {e}", simulator_log.display()));
        }
        let statistics_log = self.log_path(STATISTICS_FILE);
        if let Err(e) = result.feed.write(&statistics_log) {
            self.reporter.error(format!("Failed to write {}: {e}", statistics_log.display()));
        }
        let failed_log = self.log_path(&self.config.failed_simulator_log());
        match check_feed(&result.feed, &failed_log, &self.reporter) {
            Ok(summary) => run.feed = Some(summary),
            Err(e) => self.reporter.error(format!("Failed to check the statistics feed: {e}")),
        }

        if self.config.skip_verification {
            tracing::info!("skipping verification");
        } else {
            let verifier = Verifier::new(VerifyOptions::from_config(&self.config));
            let summary = verifier.verify(&catalog, &result.outcomes, &mut self.policy, &self.reporter);
            let comparison_log = self.log_path(&self.config.comparison_log());
            if let Err(e) = summary.write_log(&comparison_log) {
                self.reporter.error(format!("Failed to write {}: {e}", comparison_log.display()));
            }
            run.verification = Some(summary);
        }

        result.release_sandboxes(self.config.keep_sandboxes, &self.reporter);
        run.duration_ms = start.elapsed().as_millis() as u64;
        let mismatch = run
            .verification
            .as_ref()
            .is_some_and(VerificationSummary::has_failures);
        self.last_run = Some(run);

        let status = self.reporter.flush_summary();
        if mismatch {
            ExitStatus::ReferenceMismatch
        } else {
            status
        }
    }
}
