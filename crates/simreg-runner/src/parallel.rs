//! Parallel execution support using Rayon
//!
//! Tests are dealt round-robin onto worker slots. Each slot copies the
//! library into its own sandbox, runs the simulator once over its share of
//! the tests and is collected after every slot has finished.

use crate::catalog::{TestCatalog, TestRecord};
use crate::command::{CommandOutput, Invocation, SimulatorRunner};
use crate::config::RunnerConfig;
use crate::error::{Error, Result};
use crate::feed::StatisticsFeed;
use crate::outcome::RunOutcome;
use crate::process::Deadline;
use crate::reporter::Reporter;
use crate::sandbox::Sandbox;
use rayon::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Lifecycle of a worker slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Nothing prepared yet
    Idle,
    /// Library copied and driver written
    Sandboxed,
    /// Simulator process has ended
    Dispatched,
    /// Statistics feed read
    Collected,
}

/// Parallel runner configuration
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Requested number of slots
    pub num_workers: usize,
    /// Upper bound on the slots, normally the number of CPUs
    pub available_cpus: usize,
    /// Tool name written into the driver header
    pub tool: String,
    /// Arguments passed to the simulator
    pub simulator_args: Vec<String>,
    /// Per-slot deadline and escalation
    pub deadline: Deadline,
    /// Directories of an earlier run to collect instead of simulating
    pub use_existing_results: Vec<PathBuf>,
    /// Parent directory of the sandboxes; the system temporary directory if unset
    pub sandbox_parent: Option<PathBuf>,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self::from_config(&RunnerConfig::default())
    }
}

impl ParallelConfig {
    /// Slot settings taken from a runner configuration
    #[must_use]
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            num_workers: config.workers,
            available_cpus: num_cpus::get(),
            tool: config.tool.clone(),
            simulator_args: config.simulator_args(),
            deadline: Deadline {
                timeout: config.timeout_secs.map(Duration::from_secs),
                poll_interval: Duration::from_millis(config.poll_interval_ms),
                grace: Duration::from_millis(config.termination_grace_ms),
            },
            use_existing_results: config.use_existing_results.clone(),
            sandbox_parent: None,
        }
    }
}

/// Number of slots: the request bounded by the CPUs and the tests, at least one
#[must_use]
pub fn clamp_slots(requested: usize, available_cpus: usize, n_tests: usize) -> usize {
    requested.min(available_cpus).min(n_tests).max(1)
}

/// Deal `items` round-robin onto `n` slots: slot `i` gets `i, i+n, i+2n, ...`
#[must_use]
pub fn partition<T: Clone>(items: &[T], n: usize) -> Vec<Vec<T>> {
    let n = n.max(1);
    (0..n)
        .map(|slot| items.iter().skip(slot).step_by(n).cloned().collect())
        .collect()
}

/// One slot after collection
#[derive(Debug)]
pub struct SlotResult {
    /// Slot index
    pub slot: usize,
    /// Last state reached
    pub state: SlotState,
    /// Sandbox, unless it could not be created
    pub sandbox: Option<Sandbox>,
    /// Scripts of the tests dealt to this slot
    pub scripts: Vec<String>,
    /// How the simulator process ended
    pub output: Option<CommandOutput>,
    /// Statistics written by the driver
    pub feed: Option<StatisticsFeed>,
    /// Why the slot produced no results
    pub failure: Option<String>,
    /// Wall clock time of the slot
    pub duration_ms: u64,
}

/// Result of a parallel run
#[derive(Debug)]
pub struct ParallelResult {
    /// Slots in index order
    pub slots: Vec<SlotResult>,
    /// Feeds of all slots, sorted by script file
    pub feed: StatisticsFeed,
    /// One outcome per dispatched test, sorted by script
    pub outcomes: Vec<RunOutcome>,
    /// Total duration in milliseconds
    pub duration_ms: u64,
}

impl ParallelResult {
    /// Number of slots used
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Scripts of tests that did not produce results
    #[must_use]
    pub fn failed_scripts(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.failure.is_some())
            .map(|o| o.script.as_str())
            .collect()
    }

    /// Outcome of the test running `script`
    #[must_use]
    pub fn outcome(&self, script: &str) -> Option<&RunOutcome> {
        self.outcomes.iter().find(|o| o.script == script)
    }

    /// Concatenate every slot's translation logs into `path`
    ///
    /// # Errors
    ///
    /// Returns an error if a log cannot be read or `path` cannot be written.
    pub fn write_simulator_log(&self, path: &Path) -> Result<()> {
        let mut out = std::fs::File::create(path)?;
        for sandbox in self.slots.iter().filter_map(|s| s.sandbox.as_ref()) {
            if !sandbox.library_dir().is_dir() {
                continue;
            }
            for log in sandbox.translation_logs()? {
                out.write_all(&std::fs::read(&log)?)?;
            }
        }
        Ok(())
    }

    /// Delete the sandboxes, or keep them and report where they are
    ///
    /// Failures to delete are reported as warnings.
    pub fn release_sandboxes(&mut self, keep: bool, reporter: &Reporter) {
        for slot in &mut self.slots {
            let Some(sandbox) = slot.sandbox.take() else {
                continue;
            };
            let root = sandbox.root().to_path_buf();
            match sandbox.release(keep) {
                Ok(Some(path)) if keep => {
                    reporter.output(format!("Kept sandbox {}.", path.display()));
                }
                Ok(_) => {}
                Err(e) => reporter.warning(format!("Failed to delete {}: {e}", root.display())),
            }
        }
    }
}

/// Runs the tests of a catalog over worker slots
pub struct ParallelRunner<'a> {
    config: ParallelConfig,
    runner: &'a dyn SimulatorRunner,
}

impl std::fmt::Debug for ParallelRunner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelRunner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<'a> ParallelRunner<'a> {
    /// Create a runner that launches the simulator through `runner`
    #[must_use]
    pub fn new(config: ParallelConfig, runner: &'a dyn SimulatorRunner) -> Self {
        Self { config, runner }
    }

    /// Tests that go to the simulator
    #[must_use]
    pub fn dispatched(catalog: &TestCatalog) -> Vec<&TestRecord> {
        catalog
            .records()
            .iter()
            .filter(|r| r.is_executable() && r.settings.translate)
            .collect()
    }

    /// Run every dispatched test of `catalog`
    ///
    /// Slot failures are reported per test and do not stop other slots.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the worker pool cannot be created.
    pub fn run(&self, catalog: &TestCatalog, reporter: &Reporter) -> Result<ParallelResult> {
        let start = Instant::now();
        let records = Self::dispatched(catalog);
        let existing = &self.config.use_existing_results;
        let n_slots = if existing.is_empty() {
            clamp_slots(self.config.num_workers, self.config.available_cpus, records.len())
        } else {
            existing.len()
        };
        let groups = partition(&records, n_slots);
        tracing::info!(tests = records.len(), slots = n_slots, "dispatching tests");

        let run_slot = |(slot, group): (usize, &Vec<&TestRecord>)| {
            self.run_slot(catalog, slot, group, n_slots)
        };
        let mut slots: Vec<SlotResult> = if n_slots == 1 {
            groups.iter().enumerate().map(run_slot).collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n_slots)
                .build()
                .map_err(|e| Error::Config(format!("Failed to create worker pool: {e}")))?;
            pool.install(|| groups.par_iter().enumerate().map(run_slot).collect())
        };
        slots.sort_by_key(|s| s.slot);

        let mut outcomes = Vec::with_capacity(records.len());
        for (slot, group) in slots.iter().zip(&groups) {
            if let Some(reason) = &slot.failure {
                for record in group {
                    reporter.error(format!("{}: {reason}", record.model_name));
                    outcomes.push(RunOutcome::failed(record, slot.slot, reason.clone()));
                }
                continue;
            }
            let library_dir = slot
                .sandbox
                .as_ref()
                .map(|s| s.library_dir().to_path_buf())
                .unwrap_or_default();
            for record in group {
                let entry = slot
                    .feed
                    .as_ref()
                    .and_then(|f| f.entry_for(catalog.library(), record.script()));
                outcomes.push(RunOutcome::from_feed(record, slot.slot, entry, &library_dir));
            }
        }
        outcomes.sort_by(|a, b| a.script.cmp(&b.script));

        let feed = StatisticsFeed::merge(slots.iter().filter_map(|s| s.feed.clone()));
        Ok(ParallelResult {
            slots,
            feed,
            outcomes,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn run_slot(&self, catalog: &TestCatalog, slot: usize, group: &[&TestRecord], n_slots: usize) -> SlotResult {
        let start = Instant::now();
        let mut result = SlotResult {
            slot,
            state: SlotState::Idle,
            sandbox: None,
            scripts: group.iter().map(|r| r.script().to_string()).collect(),
            output: None,
            feed: None,
            failure: None,
            duration_ms: 0,
        };

        let reuse = self.config.use_existing_results.get(slot);
        let sandbox = match reuse {
            Some(dir) => Ok(Sandbox::existing(dir, catalog.library(), slot)),
            None => self.create_sandbox(catalog, slot),
        };
        let sandbox = match sandbox {
            Ok(s) => s,
            Err(e) => {
                result.failure = Some(e.to_string());
                return finish(result, start);
            }
        };

        if reuse.is_none() {
            if let Err(e) = sandbox.write_driver(group, &self.config.tool, n_slots) {
                result.failure = Some(format!("Failed to write driver script: {e}"));
                result.sandbox = Some(sandbox);
                return finish(result, start);
            }
            result.state = SlotState::Sandboxed;

            let invocation = Invocation {
                slot,
                working_dir: sandbox.library_dir().to_path_buf(),
                args: self.config.simulator_args.clone(),
                log_file: sandbox.stdout_log(),
                deadline: self.config.deadline,
            };
            let output = self.runner.run(&invocation);
            result.state = SlotState::Dispatched;
            if output.timed_out {
                let timeout = self.config.deadline.timeout.unwrap_or_default();
                result.failure = Some(
                    Error::Timeout {
                        slot,
                        timeout_ms: timeout.as_millis() as u64,
                    }
                    .to_string(),
                );
            } else if let Some(e) = &output.error {
                result.failure = Some(e.clone());
            } else if !output.success {
                tracing::warn!(slot, exit_code = output.exit_code, "simulator exited with failure");
            }
            result.output = Some(output);
        } else {
            result.state = SlotState::Dispatched;
        }

        if result.failure.is_none() {
            let path = sandbox.statistics_path();
            if path.is_file() {
                match StatisticsFeed::read(&path) {
                    Ok(mut feed) => {
                        feed.resolve_logs(sandbox.library_dir());
                        result.feed = Some(feed);
                        result.state = SlotState::Collected;
                    }
                    Err(e) => result.failure = Some(e.to_string()),
                }
            } else {
                result.failure = Some(format!("Statistics file {} does not exist.", path.display()));
            }
        }
        result.sandbox = Some(sandbox);
        finish(result, start)
    }

    fn create_sandbox(&self, catalog: &TestCatalog, slot: usize) -> Result<Sandbox> {
        match &self.config.sandbox_parent {
            Some(parent) => Sandbox::create_in(parent, catalog.library_root(), catalog.library(), slot),
            None => Sandbox::create(catalog.library_root(), catalog.library(), slot),
        }
    }
}

fn finish(mut result: SlotResult, start: Instant) -> SlotResult {
    result.duration_ms = start.elapsed().as_millis() as u64;
    match &result.failure {
        Some(reason) => tracing::warn!(slot = result.slot, state = ?result.state, reason = %reason, "slot failed"),
        None => tracing::info!(
            slot = result.slot,
            tests = result.scripts.len(),
            duration_ms = result.duration_ms,
            "slot collected"
        ),
    }
    result
}
