//! Simulator invocation abstraction for testability
//!
//! The parallel runner launches the simulator through [`SimulatorRunner`], so
//! slot handling can be tested with [`MockSimulatorRunner`] and without a
//! simulator installation.

use crate::process::{Deadline, ProcessGuard, WaitOutcome};
use crate::sandbox::{DRIVER_SCRIPT, STATISTICS_FILE, driver_entries};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// One simulator run in one slot
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Slot index
    pub slot: usize,
    /// Directory holding the driver script; the process runs here
    pub working_dir: PathBuf,
    /// Arguments passed to the simulator
    pub args: Vec<String>,
    /// File receiving stdout and stderr
    pub log_file: PathBuf,
    /// Polling and escalation settings
    pub deadline: Deadline,
}

/// Result of a simulator run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (-1 if unknown)
    pub exit_code: i32,
    /// Whether the process exited successfully
    pub success: bool,
    /// The deadline passed and the process was stopped
    pub timed_out: bool,
    /// Launch or wait failure
    pub error: Option<String>,
}

impl CommandOutput {
    /// A run that exited with code 0
    #[must_use]
    pub const fn success() -> Self {
        Self {
            exit_code: 0,
            success: true,
            timed_out: false,
            error: None,
        }
    }

    /// A run that exited with `exit_code`
    #[must_use]
    pub const fn exited(exit_code: i32) -> Self {
        Self {
            exit_code,
            success: exit_code == 0,
            timed_out: false,
            error: None,
        }
    }

    /// A run that was stopped at its deadline
    #[must_use]
    pub const fn timed_out() -> Self {
        Self {
            exit_code: -1,
            success: false,
            timed_out: true,
            error: None,
        }
    }

    /// A run that could not be launched or awaited
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            exit_code: -1,
            success: false,
            timed_out: false,
            error: Some(error.into()),
        }
    }
}

/// Launches the simulator for one slot
pub trait SimulatorRunner: Send + Sync {
    /// Run the simulator and block until it exits or the deadline passes
    fn run(&self, invocation: &Invocation) -> CommandOutput;

    /// Whether the simulator can be launched at all
    fn is_available(&self) -> bool;
}

/// Runs the configured executable as a child process
#[derive(Debug, Clone)]
pub struct RealSimulatorRunner {
    /// Executable name or path
    pub executable: String,
}

impl RealSimulatorRunner {
    /// Runner for `executable`
    #[must_use]
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl SimulatorRunner for RealSimulatorRunner {
    fn run(&self, invocation: &Invocation) -> CommandOutput {
        let log = match std::fs::File::create(&invocation.log_file) {
            Ok(f) => f,
            Err(e) => return CommandOutput::failure(format!("Failed to create log file: {e}")),
        };
        let log_err = match log.try_clone() {
            Ok(f) => f,
            Err(e) => return CommandOutput::failure(format!("Failed to create log file: {e}")),
        };

        let child = Command::new(&self.executable)
            .args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .env("MODELICAPATH", modelica_path(&invocation.working_dir))
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_err)
            .spawn();
        let child = match child {
            Ok(c) => c,
            Err(e) => return CommandOutput::failure(format!("Failed to execute {}: {e}", self.executable)),
        };

        let mut guard = ProcessGuard::new(child);
        tracing::info!(slot = invocation.slot, pid = guard.pid(), "dispatched simulator");
        match guard.wait_with_deadline(&invocation.deadline) {
            Ok(WaitOutcome::Exited(status)) => CommandOutput::exited(status.code().unwrap_or(-1)),
            Ok(WaitOutcome::TimedOut { .. }) => CommandOutput::timed_out(),
            Err(e) => CommandOutput::failure(format!("Failed to wait for simulator: {e}")),
        }
    }

    fn is_available(&self) -> bool {
        find_executable(&self.executable).is_some()
    }
}

/// `MODELICAPATH` with the sandbox's parent directory in front
fn modelica_path(working_dir: &Path) -> std::ffi::OsString {
    let sandbox = working_dir.parent().unwrap_or(working_dir).to_path_buf();
    let existing = std::env::var_os("MODELICAPATH");
    let paths = std::iter::once(sandbox).chain(existing.iter().flat_map(std::env::split_paths));
    std::env::join_paths(paths).unwrap_or_default()
}

/// Locate `executable` on `PATH`, or check it directly if it has a separator
#[must_use]
pub fn find_executable(executable: &str) -> Option<PathBuf> {
    let direct = Path::new(executable);
    if direct.components().count() > 1 {
        return direct.is_file().then(|| direct.to_path_buf());
    }
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(executable))
            .find(|candidate| candidate.is_file())
    })
}

/// Simulator stand-in that writes prepared outputs
///
/// For every test listed in the driver script it writes the result file, the
/// translation log and a statistics entry, then exits with `exit_code`.
#[derive(Debug, Clone)]
pub struct MockSimulatorRunner {
    /// Body of every `<model>.csv`
    pub result_csv: String,
    /// Body of every `<model>.translation.log`
    pub translation_log: String,
    /// Exit code of every run
    pub exit_code: i32,
    /// Slots that report a timeout without writing anything
    pub timed_out_slots: HashSet<usize>,
    /// Models whose simulation fails
    pub failing_models: HashSet<String>,
    /// Skip writing `statistics.json`
    pub omit_statistics: bool,
}

impl Default for MockSimulatorRunner {
    fn default() -> Self {
        Self {
            result_csv: "time,x,y\n0,0,0\n0.5,0.5,1\n1,1,2\n".to_string(),
            translation_log: "Translation of model\nSizes after manipulation of the linear systems: {4}\n".to_string(),
            exit_code: 0,
            timed_out_slots: HashSet::new(),
            failing_models: HashSet::new(),
            omit_statistics: false,
        }
    }
}

impl MockSimulatorRunner {
    /// Mock with default outputs
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the result file body
    #[must_use]
    pub fn with_result_csv(mut self, csv: impl Into<String>) -> Self {
        self.result_csv = csv.into();
        self
    }

    /// Set the translation log body
    #[must_use]
    pub fn with_translation_log(mut self, log: impl Into<String>) -> Self {
        self.translation_log = log.into();
        self
    }

    /// Let `slot` time out
    #[must_use]
    pub fn with_timed_out_slot(mut self, slot: usize) -> Self {
        self.timed_out_slots.insert(slot);
        self
    }

    /// Let the simulation of `model` fail
    #[must_use]
    pub fn with_failing_model(mut self, model: impl Into<String>) -> Self {
        self.failing_models.insert(model.into());
        self
    }

    /// Do not write the statistics feed
    #[must_use]
    pub fn without_statistics(mut self) -> Self {
        self.omit_statistics = true;
        self
    }

    fn write_outputs(&self, dir: &Path) -> std::io::Result<()> {
        let driver = std::fs::read_to_string(dir.join(DRIVER_SCRIPT))?;
        let mut cases = Vec::new();
        for (script, model) in driver_entries(&driver) {
            let ok = !self.failing_models.contains(&model);
            if ok {
                std::fs::write(dir.join(format!("{model}.csv")), &self.result_csv)?;
            }
            let log = format!("{model}.translation.log");
            std::fs::write(dir.join(&log), &self.translation_log)?;
            cases.push(serde_json::json!({
                "file": format!("{}/{}/{script}", dir_name(dir), crate::catalog::SCRIPT_SUBDIR),
                "model": model,
                "check": { "command": format!("checkModel(\"{model}\");"), "result": true },
                "simulate": {
                    "command": format!("RunScript(\"{}/{script}\");", crate::catalog::SCRIPT_SUBDIR),
                    "translationLog": log,
                    "result": ok,
                },
            }));
        }
        if !self.omit_statistics {
            let feed = serde_json::json!({ "testCase": cases });
            std::fs::write(dir.join(STATISTICS_FILE), feed.to_string())?;
        }
        Ok(())
    }
}

fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl SimulatorRunner for MockSimulatorRunner {
    fn run(&self, invocation: &Invocation) -> CommandOutput {
        if self.timed_out_slots.contains(&invocation.slot) {
            return CommandOutput::timed_out();
        }
        if let Err(e) = std::fs::write(&invocation.log_file, "mock simulator\n") {
            return CommandOutput::failure(e.to_string());
        }
        match self.write_outputs(&invocation.working_dir) {
            Ok(()) => CommandOutput::exited(self.exit_code),
            Err(e) => CommandOutput::failure(e.to_string()),
        }
    }

    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn invocation(dir: &Path, slot: usize) -> Invocation {
        Invocation {
            slot,
            working_dir: dir.to_path_buf(),
            args: vec![DRIVER_SCRIPT.to_string()],
            log_file: dir.join("stdout.log"),
            deadline: Deadline {
                timeout: Some(Duration::from_secs(10)),
                poll_interval: Duration::from_millis(10),
                grace: Duration::from_millis(100),
            },
        }
    }

    #[test]
    fn test_command_output_constructors() {
        assert!(CommandOutput::success().success);
        assert!(!CommandOutput::exited(2).success);
        assert!(CommandOutput::timed_out().timed_out);
        assert_eq!(CommandOutput::failure("boom").error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_find_executable() {
        assert!(find_executable("sh").is_some());
        assert!(find_executable("definitely-not-a-simulator-xyz").is_none());
        assert!(find_executable("/bin/sh").is_some());
    }

    #[test]
    fn test_real_runner_writes_log() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("Lib");
        std::fs::create_dir(&work).unwrap();
        let runner = RealSimulatorRunner::new("sh");
        let mut inv = invocation(&work, 0);
        inv.args = vec!["-c".into(), "echo \"$MODELICAPATH\"; pwd".into()];
        let out = runner.run(&inv);
        assert!(out.success, "{out:?}");
        let log = std::fs::read_to_string(work.join("stdout.log")).unwrap();
        assert!(log.contains(&dir.path().display().to_string()));
        assert!(log.lines().any(|l| l.ends_with("Lib")));
    }

    #[test]
    fn test_real_runner_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RealSimulatorRunner::new("definitely-not-a-simulator-xyz");
        assert!(!runner.is_available());
        let out = runner.run(&invocation(dir.path(), 0));
        assert!(out.error.is_some());
    }

    #[test]
    fn test_real_runner_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RealSimulatorRunner::new("sleep");
        let mut inv = invocation(dir.path(), 0);
        inv.args = vec!["30".into()];
        inv.deadline.timeout = Some(Duration::from_millis(100));
        assert!(runner.run(&inv).timed_out);
    }

    #[test]
    fn test_mock_runner_writes_feed() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("Lib");
        std::fs::create_dir(&work).unwrap();
        std::fs::write(
            work.join(DRIVER_SCRIPT),
            "// test A/One.mos Lib.A.One\n// test A/Two.mos Lib.A.Two\n",
        )
        .unwrap();
        let runner = MockSimulatorRunner::new().with_failing_model("Lib.A.Two");
        assert!(runner.run(&invocation(&work, 0)).success);
        assert!(work.join("Lib.A.One.csv").is_file());
        assert!(!work.join("Lib.A.Two.csv").exists());
        let feed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(work.join(STATISTICS_FILE)).unwrap()).unwrap();
        assert_eq!(feed["testCase"].as_array().unwrap().len(), 2);
        assert_eq!(feed["testCase"][1]["simulate"]["result"], false);
    }

    #[test]
    fn test_mock_runner_timeout_slot() {
        let dir = tempfile::tempdir().unwrap();
        let runner = MockSimulatorRunner::new().with_timed_out_slot(1);
        assert!(runner.run(&invocation(dir.path(), 1)).timed_out);
    }
}
