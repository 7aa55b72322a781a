//! Statistics feed written by the simulator driver
//!
//! Every slot's driver script writes a `statistics.json` with one entry per
//! test. The runner merges the slot feeds, then [`check_feed`] turns failed
//! phases and translation log diagnostics into reporter entries.

use crate::diagnostics::{TranslationDiagnostic, scan_translation_log};
use crate::error::{Error, Result};
use crate::reporter::Reporter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Header of the dump file for failed translations
pub const FAILED_LOG_HEADER: &str =
    "Automatically generated BuildingsPy dump file for failed translations.\n\n";

const FAILED_LOG_SEPARATOR: &str = "===============================\n\
=====START OF NEW LOG FILE=====\n\
===============================\n";

/// Combined content of one or more `statistics.json` files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsFeed {
    /// One entry per test
    #[serde(rename = "testCase", default)]
    pub test_case: Vec<FeedEntry>,
}

/// Outcome of one test as reported by the driver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    /// Script path, starting with the library directory
    pub file: String,
    /// Model name
    pub model: String,
    /// Model check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<PhaseResult>,
    /// Translation without simulation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translate: Option<PhaseResult>,
    /// Simulation run by the test script
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulate: Option<PhaseResult>,
    /// FMU export run by the test script
    #[serde(rename = "FMUExport", default, skip_serializing_if = "Option::is_none")]
    pub fmu_export: Option<PhaseResult>,
}

/// One phase of a test
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    /// Command the driver executed
    #[serde(default)]
    pub command: String,
    /// Whether the command succeeded
    pub result: bool,
    /// Translation log written for this phase
    #[serde(rename = "translationLog", default, skip_serializing_if = "Option::is_none")]
    pub translation_log: Option<String>,
    /// Wall clock time in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_time: Option<f64>,
    /// Number of Jacobian evaluations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jacobians: Option<u64>,
    /// Number of state events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_events: Option<u64>,
    /// Simulation start time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
    /// Simulation final time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_time: Option<f64>,
    /// Fields this version does not interpret
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl FeedEntry {
    /// Phase whose translation log is checked: simulate, else translate, else FMU export
    #[must_use]
    pub fn translation_phase(&self) -> Option<&PhaseResult> {
        self.simulate
            .as_ref()
            .or(self.translate.as_ref())
            .or(self.fmu_export.as_ref())
    }

    /// Script path relative to `script_dir`, e.g. `Fluid/Examples/Tank.mos`
    #[must_use]
    pub fn script(&self, library: &str) -> Option<&str> {
        let prefix = format!("{library}/{}/", crate::catalog::SCRIPT_SUBDIR);
        self.file.strip_prefix(&prefix)
    }

    /// True if the simulation (or translation) phase succeeded
    #[must_use]
    pub fn simulated(&self) -> bool {
        self.simulate
            .as_ref()
            .or(self.translate.as_ref())
            .is_some_and(|p| p.result)
    }

    fn phases_mut(&mut self) -> impl Iterator<Item = &mut PhaseResult> {
        [
            self.check.as_mut(),
            self.translate.as_mut(),
            self.simulate.as_mut(),
            self.fmu_export.as_mut(),
        ]
        .into_iter()
        .flatten()
    }
}

impl StatisticsFeed {
    /// Read a feed, tolerating a byte order mark
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and [`Error::Parse`]
    /// if it is not a valid feed.
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(path, &content)
    }

    /// Parse the content of a feed read from `path`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the JSON does not match the layout.
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        serde_json::from_str(content.trim_start_matches('\u{feff}'))
            .map_err(|e| Error::parse(path, format!("Failed to parse {}.\n{e}", path.display())))
    }

    /// Concatenate feeds, sorted by script file
    #[must_use]
    pub fn merge(feeds: impl IntoIterator<Item = Self>) -> Self {
        let mut test_case: Vec<FeedEntry> = feeds.into_iter().flat_map(|f| f.test_case).collect();
        test_case.sort_by(|a, b| a.file.cmp(&b.file));
        Self { test_case }
    }

    /// Make relative translation log paths relative to `base`
    pub fn resolve_logs(&mut self, base: &Path) {
        for entry in &mut self.test_case {
            for phase in entry.phases_mut() {
                if let Some(log) = phase.translation_log.as_mut() {
                    if Path::new(log.as_str()).is_relative() {
                        *log = base.join(&*log).to_string_lossy().into_owned();
                    }
                }
            }
        }
    }

    /// Entry of the test that runs `script`
    #[must_use]
    pub fn entry_for(&self, library: &str, script: &str) -> Option<&FeedEntry> {
        self.test_case
            .iter()
            .find(|e| e.script(library) == Some(script))
    }

    /// Write the feed as JSON indented by four spaces
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        buf.push(b'\n');
        std::fs::write(path, buf)?;
        Ok(())
    }
}

/// Failure and diagnostic counts of one feed check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedSummary {
    /// Models whose check failed
    pub failed_check: usize,
    /// Models that failed to translate
    pub failed_translate: usize,
    /// Models that failed to simulate
    pub failed_simulate: usize,
    /// Models that failed to export as an FMU
    pub failed_fmu_export: usize,
    /// Number of models per diagnostic
    pub diagnostics: BTreeMap<TranslationDiagnostic, usize>,
}

impl FeedSummary {
    /// True if any phase failed
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed_check + self.failed_translate + self.failed_simulate + self.failed_fmu_export > 0
    }

    /// Count lines for the end of the run, diagnostics in dictionary order
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (label, n) in [
            ("Number of models that failed check", self.failed_check),
            ("Number of models that failed to translate", self.failed_translate),
            ("Number of models that failed to simulate", self.failed_simulate),
            ("Number of models that failed to export as an FMU", self.failed_fmu_export),
        ] {
            if n > 0 {
                lines.push(format!("{label:<61}: {n}"));
            }
        }
        for diagnostic in TranslationDiagnostic::all() {
            if let Some(n) = self.diagnostics.get(diagnostic) {
                lines.push(diagnostic.summary_message(*n));
            }
        }
        lines
    }
}

/// Report failed phases and translation diagnostics of every test
///
/// Logs of failed tests are appended to `failed_log`, which is created anew.
///
/// # Errors
///
/// Returns an error if the failed log cannot be written.
pub fn check_feed(feed: &StatisticsFeed, failed_log: &Path, reporter: &Reporter) -> Result<FeedSummary> {
    let mut dump = std::fs::File::create(failed_log)?;
    dump.write_all(FAILED_LOG_HEADER.as_bytes())?;

    let mut summary = FeedSummary::default();
    for entry in &feed.test_case {
        let mut failed = false;
        if entry.check.as_ref().is_some_and(|c| !c.result) {
            failed = true;
            summary.failed_check += 1;
            reporter.error(format!("Model check failed for '{}'.", entry.model));
        }
        if let Some(sim) = entry.simulate.as_ref().filter(|s| !s.result) {
            failed = true;
            summary.failed_simulate += 1;
            reporter.error(format!("Simulation failed for '{}'.", sim.command));
        } else if let Some(tr) = entry.translate.as_ref().filter(|t| !t.result) {
            failed = true;
            summary.failed_translate += 1;
            reporter.error(format!("Translation failed for '{}'.", tr.command));
        } else if let Some(fmu) = entry.fmu_export.as_ref().filter(|f| !f.result) {
            summary.failed_fmu_export += 1;
            reporter.error(format!("FMU export failed for '{}'.", fmu.command));
        }

        let Some(phase) = entry.translation_phase() else {
            continue;
        };
        let log_path = phase.translation_log.as_deref().map(PathBuf::from);
        let log = match &log_path {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(content) => Some(content),
                Err(e) => {
                    reporter.warning(format!(
                        "Translation log {} of '{}' cannot be read: {e}",
                        path.display(),
                        entry.model
                    ));
                    None
                }
            },
            None => None,
        };
        if let Some(log) = &log {
            for (diagnostic, _) in scan_translation_log(log) {
                reporter.warning(diagnostic.model_message(&phase.command));
                *summary.diagnostics.entry(diagnostic).or_default() += 1;
            }
        }
        if failed {
            dump.write_all(FAILED_LOG_SEPARATOR.as_bytes())?;
            dump.write_all(log.as_deref().unwrap_or_default().as_bytes())?;
            dump.write_all(b"\n\n\n")?;
        }
    }

    for line in summary.lines() {
        reporter.output(line);
    }
    if summary.has_failures() {
        reporter.output(format!(
            "Check or simulation failed, see {} for more details about the failed models.",
            failed_log.display()
        ));
    }
    Ok(summary)
}
