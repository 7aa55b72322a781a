//! Per-test outcomes of a run
//!
//! Every dispatched test yields one [`RunOutcome`], whether it passed,
//! failed, or never ran because its slot died.

use crate::catalog::TestRecord;
use crate::feed::{FeedEntry, PhaseResult};
use crate::statistics::StatisticsRecord;
use serde::Serialize;
use std::path::PathBuf;

/// Outcome of one phase of a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PhaseOutcome {
    /// The phase succeeded
    Passed,
    /// The phase failed
    Failed,
    /// The phase was not part of the test or did not run
    NotRun,
}

impl PhaseOutcome {
    fn of(phase: Option<&PhaseResult>) -> Self {
        match phase {
            Some(p) if p.result => Self::Passed,
            Some(_) => Self::Failed,
            None => Self::NotRun,
        }
    }

    /// Check if this is a failing outcome
    #[must_use]
    pub const fn is_fail(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// Everything known about one test after its slot was collected
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Script path relative to the script directory
    pub script: String,
    /// Model name
    pub model_name: String,
    /// Slot that ran the test
    pub slot: usize,
    /// Model check
    pub check: PhaseOutcome,
    /// Translation without simulation
    pub translate: PhaseOutcome,
    /// Simulation
    pub simulate: PhaseOutcome,
    /// FMU export
    pub fmu_export: PhaseOutcome,
    /// Result file in the sandbox, if it was written
    pub artifact: Option<PathBuf>,
    /// Translation statistics, if the log could be read
    #[serde(skip)]
    pub statistics: Option<StatisticsRecord>,
    /// Why the test did not run
    pub failure: Option<String>,
}

impl RunOutcome {
    /// Outcome from the slot's feed entry
    ///
    /// `library_dir` is the sandbox directory holding the artifacts. A test
    /// without a feed entry counts as failed.
    #[must_use]
    pub fn from_feed(record: &TestRecord, slot: usize, entry: Option<&FeedEntry>, library_dir: &std::path::Path) -> Self {
        let Some(entry) = entry else {
            return Self::failed(record, slot, "No entry in the statistics feed.");
        };
        let artifact = record
            .result_file
            .as_ref()
            .map(|f| library_dir.join(f))
            .filter(|p| p.is_file());
        let statistics = entry
            .translation_phase()
            .and_then(|p| p.translation_log.as_deref())
            .and_then(|log| match StatisticsRecord::from_log_file(std::path::Path::new(log)) {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::debug!(log, error = %e, "no translation statistics");
                    None
                }
            });
        Self {
            script: record.script().to_string(),
            model_name: record.model_name.clone(),
            slot,
            check: PhaseOutcome::of(entry.check.as_ref()),
            translate: PhaseOutcome::of(entry.translate.as_ref()),
            simulate: PhaseOutcome::of(entry.simulate.as_ref()),
            fmu_export: PhaseOutcome::of(entry.fmu_export.as_ref()),
            artifact,
            statistics,
            failure: None,
        }
    }

    /// Outcome of a test whose slot failed before producing results
    #[must_use]
    pub fn failed(record: &TestRecord, slot: usize, reason: impl Into<String>) -> Self {
        Self {
            script: record.script().to_string(),
            model_name: record.model_name.clone(),
            slot,
            check: PhaseOutcome::NotRun,
            translate: PhaseOutcome::NotRun,
            simulate: PhaseOutcome::NotRun,
            fmu_export: PhaseOutcome::NotRun,
            artifact: None,
            statistics: None,
            failure: Some(reason.into()),
        }
    }

    /// Check if the test ran and every phase that ran passed
    #[must_use]
    pub fn is_pass(&self) -> bool {
        self.failure.is_none()
            && ![self.check, self.translate, self.simulate, self.fmu_export]
                .iter()
                .any(PhaseOutcome::is_fail)
    }

    /// Check if the simulation ran and succeeded
    #[must_use]
    pub fn simulated(&self) -> bool {
        self.failure.is_none() && self.simulate == PhaseOutcome::Passed
    }
}
