//! Verification of new results against stored references
//!
//! Runs once every slot was collected. Each verified test is extracted,
//! compared against its reference file and, depending on the review
//! verdict, written back. Reference files are written one at a time.

use crate::catalog::{TestCatalog, TestRecord};
use crate::compare::{Comparison, ComparisonEngine};
use crate::config::RunnerConfig;
use crate::error::Result;
use crate::outcome::RunOutcome;
use crate::reference::{self, ReferenceDocument};
use crate::reporter::Reporter;
use crate::result::{CsvResults, SeriesBundle, extract_bundles};
use crate::review::{ReviewPolicy, Verdict};
use crate::statistics::{Phase, StatisticsRecord, diff_statistics};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

/// Settings of the verification stage
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Grid points per stored series
    pub n_points: usize,
    /// Pointwise comparison tolerance
    pub tolerance: f64,
    /// Models exempt from the `initialization/nonlinear` statistics check
    pub skip_statistics_models: Vec<String>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self::from_config(&RunnerConfig::default())
    }
}

impl VerifyOptions {
    /// Options taken from a runner configuration
    #[must_use]
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            n_points: config.n_points,
            tolerance: config.tolerance,
            skip_statistics_models: config.skip_statistics_models.clone(),
        }
    }
}

/// What happened to the reference file of a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceAction {
    /// Results and statistics match the reference
    Unchanged,
    /// The reference was created or replaced
    Written,
    /// Differences were found and the new results were rejected
    Rejected,
    /// No usable reference exists and none was written
    Missing,
    /// Results could not be extracted, or the reference could not be read or written
    Failed,
}

/// Comparison result of one variable
#[derive(Debug, Clone, Serialize)]
pub struct VariableResult {
    /// Variable name
    pub name: String,
    /// Outcome of the comparison
    #[serde(flatten)]
    pub comparison: Comparison,
}

/// Verification record of one test, as written to the comparison log
#[derive(Debug, Clone, Serialize)]
pub struct TestVerification {
    /// Model name
    pub model: String,
    /// Script path relative to the script directory
    pub script: String,
    /// Reference file name
    pub reference_file: String,
    /// Per-variable results, empty if nothing was compared
    pub variables: Vec<VariableResult>,
    /// True if the translation statistics differ from the reference
    pub statistics_changed: bool,
    /// Final state of the reference file
    pub action: ReferenceAction,
    /// Why the test could not be verified
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestVerification {
    fn new(record: &TestRecord) -> Self {
        Self {
            model: record.model_name.clone(),
            script: record.script().to_string(),
            reference_file: record.mapping.reference_file.clone(),
            variables: Vec::new(),
            statistics_changed: false,
            action: ReferenceAction::Unchanged,
            error: None,
        }
    }

    /// True if at least one variable differs from the reference
    #[must_use]
    pub fn results_changed(&self) -> bool {
        self.variables.iter().any(|v| !v.comparison.equal)
    }

    /// True if the test leaves the library with a mismatching or missing reference
    #[must_use]
    pub fn is_failure(&self) -> bool {
        match self.action {
            ReferenceAction::Failed | ReferenceAction::Missing => true,
            ReferenceAction::Rejected => self.results_changed(),
            ReferenceAction::Unchanged | ReferenceAction::Written => false,
        }
    }
}

/// Results of the verification stage
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct VerificationSummary {
    /// One entry per verified test, in outcome order
    pub tests: Vec<TestVerification>,
}

impl VerificationSummary {
    /// Number of verified tests
    #[must_use]
    pub fn checked(&self) -> usize {
        self.tests.len()
    }

    /// Number of reference files written
    #[must_use]
    pub fn written(&self) -> usize {
        self.count(ReferenceAction::Written)
    }

    /// Number of tests whose results could not be extracted
    #[must_use]
    pub fn extraction_failures(&self) -> usize {
        self.count(ReferenceAction::Failed)
    }

    /// Entry for a script
    #[must_use]
    pub fn test(&self, script: &str) -> Option<&TestVerification> {
        self.tests.iter().find(|t| t.script == script)
    }

    /// True if any test failed verification
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.tests.iter().any(TestVerification::is_failure)
    }

    fn count(&self, action: ReferenceAction) -> usize {
        self.tests.iter().filter(|t| t.action == action).count()
    }

    /// Write the comparison log as pretty-printed JSON
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_log(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, format!("{json}\n"))?;
        tracing::debug!(path = %path.display(), tests = self.tests.len(), "wrote comparison log");
        Ok(())
    }
}

/// Compares collected results with the reference files of a library
#[derive(Debug, Clone)]
pub struct Verifier {
    options: VerifyOptions,
    engine: ComparisonEngine,
}

impl Verifier {
    /// Create a verifier
    #[must_use]
    pub fn new(options: VerifyOptions) -> Self {
        let engine = ComparisonEngine::new(options.tolerance).with_points(options.n_points);
        Self { options, engine }
    }

    /// Verify every test that must simulate and was simulated successfully
    ///
    /// Tests without a catalog record are skipped. Reference files are
    /// written serially in outcome order, as the policy decides.
    #[must_use]
    pub fn verify(
        &self,
        catalog: &TestCatalog,
        outcomes: &[RunOutcome],
        policy: &mut ReviewPolicy,
        reporter: &Reporter,
    ) -> VerificationSummary {
        let reference_dir = reference::reference_dir(catalog.library_root());
        let mut summary = VerificationSummary::default();
        for outcome in outcomes {
            let Some(record) = catalog.by_script(&outcome.script) else {
                tracing::debug!(script = %outcome.script, "no catalog record");
                continue;
            };
            if !record.is_verified() || !outcome.simulated() {
                continue;
            }
            let path = reference_dir.join(&record.mapping.reference_file);
            let entry = self.verify_test(record, outcome, &path, policy, reporter);
            tracing::info!(
                script = %entry.script,
                action = ?entry.action,
                "verified"
            );
            summary.tests.push(entry);
        }
        summary
    }

    fn verify_test(
        &self,
        record: &TestRecord,
        outcome: &RunOutcome,
        path: &Path,
        policy: &mut ReviewPolicy,
        reporter: &Reporter,
    ) -> TestVerification {
        let mut entry = TestVerification::new(record);
        let (bundles, statistics) = match self.extract(record, outcome, reporter) {
            Ok(pair) => pair,
            Err(reason) => {
                reporter.error(&reason);
                entry.error = Some(reason);
                entry.action = ReferenceAction::Failed;
                return entry;
            }
        };

        if !path.is_file() {
            let question = format!(
                "*** Warning: Reference file {} does not yet exist.\n             Create new file?",
                entry.reference_file
            );
            entry.action = create(policy.resolve(&question), path, &bundles, &statistics, reporter);
            return entry;
        }

        let old = match reference::read(path) {
            Ok(doc) => doc,
            Err(e) => {
                let reason = e.to_string();
                reporter.error(&reason);
                entry.error = Some(reason);
                entry.action = ReferenceAction::Failed;
                return entry;
            }
        };
        if !old.has_results() {
            let question = format!(
                "*** Warning: Reference file {} has no results.\n             Create new file?",
                entry.reference_file
            );
            entry.action = create(policy.resolve(&question), path, &bundles, &statistics, reporter);
            return entry;
        }

        entry.variables = self.compare(&old, &bundles, &entry.reference_file, reporter);
        let results_changed = entry.results_changed();
        for phase in Phase::ALL {
            entry.statistics_changed |= diff_statistics(
                &old.statistics,
                &statistics,
                phase,
                &record.model_name,
                results_changed,
                &self.options.skip_statistics_models,
                reporter,
            );
        }
        if !results_changed && !entry.statistics_changed {
            return entry;
        }

        let question = format!(
            "             For {},\n             accept new file and update reference files?",
            entry.reference_file
        );
        entry.action = match policy.resolve(&question) {
            Verdict::Accept => write(path, &bundles, &statistics, reporter),
            Verdict::Reject | Verdict::NeedsHumanInput => ReferenceAction::Rejected,
        };
        entry
    }

    /// Series and statistics of a simulated test; errors are report-ready messages
    fn extract(
        &self,
        record: &TestRecord,
        outcome: &RunOutcome,
        reporter: &Reporter,
    ) -> std::result::Result<(Vec<SeriesBundle>, StatisticsRecord), String> {
        let Some(artifact) = outcome.artifact.as_deref() else {
            return Err(format!(
                "{}: result file {} was not found.",
                record.script(),
                record.result_file.as_deref().unwrap_or_default()
            ));
        };
        let reader = CsvResults::load(artifact).map_err(|e| format!("{}: {e}", record.script()))?;
        let bundles = extract_bundles(
            &reader,
            &record.plot_groups,
            self.options.n_points,
            record.script(),
            reporter,
        )
        .map_err(|e| e.to_string())?;
        let statistics = outcome.statistics.clone().ok_or_else(|| {
            format!(
                "Failed to read translation statistics of {} from {}.",
                record.model_name,
                record.translation_log()
            )
        })?;
        Ok((bundles, statistics))
    }

    fn compare(
        &self,
        old: &ReferenceDocument,
        bundles: &[SeriesBundle],
        reference_file: &str,
        reporter: &Reporter,
    ) -> Vec<VariableResult> {
        let old_time = old.time().unwrap_or_default();
        let mut seen = HashSet::new();
        let mut results = Vec::new();
        for bundle in bundles {
            for (name, values) in &bundle.series {
                if !seen.insert(name.as_str()) {
                    continue;
                }
                let comparison = match old.get(name) {
                    Some(old_y) => self
                        .engine
                        .are_equal(old_time, old_y, &bundle.time, values, name)
                        .unwrap_or_else(|e| Comparison::mismatch(None, e.to_string())),
                    None => Comparison::mismatch(
                        None,
                        format!("{reference_file}: Did not find variable {name} in old results."),
                    ),
                };
                if let Some(message) = comparison.message.as_deref().filter(|_| !comparison.equal) {
                    reporter.error(message);
                }
                results.push(VariableResult {
                    name: name.clone(),
                    comparison,
                });
            }
        }
        results
    }
}

fn create(
    verdict: Verdict,
    path: &Path,
    bundles: &[SeriesBundle],
    statistics: &StatisticsRecord,
    reporter: &Reporter,
) -> ReferenceAction {
    match verdict {
        Verdict::Accept => write(path, bundles, statistics, reporter),
        Verdict::Reject | Verdict::NeedsHumanInput => {
            reporter.error(format!("Did not write new reference file {}.", path.display()));
            ReferenceAction::Missing
        }
    }
}

fn write(
    path: &Path,
    bundles: &[SeriesBundle],
    statistics: &StatisticsRecord,
    reporter: &Reporter,
) -> ReferenceAction {
    match reference::write(path, bundles, statistics) {
        Ok(()) => {
            reporter.output(format!("Wrote new reference file {}.", path.display()));
            ReferenceAction::Written
        }
        Err(e) => {
            reporter.error(format!("Failed to write reference file {}: {e}", path.display()));
            ReferenceAction::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogOptions;
    use crate::outcome::PhaseOutcome;
    use crate::review::{Answer, ReviewDecision, ScriptedPrompt};
    use crate::statistics::PhaseStatistics;
    use crate::test_fixtures::{Library, LibraryBuilder, result_csv};

    const SCRIPT: &str = "Fluid/Tank.mos";
    const REFERENCE: &str = "Lib_Fluid_Tank.txt";

    fn library(reference: Option<&str>) -> Library {
        let mut builder = LibraryBuilder::new("Lib").simulating(SCRIPT, "Lib.Fluid.Tank", &["x"]);
        if let Some(content) = reference {
            builder = builder.reference(REFERENCE, content);
        }
        builder.build().unwrap()
    }

    fn catalog(lib: &Library) -> TestCatalog {
        TestCatalog::build(lib.root(), &CatalogOptions::default(), &Reporter::in_memory()).unwrap()
    }

    fn statistics(linear: &str) -> StatisticsRecord {
        StatisticsRecord {
            translated: true,
            initialization: None,
            simulation: Some(PhaseStatistics {
                linear: Some(linear.into()),
                ..PhaseStatistics::default()
            }),
        }
    }

    /// Simulated outcome with `x = 2 t` on `[0, 10]`, `midpoint` added at t = 5
    fn outcome(dir: &Path, midpoint: f64, linear: &str) -> RunOutcome {
        let time: Vec<f64> = (0..=100).map(|i| f64::from(i) / 10.0).collect();
        let mut x: Vec<f64> = time.iter().map(|t| 2.0 * t).collect();
        x[50] += midpoint;
        let path = dir.join("Lib.Fluid.Tank.csv");
        std::fs::write(&path, result_csv(&time, &[("x", &x)])).unwrap();
        RunOutcome {
            script: SCRIPT.into(),
            model_name: "Lib.Fluid.Tank".into(),
            slot: 0,
            check: PhaseOutcome::Passed,
            translate: PhaseOutcome::NotRun,
            simulate: PhaseOutcome::Passed,
            fmu_export: PhaseOutcome::NotRun,
            artifact: Some(path),
            statistics: Some(statistics(linear)),
            failure: None,
        }
    }

    fn coarse_reference(linear: &str) -> String {
        let x: Vec<String> = (0..=10).map(|i| format!("{}", 2 * i)).collect();
        format!(
            "last-generated=2024-01-01\nstatistics-simulation=\n{{\n  \"linear\": \"{linear}\"\n}}\ntime=[0, 10]\nx=[{}]\n",
            x.join(", ")
        )
    }

    #[test]
    fn test_missing_reference_rejected_in_batch() {
        let lib = library(None);
        let catalog = catalog(&lib);
        let dir = tempfile::tempdir().unwrap();
        let reporter = Reporter::in_memory();
        let mut policy = ReviewPolicy::batch();

        let summary = Verifier::new(VerifyOptions::default()).verify(
            &catalog,
            &[outcome(dir.path(), 0.0, "2")],
            &mut policy,
            &reporter,
        );
        assert_eq!(summary.checked(), 1);
        assert_eq!(summary.test(SCRIPT).unwrap().action, ReferenceAction::Missing);
        assert!(summary.has_failures());
        assert_eq!(reporter.errors(), 1);
        assert!(!lib.reference_dir().join(REFERENCE).exists());
    }

    #[test]
    fn test_missing_reference_written_on_accept() {
        let lib = library(None);
        let catalog = catalog(&lib);
        let dir = tempfile::tempdir().unwrap();
        let reporter = Reporter::in_memory();
        let mut policy = ReviewPolicy::new(
            ReviewDecision::AskEachTime,
            Box::new(ScriptedPrompt::new([Answer::Yes])),
        );

        let summary = Verifier::new(VerifyOptions::default()).verify(
            &catalog,
            &[outcome(dir.path(), 0.0, "2")],
            &mut policy,
            &reporter,
        );
        assert_eq!(summary.written(), 1);
        assert!(!summary.has_failures());
        let doc = reference::read(&lib.reference_dir().join(REFERENCE)).unwrap();
        assert_eq!(doc.time(), Some(&[0.0, 10.0][..]));
        assert_eq!(doc.get("x").unwrap().len(), 101);
        assert_eq!(doc.statistics.simulation, statistics("2").simulation);
    }

    #[test]
    fn test_coarse_reference_matches() {
        let lib = library(Some(&coarse_reference("2")));
        let catalog = catalog(&lib);
        let dir = tempfile::tempdir().unwrap();
        let reporter = Reporter::in_memory();

        let summary = Verifier::new(VerifyOptions::default()).verify(
            &catalog,
            &[outcome(dir.path(), 0.0, "2")],
            &mut ReviewPolicy::batch(),
            &reporter,
        );
        let test = summary.test(SCRIPT).unwrap();
        assert_eq!(test.action, ReferenceAction::Unchanged);
        assert!(test.variables[0].comparison.equal);
        assert_eq!(reporter.errors(), 0);
        assert_eq!(reporter.warnings(), 0);
    }

    #[test]
    fn test_midpoint_change_rejected_in_batch() {
        let reference = coarse_reference("2");
        let lib = library(Some(&reference));
        let catalog = catalog(&lib);
        let dir = tempfile::tempdir().unwrap();
        let reporter = Reporter::in_memory();

        let summary = Verifier::new(VerifyOptions::default()).verify(
            &catalog,
            &[outcome(dir.path(), 0.01, "2")],
            &mut ReviewPolicy::batch(),
            &reporter,
        );
        let test = summary.test(SCRIPT).unwrap();
        assert_eq!(test.action, ReferenceAction::Rejected);
        assert_eq!(test.variables[0].comparison.time_of_max_error, Some(5.0));
        assert!(summary.has_failures());
        assert_eq!(reporter.errors(), 1);
        let on_disk = std::fs::read_to_string(lib.reference_dir().join(REFERENCE)).unwrap();
        assert_eq!(on_disk, reference);
    }

    #[test]
    fn test_statistics_change_accepted() {
        let lib = library(Some(&coarse_reference("2")));
        let catalog = catalog(&lib);
        let dir = tempfile::tempdir().unwrap();
        let reporter = Reporter::in_memory();
        let prompt = ScriptedPrompt::new([Answer::YesToAll]);
        let mut policy = ReviewPolicy::new(ReviewDecision::AskEachTime, Box::new(prompt));

        let summary = Verifier::new(VerifyOptions::default()).verify(
            &catalog,
            &[outcome(dir.path(), 0.0, "3")],
            &mut policy,
            &reporter,
        );
        let test = summary.test(SCRIPT).unwrap();
        assert!(test.statistics_changed);
        assert!(!test.results_changed());
        assert_eq!(test.action, ReferenceAction::Written);
        assert_eq!(policy.decision(), ReviewDecision::AcceptAll);
        assert_eq!(reporter.warnings(), 1);
        let doc = reference::read(&lib.reference_dir().join(REFERENCE)).unwrap();
        assert_eq!(doc.statistics.simulation.unwrap().linear.as_deref(), Some("3"));
    }

    #[test]
    fn test_missing_old_variable_is_error() {
        let lib = library(Some("last-generated=2024-01-01\ntime=[0, 10]\ny=[1, 1]\n"));
        let catalog = catalog(&lib);
        let dir = tempfile::tempdir().unwrap();
        let reporter = Reporter::in_memory();

        let summary = Verifier::new(VerifyOptions::default()).verify(
            &catalog,
            &[outcome(dir.path(), 0.0, "2")],
            &mut ReviewPolicy::batch(),
            &reporter,
        );
        let test = summary.test(SCRIPT).unwrap();
        assert!(test.results_changed());
        let message = test.variables[0].comparison.message.as_deref().unwrap();
        assert!(message.contains("Did not find variable x in old results"));
        assert!(reporter.errors() >= 1);
    }

    #[test]
    fn test_missing_artifact_fails_extraction() {
        let lib = library(Some(&coarse_reference("2")));
        let catalog = catalog(&lib);
        let dir = tempfile::tempdir().unwrap();
        let reporter = Reporter::in_memory();
        let mut run = outcome(dir.path(), 0.0, "2");
        run.artifact = None;

        let summary = Verifier::new(VerifyOptions::default()).verify(
            &catalog,
            &[run],
            &mut ReviewPolicy::batch(),
            &reporter,
        );
        assert_eq!(summary.extraction_failures(), 1);
        assert!(summary.has_failures());
        assert_eq!(reporter.errors(), 1);
    }

    #[test]
    fn test_failed_simulation_not_verified() {
        let lib = library(None);
        let catalog = catalog(&lib);
        let dir = tempfile::tempdir().unwrap();
        let mut run = outcome(dir.path(), 0.0, "2");
        run.simulate = PhaseOutcome::Failed;

        let summary = Verifier::new(VerifyOptions::default()).verify(
            &catalog,
            &[run],
            &mut ReviewPolicy::batch(),
            &Reporter::in_memory(),
        );
        assert_eq!(summary.checked(), 0);
    }

    #[test]
    fn test_write_comparison_log() {
        let lib = library(Some(&coarse_reference("2")));
        let catalog = catalog(&lib);
        let dir = tempfile::tempdir().unwrap();
        let summary = Verifier::new(VerifyOptions::default()).verify(
            &catalog,
            &[outcome(dir.path(), 0.01, "2")],
            &mut ReviewPolicy::batch(),
            &Reporter::in_memory(),
        );
        let log = dir.path().join("comparison-dymola.log");
        summary.write_log(&log).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&log).unwrap()).unwrap();
        let first = &value[0];
        assert_eq!(first["script"], SCRIPT);
        assert_eq!(first["action"], "rejected");
        assert_eq!(first["variables"][0]["name"], "x");
        assert_eq!(first["variables"][0]["equal"], false);
    }
}
