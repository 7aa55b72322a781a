//! simreg runner
//!
//! Regression testing of simulation models: catalogs the test scripts of a
//! model library, runs them over parallel worker slots in sandboxed copies of
//! the library and compares the results against stored references.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
// Allow common patterns
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::module_name_repetitions)]
// Allow common patterns in test code
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::redundant_closure_for_method_calls))]
#![cfg_attr(test, allow(clippy::redundant_clone))]
#![cfg_attr(test, allow(clippy::uninlined_format_args))]
#![cfg_attr(test, allow(clippy::float_cmp))]

pub mod catalog;
pub mod command;
pub mod compare;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod feed;
pub mod interpolate;
pub mod outcome;
pub mod parallel;
pub mod process;
pub mod reference;
pub mod reporter;
pub mod result;
pub mod review;
pub mod sandbox;
pub mod statistics;
pub mod tester;
pub mod verify;

#[cfg(test)]
pub mod test_fixtures;

pub use catalog::{
    CatalogOptions, ClassCount, ScriptMapping, TestCatalog, TestRecord, count_classes,
    select_packages, tolerance_of,
};
pub use command::{
    CommandOutput, Invocation, MockSimulatorRunner, RealSimulatorRunner, SimulatorRunner,
    find_executable,
};
pub use compare::{Comparison, ComparisonEngine, DEFAULT_TOLERANCE, are_equal};
pub use config::{ExperimentSettings, RunnerConfig};
pub use diagnostics::{TranslationDiagnostic, scan_translation_log};
pub use error::{Error, Result};
pub use feed::{FeedEntry, FeedSummary, PhaseResult, StatisticsFeed, check_feed};
pub use interpolate::{resample, time_grid};
pub use outcome::{PhaseOutcome, RunOutcome};
pub use parallel::{
    ParallelConfig, ParallelResult, ParallelRunner, SlotResult, SlotState, clamp_slots, partition,
};
pub use process::{Deadline, ProcessGuard, ProcessTree, WaitOutcome};
pub use reference::{ReferenceDocument, reference_file_name};
pub use reporter::{ExitStatus, Reporter};
pub use result::{CsvResults, DEFAULT_POINTS, ResultReader, SeriesBundle, extract_bundles};
pub use review::{
    Answer, ReviewDecision, ReviewPolicy, ReviewPrompt, ScriptedPrompt, StdinPrompt, Verdict,
};
pub use sandbox::Sandbox;
pub use statistics::{
    Phase, PhaseStatistics, StatisticsRecord, are_statistics_equal, diff_statistics,
};
pub use tester::{TestRun, Tester, validate_library};
pub use verify::{
    ReferenceAction, TestVerification, VariableResult, VerificationSummary, Verifier,
    VerifyOptions,
};
