//! Translation statistics
//!
//! The simulator reports the sizes of the linear and nonlinear systems of
//! equations, the number of numerical Jacobians and the number of continuous
//! states, separately for the initialization and the simulation problem.
//! A change in these numbers often signals a modelling regression even when
//! the time series still match.

use crate::error::Result;
use crate::reporter::Reporter;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

const NONLINEAR_MARKER: &str = "Sizes after manipulation of the nonlinear systems:";
const LINEAR_MARKER: &str = "Sizes after manipulation of the linear systems:";
const JACOBIAN_MARKER: &str = "Number of numerical Jacobians";
const STATES_MARKER: &str = "Continuous time states:";
const INITIALIZATION_MARKER: &str = "Initialization problem";
const ABORTED_MARKER: &str = "Translation aborted";

static BRACES: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\{(.*?)\}").unwrap()
});

/// Problem phase a statistic belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Initialization problem
    Initialization,
    /// Simulation problem
    Simulation,
}

impl Phase {
    /// Both phases in reporting order
    pub const ALL: [Self; 2] = [Self::Initialization, Self::Simulation];

    /// Lowercase name used in reference files and messages
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialization => "initialization",
            Self::Simulation => "simulation",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics of one problem phase
///
/// Every field is a raw string as printed by the simulator, e.g. `"1, 20, 1"`.
/// Field order matches the sorted key order of the serialized form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseStatistics {
    /// Sizes of the linear systems
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linear: Option<String>,
    /// Sizes of the nonlinear systems
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonlinear: Option<String>,
    /// Number of continuous time states
    #[serde(
        rename = "number of continuous time states",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub continuous_states: Option<String>,
    /// Number of numerical Jacobians
    #[serde(
        rename = "numerical Jacobians",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub numerical_jacobians: Option<String>,
}

impl PhaseStatistics {
    /// Present entries as `(key, value)` pairs in serialized key order
    #[must_use]
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        [
            ("linear", self.linear.as_deref()),
            ("nonlinear", self.nonlinear.as_deref()),
            (
                "number of continuous time states",
                self.continuous_states.as_deref(),
            ),
            ("numerical Jacobians", self.numerical_jacobians.as_deref()),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
        .collect()
    }

    /// Value for a serialized key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries()
            .into_iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    /// Parse a statistics block, accepting legacy single-quoted dictionaries
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`](crate::Error::Serialization) if the text is neither JSON nor a
    /// single-quoted dictionary.
    pub fn from_block(text: &str) -> Result<Self> {
        match serde_json::from_str(text) {
            Ok(stats) => Ok(stats),
            Err(e) => {
                if text.contains('\'') {
                    Ok(serde_json::from_str(&text.replace('\'', "\""))?)
                } else {
                    Err(e.into())
                }
            }
        }
    }
}

/// Statistics of one translation, as read from `<model>.translation.log`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsRecord {
    /// False if the log contains `Translation aborted`
    pub translated: bool,
    /// Present only if the model has an initialization problem
    pub initialization: Option<PhaseStatistics>,
    /// Simulation problem statistics
    pub simulation: Option<PhaseStatistics>,
}

impl StatisticsRecord {
    /// Statistics of `phase`, if the phase exists
    #[must_use]
    pub fn phase(&self, phase: Phase) -> Option<&PhaseStatistics> {
        match phase {
            Phase::Initialization => self.initialization.as_ref(),
            Phase::Simulation => self.simulation.as_ref(),
        }
    }

    /// Mutable access to the statistics of `phase`
    pub fn phase_mut(&mut self, phase: Phase) -> &mut Option<PhaseStatistics> {
        match phase {
            Phase::Initialization => &mut self.initialization,
            Phase::Simulation => &mut self.simulation,
        }
    }

    /// Parse the statistics lines of a translation log
    #[must_use]
    pub fn parse_log(content: &str) -> Self {
        let mut translated = true;
        let mut init = PhaseStatistics::default();
        let mut sim = PhaseStatistics::default();
        let mut states = None;
        let mut in_initialization = false;

        for line in content.lines() {
            let target = if in_initialization { &mut init } else { &mut sim };
            if line.contains(ABORTED_MARKER) {
                translated = false;
            } else if line.contains(NONLINEAR_MARKER) {
                target.nonlinear = braced_value(line);
            } else if line.contains(LINEAR_MARKER) {
                target.linear = braced_value(line);
            } else if line.contains(STATES_MARKER) {
                let tail = after_last_colon(line);
                let count = tail.split("scalars").next().unwrap_or_default().trim();
                states = Some(count.to_string());
            } else if line.contains(JACOBIAN_MARKER) {
                target.numerical_jacobians = Some(after_last_colon(line).to_string());
            }
            if line.contains(INITIALIZATION_MARKER) {
                in_initialization = true;
            }
        }

        sim.continuous_states = states;
        Self {
            translated,
            initialization: in_initialization.then_some(init),
            simulation: Some(sim),
        }
    }

    /// Read and parse a translation log from disk
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the file cannot be read.
    pub fn from_log_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse_log(content.trim_start_matches('\u{feff}')))
    }
}

fn after_last_colon(line: &str) -> &str {
    line.rsplit_once(':').map_or(line, |(_, tail)| tail).trim()
}

fn braced_value(line: &str) -> Option<String> {
    let tail = line.rsplit_once(':').map_or(line, |(_, tail)| tail);
    BRACES
        .captures(tail)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// True if two statistic values describe the same systems of equations
///
/// Values compare equal if they match verbatim after trimming, or if their
/// comma-separated components are equal as multisets once `0` entries
/// (explicitly solved equations) are dropped.
#[must_use]
pub fn are_statistics_equal(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    if a == b {
        return true;
    }
    components(a) == components(b)
}

fn components(s: &str) -> Vec<String> {
    let mut parts: Vec<String> = s
        .replace(' ', "")
        .split(',')
        .filter(|p| *p != "0")
        .map(str::to_string)
        .collect();
    parts.sort();
    parts
}

/// Compare the statistics of `phase` and report every difference
///
/// Returns `true` if the statistics changed. `results_changed` selects the
/// wording of the message for changed values. Models listed in
/// `skip_models` are exempt from the `initialization/nonlinear` comparison.
#[must_use]
pub fn diff_statistics(
    old: &StatisticsRecord,
    new: &StatisticsRecord,
    phase: Phase,
    model: &str,
    results_changed: bool,
    skip_models: &[String],
    reporter: &Reporter,
) -> bool {
    match (old.phase(phase), new.phase(phase)) {
        (None, None) => false,
        (Some(_), None) => {
            reporter.warning(format!(
                "{model}: Found translation statistics for {phase} in old but not in new results."
            ));
            true
        }
        (None, Some(_)) => {
            reporter.warning(format!(
                "{model}: Found translation statistics for {phase} in new but not in old results."
            ));
            true
        }
        (Some(old_stats), Some(new_stats)) => {
            let mut changed = false;
            for (key, old_value) in old_stats.entries() {
                match new_stats.get(key) {
                    Some(new_value) => {
                        let exempt = phase == Phase::Initialization
                            && key == "nonlinear"
                            && skip_models.iter().any(|m| m == model);
                        if exempt {
                            tracing::info!(model, "skipping initialization statistics comparison");
                            continue;
                        }
                        if !are_statistics_equal(old_value, new_value) {
                            let what = if results_changed {
                                "and results changed"
                            } else {
                                "changed"
                            };
                            let tail = if results_changed {
                                ""
                            } else {
                                ", but results are unchanged"
                            };
                            reporter.warning(format!(
                                "{model}: Translation statistics for {phase} {what} for {key}{tail}.\n Old = {old_value}\n New = {new_value}"
                            ));
                            changed = true;
                        }
                    }
                    None => {
                        reporter.warning(format!(
                            "{model}: Found translation statistics for {phase} for {key} in old but not in new results.\n Old = {old_value}"
                        ));
                        changed = true;
                    }
                }
            }
            for (key, _) in new_stats.entries() {
                if old_stats.get(key).is_none() {
                    reporter.warning(format!(
                        "{model}: Found translation statistics for key {key} in {phase} in new but not in old results."
                    ));
                    changed = true;
                }
            }
            changed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
Translation of Lib.Examples.Tank:
  Continuous time states: 3 scalars
  Sizes after manipulation of the linear systems: {2, 0}
  Sizes after manipulation of the nonlinear systems: {1, 4}
  Number of numerical Jacobians: 0
Initialization problem
  Sizes after manipulation of the linear systems: {5}
  Sizes after manipulation of the nonlinear systems: {2}
  Number of numerical Jacobians: 1
";

    fn phase(linear: &str, nonlinear: &str) -> PhaseStatistics {
        PhaseStatistics {
            linear: Some(linear.into()),
            nonlinear: Some(nonlinear.into()),
            ..PhaseStatistics::default()
        }
    }

    #[test]
    fn test_parse_log_both_phases() {
        let rec = StatisticsRecord::parse_log(LOG);
        assert!(rec.translated);
        let sim = rec.simulation.unwrap();
        assert_eq!(sim.linear.as_deref(), Some("2, 0"));
        assert_eq!(sim.nonlinear.as_deref(), Some("1, 4"));
        assert_eq!(sim.continuous_states.as_deref(), Some("3"));
        assert_eq!(sim.numerical_jacobians.as_deref(), Some("0"));
        let init = rec.initialization.unwrap();
        assert_eq!(init.linear.as_deref(), Some("5"));
        assert_eq!(init.nonlinear.as_deref(), Some("2"));
        assert_eq!(init.numerical_jacobians.as_deref(), Some("1"));
        assert!(init.continuous_states.is_none());
    }

    #[test]
    fn test_parse_log_without_initialization() {
        let rec = StatisticsRecord::parse_log("  Number of numerical Jacobians: 2\n");
        assert!(rec.initialization.is_none());
        assert_eq!(
            rec.simulation.unwrap().numerical_jacobians.as_deref(),
            Some("2")
        );
    }

    #[test]
    fn test_parse_log_aborted() {
        let rec = StatisticsRecord::parse_log("  Translation aborted.\n");
        assert!(!rec.translated);
    }

    #[test]
    fn test_statistics_order_insensitive() {
        assert!(are_statistics_equal("1, 20, 1, 14", "14, 1, 1, 20"));
        assert!(are_statistics_equal(" 3 ", "3"));
        assert!(are_statistics_equal("0, 2", "2"));
        assert!(!are_statistics_equal("1, 2", "1, 3"));
        assert!(!are_statistics_equal("1, 1", "1"));
    }

    #[test]
    fn test_serialized_keys_sorted() {
        let stats = PhaseStatistics {
            linear: Some("1".into()),
            nonlinear: Some("2".into()),
            continuous_states: Some("3".into()),
            numerical_jacobians: Some("0".into()),
        };
        let json = serde_json::to_string_pretty(&stats).unwrap();
        let pos = |k: &str| json.find(k).unwrap();
        assert!(pos("\"linear\"") < pos("\"nonlinear\""));
        assert!(pos("\"nonlinear\"") < pos("\"number of continuous time states\""));
        assert!(pos("\"number of continuous time states\"") < pos("\"numerical Jacobians\""));
    }

    #[test]
    fn test_from_block_legacy_quotes() {
        let stats =
            PhaseStatistics::from_block("{'numerical Jacobians': '0', 'nonlinear': ' ', 'linear': ' '}")
                .unwrap();
        assert_eq!(stats.numerical_jacobians.as_deref(), Some("0"));
        assert_eq!(stats.linear.as_deref(), Some(" "));
    }

    #[test]
    fn test_from_block_invalid() {
        assert!(PhaseStatistics::from_block("not a dict").is_err());
    }

    #[test]
    fn test_diff_unchanged() {
        let rec = StatisticsRecord {
            translated: true,
            initialization: None,
            simulation: Some(phase("1, 2", "3")),
        };
        let reporter = Reporter::in_memory();
        for p in Phase::ALL {
            assert!(!diff_statistics(&rec, &rec, p, "M", false, &[], &reporter));
        }
        assert_eq!(reporter.warnings(), 0);
    }

    #[test]
    fn test_diff_changed_value() {
        let old = StatisticsRecord {
            simulation: Some(phase("1, 2", "3")),
            ..StatisticsRecord::default()
        };
        let new = StatisticsRecord {
            simulation: Some(phase("1, 2", "4")),
            ..StatisticsRecord::default()
        };
        let reporter = Reporter::in_memory();
        assert!(diff_statistics(&old, &new, Phase::Simulation, "M", false, &[], &reporter));
        assert_eq!(reporter.warnings(), 1);
    }

    #[test]
    fn test_diff_one_sided_phase() {
        let old = StatisticsRecord {
            initialization: Some(phase("1", "1")),
            ..StatisticsRecord::default()
        };
        let new = StatisticsRecord::default();
        let reporter = Reporter::in_memory();
        assert!(diff_statistics(&old, &new, Phase::Initialization, "M", false, &[], &reporter));
        assert!(diff_statistics(&new, &old, Phase::Initialization, "M", false, &[], &reporter));
        assert_eq!(reporter.warnings(), 2);
    }

    #[test]
    fn test_diff_missing_keys() {
        let old = StatisticsRecord {
            simulation: Some(phase("1", "1")),
            ..StatisticsRecord::default()
        };
        let new = StatisticsRecord {
            simulation: Some(PhaseStatistics {
                linear: Some("1".into()),
                numerical_jacobians: Some("0".into()),
                ..PhaseStatistics::default()
            }),
            ..StatisticsRecord::default()
        };
        let reporter = Reporter::in_memory();
        assert!(diff_statistics(&old, &new, Phase::Simulation, "M", false, &[], &reporter));
        // nonlinear gone, numerical Jacobians added
        assert_eq!(reporter.warnings(), 2);
    }

    #[test]
    fn test_diff_skip_list() {
        let old = StatisticsRecord {
            initialization: Some(phase("1", "1")),
            ..StatisticsRecord::default()
        };
        let new = StatisticsRecord {
            initialization: Some(phase("1", "1, 1")),
            ..StatisticsRecord::default()
        };
        let reporter = Reporter::in_memory();
        let skip = vec!["Lib.M".to_string()];
        assert!(!diff_statistics(&old, &new, Phase::Initialization, "Lib.M", false, &skip, &reporter));
        assert!(diff_statistics(&old, &new, Phase::Initialization, "Lib.N", false, &skip, &reporter));
    }
}
