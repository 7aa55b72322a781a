//! Runner configuration
//!
//! [`RunnerConfig`] holds every knob of a regression run. It can be loaded
//! from YAML; command-line flags override file values. Per-model experiment
//! settings come from the library's own `conf.json`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Location of the experiment settings below the library root
pub const EXPERIMENT_SETTINGS_FILE: &str = "Resources/Scripts/BuildingsPy/conf.json";

/// Configuration of a regression run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct RunnerConfig {
    /// Tool name used in log file names and `conf.json` lookups
    pub tool: String,
    /// Simulator executable, looked up on `PATH` unless it contains a separator
    pub simulator: String,
    /// Requested number of worker slots
    pub workers: usize,
    /// Per-slot deadline in seconds; `None` waits forever
    pub timeout_secs: Option<u64>,
    /// Interval between liveness checks of a slot process
    pub poll_interval_ms: u64,
    /// Time between the termination request and the forced kill
    pub termination_grace_ms: u64,
    /// Number of grid points stored per series
    pub n_points: usize,
    /// Pointwise comparison tolerance
    pub tolerance: f64,
    /// Reject all new results without asking
    pub batch: bool,
    /// Keep sandboxes after the run
    pub keep_sandboxes: bool,
    /// Skip comparison against reference results
    pub skip_verification: bool,
    /// Include `translateModelFMU` scripts
    pub fmu_tests: bool,
    /// Run the simulator with its GUI
    pub show_gui: bool,
    /// Models exempt from the initialization/nonlinear statistics check
    pub skip_statistics_models: Vec<String>,
    /// Restrict the run to these packages, e.g. `Lib.Fluid.{Tanks,Pipes}`
    pub single_package: Option<String>,
    /// File listing scripts to exclude
    pub exclude_file: Option<PathBuf>,
    /// Reuse these directories as sandboxes instead of simulating
    pub use_existing_results: Vec<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tool: "dymola".to_string(),
            simulator: "dymola".to_string(),
            workers: num_cpus::get(),
            timeout_secs: None,
            poll_interval_ms: 100,
            termination_grace_ms: 5_000,
            n_points: crate::result::DEFAULT_POINTS,
            tolerance: crate::compare::DEFAULT_TOLERANCE,
            batch: false,
            keep_sandboxes: false,
            skip_verification: false,
            fmu_tests: true,
            show_gui: false,
            skip_statistics_models: Vec::new(),
            single_package: None,
            exclude_file: None,
            use_existing_results: Vec::new(),
        }
    }
}

impl RunnerConfig {
    /// Load a configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read configuration at {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse a configuration from a YAML string
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or a value is out of range.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for zero workers, fewer than two grid points
    /// or a non-positive tolerance.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if self.n_points < 2 {
            return Err(Error::Config("n_points must be at least 2".into()));
        }
        if self.tolerance.is_nan() || self.tolerance <= 0.0 {
            return Err(Error::Config("tolerance must be positive".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".into()));
        }
        Ok(())
    }

    /// Combined unit test log, e.g. `unitTests-dymola.log`
    #[must_use]
    pub fn unit_test_log(&self) -> String {
        format!("unitTests-{}.log", self.tool)
    }

    /// Concatenated translation logs
    #[must_use]
    pub fn simulator_log(&self) -> String {
        format!("simulator-{}.log", self.tool)
    }

    /// Logs of failed translations
    #[must_use]
    pub fn failed_simulator_log(&self) -> String {
        format!("failed-simulator-{}.log", self.tool)
    }

    /// Per-variable comparison results
    #[must_use]
    pub fn comparison_log(&self) -> String {
        format!("comparison-{}.log", self.tool)
    }

    /// Arguments passed to the simulator
    #[must_use]
    pub fn simulator_args(&self) -> Vec<String> {
        let mut args = vec![crate::sandbox::DRIVER_SCRIPT.to_string()];
        if !self.show_gui {
            args.push("/nowindow".to_string());
        }
        args
    }
}

/// Per-model simulator settings from `conf.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSettings {
    /// Integration algorithm
    pub solver: String,
    /// Translate the model
    pub translate: bool,
    /// Simulate the model
    pub simulate: bool,
    /// Number of output intervals
    pub ncp: u32,
    /// Time limit in seconds
    pub time_out: u64,
    /// Reason for an exclusion
    pub comment: Option<String>,
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            solver: "CVode".to_string(),
            translate: true,
            simulate: true,
            ncp: 500,
            time_out: 300,
            comment: None,
        }
    }
}

impl ExperimentSettings {
    /// Message announcing an exclusion, if the model is excluded
    #[must_use]
    pub fn exclusion_message(&self, model: &str) -> Option<String> {
        let base = if !self.translate {
            format!("{model}: Requested to be excluded from translation.")
        } else if !self.simulate {
            format!("{model}: Requested to be excluded from simulation.")
        } else {
            return None;
        };
        Some(match &self.comment {
            Some(c) => format!("{base} {c}"),
            None => base,
        })
    }

    fn apply(&mut self, overrides: SettingsOverride) {
        if let Some(solver) = overrides.solver {
            self.solver = solver;
        }
        if let Some(ncp) = overrides.ncp {
            self.ncp = ncp;
        }
        if let Some(time_out) = overrides.time_out {
            self.time_out = time_out;
        }
        if overrides.comment.is_some() {
            self.comment = overrides.comment;
        }
        if let Some(simulate) = overrides.simulate {
            self.simulate = simulate;
        }
        if let Some(translate) = overrides.translate {
            self.translate = translate;
            if !translate {
                self.simulate = false;
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsOverride {
    solver: Option<String>,
    translate: Option<bool>,
    simulate: Option<bool>,
    ncp: Option<u32>,
    time_out: Option<u64>,
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SettingsEntry {
    model_name: String,
    #[serde(flatten)]
    tools: HashMap<String, serde_json::Value>,
}

/// Read per-model overrides for `tool` from the library's `conf.json`
///
/// Returns an empty map if the file does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but is not valid.
pub fn load_experiment_settings(
    library_root: &Path,
    tool: &str,
) -> Result<HashMap<String, ExperimentSettings>> {
    let path = library_root.join(EXPERIMENT_SETTINGS_FILE);
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(&path)?;
    parse_experiment_settings(&content, tool)
        .map_err(|e| Error::parse(&path, e.to_string()))
}

/// Parse the content of a `conf.json` file
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the JSON does not match the layout.
pub fn parse_experiment_settings(
    content: &str,
    tool: &str,
) -> Result<HashMap<String, ExperimentSettings>> {
    let entries: Vec<SettingsEntry> = serde_json::from_str(content)?;
    let mut settings = HashMap::new();
    for entry in entries {
        let mut merged: ExperimentSettings = settings
            .remove(&entry.model_name)
            .unwrap_or_default();
        if let Some(value) = entry.tools.get(tool) {
            let overrides: SettingsOverride = serde_json::from_value(value.clone())?;
            merged.apply(overrides);
        }
        settings.insert(entry.model_name, merged);
    }
    Ok(settings)
}
