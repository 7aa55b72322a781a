//! simreg CLI library
//!
//! Library functions for the simreg command-line tool.

#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]
// Allow common patterns in test code
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

use simreg_runner::{RunnerConfig, count_classes};
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, fmt};

/// Result of a CLI operation
#[derive(Debug)]
pub enum CliResult {
    /// Operation succeeded
    Success(String),
    /// Operation failed with error
    Error(String),
}

impl CliResult {
    /// Returns true if the result is a success
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns the message
    pub fn message(&self) -> &str {
        match self {
            Self::Success(msg) | Self::Error(msg) => msg,
        }
    }
}

/// Command-line settings of a regression run
///
/// `None` and `false` leave the value of the configuration file (or the
/// default) in place.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Library root
    pub library: PathBuf,
    /// Packages to test, curly-brace notation allowed
    pub single_package: Option<String>,
    /// Number of worker slots
    pub workers: Option<usize>,
    /// Never ask, never write references
    pub batch: bool,
    /// Tool name
    pub tool: Option<String>,
    /// Time limit per slot in seconds
    pub timeout: Option<u64>,
    /// Simulator executable
    pub simulator: Option<String>,
    /// Keep the sandboxes after the run
    pub keep_tmp: bool,
    /// Directories of an earlier run to verify without simulating
    pub use_existing_results: Vec<PathBuf>,
    /// Run the simulations but do not compare results
    pub skip_verification: bool,
    /// Skip FMU export tests
    pub no_fmu: bool,
    /// Show the simulator window
    pub show_gui: bool,
    /// YAML configuration file
    pub config: Option<PathBuf>,
    /// File listing scripts to exclude
    pub exclude: Option<PathBuf>,
}

/// Build the runner configuration: file values first, then the flags
pub fn build_config(options: &RunOptions) -> Result<RunnerConfig, String> {
    let mut config = match &options.config {
        Some(path) => RunnerConfig::from_file(path).map_err(|e| e.to_string())?,
        None => RunnerConfig::default(),
    };

    if let Some(tool) = &options.tool {
        config.tool.clone_from(tool);
        if options.simulator.is_none() {
            config.simulator.clone_from(tool);
        }
    }
    if let Some(simulator) = &options.simulator {
        config.simulator.clone_from(simulator);
    }
    if let Some(workers) = options.workers {
        config.workers = workers;
    }
    if options.timeout.is_some() {
        config.timeout_secs = options.timeout;
    }
    if options.single_package.is_some() {
        config.single_package.clone_from(&options.single_package);
    }
    if options.exclude.is_some() {
        config.exclude_file.clone_from(&options.exclude);
    }
    if !options.use_existing_results.is_empty() {
        config.use_existing_results = options
            .use_existing_results
            .iter()
            .map(|dir| absolute(dir))
            .collect();
    }
    config.batch |= options.batch;
    config.keep_sandboxes |= options.keep_tmp;
    config.skip_verification |= options.skip_verification;
    config.show_gui |= options.show_gui;
    config.fmu_tests &= !options.no_fmu;

    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Count the models, blocks and functions of a library
pub fn count_classes_report(library: &Path) -> CliResult {
    match count_classes(library) {
        Ok(count) => CliResult::Success(format!(
            "Number of models   : {}\n          blocks   : {}\n          functions: {}",
            count.models, count.blocks, count.functions
        )),
        Err(e) => CliResult::Error(format!("Error counting classes: {e}")),
    }
}

/// Initialize logging
///
/// Use `RUST_LOG` to override the default `info` filter. Logs go to stderr
/// so they do not mix with the run summary.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_result_success() {
        let result = CliResult::Success("test".to_string());
        assert!(result.is_success());
        assert_eq!(result.message(), "test");
    }

    #[test]
    fn test_cli_result_error() {
        let result = CliResult::Error("error".to_string());
        assert!(!result.is_success());
        assert_eq!(result.message(), "error");
    }

    #[test]
    fn test_build_config_defaults() {
        let config = build_config(&RunOptions::default()).unwrap();
        assert_eq!(config.tool, "dymola");
        assert!(!config.batch);
        assert!(config.fmu_tests);
        assert!(config.timeout_secs.is_none());
    }

    #[test]
    fn test_flags_override_defaults() {
        let options = RunOptions {
            workers: Some(3),
            batch: true,
            timeout: Some(600),
            no_fmu: true,
            keep_tmp: true,
            single_package: Some("Lib.Fluid".into()),
            ..RunOptions::default()
        };
        let config = build_config(&options).unwrap();
        assert_eq!(config.workers, 3);
        assert!(config.batch);
        assert_eq!(config.timeout_secs, Some(600));
        assert!(!config.fmu_tests);
        assert!(config.keep_sandboxes);
        assert_eq!(config.single_package.as_deref(), Some("Lib.Fluid"));
    }

    #[test]
    fn test_tool_sets_simulator() {
        let options = RunOptions {
            tool: Some("dymola2024".into()),
            ..RunOptions::default()
        };
        let config = build_config(&options).unwrap();
        assert_eq!(config.simulator, "dymola2024");

        let options = RunOptions {
            tool: Some("dymola".into()),
            simulator: Some("/opt/dymola/bin/dymola".into()),
            ..RunOptions::default()
        };
        let config = build_config(&options).unwrap();
        assert_eq!(config.tool, "dymola");
        assert_eq!(config.simulator, "/opt/dymola/bin/dymola");
    }

    #[test]
    fn test_tool_names_log_files() {
        let options = RunOptions {
            tool: Some("dymola2024".into()),
            ..RunOptions::default()
        };
        let config = build_config(&options).unwrap();
        assert_eq!(config.unit_test_log(), "unitTests-dymola2024.log");
        assert_eq!(config.simulator_log(), "simulator-dymola2024.log");
        assert_eq!(config.comparison_log(), "comparison-dymola2024.log");
        assert_eq!(
            simreg_runner::reference::REFERENCE_SUBDIR,
            "Resources/ReferenceResults/Dymola"
        );
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simreg.yaml");
        std::fs::write(&path, "workers: 2\ntolerance: 0.01\nbatch: true\n").unwrap();
        let options = RunOptions {
            config: Some(path),
            workers: Some(6),
            ..RunOptions::default()
        };
        let config = build_config(&options).unwrap();
        assert_eq!(config.workers, 6);
        assert!(config.batch);
        assert!((config.tolerance - 0.01).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_workers_rejected() {
        let options = RunOptions {
            workers: Some(0),
            ..RunOptions::default()
        };
        assert!(build_config(&options).is_err());
    }

    #[test]
    fn test_missing_config_file() {
        let options = RunOptions {
            config: Some(PathBuf::from("/nonexistent/simreg.yaml")),
            ..RunOptions::default()
        };
        let err = build_config(&options).unwrap_err();
        assert!(err.contains("simreg.yaml"));
    }

    #[test]
    fn test_use_existing_results_made_absolute() {
        let options = RunOptions {
            use_existing_results: vec![PathBuf::from("runs/tmp-Lib-0")],
            ..RunOptions::default()
        };
        let config = build_config(&options).unwrap();
        assert!(config.use_existing_results[0].is_absolute());
    }

    #[test]
    fn test_count_classes_report() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("Lib");
        std::fs::create_dir_all(root.join("Fluid")).unwrap();
        std::fs::write(root.join("package.mo"), "within;\npackage Lib\nend Lib;\n").unwrap();
        std::fs::write(root.join("Fluid/Tank.mo"), "within Lib.Fluid;\nmodel Tank\nend Tank;\n")
            .unwrap();
        std::fs::write(root.join("Fluid/Gain.mo"), "within Lib.Fluid;\nblock Gain\nend Gain;\n")
            .unwrap();

        let result = count_classes_report(&root);
        assert!(result.is_success());
        assert!(result.message().contains("Number of models   : 1"));
        assert!(result.message().contains("blocks   : 1"));
        assert!(result.message().contains("functions: 0"));
    }
}
