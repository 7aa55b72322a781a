//! simreg CLI
//!
//! Command-line interface for running simulation regression tests.

#![allow(clippy::doc_markdown)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use clap::{Parser, Subcommand};
use simreg_cli::{RunOptions, build_config, count_classes_report, init_logging};
use simreg_runner::{ExitStatus, Tester};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "simreg")]
#[command(about = "Regression tests for simulation model libraries", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate the library's test scripts and compare against references
    Run {
        /// Library root (the directory holding the top-level package.mo)
        #[arg(short, long, default_value = ".")]
        library: PathBuf,

        /// Only test these packages, e.g. "Lib.Fluid" or "Lib.{Fluid,Controls}"
        #[arg(short, long)]
        single_package: Option<String>,

        /// Number of parallel worker slots
        #[arg(short = 'n', long)]
        number_of_processors: Option<usize>,

        /// Run without prompts; new or changed references are not written
        #[arg(short, long)]
        batch: bool,

        /// Tool name used in log file names and conf.json lookups
        #[arg(short, long)]
        tool: Option<String>,

        /// Time limit per worker slot in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Simulator executable (defaults to the tool name)
        #[arg(long)]
        simulator: Option<String>,

        /// Keep the temporary sandboxes after the run
        #[arg(long)]
        keep_tmp: bool,

        /// Verify results of an earlier run instead of simulating
        #[arg(long, value_name = "DIR", num_args = 1..)]
        use_existing_results: Vec<PathBuf>,

        /// Simulate but skip the comparison against references
        #[arg(long)]
        skip_verification: bool,

        /// Skip FMU export tests
        #[arg(long)]
        no_fmu: bool,

        /// Show the simulator window
        #[arg(long)]
        show_gui: bool,

        /// YAML configuration file; flags override its values
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// File listing scripts to exclude, one per line
        #[arg(long)]
        exclude: Option<PathBuf>,
    },

    /// Count the models, blocks and functions of a library
    CountClasses {
        /// Library root
        #[arg(short, long, default_value = ".")]
        library: PathBuf,
    },
}

fn main() {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            library,
            single_package,
            number_of_processors,
            batch,
            tool,
            timeout,
            simulator,
            keep_tmp,
            use_existing_results,
            skip_verification,
            no_fmu,
            show_gui,
            config,
            exclude,
        } => {
            let options = RunOptions {
                library,
                single_package,
                workers: number_of_processors,
                batch,
                tool,
                timeout,
                simulator,
                keep_tmp,
                use_existing_results,
                skip_verification,
                no_fmu,
                show_gui,
                config,
                exclude,
            };
            run_tests(&options);
        }
        Commands::CountClasses { library } => {
            let result = count_classes_report(&library);
            if result.is_success() {
                println!("{}", result.message());
            } else {
                eprintln!("{}", result.message());
                std::process::exit(1);
            }
        }
    }
}

fn run_tests(options: &RunOptions) {
    let config = match build_config(options) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(ExitStatus::ErrorsReported.code());
        }
    };
    tracing::info!(
        library = %options.library.display(),
        tool = %config.tool,
        workers = config.workers,
        "starting regression run"
    );
    let mut tester = Tester::new(&options.library, config);
    let status = tester.run();
    std::process::exit(status.code());
}
