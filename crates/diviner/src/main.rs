use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::filter::EnvFilter;

use diviner::config::DivinerConfig;
use diviner::parallel::ParallelConfig;
use diviner::{Harness, RunError, RunOptions, Variant};

#[derive(Parser, Debug)]
#[command(name = "diviner", version)]
#[command(about = "Consult the oracle and run automated tests with ease and swagger.")]
struct Args {
    /// Which diviner version to use
    #[arg(value_enum)]
    diviner_version: Variant,

    /// File extension of the source language
    language_ext: String,

    /// Path to the compiler executable
    compiler_path: PathBuf,

    /// Directory containing the input tests
    test_dir_path: PathBuf,

    /// Do not write *.truth and *.actual result files
    #[arg(long, alias = "no_file_gen")]
    no_file_gen: bool,

    /// Query the oracle even when a cached *.truth file is up to date
    #[arg(short, long)]
    force: bool,

    /// Number of worker threads (defaults to the number of CPUs)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Path to a TOML config file (defaults to ./diviner.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Per-test output (-v: one character per test, -vv: one line per test)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let start = Instant::now();

    match run(&args) {
        Ok(()) => {
            if !args.json {
                println!(
                    "Testing and analysis took {:.2} secs to complete.\n",
                    start.elapsed().as_secs_f64()
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{} {}", "ERROR:".red().bold(), e);
            eprintln!("Exiting...");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), RunError> {
    let config = DivinerConfig::load_or_default(args.config.as_deref())
        .map_err(diviner::SetupError::from)?;

    let options = RunOptions {
        variant: args.diviner_version,
        language_ext: args.language_ext.clone(),
        compiler_path: args.compiler_path.clone(),
        test_dir: args.test_dir_path.clone(),
        write_files: !args.no_file_gen,
        force_refresh: args.force,
    };
    let harness = Harness::prepare(&options, &config)?;

    if !args.json {
        println!("{}\n", args.diviner_version.title().bold().cyan());
        println!(
            "Consulting with The Oracle at \"{}\" and evaluating on local compiler...",
            harness.oracle()
        );
    }

    let parallel = ParallelConfig {
        jobs: args.jobs.or(config.jobs).unwrap_or_else(num_cpus::get),
        verbose: if args.json { 0 } else { args.verbose },
    };

    let show_progress = !args.json && !args.no_progress && args.verbose == 0;
    let pb = show_progress.then(|| {
        let pb = ProgressBar::new(harness.cases().len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) | {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb
    });

    let test_dir = harness.test_dir().to_path_buf();
    let board = harness.run(&parallel, pb)?;

    if args.json {
        match board.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to generate JSON: {}", e),
        }
    } else {
        board.print_summary(&test_dir, options.write_files);
    }

    Ok(())
}
