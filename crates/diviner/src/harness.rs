//! Run setup: validates inputs and wires a variant to its collaborators.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::ProgressBar;

use crate::case::{self, TestCase};
use crate::compiler::Compiler;
use crate::config::DivinerConfig;
use crate::error::{RunError, SetupError};
use crate::oracle::{HttpOracle, ReferenceSource};
use crate::parallel::{ParallelConfig, run_parallel};
use crate::report::Scoreboard;
use crate::resolver::ReferenceResolver;
use crate::runner::CaseRunner;
use crate::variant::Variant;

/// Inputs of a run, as given on the command line.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub variant: Variant,
    /// Test file extension, with or without the leading `.`
    pub language_ext: String,
    pub compiler_path: PathBuf,
    pub test_dir: PathBuf,
    /// Write `.truth` and `.actual` files
    pub write_files: bool,
    /// Query the oracle even for up-to-date `.truth` files
    pub force_refresh: bool,
}

/// A validated run, ready to execute.
pub struct Harness {
    cases: Vec<TestCase>,
    runner: Arc<CaseRunner>,
    test_dir: PathBuf,
}

impl Harness {
    /// Validate inputs and talk to the real oracle over HTTP.
    pub fn prepare(options: &RunOptions, config: &DivinerConfig) -> Result<Self, SetupError> {
        let spec = options.variant.spec();
        let url = config
            .oracle_url
            .clone()
            .unwrap_or_else(|| options.variant.oracle_url());
        let oracle = HttpOracle::new(url, config.request_timeout(), spec.extraction)?;
        Self::with_source(options, config, Arc::new(oracle))
    }

    /// Validate inputs and use `source` for reference outputs.
    ///
    /// Nothing is spawned or fetched here; every setup error surfaces before
    /// the first test runs.
    pub fn with_source(
        options: &RunOptions,
        config: &DivinerConfig,
        source: Arc<dyn ReferenceSource>,
    ) -> Result<Self, SetupError> {
        if !options.test_dir.is_dir() {
            return Err(SetupError::NotADirectory(options.test_dir.clone()));
        }
        let compiler_path = case::validate_compiler(&options.compiler_path)?;

        let spec = options.variant.spec();
        let cases = case::discover(&options.test_dir, &options.language_ext, spec.artifacts)?;
        let test_dir = cases
            .first()
            .and_then(|c| c.path.parent())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| options.test_dir.clone());

        let runner = CaseRunner {
            spec,
            resolver: ReferenceResolver::new(source, config.retry_policy(), options.write_files),
            compiler: Compiler::new(compiler_path),
            failure_marker: config.failure_marker.clone(),
            codegen: config.codegen.clone(),
            write_files: options.write_files,
            force_refresh: options.force_refresh,
        };

        Ok(Self {
            cases,
            runner: Arc::new(runner),
            test_dir,
        })
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    pub fn test_dir(&self) -> &Path {
        &self.test_dir
    }

    /// Where reference outputs come from, for the run banner.
    pub fn oracle(&self) -> String {
        self.runner.resolver.source().describe()
    }

    pub fn run(
        self,
        config: &ParallelConfig,
        pb: Option<ProgressBar>,
    ) -> Result<Scoreboard, RunError> {
        tracing::info!(
            variant = %self.runner.spec.variant,
            comparator = self.runner.spec.comparator.name(),
            tests = self.cases.len(),
            jobs = config.jobs,
            "starting run"
        );
        let board = run_parallel(self.cases, self.runner, config, pb)?;
        tracing::info!(
            passed = board.passed.len(),
            failed = board.failed.len(),
            null = board.null.len(),
            "run finished"
        );
        Ok(board)
    }
}
