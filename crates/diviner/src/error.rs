//! Error types for the diviner runner

use std::path::PathBuf;

use thiserror::Error;

/// Problems detected while validating inputs, before any test runs.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("<test_dir_path>, \"{0}\", is not a directory")]
    NotADirectory(PathBuf),

    #[error("<compiler_path>, \"{0}\", is not a file")]
    CompilerMissing(PathBuf),

    #[error("no \"*.{ext}\" test cases found in \"{dir}\"")]
    NoTests { ext: String, dir: PathBuf },

    #[error("\"{dir}\" contains test cases sharing a base name: {names:?}")]
    DuplicateNames { dir: PathBuf, names: Vec<String> },

    #[error("test case \"{test}\" would overwrite its own input through \"{path}\"")]
    ArtifactClash { test: String, path: PathBuf },

    #[error("failed to list \"{0}\": {1}")]
    Listing(PathBuf, String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build oracle client: {0}")]
    Client(String),
}

/// Failure of a single oracle request.
#[derive(Debug, Clone, Error)]
pub enum OracleError {
    #[error("network error: {0}")]
    Network(String),

    #[error("oracle answered HTTP {0}")]
    Http(u16),

    #[error("oracle response has no <pre> block")]
    MissingOutput,

    #[error("failed to read test input: {0}")]
    Input(String),
}

/// Reference output could not be obtained after exhausting retries.
#[derive(Debug, Clone, Error)]
#[error("reference unavailable after {attempts} attempt(s): {last}")]
pub struct ReferenceUnavailable {
    pub attempts: u32,
    pub last: OracleError,
}

/// The compiler under test (or a toolchain step) could not run at all.
///
/// These indicate a broken environment rather than a bad test case, so they
/// abort the whole run.
#[derive(Debug, Error)]
pub enum ProduceError {
    #[error("unable to run \"{program}\": {message}")]
    Spawn { program: String, message: String },

    #[error("\"{program}\" was terminated by signal {signal}")]
    Signal { program: String, signal: i32 },

    #[error("failed to capture output of \"{program}\": {message}")]
    Capture { program: String, message: String },

    #[error("test case \"{test}\" carries artifacts of another variant")]
    Layout { test: String },
}

/// Run-level failure. Returned to the entry point, which owns process exit.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error("exception occurred while evaluating \"{test}\": {source}")]
    Produce {
        test: String,
        #[source]
        source: ProduceError,
    },

    #[error("worker thread panicked: {0}")]
    WorkerPanic(String),

    #[error("failed to spawn worker {worker}: {message}")]
    Spawn { worker: usize, message: String },
}

/// Configuration file could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {message}")]
    Read { path: PathBuf, message: String },

    #[error("failed to parse config '{path}': {message}")]
    Parse { path: PathBuf, message: String },
}
