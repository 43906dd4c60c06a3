//! TOML configuration for the diviner runner

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::retry::{Backoff, RetryPolicy};

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "diviner.toml";

/// Runner configuration loaded from TOML file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DivinerConfig {
    /// Oracle endpoint (replaces the variant's default URL)
    pub oracle_url: Option<String>,

    /// Total oracle attempts per test case
    pub max_attempts: u32,

    /// Delay schedule between oracle attempts
    pub backoff: Backoff,

    /// Hard timeout for a single oracle request
    pub request_timeout_secs: u64,

    /// Worker threads (defaults to the number of CPUs)
    pub jobs: Option<usize>,

    /// Compiler output containing this string means the compiler gave up
    pub failure_marker: String,

    /// Toolchain used by the code generation variant
    pub codegen: CodegenConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CodegenConfig {
    pub assembler: String,
    pub linker: String,
    /// Linker arguments; `{object}`, `{runtime}` and `{exe}` are substituted
    pub link_args: Vec<String>,
    /// Runtime support object, relative paths resolve against the compiler's directory
    pub runtime_object: PathBuf,
    /// Program output containing this string counts as a crash
    pub crash_marker: String,
}

impl Default for DivinerConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            oracle_url: None,
            max_attempts: retry.max_attempts,
            backoff: retry.backoff,
            request_timeout_secs: 30,
            jobs: None,
            failure_marker: "Error".to_string(),
            codegen: CodegenConfig::default(),
        }
    }
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            assembler: "as".to_string(),
            linker: "ld".to_string(),
            link_args: [
                "-dynamic-linker",
                "/lib64/ld-linux-x86-64.so.2",
                "/usr/lib/x86_64-linux-gnu/crt1.o",
                "/usr/lib/x86_64-linux-gnu/crti.o",
                "-lc",
                "{object}",
                "{runtime}",
                "/usr/lib/x86_64-linux-gnu/crtn.o",
                "-o",
                "{exe}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            runtime_object: PathBuf::from("stdcshanty.o"),
            crash_marker: "Segmentation".to_string(),
        }
    }
}

impl DivinerConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// An explicit path must load; the implicit `diviner.toml` falls back to
    /// defaults with a warning when broken.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if !default_path.exists() {
            return Ok(Self::default());
        }
        match Self::load(default_path) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!("{}; using defaults", e);
                Ok(Self::default())
            }
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.backoff)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl CodegenConfig {
    /// Linker arguments with placeholders filled in.
    pub fn link_args_for(&self, object: &Path, runtime: &Path, exe: &Path) -> Vec<String> {
        self.link_args
            .iter()
            .map(|arg| match arg.as_str() {
                "{object}" => object.display().to_string(),
                "{runtime}" => runtime.display().to_string(),
                "{exe}" => exe.display().to_string(),
                _ => arg.clone(),
            })
            .collect()
    }
}
