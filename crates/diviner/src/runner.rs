//! Single test case evaluation

use std::fmt;
use std::fs;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::case::TestCase;
use crate::compiler::Compiler;
use crate::config::CodegenConfig;
use crate::error::RunError;
use crate::producer::{ActualRecord, ProduceContext};
use crate::resolver::{Provenance, ReferenceResolver};
use crate::variant::VariantSpec;

/// Test outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Outputs are equivalent
    Passed,
    /// Outputs differ
    Failed,
    /// Reference or actual output could not be produced
    Null,
}

impl Outcome {
    pub const ALL: [Outcome; 3] = [Outcome::Passed, Outcome::Failed, Outcome::Null];
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Passed => write!(f, "passed"),
            Outcome::Failed => write!(f, "failed"),
            Outcome::Null => write!(f, "null"),
        }
    }
}

/// Result of evaluating one test case, sent back to the orchestrator.
#[derive(Debug, Clone)]
pub struct CaseReport {
    pub name: String,
    pub outcome: Outcome,
    /// Whether the oracle was queried for this case during the run
    pub fetched: bool,
    pub duration: Duration,
    /// Why the case is `Null`
    pub detail: Option<String>,
}

/// Everything needed to evaluate a test case. Shared read-only by workers.
pub struct CaseRunner {
    pub spec: VariantSpec,
    pub resolver: ReferenceResolver,
    pub compiler: Compiler,
    pub failure_marker: String,
    pub codegen: CodegenConfig,
    /// Write `.actual` files
    pub write_files: bool,
    /// Query the oracle even when the cache is fresh
    pub force_refresh: bool,
}

impl CaseRunner {
    /// Resolve, produce, persist, compare.
    ///
    /// Only a broken environment (the compiler cannot run) is an error; every
    /// other path ends in exactly one [`Outcome`].
    pub fn run_case(&self, case: &TestCase) -> Result<CaseReport, RunError> {
        let start = Instant::now();
        tracing::debug!(index = case.index, test = %case.name, "evaluating");
        let report = |outcome, fetched, detail: Option<String>| CaseReport {
            name: case.name.clone(),
            outcome,
            fetched,
            duration: start.elapsed(),
            detail,
        };

        let reference = match self.resolver.resolve(case, self.force_refresh) {
            Ok(reference) => reference,
            Err(e) => {
                // Exhausted attempts still count as oracle queries.
                let fetched = e.attempts > 0;
                return Ok(report(Outcome::Null, fetched, Some(e.to_string())));
            }
        };
        let fetched = reference.provenance == Provenance::Fetched;

        let ctx = ProduceContext {
            compiler: &self.compiler,
            failure_marker: &self.failure_marker,
            codegen: &self.codegen,
        };
        let actual = (self.spec.produce)(&ctx, case).map_err(|source| RunError::Produce {
            test: case.name.clone(),
            source,
        })?;
        let actual = match actual {
            ActualRecord::Produced(text) => text,
            ActualRecord::Absent(reason) => {
                tracing::debug!(test = %case.name, "no actual output: {}", reason);
                return Ok(report(Outcome::Null, fetched, Some(reason.to_string())));
            }
        };

        if self.write_files {
            if let Err(e) = fs::write(&case.actual_path, &actual) {
                tracing::warn!("failed to write {}: {}", case.actual_path.display(), e);
            }
        }

        let outcome = if self.spec.comparator.equivalent(&reference.text, &actual) {
            Outcome::Passed
        } else {
            Outcome::Failed
        };
        Ok(report(outcome, fetched, None))
    }
}
