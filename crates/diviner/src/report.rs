//! Scoreboard and result reporting

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use colored::*;
use serde::Serialize;

use crate::runner::{CaseReport, Outcome};
use crate::variant::Variant;

/// Aggregate results of one run.
///
/// Built only by the orchestrating thread; workers never touch it.
#[derive(Debug, Clone, Serialize)]
pub struct Scoreboard {
    pub variant: Variant,
    /// Number of discovered test cases
    pub total: usize,
    pub passed: Vec<String>,
    pub failed: Vec<String>,
    pub null: Vec<String>,
    /// Test cases whose reference was queried from the oracle
    pub fetched: usize,
    /// Why each null case could not be evaluated
    pub null_reasons: BTreeMap<String, String>,
    #[serde(rename = "elapsed_secs", serialize_with = "as_secs")]
    pub elapsed: Duration,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

fn as_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl Scoreboard {
    pub fn new(variant: Variant, total: usize) -> Self {
        Self {
            variant,
            total,
            passed: Vec::new(),
            failed: Vec::new(),
            null: Vec::new(),
            fetched: 0,
            null_reasons: BTreeMap::new(),
            elapsed: Duration::ZERO,
            finished_at: chrono::Utc::now(),
        }
    }

    pub fn record(&mut self, report: &CaseReport) {
        if report.fetched {
            self.fetched += 1;
        }
        match report.outcome {
            Outcome::Passed => self.passed.push(report.name.clone()),
            Outcome::Failed => self.failed.push(report.name.clone()),
            Outcome::Null => {
                self.null.push(report.name.clone());
                if let Some(ref detail) = report.detail {
                    self.null_reasons.insert(report.name.clone(), detail.clone());
                }
            }
        }
    }

    /// Sort the lists so output does not depend on completion order.
    pub fn finish(mut self, elapsed: Duration) -> Self {
        self.passed.sort();
        self.failed.sort();
        self.null.sort();
        self.elapsed = elapsed;
        self.finished_at = chrono::Utc::now();
        self
    }

    pub fn cases(&self, outcome: Outcome) -> &[String] {
        match outcome {
            Outcome::Passed => &self.passed,
            Outcome::Failed => &self.failed,
            Outcome::Null => &self.null,
        }
    }

    pub fn recorded(&self) -> usize {
        self.passed.len() + self.failed.len() + self.null.len()
    }

    /// References served from up-to-date `.truth` files.
    pub fn cached(&self) -> usize {
        self.total.saturating_sub(self.fetched)
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * self.passed.len() as f64 / self.total as f64
        }
    }

    /// `passed/total (percent%)`
    pub fn score_line(&self) -> String {
        format!(
            "Score: {}/{} ({}%)",
            self.passed.len(),
            self.total,
            round2(self.pass_rate())
        )
    }

    /// Print the human-readable report to stdout
    pub fn print_summary(&self, test_dir: &Path, wrote_files: bool) {
        println!();
        for outcome in Outcome::ALL {
            self.print_outcome(outcome);
        }

        println!(
            "\n\nUsed {} cached up-to-date truth queries.\n",
            self.cached()
        );
        if wrote_files {
            println!(
                "Wrote *.truth and *.actual files to \"{}\".\n",
                test_dir.display()
            );
        }
        println!(
            "Completed {} test cases in {} secs.",
            self.total,
            round2(self.elapsed.as_secs_f64())
        );
        let score = self.score_line();
        if self.passed.len() == self.total {
            println!("{}\n", score.green().bold());
        } else {
            println!("{}\n", score.yellow().bold());
        }
    }

    fn print_outcome(&self, outcome: Outcome) {
        let cases = self.cases(outcome);
        if cases.is_empty() {
            println!("\nNo test cases {}.", outcome);
            return;
        }
        let label = outcome.to_string().to_uppercase();
        let label = match outcome {
            Outcome::Passed => label.green(),
            Outcome::Failed => label.red(),
            Outcome::Null => label.magenta(),
        };
        println!("\nThe following tests {}:", label.bold());
        for name in cases {
            match self.null_reasons.get(name) {
                Some(reason) if outcome == Outcome::Null => {
                    println!("\t- {} {}", name, format!("({})", reason).dimmed())
                }
                _ => println!("\t- {}", name),
            }
        }
    }

    /// Export to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Some(map) = value.as_object_mut() {
            map.insert("pass_rate".to_string(), round2(self.pass_rate()).into());
        }
        serde_json::to_string_pretty(&value)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
