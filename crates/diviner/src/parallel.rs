//! Parallel test runner.
//!
//! Distributes test cases across N worker threads. Jobs and results travel
//! over bounded crossbeam channels; every worker sends back the
//! [`CaseReport`] it produced and only the calling thread folds those into the
//! [`Scoreboard`]. A run-fatal error raises a shared stop flag: the feeder
//! stops scheduling, workers drop the jobs still queued, and in-flight cases
//! are allowed to finish.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use colored::Colorize;
use crossbeam_channel::{Receiver, Sender, bounded};
use indicatif::ProgressBar;

use crate::case::TestCase;
use crate::error::RunError;
use crate::report::Scoreboard;
use crate::runner::{CaseReport, CaseRunner, Outcome};

/// Knobs for one parallel run.
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Worker threads
    pub jobs: usize,
    /// Verbosity level (mirrors the CLI `-v` count)
    pub verbose: u8,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            jobs: num_cpus::get(),
            verbose: 0,
        }
    }
}

type CaseResult = Result<CaseReport, RunError>;

/// Run every case and aggregate the outcomes.
///
/// Blocks until all workers have exited.
pub fn run_parallel(
    cases: Vec<TestCase>,
    runner: Arc<CaseRunner>,
    config: &ParallelConfig,
    pb: Option<ProgressBar>,
) -> Result<Scoreboard, RunError> {
    let start = Instant::now();
    let jobs = config.jobs.max(1);
    let total = cases.len();

    let (job_tx, job_rx) = bounded::<TestCase>(jobs * 4);
    let (result_tx, result_rx) = bounded::<CaseResult>(jobs * 8);
    let stop = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::with_capacity(jobs);
    for i in 0..jobs {
        let job_rx = job_rx.clone();
        let result_tx = result_tx.clone();
        let runner = Arc::clone(&runner);
        let stop = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name(format!("diviner-worker-{i}"))
            .spawn(move || worker_main(job_rx, result_tx, runner, stop))
            .map_err(|e| RunError::Spawn {
                worker: i,
                message: e.to_string(),
            })?;
        handles.push(handle);
    }

    // Workers hold the only receivers and senders from here on, so both
    // channels close once the workers are gone.
    drop(job_rx);
    drop(result_tx);

    let feeder_stop = Arc::clone(&stop);
    let feeder = std::thread::spawn(move || {
        for case in cases {
            if feeder_stop.load(Ordering::Acquire) || job_tx.send(case).is_err() {
                break;
            }
        }
    });

    let mut board = Scoreboard::new(runner.spec.variant, total);
    let mut fatal: Option<RunError> = None;

    for result in &result_rx {
        match result {
            Ok(report) => {
                print_progress(&report, config.verbose, board.recorded());
                board.record(&report);
                if let Some(ref pb) = pb {
                    pb.inc(1);
                    pb.set_message(format!(
                        "Pass: {} Fail: {} Null: {} [{}j]",
                        board.passed.len(),
                        board.failed.len(),
                        board.null.len(),
                        jobs
                    ));
                }
            }
            Err(e) => {
                tracing::error!("aborting run: {}", e);
                if fatal.is_none() {
                    fatal = Some(e);
                }
            }
        }
    }

    if config.verbose == 1 {
        eprintln!();
    }
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    let _ = feeder.join();
    for h in handles {
        if let Err(e) = h.join() {
            if fatal.is_none() {
                fatal = Some(RunError::WorkerPanic(panic_message(e.as_ref())));
            }
        }
    }

    match fatal {
        Some(e) => Err(e),
        None => Ok(board.finish(start.elapsed())),
    }
}

fn worker_main(
    job_rx: Receiver<TestCase>,
    result_tx: Sender<CaseResult>,
    runner: Arc<CaseRunner>,
    stop: Arc<AtomicBool>,
) {
    for case in &job_rx {
        if stop.load(Ordering::Acquire) {
            break;
        }

        let result = catch_unwind(AssertUnwindSafe(|| runner.run_case(&case)))
            .unwrap_or_else(|e| Err(RunError::WorkerPanic(panic_message(e.as_ref()))));
        let fatal = result.is_err();
        if fatal {
            stop.store(true, Ordering::Release);
        }

        if result_tx.send(result).is_err() || fatal {
            break;
        }
    }
}

fn print_progress(report: &CaseReport, verbose: u8, seen: usize) {
    match verbose {
        0 => {}
        1 => {
            let ch = match report.outcome {
                Outcome::Passed => ".".green(),
                Outcome::Failed => "F".red(),
                Outcome::Null => "N".magenta(),
            };
            eprint!("{}", ch);
            if seen % 80 == 79 {
                eprintln!();
            }
        }
        _ => {
            let status = match report.outcome {
                Outcome::Passed => "PASS".green(),
                Outcome::Failed => "FAIL".red(),
                Outcome::Null => "NULL".magenta(),
            };
            let source = if report.fetched { "oracle" } else { "cache" };
            eprintln!(
                "[{}] {} ({}, {}ms)",
                status,
                report.name,
                source,
                report.duration.as_millis()
            );
            if let Some(ref detail) = report.detail {
                eprintln!("  {}", detail);
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown".to_string()
    }
}
