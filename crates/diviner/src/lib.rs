//! # Diviner
//!
//! Oracle-backed conformance runner for student compilers.
//!
//! Each test input is sent to a reference implementation (the oracle) and to
//! the local compiler; the two outputs are compared with a version-specific
//! strategy and the results are tallied into a scoreboard.

#![warn(clippy::all)]

pub mod case;
pub mod compare;
pub mod compiler;
pub mod config;
pub mod error;
pub mod harness;
pub mod oracle;
pub mod parallel;
pub mod producer;
pub mod report;
pub mod resolver;
pub mod retry;
pub mod runner;
pub mod variant;

pub use error::{RunError, SetupError};
pub use harness::{Harness, RunOptions};
pub use report::Scoreboard;
pub use runner::{CaseReport, Outcome};
pub use variant::Variant;
