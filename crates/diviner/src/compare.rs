//! Output comparison strategies.
//!
//! Every variant picks one [`Comparator`]. The orchestrator only ever sees the
//! trait, so a new strategy is a new impl plus a registry entry.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// Decides whether reference and actual output count as the same.
pub trait Comparator: Send + Sync {
    fn equivalent(&self, reference: &str, actual: &str) -> bool;

    /// Short label for reports.
    fn name(&self) -> &'static str;
}

/// Byte-for-byte equality.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatch;

impl Comparator for ExactMatch {
    fn equivalent(&self, reference: &str, actual: &str) -> bool {
        reference == actual
    }

    fn name(&self) -> &'static str {
        "exact"
    }
}

/// Matches ` [line,col]-[line,col]: ` position annotations.
static POSITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" \[[0-9]+,[0-9]+\]-\[[0-9]+,[0-9]+\]: ").unwrap());

/// Order-insensitive, count-sensitive comparison of diagnostics with
/// positions masked out.
///
/// Line counts are not checked up front; the multiset comparison already
/// catches missing or duplicated lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagnosticMultiset;

impl DiagnosticMultiset {
    pub fn normalize(line: &str) -> Cow<'_, str> {
        POSITION.replace_all(line, " ")
    }

    fn counts(text: &str) -> HashMap<Cow<'_, str>, usize> {
        let mut counts = HashMap::new();
        for line in text.split('\n') {
            *counts.entry(Self::normalize(line)).or_insert(0) += 1;
        }
        counts
    }
}

impl Comparator for DiagnosticMultiset {
    fn equivalent(&self, reference: &str, actual: &str) -> bool {
        Self::counts(reference) == Self::counts(actual)
    }

    fn name(&self) -> &'static str {
        "diagnostic-multiset"
    }
}

/// Line-by-line comparison after rewriting known synonyms on each side.
///
/// Unequal line counts are a mismatch before any line is looked at.
#[derive(Debug, Clone, Copy)]
pub struct SubstitutedLines {
    pub reference_subs: &'static [(&'static str, &'static str)],
    pub actual_subs: &'static [(&'static str, &'static str)],
}

/// The oracle emits 8-bit boolean ops where the 64-bit forms are equivalent.
pub const WIDE_BOOLEAN_OPS: &[(&str, &str)] =
    &[("AND8", "AND64"), ("OR8", "OR64"), ("NOT8", "NOT64")];

/// Temporaries may be named `tmpVar` locally and `tmp` by the oracle.
pub const TEMP_NAMES: &[(&str, &str)] = &[("tmpVar", "tmp")];

impl SubstitutedLines {
    pub const THREE_ADDRESS_CODE: SubstitutedLines = SubstitutedLines {
        reference_subs: WIDE_BOOLEAN_OPS,
        actual_subs: TEMP_NAMES,
    };
}

fn substitute(line: &str, subs: &[(&str, &str)]) -> String {
    subs.iter()
        .fold(line.to_string(), |acc, (from, to)| acc.replace(from, to))
}

impl Comparator for SubstitutedLines {
    fn equivalent(&self, reference: &str, actual: &str) -> bool {
        let reference: Vec<&str> = reference.split('\n').collect();
        let actual: Vec<&str> = actual.split('\n').collect();
        if reference.len() != actual.len() {
            return false;
        }
        reference.iter().zip(&actual).all(|(r, a)| {
            substitute(r, self.reference_subs) == substitute(a, self.actual_subs)
        })
    }

    fn name(&self) -> &'static str {
        "substituted-lines"
    }
}
