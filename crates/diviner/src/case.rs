//! Test case discovery

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::SetupError;
use crate::variant::Artifacts;

/// A single test input and every path derived from it.
#[derive(Debug, Clone)]
pub struct TestCase {
    /// Position in discovery order
    pub index: usize,
    /// File name, e.g. `t1.cshanty`
    pub name: String,
    /// Absolute path of the test input
    pub path: PathBuf,
    /// Cached oracle output
    pub truth_path: PathBuf,
    /// Compiler output of the latest run
    pub actual_path: PathBuf,
    /// Variant-specific side-effect files
    pub artifacts: Artifacts,
}

/// Base name shared by every artifact of a test: the file name up to its first `.`.
pub fn base_name(file_name: &str) -> &str {
    file_name.split('.').next().unwrap_or(file_name)
}

/// Accepts `cshanty` as well as `.cshanty`.
pub fn normalize_ext(ext: &str) -> &str {
    ext.strip_prefix('.').unwrap_or(ext)
}

/// List `*.ext` files directly inside `dir` and derive their paths.
///
/// Fails before any work is done when the directory is missing, holds no
/// matching files, holds two files that would share `.truth`/`.actual`
/// outputs, or holds an input that another file derived from a test would
/// overwrite. Matching is by file-name suffix, so `tar.gz` works.
pub fn discover<F>(dir: &Path, ext: &str, artifacts: F) -> Result<Vec<TestCase>, SetupError>
where
    F: Fn(&Path, &str) -> Artifacts,
{
    if !dir.is_dir() {
        return Err(SetupError::NotADirectory(dir.to_path_buf()));
    }
    let dir = dir
        .canonicalize()
        .map_err(|e| SetupError::Listing(dir.to_path_buf(), e.to_string()))?;
    let ext = normalize_ext(ext);

    let mut names = Vec::new();
    for entry in WalkDir::new(&dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| SetupError::Listing(dir.clone(), e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let matches = name
            .strip_suffix(ext)
            .is_some_and(|stem| stem.len() > 1 && stem.ends_with('.'));
        if matches {
            names.push(name.into_owned());
        }
    }

    if names.is_empty() {
        return Err(SetupError::NoTests {
            ext: ext.to_string(),
            dir,
        });
    }

    let mut by_base: BTreeMap<&str, usize> = BTreeMap::new();
    for name in &names {
        *by_base.entry(base_name(name)).or_default() += 1;
    }
    let duplicates: Vec<String> = by_base
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(base, _)| base.to_string())
        .collect();
    if !duplicates.is_empty() {
        return Err(SetupError::DuplicateNames {
            dir,
            names: duplicates,
        });
    }

    let cases: Vec<TestCase> = names
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let base = base_name(name);
            TestCase {
                index,
                name: name.clone(),
                path: dir.join(name),
                truth_path: dir.join(format!("{base}.truth")),
                actual_path: dir.join(format!("{base}.actual")),
                artifacts: artifacts(&dir, base),
            }
        })
        .collect();

    // Side files are removed before each compiler run; one that aliases an
    // input would delete it.
    for case in &cases {
        let clash = [case.truth_path.as_path(), case.actual_path.as_path()]
            .into_iter()
            .chain(case.artifacts.paths())
            .find(|p| cases.iter().any(|other| other.path == *p));
        if let Some(path) = clash {
            return Err(SetupError::ArtifactClash {
                test: case.name.clone(),
                path: path.to_path_buf(),
            });
        }
    }

    Ok(cases)
}

/// The compiler path must name an existing file.
pub fn validate_compiler(path: &Path) -> Result<PathBuf, SetupError> {
    if !path.is_file() {
        return Err(SetupError::CompilerMissing(path.to_path_buf()));
    }
    path.canonicalize()
        .map_err(|_| SetupError::CompilerMissing(path.to_path_buf()))
}
