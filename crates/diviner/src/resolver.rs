//! Reference ("truth") output resolution with an on-disk cache

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::case::TestCase;
use crate::error::{OracleError, ReferenceUnavailable};
use crate::oracle::ReferenceSource;
use crate::retry::RetryPolicy;

/// Where a reference output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Queried from the oracle during this run
    Fetched,
    /// Read from an up-to-date `.truth` file
    Cached,
}

#[derive(Debug, Clone)]
pub struct ReferenceRecord {
    pub text: String,
    pub provenance: Provenance,
}

/// Resolves the expected output of a test case.
pub struct ReferenceResolver {
    source: Arc<dyn ReferenceSource>,
    retry: RetryPolicy,
    write_files: bool,
}

impl ReferenceResolver {
    pub fn new(source: Arc<dyn ReferenceSource>, retry: RetryPolicy, write_files: bool) -> Self {
        Self {
            source,
            retry,
            write_files,
        }
    }

    pub fn source(&self) -> &dyn ReferenceSource {
        self.source.as_ref()
    }

    /// Cached text when the cache is fresh and no refresh is forced, otherwise
    /// a retried oracle query whose result replaces the cache file.
    pub fn resolve(
        &self,
        case: &TestCase,
        forced_refresh: bool,
    ) -> Result<ReferenceRecord, ReferenceUnavailable> {
        if !forced_refresh && is_fresh(&case.truth_path, &case.path) {
            match fs::read_to_string(&case.truth_path) {
                Ok(text) => {
                    tracing::debug!(test = %case.name, "using cached reference");
                    return Ok(ReferenceRecord {
                        text,
                        provenance: Provenance::Cached,
                    });
                }
                Err(e) => {
                    tracing::debug!(test = %case.name, "unreadable cache, refetching: {}", e);
                }
            }
        }

        let input = fs::read(&case.path).map_err(|e| ReferenceUnavailable {
            attempts: 0,
            last: OracleError::Input(e.to_string()),
        })?;

        let text = self
            .retry
            .run(|attempt| {
                tracing::debug!(test = %case.name, attempt, "querying oracle");
                self.source.fetch(&case.name, &input)
            })
            .map_err(|exhausted| {
                tracing::warn!(
                    test = %case.name,
                    attempts = exhausted.attempts,
                    "could not connect to oracle: {}",
                    exhausted.last
                );
                ReferenceUnavailable {
                    attempts: exhausted.attempts,
                    last: exhausted.last,
                }
            })?;

        if self.write_files {
            if let Err(e) = fs::write(&case.truth_path, &text) {
                tracing::warn!(
                    "failed to write {}: {}",
                    case.truth_path.display(),
                    e
                );
            }
        }

        Ok(ReferenceRecord {
            text,
            provenance: Provenance::Fetched,
        })
    }
}

/// A cache file is fresh when it exists and is not older than its source.
pub fn is_fresh(cache: &Path, source: &Path) -> bool {
    let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified());
    match (modified(cache), modified(source)) {
        (Ok(cached), Ok(src)) => cached >= src,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Backoff;
    use crate::variant::Artifacts;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, SystemTime};

    /// Plays back a script of responses, repeating the last one.
    struct Scripted {
        responses: Mutex<Vec<Result<String, OracleError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(responses: Vec<Result<String, OracleError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: AtomicU32::new(0),
            })
        }
    }

    impl ReferenceSource for Scripted {
        fn fetch(&self, _: &str, _: &[u8]) -> Result<String, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.remove(0)
            } else {
                responses[0].clone()
            }
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    fn case_in(dir: &Path) -> TestCase {
        let path = dir.join("t1.foo");
        fs::write(&path, "program").unwrap();
        TestCase {
            index: 0,
            name: "t1.foo".into(),
            path,
            truth_path: dir.join("t1.truth"),
            actual_path: dir.join("t1.actual"),
            artifacts: Artifacts::None,
        }
    }

    fn no_wait(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Backoff::Fixed { millis: 0 })
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn test_fetch_then_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let case = case_in(dir.path());
        let source = Scripted::new(vec![Ok("tokens\n\u{e9}rr\n".into())]);
        let resolver = ReferenceResolver::new(source.clone(), no_wait(1), true);

        let first = resolver.resolve(&case, false).unwrap();
        assert_eq!(first.provenance, Provenance::Fetched);
        assert_eq!(fs::read_to_string(&case.truth_path).unwrap(), first.text);

        let second = resolver.resolve(&case, false).unwrap();
        assert_eq!(second.provenance, Provenance::Cached);
        assert_eq!(second.text, first.text);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_forced_refresh_ignores_cache() {
        let dir = tempfile::tempdir().unwrap();
        let case = case_in(dir.path());
        fs::write(&case.truth_path, "old").unwrap();
        let source = Scripted::new(vec![Ok("new".into())]);
        let resolver = ReferenceResolver::new(source, no_wait(1), true);

        let record = resolver.resolve(&case, true).unwrap();
        assert_eq!(record.provenance, Provenance::Fetched);
        assert_eq!(record.text, "new");
        assert_eq!(fs::read_to_string(&case.truth_path).unwrap(), "new");
    }

    #[test]
    fn test_stale_cache_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let case = case_in(dir.path());
        fs::write(&case.truth_path, "old").unwrap();
        let now = SystemTime::now();
        set_mtime(&case.truth_path, now - Duration::from_secs(60));
        set_mtime(&case.path, now);

        let source = Scripted::new(vec![Ok("new".into())]);
        let resolver = ReferenceResolver::new(source, no_wait(1), true);
        let record = resolver.resolve(&case, false).unwrap();
        assert_eq!(record.provenance, Provenance::Fetched);
    }

    #[test]
    fn test_no_file_gen_leaves_cache_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let case = case_in(dir.path());
        let source = Scripted::new(vec![Ok("fresh".into())]);
        let resolver = ReferenceResolver::new(source, no_wait(1), false);

        resolver.resolve(&case, false).unwrap();
        assert!(!case.truth_path.exists());
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let case = case_in(dir.path());
        let source = Scripted::new(vec![
            Err(OracleError::Network("reset".into())),
            Err(OracleError::Http(502)),
            Ok("OK\n".into()),
        ]);
        let resolver = ReferenceResolver::new(source.clone(), no_wait(3), true);

        assert_eq!(resolver.resolve(&case, false).unwrap().text, "OK\n");
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exhausted_retries_are_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let case = case_in(dir.path());
        let source = Scripted::new(vec![Err(OracleError::Http(503))]);
        let resolver = ReferenceResolver::new(source.clone(), no_wait(3), true);

        let err = resolver.resolve(&case, false).unwrap_err();
        assert_eq!(err.attempts, 3);
        assert!(matches!(err.last, OracleError::Http(503)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert!(!case.truth_path.exists());
    }

    #[test]
    fn test_is_fresh_requires_cache() {
        let dir = tempfile::tempdir().unwrap();
        let case = case_in(dir.path());
        assert!(!is_fresh(&case.truth_path, &case.path));
    }
}
