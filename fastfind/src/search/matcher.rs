use memchr::memmem::Finder;
use std::fmt;
use std::path::Path;
use tracing::trace;

use super::processor::ContentScanner;
use crate::config::{NameCase, NameScope, SearchConfig};
use crate::errors::SearchResult;
use crate::filters::ExtensionFilter;
use crate::metrics::ScanMetrics;
use crate::queue::SearchRequest;
use crate::results::MatchKind;

/// A request compiled for matching: the extension filter is parsed once, the
/// name needle is case-folded once and the content finder is built once.
#[derive(Clone)]
pub struct Query {
    text: String,
    name_needle: String,
    content_finder: Finder<'static>,
    extension_filter: ExtensionFilter,
    name_case: NameCase,
    name_scope: NameScope,
}

impl Query {
    /// Compiles a request under the matching policy in `config`.
    /// Fails only on an invalid extension pattern.
    pub fn compile(request: &SearchRequest, config: &SearchConfig) -> SearchResult<Self> {
        let extension_filter =
            ExtensionFilter::compile(&request.extension_filter, config.extension_mode)?;
        let name_needle = match config.name_case {
            NameCase::Insensitive => request.query.to_lowercase(),
            NameCase::Sensitive => request.query.clone(),
        };

        Ok(Self {
            text: request.query.clone(),
            name_needle,
            content_finder: Finder::new(request.query.as_bytes()).into_owned(),
            extension_filter,
            name_case: config.name_case,
            name_scope: config.name_scope,
        })
    }

    pub fn extension_filter(&self) -> &ExtensionFilter {
        &self.extension_filter
    }

    /// Name check only; never touches the file.
    pub fn name_matches(&self, path: &Path) -> bool {
        let name = match self.name_scope {
            NameScope::Path => path.to_string_lossy(),
            NameScope::FileName => match path.file_name() {
                Some(name) => name.to_string_lossy(),
                None => return false,
            },
        };
        match self.name_case {
            NameCase::Insensitive => name.to_lowercase().contains(&self.name_needle),
            NameCase::Sensitive => name.contains(&self.name_needle),
        }
    }

    pub fn content_finder(&self) -> &Finder<'static> {
        &self.content_finder
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("text", &self.text)
            .field("extension_filter", &self.extension_filter)
            .field("name_case", &self.name_case)
            .field("name_scope", &self.name_scope)
            .finish()
    }
}

/// Per-file match decision.
///
/// Implementations must be stateless between calls: the worker pool invokes
/// `check` for many files at once. An `Err` means the file could not be
/// examined; the job logs it and counts the file as searched without a match.
pub trait Matcher: Send + Sync {
    fn check(
        &self,
        path: &Path,
        query: &Query,
        metrics: &ScanMetrics,
    ) -> SearchResult<Option<MatchKind>>;
}

/// Extension filter, then name, then raw content bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileMatcher;

impl Matcher for FileMatcher {
    fn check(
        &self,
        path: &Path,
        query: &Query,
        metrics: &ScanMetrics,
    ) -> SearchResult<Option<MatchKind>> {
        if !query.extension_filter().accepts(path) {
            metrics.record_extension_reject();
            return Ok(None);
        }

        if query.name_matches(path) {
            trace!("Name match: {}", path.display());
            metrics.record_name_hit();
            return Ok(Some(MatchKind::Name));
        }

        let scanner = ContentScanner::new(metrics);
        if scanner.contains(path, query.content_finder())? {
            trace!("Content match: {}", path.display());
            metrics.record_content_hit();
            return Ok(Some(MatchKind::Content));
        }
        Ok(None)
    }
}

/// Boolean form of `FileMatcher`: any error reading the file is a no-match.
pub fn is_match(path: &Path, query: &Query) -> bool {
    matches!(
        FileMatcher.check(path, query, &ScanMetrics::new()),
        Ok(Some(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtensionMode;
    use tempfile::tempdir;

    fn query(text: &str, filter: &str, config: &SearchConfig) -> Query {
        let request = SearchRequest::new(".", text, filter);
        Query::compile(&request, config).unwrap()
    }

    #[test]
    fn test_name_match_is_case_insensitive_by_default() {
        let config = SearchConfig::default();
        let q = query("README", "*.*", &config);
        assert!(q.name_matches(Path::new("docs/readme.md")));
        assert!(q.name_matches(Path::new("docs/ReadMe.md")));
        assert!(!q.name_matches(Path::new("docs/guide.md")));
    }

    #[test]
    fn test_name_match_case_sensitive_policy() {
        let config = SearchConfig {
            name_case: NameCase::Sensitive,
            ..SearchConfig::default()
        };
        let q = query("README", "*.*", &config);
        assert!(q.name_matches(Path::new("docs/README.md")));
        assert!(!q.name_matches(Path::new("docs/readme.md")));
    }

    #[test]
    fn test_name_scope() {
        let config = SearchConfig::default();
        let q = query("project_x", "*.*", &config);
        assert!(q.name_matches(Path::new("/work/project_x/main.rs")));

        let config = SearchConfig {
            name_scope: NameScope::FileName,
            ..SearchConfig::default()
        };
        let q = query("project_x", "*.*", &config);
        assert!(!q.name_matches(Path::new("/work/project_x/main.rs")));
        assert!(q.name_matches(Path::new("/work/project_x.rs")));
    }

    #[test]
    fn test_content_match() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        std::fs::write(&path, "some text with needle_value inside").unwrap();

        let config = SearchConfig::default();
        let metrics = ScanMetrics::new();
        let found = FileMatcher
            .check(&path, &query("needle_value", "*.*", &config), &metrics)
            .unwrap();
        assert_eq!(found, Some(MatchKind::Content));

        let found = FileMatcher
            .check(&path, &query("absent_value", "*.*", &config), &metrics)
            .unwrap();
        assert_eq!(found, None);
        assert_eq!(metrics.get_stats().content_hits, 1);
    }

    #[test]
    fn test_content_match_is_byte_exact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        std::fs::write(&path, "Needle_Value").unwrap();

        let config = SearchConfig::default();
        assert!(!is_match(&path, &query("needle_value", "*.*", &config)));
        assert!(is_match(&path, &query("Needle_Value", "*.*", &config)));
    }

    #[test]
    fn test_extension_rejects_before_opening() {
        // The file does not exist: an extension reject must not try to open it.
        let config = SearchConfig::default();
        let metrics = ScanMetrics::new();
        let found = FileMatcher
            .check(
                Path::new("/nonexistent/dir/data.bin"),
                &query("data", r"\.txt", &config),
                &metrics,
            )
            .unwrap();
        assert_eq!(found, None);
        assert_eq!(metrics.get_stats().extension_rejects, 1);
    }

    #[test]
    fn test_name_match_short_circuits_content() {
        // Name matches, content unreadable (the file does not even exist).
        let config = SearchConfig::default();
        let found = FileMatcher
            .check(
                Path::new("/nonexistent/dir/secret_report.bin"),
                &query("secret_report", "*.*", &config),
                &ScanMetrics::new(),
            )
            .unwrap();
        assert_eq!(found, Some(MatchKind::Name));
    }

    #[test]
    fn test_unreadable_file_is_error_not_panic() {
        let config = SearchConfig::default();
        let q = query("anything_else", "*.*", &config);
        let result = FileMatcher.check(Path::new("/nonexistent/file.txt"), &q, &ScanMetrics::new());
        assert!(result.is_err());
        assert!(!is_match(Path::new("/nonexistent/file.txt"), &q));
    }

    #[test]
    fn test_literal_extension_mode() {
        let dir = tempdir().unwrap();
        let txt = dir.path().join("a.txt");
        let txtx = dir.path().join("a.txtx");
        std::fs::write(&txt, "marker_text").unwrap();
        std::fs::write(&txtx, "marker_text").unwrap();

        let config = SearchConfig {
            extension_mode: ExtensionMode::Literal,
            ..SearchConfig::default()
        };
        let q = query("marker_text", ".txt", &config);
        assert!(is_match(&txt, &q));
        assert!(!is_match(&txtx, &q));
    }

    #[test]
    fn test_empty_query_matches_by_name() {
        let config = SearchConfig::default();
        let q = query("", "*.*", &config);
        assert!(q.name_matches(Path::new("anything.dat")));
    }
}
