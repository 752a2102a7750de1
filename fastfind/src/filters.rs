//! File filtering: the extension filter applied per file by the matcher, and
//! the glob ignore list applied while building the file snapshot.
use dashmap::DashMap;
use glob::Pattern;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;

use crate::config::{ExtensionMode, ANY_EXTENSION};
use crate::errors::{SearchError, SearchResult};

static EXTENSION_PATTERN_CACHE: Lazy<DashMap<String, Arc<Regex>>> = Lazy::new(DashMap::new);

/// Returns the extension of `path` including its leading dot, or an empty
/// string when there is none. Dotfiles such as `.bashrc` have no extension.
pub fn file_extension(path: &Path) -> String {
    match path.extension() {
        Some(ext) => format!(".{}", ext.to_string_lossy()),
        None => String::new(),
    }
}

/// A compiled extension filter.
#[derive(Debug, Clone)]
pub enum ExtensionFilter {
    /// `*.*`: every file passes.
    Any,
    /// Anchored pattern over the extension.
    Pattern(Arc<Regex>),
    /// Exact extension string.
    Literal(String),
}

impl ExtensionFilter {
    /// Compiles `filter` under the given mode. The wildcard `*.*` is accepted
    /// in either mode.
    pub fn compile(filter: &str, mode: ExtensionMode) -> SearchResult<Self> {
        if filter == ANY_EXTENSION {
            return Ok(Self::Any);
        }

        match mode {
            ExtensionMode::Literal => Ok(Self::Literal(filter.to_string())),
            ExtensionMode::Pattern => {
                if let Some(regex) = EXTENSION_PATTERN_CACHE.get(filter) {
                    return Ok(Self::Pattern(regex.clone()));
                }
                let invalid = |e: regex::Error| {
                    SearchError::invalid_pattern(format!("extension filter '{}': {}", filter, e))
                };
                // Must parse on its own, or a stray ')' could close the anchoring group
                Regex::new(filter).map_err(invalid)?;
                let regex = Regex::new(&format!("^(?:{})$", filter)).map_err(invalid)?;
                let regex = Arc::new(regex);
                EXTENSION_PATTERN_CACHE.insert(filter.to_string(), regex.clone());
                Ok(Self::Pattern(regex))
            }
        }
    }

    /// Checks the extension of `path` against the filter without touching the file.
    pub fn accepts(&self, path: &Path) -> bool {
        match self {
            Self::Any => true,
            Self::Pattern(regex) => regex.is_match(&file_extension(path)),
            Self::Literal(ext) => file_extension(path) == *ext,
        }
    }
}

/// Compiles glob ignore patterns, skipping (and reporting) invalid ones.
pub fn compile_ignore_patterns(patterns: &[String]) -> Vec<Pattern> {
    patterns
        .iter()
        .filter_map(|pattern| match Pattern::new(pattern) {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!("Ignoring invalid ignore pattern '{}': {}", pattern, e);
                None
            }
        })
        .collect()
}

/// Checks if a path should be left out of the snapshot based on ignore patterns
pub fn should_ignore(path: &Path, ignore_patterns: &[Pattern]) -> bool {
    if ignore_patterns.is_empty() {
        return false;
    }
    let normalized_path = path.to_string_lossy().replace('\\', "/");
    ignore_patterns.iter().any(|p| p.matches(&normalized_path))
}
