use ignore::{DirEntry, WalkBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::config::SearchConfig;
use crate::errors::{strip_unc_prefix, SearchError, SearchResult};
use crate::filters::{compile_ignore_patterns, should_ignore};

/// Options for building the file snapshot
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    pub include_hidden: bool,
    pub respect_ignore_files: bool,
    pub ignore_patterns: Vec<String>,
}

impl WalkOptions {
    /// Walk everything: hidden files included, no ignore files, no globs
    pub fn everything() -> Self {
        Self {
            include_hidden: true,
            ..Self::default()
        }
    }
}

impl From<&SearchConfig> for WalkOptions {
    fn from(config: &SearchConfig) -> Self {
        Self {
            include_hidden: config.include_hidden,
            respect_ignore_files: config.respect_ignore_files,
            ignore_patterns: config.ignore_patterns.clone(),
        }
    }
}

/// Resolves `root` to an absolute directory path, or explains why it can't be searched
pub fn resolve_root(root: &Path) -> SearchResult<PathBuf> {
    let canonical = root
        .canonicalize()
        .map_err(|e| SearchError::root_unavailable(root, e.to_string()))?;
    if !canonical.is_dir() {
        return Err(SearchError::root_unavailable(root, "not a directory"));
    }
    // An unreadable root would otherwise look like an empty one
    std::fs::read_dir(&canonical).map_err(|e| SearchError::root_unavailable(root, e.to_string()))?;
    Ok(strip_unc_prefix(&canonical))
}

/// A regular file, or a symlink that resolves to one. Linked directories are
/// never descended into, and dangling links are skipped.
fn is_regular_file(entry: &DirEntry) -> bool {
    match entry.file_type() {
        Some(ft) if ft.is_file() => true,
        Some(ft) if ft.is_symlink() => std::fs::metadata(entry.path()).is_ok_and(|m| m.is_file()),
        _ => false,
    }
}

/// Recursively lists every regular file under `root`.
///
/// The result is a snapshot: it is collected in full before returning and is
/// sorted by file name at every directory level, so an unchanged tree always
/// yields the same list. Symlinks to files are listed under their own path. Entries that cannot be read (a subdirectory without
/// permission, a file removed mid-walk) are skipped. Only a problem with
/// `root` itself is an error.
pub fn enumerate(root: &Path, options: &WalkOptions) -> SearchResult<Vec<PathBuf>> {
    let root = resolve_root(root)?;
    let ignore_patterns = compile_ignore_patterns(&options.ignore_patterns);

    let mut walker = WalkBuilder::new(&root);
    walker
        .standard_filters(options.respect_ignore_files)
        .hidden(!options.include_hidden)
        .require_git(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b));

    let mut files = Vec::new();
    for entry in walker.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!("Skipping unreadable entry: {}", err);
                continue;
            }
        };
        if !is_regular_file(&entry) {
            continue;
        }
        if should_ignore(entry.path(), &ignore_patterns) {
            trace!("Ignoring {}", entry.path().display());
            continue;
        }
        files.push(entry.into_path());
    }

    debug!("Enumerated {} files under {}", files.len(), root.display());
    Ok(files)
}
