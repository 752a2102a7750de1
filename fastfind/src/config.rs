use config::{Config as ConfigBuilder, File};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::SearchResult;

/// Wildcard extension filter that accepts every file.
pub const ANY_EXTENSION: &str = "*.*";

/// How the query is compared against file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NameCase {
    #[default]
    Insensitive,
    Sensitive,
}

/// Which part of the path the name check looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NameScope {
    /// The full path string, as displayed to the user.
    #[default]
    Path,
    /// Only the final path component.
    FileName,
}

/// How a non-wildcard extension filter is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionMode {
    /// Anchored regular expression over the extension, leading dot included.
    #[default]
    Pattern,
    /// Exact string equality with the extension, leading dot included.
    Literal,
}

/// Engine configuration.
///
/// The configuration can be loaded from multiple locations in order of precedence:
/// 1. Custom config file specified via `--config` flag
/// 2. Local `.fastfind.yaml` in the current directory
/// 3. Global `$HOME/.config/fastfind/config.yaml`
///
/// Example:
/// ```yaml
/// # Worker pool width (default: CPU cores)
/// thread_count: 8
///
/// # Progress poll interval for front ends
/// poll_interval_ms: 100
///
/// # insensitive | sensitive
/// name_case: insensitive
///
/// # path | file_name
/// name_scope: path
///
/// # pattern | literal
/// extension_mode: pattern
///
/// # Finished-job reports kept in memory
/// max_reports: 100
///
/// # Patterns to leave out of the file snapshot (glob syntax)
/// ignore_patterns:
///   - "**/node_modules/**"
/// ```
///
/// CLI arguments take precedence over file values, see `merge_with_cli`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Number of worker threads matching files.
    /// Defaults to the number of CPU cores.
    #[serde(default = "default_thread_count")]
    pub thread_count: NonZeroUsize,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Recommended interval between progress polls, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub name_case: NameCase,

    #[serde(default)]
    pub name_scope: NameScope,

    #[serde(default)]
    pub extension_mode: ExtensionMode,

    /// Extension filter used when a request does not name one
    #[serde(default = "default_extension_filter")]
    pub extension_filter: String,

    /// Include hidden files and directories in the snapshot
    #[serde(default = "default_true")]
    pub include_hidden: bool,

    /// Honour .gitignore / .ignore files while walking
    #[serde(default)]
    pub respect_ignore_files: bool,

    /// Finished-job reports the service keeps; older ones are dropped.
    /// Subscribers still receive every report as a `JobFinished` event.
    #[serde(default = "default_max_reports")]
    pub max_reports: usize,

    /// Paths to leave out of the snapshot (glob syntax)
    /// Examples:
    /// - "**/target/**": skip build output
    /// - "**/*.min.js": skip minified JS files
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

fn default_thread_count() -> NonZeroUsize {
    NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN)
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_max_reports() -> usize {
    100
}

fn default_extension_filter() -> String {
    ANY_EXTENSION.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            thread_count: default_thread_count(),
            log_level: default_log_level(),
            poll_interval_ms: default_poll_interval_ms(),
            name_case: NameCase::default(),
            name_scope: NameScope::default(),
            extension_mode: ExtensionMode::default(),
            extension_filter: default_extension_filter(),
            include_hidden: true,
            respect_ignore_files: false,
            max_reports: default_max_reports(),
            ignore_patterns: Vec::new(),
        }
    }
}

impl SearchConfig {
    /// Loads configuration from the default locations plus a specific file.
    /// A custom file that does not exist is an error; default locations are optional.
    pub fn load_from(config_path: Option<&Path>) -> SearchResult<Self> {
        let mut builder = ConfigBuilder::builder();

        let defaults = [
            dirs::config_dir().map(|p| p.join("fastfind/config.yaml")),
            Some(PathBuf::from(".fastfind.yaml")),
        ];
        for path in defaults.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Poll interval as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Merges CLI arguments with configuration file values
    pub fn merge_with_cli(mut self, cli: CliOverrides) -> Self {
        if let Some(threads) = cli.thread_count {
            self.thread_count = threads;
        }
        if let Some(level) = cli.log_level {
            self.log_level = level;
        }
        if cli.case_sensitive {
            self.name_case = NameCase::Sensitive;
        }
        if cli.file_name_only {
            self.name_scope = NameScope::FileName;
        }
        if cli.literal_extension {
            self.extension_mode = ExtensionMode::Literal;
        }
        if let Some(filter) = cli.extension_filter {
            self.extension_filter = filter;
        }
        if !cli.ignore_patterns.is_empty() {
            self.ignore_patterns = cli.ignore_patterns;
        }
        self
    }
}

/// Values the command line may override. Flags are only ever switched on from
/// the command line; `None` leaves the file value alone.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub thread_count: Option<NonZeroUsize>,
    pub log_level: Option<String>,
    pub case_sensitive: bool,
    pub file_name_only: bool,
    pub literal_extension: bool,
    pub extension_filter: Option<String>,
    pub ignore_patterns: Vec<String>,
}
