//! The search engine proper.
//!
//! - `matcher`: per-file decision (extension filter, then name, then content bytes)
//! - `processor`: raw byte scanning of file contents, read or memory-mapped by size
//! - `walker`: the recursive file snapshot taken when a job starts
//! - `job`: one job's fan-out over the worker pool and its live progress
pub mod job;
pub mod matcher;
pub mod processor;
pub mod walker;

pub use job::{JobProgress, ProgressCursor, SearchJob};
pub use matcher::{is_match, FileMatcher, Matcher, Query};
pub use processor::ContentScanner;
pub use walker::{enumerate, WalkOptions};
