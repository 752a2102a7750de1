use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::queue::{EntryId, SearchRequest};

/// Why a file was reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// The query occurs in the file's name
    Name,
    /// The query's bytes occur in the file's content
    Content,
}

/// A single matching file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FileMatch {
    pub path: PathBuf,
    pub kind: MatchKind,
}

/// Lifecycle of a search job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in the queue
    Pending,
    /// Snapshot taken (or being taken) and files being matched
    Running,
    /// Every file in the snapshot was searched
    Completed,
    /// Stopped early on request
    Cancelled,
    /// The search root could not be enumerated
    Failed { reason: String },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed { .. }
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::Cancelled => write!(f, "cancelled"),
            JobState::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// Final state of a job once it has left the queue
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub id: EntryId,
    pub request: SearchRequest,
    pub state: JobState,
    /// Size of the file snapshot taken at job start
    pub total_files: usize,
    pub scanned_count: usize,
    pub matches: Vec<FileMatch>,
    /// Every file whose result was drained, in arrival order
    pub searched_files: Vec<PathBuf>,
    pub elapsed: Duration,
}

impl JobReport {
    pub fn match_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.matches.iter().map(|m| &m.path)
    }
}

/// What a progress poll returns: current counters plus everything appended
/// since the previous poll of the same feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Job this update describes; `None` when the queue is idle
    pub job: Option<EntryId>,
    pub state: Option<JobState>,
    pub scanned_count: usize,
    pub total_files: usize,
    pub searched_since_last_poll: Vec<PathBuf>,
    pub matches_since_last_poll: Vec<FileMatch>,
}

impl ProgressUpdate {
    pub fn idle() -> Self {
        Self {
            job: None,
            state: None,
            scanned_count: 0,
            total_files: 0,
            searched_since_last_poll: Vec::new(),
            matches_since_last_poll: Vec::new(),
        }
    }
}
