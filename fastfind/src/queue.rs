//! Pending search requests plus the one running job.
//!
//! `SearchQueue` is plain state with no threads or locks of its own. The
//! service keeps it behind a single mutex and is the only caller of
//! `advance` and `finish`, which makes promotion of the head entry and the
//! swap of the running pointer atomic with respect to submission,
//! reordering and cancellation.
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::errors::{SearchError, SearchResult};
use crate::search::job::JobProgress;

/// Stable identity of a submitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(u64);

impl EntryId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What to search for and where. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub root: PathBuf,
    pub query: String,
    /// `*.*` or an extension pattern such as `\.txt`
    pub extension_filter: String,
}

impl SearchRequest {
    pub fn new(
        root: impl Into<PathBuf>,
        query: impl Into<String>,
        extension_filter: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            query: query.into(),
            extension_filter: extension_filter.into(),
        }
    }
}

impl fmt::Display for SearchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' in {} ({})",
            self.query,
            self.root.display(),
            self.extension_filter
        )
    }
}

/// A queued request that has not started yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingEntry {
    pub id: EntryId,
    pub request: SearchRequest,
}

/// Outcome of `SearchQueue::advance`
#[derive(Debug)]
pub enum Advance {
    /// The head entry was promoted; run the job behind this progress handle
    Started(Arc<JobProgress>),
    /// A job is already running
    Busy,
    /// Nothing running and nothing pending
    Drained,
}

#[derive(Debug, Default)]
pub struct SearchQueue {
    pending: VecDeque<PendingEntry>,
    running: Option<Arc<JobProgress>>,
    next_id: u64,
}

impl SearchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a request and returns its handle
    pub fn enqueue(&mut self, request: SearchRequest) -> EntryId {
        self.next_id += 1;
        let id = EntryId(self.next_id);
        debug!("Queued {} {}", id, request);
        self.pending.push_back(PendingEntry { id, request });
        id
    }

    /// Promotes the head entry when nothing is running.
    pub fn advance(&mut self) -> Advance {
        if self.running.is_some() {
            return Advance::Busy;
        }
        match self.pending.pop_front() {
            Some(entry) => {
                debug!("Starting {} {}", entry.id, entry.request);
                let progress = Arc::new(JobProgress::new(entry.id, entry.request));
                self.running = Some(Arc::clone(&progress));
                Advance::Started(progress)
            }
            None => {
                debug!("Queue drained");
                Advance::Drained
            }
        }
    }

    /// Clears the running slot if it holds `id`. Returns whether it did.
    pub fn finish(&mut self, id: EntryId) -> bool {
        match &self.running {
            Some(job) if job.id() == id => {
                self.running = None;
                true
            }
            _ => false,
        }
    }

    /// Requests cancellation of the running job without waiting for it.
    pub fn cancel_running(&self) -> Option<EntryId> {
        let job = self.running.as_ref()?;
        if job.cancel() {
            debug!("Cancellation requested for {}", job.id());
        }
        Some(job.id())
    }

    /// Moves a pending entry to `new_position` (0 = next to run). Positions
    /// past the end move the entry to the back.
    pub fn reorder(&mut self, id: EntryId, new_position: usize) -> SearchResult<()> {
        let index = self.pending_index(id)?;
        let entry = self
            .pending
            .remove(index)
            .ok_or_else(|| SearchError::entry_not_found(id))?;
        let position = new_position.min(self.pending.len());
        self.pending.insert(position, entry);
        debug!("Moved {} from position {} to {}", id, index, position);
        Ok(())
    }

    /// Moves a pending entry by `delta` places (negative = earlier), clamped
    /// to the list. Returns the new position.
    pub fn move_by(&mut self, id: EntryId, delta: isize) -> SearchResult<usize> {
        let index = self.pending_index(id)?;
        let last = self.pending.len() - 1;
        let target = if delta.is_negative() {
            index.saturating_sub(delta.unsigned_abs())
        } else {
            index.saturating_add(delta as usize).min(last)
        };
        self.reorder(id, target)?;
        Ok(target)
    }

    /// Drops a pending entry and returns its request
    pub fn remove(&mut self, id: EntryId) -> SearchResult<SearchRequest> {
        let index = self.pending_index(id)?;
        let entry = self
            .pending
            .remove(index)
            .ok_or_else(|| SearchError::entry_not_found(id))?;
        debug!("Removed {} {}", id, entry.request);
        Ok(entry.request)
    }

    /// Drops every pending entry
    pub fn clear_pending(&mut self) -> Vec<PendingEntry> {
        self.pending.drain(..).collect()
    }

    /// Pending entries in execution order
    pub fn snapshot(&self) -> Vec<PendingEntry> {
        self.pending.iter().cloned().collect()
    }

    pub fn running(&self) -> Option<&Arc<JobProgress>> {
        self.running.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.running.is_none() && self.pending.is_empty()
    }

    fn pending_index(&self, id: EntryId) -> SearchResult<usize> {
        if let Some(index) = self.pending.iter().position(|e| e.id == id) {
            return Ok(index);
        }
        match &self.running {
            Some(job) if job.id() == id => Err(SearchError::entry_running(id)),
            _ => Err(SearchError::entry_not_found(id)),
        }
    }
}
