use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use rayon::ThreadPool;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use super::matcher::{Matcher, Query};
use super::walker::{enumerate, WalkOptions};
use crate::config::SearchConfig;
use crate::metrics::ScanMetrics;
use crate::queue::{EntryId, SearchRequest};
use crate::results::{FileMatch, JobReport, JobState, MatchKind, ProgressUpdate};

/// Upper bound on how long a blocked drain goes without looking at the cancel flag
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct ProgressState {
    state: JobState,
    total_files: usize,
    scanned_count: usize,
    matches: Vec<FileMatch>,
    searched_files: Vec<PathBuf>,
    elapsed: Duration,
}

/// Live view of one job.
///
/// The job thread is the only writer. Everyone else reads through short
/// critical sections that copy out what they need, so a poll never waits on
/// file I/O. The cancellation flag only ever goes from `false` to `true`.
pub struct JobProgress {
    id: EntryId,
    request: SearchRequest,
    cancelled: AtomicBool,
    inner: Mutex<ProgressState>,
}

/// Read position of one consumer in a job's append-only lists.
/// A cursor handed to a different job starts over from that job's beginning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressCursor {
    job: Option<EntryId>,
    searched: usize,
    matches: usize,
}

impl JobProgress {
    pub fn new(id: EntryId, request: SearchRequest) -> Self {
        Self {
            id,
            request,
            cancelled: AtomicBool::new(false),
            inner: Mutex::new(ProgressState {
                state: JobState::Pending,
                total_files: 0,
                scanned_count: 0,
                matches: Vec::new(),
                searched_files: Vec::new(),
                elapsed: Duration::ZERO,
            }),
        }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn request(&self) -> &SearchRequest {
        &self.request
    }

    /// Requests cooperative cancellation. Returns `false` if it was already requested.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> JobState {
        self.inner.lock().state.clone()
    }

    pub fn scanned_count(&self) -> usize {
        self.inner.lock().scanned_count
    }

    pub fn total_files(&self) -> usize {
        self.inner.lock().total_files
    }

    /// Counters plus everything appended since `cursor`, which is advanced.
    pub fn poll(&self, cursor: &mut ProgressCursor) -> ProgressUpdate {
        let inner = self.inner.lock();
        if cursor.job != Some(self.id)
            || cursor.searched > inner.searched_files.len()
            || cursor.matches > inner.matches.len()
        {
            *cursor = ProgressCursor {
                job: Some(self.id),
                ..ProgressCursor::default()
            };
        }
        let searched = inner.searched_files[cursor.searched..].to_vec();
        let matches = inner.matches[cursor.matches..].to_vec();
        cursor.searched = inner.searched_files.len();
        cursor.matches = inner.matches.len();

        ProgressUpdate {
            job: Some(self.id),
            state: Some(inner.state.clone()),
            scanned_count: inner.scanned_count,
            total_files: inner.total_files,
            searched_since_last_poll: searched,
            matches_since_last_poll: matches,
        }
    }

    /// True once the job is terminal and `cursor` has seen every entry
    pub fn is_drained(&self, cursor: &ProgressCursor) -> bool {
        let inner = self.inner.lock();
        inner.state.is_terminal()
            && cursor.job == Some(self.id)
            && cursor.searched == inner.searched_files.len()
            && cursor.matches == inner.matches.len()
    }

    /// Full copy of the job's current lists and counters
    pub fn report(&self) -> JobReport {
        let inner = self.inner.lock();
        JobReport {
            id: self.id,
            request: self.request.clone(),
            state: inner.state.clone(),
            total_files: inner.total_files,
            scanned_count: inner.scanned_count,
            matches: inner.matches.clone(),
            searched_files: inner.searched_files.clone(),
            elapsed: inner.elapsed,
        }
    }

    fn set_state(&self, state: JobState) {
        self.inner.lock().state = state;
    }

    fn set_total(&self, total: usize) {
        self.inner.lock().total_files = total;
    }

    fn record(&self, path: PathBuf, kind: Option<MatchKind>) {
        let mut inner = self.inner.lock();
        debug_assert!(inner.scanned_count < inner.total_files);
        if let Some(kind) = kind {
            inner.matches.push(FileMatch {
                path: path.clone(),
                kind,
            });
        }
        inner.searched_files.push(path);
        inner.scanned_count += 1;
    }

    fn finish(&self, state: JobState, elapsed: Duration) {
        let mut inner = self.inner.lock();
        inner.state = state;
        inner.elapsed = elapsed;
    }
}

impl fmt::Debug for JobProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("JobProgress")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("scanned_count", &inner.scanned_count)
            .field("total_files", &inner.total_files)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Result of one worker invocation
struct Completion {
    path: PathBuf,
    outcome: Result<Option<MatchKind>, String>,
}

/// One search from snapshot to terminal state.
pub struct SearchJob {
    progress: Arc<JobProgress>,
    config: SearchConfig,
    matcher: Arc<dyn Matcher>,
    metrics: ScanMetrics,
}

impl SearchJob {
    pub fn new(progress: Arc<JobProgress>, config: SearchConfig, matcher: Arc<dyn Matcher>) -> Self {
        Self {
            progress,
            config,
            matcher,
            metrics: ScanMetrics::new(),
        }
    }

    pub fn progress(&self) -> &Arc<JobProgress> {
        &self.progress
    }

    pub fn metrics(&self) -> &ScanMetrics {
        &self.metrics
    }

    /// Runs the job on the calling thread, fanning file checks out to `pool`.
    ///
    /// At most `pool.current_num_threads()` files are in flight at once; each
    /// drained completion frees a slot for the next file. Completions are
    /// drained in arrival order. Cancellation is checked before every drain:
    /// once seen, nothing else is dispatched or drained and whatever is still
    /// in flight finishes on its own with its result dropped.
    pub fn run(self, pool: &ThreadPool) -> JobReport {
        let started = Instant::now();
        let progress = &self.progress;
        let request = progress.request();
        progress.set_state(JobState::Running);
        info!(
            "Starting job {} for '{}' under {}",
            progress.id(),
            request.query,
            request.root.display()
        );

        if progress.is_cancelled() {
            return self.finish(JobState::Cancelled, started);
        }

        let query = match Query::compile(request, &self.config) {
            Ok(query) => Arc::new(query),
            Err(err) => {
                warn!("Job {} rejected: {}", progress.id(), err);
                return self.finish(JobState::Failed { reason: err.to_string() }, started);
            }
        };

        let files = match enumerate(&request.root, &WalkOptions::from(&self.config)) {
            Ok(files) => files,
            Err(err) => {
                warn!("Job {} failed: {}", progress.id(), err);
                return self.finish(JobState::Failed { reason: err.to_string() }, started);
            }
        };
        progress.set_total(files.len());
        debug!("Job {} snapshot has {} files", progress.id(), files.len());

        let width = pool.current_num_threads().max(1);
        let (tx, rx) = unbounded::<Completion>();
        let mut remaining = files.into_iter();
        let mut in_flight = 0usize;

        for path in remaining.by_ref().take(width) {
            self.dispatch(pool, &tx, &query, path);
            in_flight += 1;
        }

        let mut cancelled = false;
        while in_flight > 0 {
            if progress.is_cancelled() {
                cancelled = true;
                break;
            }
            // A file that never finishes must not hold up cancellation
            let completion = match rx.recv_timeout(CANCEL_CHECK_INTERVAL) {
                Ok(completion) => completion,
                Err(RecvTimeoutError::Timeout) => continue,
                // Unreachable while the job holds `tx`
                Err(RecvTimeoutError::Disconnected) => break,
            };
            in_flight -= 1;

            let kind = match completion.outcome {
                Ok(kind) => kind,
                Err(reason) => {
                    warn!("Skipping {}: {}", completion.path.display(), reason);
                    self.metrics.record_file_error();
                    None
                }
            };
            progress.record(completion.path, kind);

            if !progress.is_cancelled() {
                if let Some(path) = remaining.next() {
                    self.dispatch(pool, &tx, &query, path);
                    in_flight += 1;
                }
            }
        }
        // Also covers a cancel that lands after the last completion was drained
        cancelled |= progress.is_cancelled() && progress.scanned_count() < progress.total_files();

        if cancelled {
            debug!(
                "Job {} cancelled with {} results still in flight",
                progress.id(),
                in_flight
            );
            self.finish(JobState::Cancelled, started)
        } else {
            self.finish(JobState::Completed, started)
        }
    }

    fn dispatch(&self, pool: &ThreadPool, tx: &Sender<Completion>, query: &Arc<Query>, path: PathBuf) {
        let tx = tx.clone();
        let query = Arc::clone(query);
        let matcher = Arc::clone(&self.matcher);
        let metrics = self.metrics.clone();

        pool.spawn(move || {
            trace!("Checking {}", path.display());
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                matcher.check(&path, &query, &metrics)
            }));
            let outcome = match outcome {
                Ok(Ok(kind)) => Ok(kind),
                Ok(Err(err)) => Err(err.to_string()),
                Err(payload) => Err(format!("matcher panicked: {}", panic_message(&*payload))),
            };
            // The receiver is gone once the job was cancelled
            let _ = tx.send(Completion { path, outcome });
        });
    }

    fn finish(self, state: JobState, started: Instant) -> JobReport {
        let elapsed = started.elapsed();
        self.progress.finish(state, elapsed);
        let report = self.progress.report();
        self.metrics.log_stats();
        info!(
            "Job {} {}: {} of {} files searched, {} matches in {}",
            report.id,
            report.state,
            report.scanned_count,
            report.total_files,
            report.matches.len(),
            humantime::format_duration(elapsed)
        );
        report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SearchResult;
    use crate::search::matcher::FileMatcher;
    use rayon::ThreadPoolBuilder;
    use std::collections::HashSet;
    use std::path::Path;
    use tempfile::tempdir;

    fn pool(threads: usize) -> ThreadPool {
        ThreadPoolBuilder::new().num_threads(threads).build().unwrap()
    }

    fn job(root: &Path, query: &str, filter: &str, matcher: Arc<dyn Matcher>) -> SearchJob {
        let progress = Arc::new(JobProgress::new(
            EntryId::new(1),
            SearchRequest::new(root, query, filter),
        ));
        SearchJob::new(progress, SearchConfig::default(), matcher)
    }

    fn create_files(root: &Path, count: usize) {
        for i in 0..count {
            std::fs::write(root.join(format!("file_{i}.txt")), format!("line {i}\n")).unwrap();
        }
    }

    /// Panics on one file name, otherwise defers to the real matcher
    struct PanickyMatcher;

    impl Matcher for PanickyMatcher {
        fn check(&self, path: &Path, query: &Query, metrics: &ScanMetrics) -> SearchResult<Option<MatchKind>> {
            if path.ends_with("file_3.txt") {
                panic!("simulated matcher failure");
            }
            FileMatcher.check(path, query, metrics)
        }
    }

    #[test]
    fn test_completed_job_searches_snapshot_exactly_once() {
        let dir = tempdir().unwrap();
        create_files(dir.path(), 50);
        std::fs::write(dir.path().join("hit.txt"), "marker_token").unwrap();

        let report = job(dir.path(), "marker_token", "*.*", Arc::new(FileMatcher)).run(&pool(4));

        assert_eq!(report.state, JobState::Completed);
        assert_eq!(report.total_files, 51);
        assert_eq!(report.scanned_count, 51);
        assert_eq!(report.searched_files.len(), 51);

        let snapshot: HashSet<_> = enumerate(dir.path(), &WalkOptions::everything())
            .unwrap()
            .into_iter()
            .collect();
        let searched: HashSet<_> = report.searched_files.iter().cloned().collect();
        assert_eq!(searched.len(), report.searched_files.len(), "duplicates");
        assert_eq!(searched, snapshot);

        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.matches[0].kind, MatchKind::Content);
        assert!(report.matches[0].path.ends_with("hit.txt"));
    }

    #[test]
    fn test_panicking_matcher_is_isolated_per_file() {
        let dir = tempdir().unwrap();
        create_files(dir.path(), 8);

        let job = job(dir.path(), "line 5", "*.*", Arc::new(PanickyMatcher));
        let metrics = job.metrics().clone();
        let report = job.run(&pool(2));

        assert_eq!(report.state, JobState::Completed);
        assert_eq!(report.scanned_count, 8);
        assert_eq!(report.matches.len(), 1);
        assert_eq!(metrics.get_stats().file_errors, 1);
    }

    #[test]
    fn test_cancel_before_start() {
        let dir = tempdir().unwrap();
        create_files(dir.path(), 5);

        let job = job(dir.path(), "line", "*.*", Arc::new(FileMatcher));
        assert!(job.progress().cancel());
        assert!(!job.progress().cancel(), "second cancel is a no-op");
        let report = job.run(&pool(2));

        assert_eq!(report.state, JobState::Cancelled);
        assert_eq!(report.scanned_count, 0);
        assert!(report.searched_files.is_empty());
    }

    #[test]
    fn test_missing_root_fails_job() {
        let dir = tempdir().unwrap();
        let report = job(&dir.path().join("gone"), "x", "*.*", Arc::new(FileMatcher)).run(&pool(1));
        assert!(matches!(report.state, JobState::Failed { .. }));
        assert_eq!(report.total_files, 0);
    }

    #[test]
    fn test_invalid_extension_pattern_fails_job() {
        let dir = tempdir().unwrap();
        let report = job(dir.path(), "x", "(", Arc::new(FileMatcher)).run(&pool(1));
        match report.state {
            JobState::Failed { reason } => assert!(reason.contains("Invalid pattern")),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn test_poll_returns_deltas() {
        let dir = tempdir().unwrap();
        create_files(dir.path(), 6);

        let job = job(dir.path(), "file_", "*.*", Arc::new(FileMatcher));
        let progress = Arc::clone(job.progress());
        let mut cursor = ProgressCursor::default();

        let update = progress.poll(&mut cursor);
        assert_eq!(update.state, Some(JobState::Pending));
        assert!(update.searched_since_last_poll.is_empty());

        job.run(&pool(2));
        assert!(!progress.is_drained(&cursor));

        let update = progress.poll(&mut cursor);
        assert_eq!(update.state, Some(JobState::Completed));
        assert_eq!(update.searched_since_last_poll.len(), 6);
        assert_eq!(update.matches_since_last_poll.len(), 6);
        assert!(progress.is_drained(&cursor));

        let update = progress.poll(&mut cursor);
        assert!(update.searched_since_last_poll.is_empty());
        assert_eq!(update.scanned_count, 6);
    }

    #[test]
    fn test_cursor_moved_to_another_job_starts_over() {
        let big = tempdir().unwrap();
        create_files(big.path(), 3);
        let small = tempdir().unwrap();
        create_files(small.path(), 1);

        let first = job(big.path(), "file_", "*.*", Arc::new(FileMatcher));
        let first_progress = Arc::clone(first.progress());
        first.run(&pool(2));
        let mut cursor = ProgressCursor::default();
        assert_eq!(first_progress.poll(&mut cursor).searched_since_last_poll.len(), 3);

        // Same id as the first job, shorter lists
        let second = job(small.path(), "file_", "*.*", Arc::new(FileMatcher));
        let second_progress = Arc::clone(second.progress());
        second.run(&pool(2));
        let update = second_progress.poll(&mut cursor);
        assert_eq!(update.searched_since_last_poll.len(), 1);
        assert!(second_progress.is_drained(&cursor));

        let other = JobProgress::new(EntryId::new(2), SearchRequest::new(small.path(), "x", "*.*"));
        assert!(!other.is_drained(&cursor));
        let update = other.poll(&mut cursor);
        assert!(update.searched_since_last_poll.is_empty());
        assert_eq!(update.job, Some(EntryId::new(2)));
    }
}
