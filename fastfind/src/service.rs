//! The boundary a front end talks to.
//!
//! `SearchService` owns a `SearchQueue` behind one mutex, a fixed-size rayon
//! pool and a dispatcher thread. The dispatcher is the only thread that
//! promotes entries and clears the running slot; it also runs each job's
//! collection loop. Front ends submit, reorder, remove and cancel through the
//! service, poll a `ProgressFeed`, or subscribe to `QueueEvent`s.
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::SearchConfig;
use crate::errors::{SearchError, SearchResult};
use crate::queue::{Advance, EntryId, PendingEntry, SearchQueue, SearchRequest};
use crate::results::{JobReport, ProgressUpdate};
use crate::search::job::{JobProgress, ProgressCursor, SearchJob};
use crate::search::matcher::{FileMatcher, Matcher, Query};

/// Push notifications about queue transitions
#[derive(Debug, Clone)]
pub enum QueueEvent {
    JobStarted { id: EntryId, request: SearchRequest },
    JobFinished(JobReport),
    /// Nothing running and nothing pending
    Drained,
}

struct Shared {
    config: SearchConfig,
    matcher: Arc<dyn Matcher>,
    queue: Mutex<SearchQueue>,
    // Wakes the dispatcher on new work or shutdown, and idle waiters when a job ends
    changed: Condvar,
    stopping: AtomicBool,
    subscribers: Mutex<Vec<Sender<QueueEvent>>>,
    reports: Mutex<Vec<JobReport>>,
}

impl Shared {
    fn emit(&self, event: QueueEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn keep_report(&self, report: JobReport) {
        let mut reports = self.reports.lock();
        reports.push(report);
        let excess = reports.len().saturating_sub(self.config.max_reports);
        if excess > 0 {
            reports.drain(..excess);
        }
    }

    fn running_progress(&self) -> Option<Arc<JobProgress>> {
        self.queue.lock().running().cloned()
    }
}

pub struct SearchService {
    shared: Arc<Shared>,
    dispatcher: Option<JoinHandle<()>>,
}

impl SearchService {
    /// Starts a service that matches files with `FileMatcher`
    pub fn new(config: SearchConfig) -> SearchResult<Self> {
        Self::with_matcher(config, Arc::new(FileMatcher))
    }

    /// Starts a service with a custom per-file matcher
    pub fn with_matcher(config: SearchConfig, matcher: Arc<dyn Matcher>) -> SearchResult<Self> {
        let threads = config.thread_count.get();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("fastfind-worker-{i}"))
            .build()
            .map_err(|e| SearchError::config_error(format!("worker pool: {e}")))?;

        let shared = Arc::new(Shared {
            config,
            matcher,
            queue: Mutex::new(SearchQueue::new()),
            changed: Condvar::new(),
            stopping: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
            reports: Mutex::new(Vec::new()),
        });

        let dispatcher = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("fastfind-dispatch".to_string())
                .spawn(move || dispatch_loop(shared, pool))?
        };
        info!("Search service started with {} workers", threads);

        Ok(Self {
            shared,
            dispatcher: Some(dispatcher),
        })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.shared.config
    }

    /// Queues a search. The extension filter is validated here, so a bad
    /// pattern never reaches the queue.
    pub fn submit(&self, request: SearchRequest) -> SearchResult<EntryId> {
        if self.shared.stopping.load(Ordering::SeqCst) {
            return Err(SearchError::ServiceStopped);
        }
        Query::compile(&request, &self.shared.config)?;

        let id = self.shared.queue.lock().enqueue(request);
        self.shared.changed.notify_all();
        Ok(id)
    }

    pub fn submit_search(
        &self,
        root: impl Into<PathBuf>,
        query: impl Into<String>,
        extension_filter: impl Into<String>,
    ) -> SearchResult<EntryId> {
        self.submit(SearchRequest::new(root, query, extension_filter))
    }

    /// Requests cancellation of the running job, if any. Does not wait for it
    /// to stop; watch for its `JobFinished` event or poll the feed.
    pub fn cancel_current(&self) -> bool {
        self.shared.queue.lock().cancel_running().is_some()
    }

    pub fn queue_snapshot(&self) -> Vec<PendingEntry> {
        self.shared.queue.lock().snapshot()
    }

    /// Moves a pending entry `delta` places (negative = sooner). Returns its new position.
    pub fn move_entry(&self, id: EntryId, delta: isize) -> SearchResult<usize> {
        self.shared.queue.lock().move_by(id, delta)
    }

    /// Moves a pending entry to an absolute position (0 = next to run)
    pub fn reorder_entry(&self, id: EntryId, position: usize) -> SearchResult<()> {
        self.shared.queue.lock().reorder(id, position)
    }

    pub fn remove_entry(&self, id: EntryId) -> SearchResult<SearchRequest> {
        let removed = self.shared.queue.lock().remove(id)?;
        self.shared.changed.notify_all();
        Ok(removed)
    }

    /// Id and request of the running job
    pub fn running(&self) -> Option<(EntryId, SearchRequest)> {
        self.shared
            .running_progress()
            .map(|job| (job.id(), job.request().clone()))
    }

    /// A new poll handle that follows whichever job is running
    pub fn progress_feed(&self) -> ProgressFeed {
        ProgressFeed {
            shared: Arc::clone(&self.shared),
            current: None,
            cursor: ProgressCursor::default(),
            last_drained: None,
        }
    }

    /// Subscribes to queue events. Each subscriber receives every event sent
    /// after it subscribed.
    pub fn subscribe(&self) -> Receiver<QueueEvent> {
        let (tx, rx) = unbounded();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    /// Reports of the most recent `max_reports` finished jobs, oldest first
    pub fn reports(&self) -> Vec<JobReport> {
        self.shared.reports.lock().clone()
    }

    pub fn is_idle(&self) -> bool {
        self.shared.queue.lock().is_idle()
    }

    /// Blocks until nothing is running or pending
    pub fn wait_idle(&self) {
        let mut queue = self.shared.queue.lock();
        while !queue.is_idle() {
            self.shared.changed.wait(&mut queue);
        }
    }

    /// Like `wait_idle`, giving up after `timeout`. Returns whether the queue is idle.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.shared.queue.lock();
        while !queue.is_idle() {
            if self
                .shared
                .changed
                .wait_until(&mut queue, deadline)
                .timed_out()
            {
                return queue.is_idle();
            }
        }
        true
    }

    /// Cancels the running job, drops pending entries and stops the dispatcher.
    pub fn shutdown(&mut self) {
        let Some(dispatcher) = self.dispatcher.take() else {
            return;
        };
        self.shared.stopping.store(true, Ordering::SeqCst);
        {
            let mut queue = self.shared.queue.lock();
            let dropped = queue.clear_pending();
            if !dropped.is_empty() {
                debug!("Dropping {} pending entries on shutdown", dropped.len());
            }
            queue.cancel_running();
        }
        self.shared.changed.notify_all();
        if dispatcher.join().is_err() {
            warn!("Dispatcher thread panicked");
        }
        info!("Search service stopped");
    }
}

impl Drop for SearchService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch_loop(shared: Arc<Shared>, pool: ThreadPool) {
    loop {
        let progress = {
            let mut queue = shared.queue.lock();
            loop {
                if shared.stopping.load(Ordering::SeqCst) {
                    return;
                }
                match queue.advance() {
                    Advance::Started(progress) => break progress,
                    Advance::Busy | Advance::Drained => shared.changed.wait(&mut queue),
                }
            }
        };

        shared.emit(QueueEvent::JobStarted {
            id: progress.id(),
            request: progress.request().clone(),
        });

        let job = SearchJob::new(
            Arc::clone(&progress),
            shared.config.clone(),
            Arc::clone(&shared.matcher),
        );
        let report = job.run(&pool);

        shared.keep_report(report.clone());
        shared.emit(QueueEvent::JobFinished(report));

        let drained = {
            let mut queue = shared.queue.lock();
            queue.finish(progress.id());
            queue.is_idle()
        };
        shared.changed.notify_all();
        if drained {
            shared.emit(QueueEvent::Drained);
        }
    }
}

/// Non-blocking progress poller.
///
/// Each poll returns the counters of the job being followed and whatever was
/// appended to its lists since the previous poll. When the followed job ends,
/// the feed first hands out the job's remaining tail (with its terminal
/// state) and only then moves on to the next running job.
pub struct ProgressFeed {
    shared: Arc<Shared>,
    current: Option<Arc<JobProgress>>,
    cursor: ProgressCursor,
    // The dispatcher may not have cleared the running slot yet
    last_drained: Option<EntryId>,
}

impl ProgressFeed {
    pub fn poll(&mut self) -> ProgressUpdate {
        if let Some(job) = &self.current {
            if job.is_drained(&self.cursor) {
                self.last_drained = Some(job.id());
                self.current = None;
            }
        }
        if self.current.is_none() {
            self.current = self
                .shared
                .running_progress()
                .filter(|job| Some(job.id()) != self.last_drained);
            self.cursor = ProgressCursor::default();
        }

        match &self.current {
            Some(job) => job.poll(&mut self.cursor),
            None => ProgressUpdate::idle(),
        }
    }

    /// Id of the job being followed
    pub fn job(&self) -> Option<EntryId> {
        self.current.as_ref().map(|job| job.id())
    }
}
