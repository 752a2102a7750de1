pub mod config;
pub mod errors;
pub mod filters;
pub mod metrics;
pub mod queue;
pub mod results;
pub mod search;
pub mod service;

pub use config::SearchConfig;
pub use errors::{SearchError, SearchResult};
pub use queue::{EntryId, PendingEntry, SearchQueue, SearchRequest};
pub use results::{FileMatch, JobReport, JobState, MatchKind, ProgressUpdate};
pub use service::{ProgressFeed, QueueEvent, SearchService};
