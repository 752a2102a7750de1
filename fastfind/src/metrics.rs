use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::search::processor::SMALL_FILE_THRESHOLD;

/// Counters shared between the workers of one job.
#[derive(Debug, Clone)]
pub struct ScanMetrics {
    // Content reads by strategy
    bytes_read: Arc<AtomicU64>,
    bytes_mapped: Arc<AtomicU64>,
    small_files_read: Arc<AtomicU64>,
    mmap_files_read: Arc<AtomicU64>,

    // Outcomes
    extension_rejects: Arc<AtomicU64>,
    name_hits: Arc<AtomicU64>,
    content_hits: Arc<AtomicU64>,
    file_errors: Arc<AtomicU64>,
}

impl ScanMetrics {
    /// Creates a new ScanMetrics instance
    pub fn new() -> Self {
        Self {
            bytes_read: Arc::new(AtomicU64::new(0)),
            bytes_mapped: Arc::new(AtomicU64::new(0)),
            small_files_read: Arc::new(AtomicU64::new(0)),
            mmap_files_read: Arc::new(AtomicU64::new(0)),
            extension_rejects: Arc::new(AtomicU64::new(0)),
            name_hits: Arc::new(AtomicU64::new(0)),
            content_hits: Arc::new(AtomicU64::new(0)),
            file_errors: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Records a content read, classified by the strategy its size selects
    pub fn record_content_read(&self, size: u64) {
        if size < SMALL_FILE_THRESHOLD {
            self.small_files_read.fetch_add(1, Ordering::Relaxed);
            self.bytes_read.fetch_add(size, Ordering::Relaxed);
        } else {
            self.mmap_files_read.fetch_add(1, Ordering::Relaxed);
            self.bytes_mapped.fetch_add(size, Ordering::Relaxed);
        }
    }

    pub fn record_extension_reject(&self) {
        self.extension_rejects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_name_hit(&self) {
        self.name_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_content_hit(&self) {
        self.content_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a per-file failure (open, map or worker panic)
    pub fn record_file_error(&self) {
        self.file_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Gets current statistics
    pub fn get_stats(&self) -> ScanStats {
        ScanStats {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_mapped: self.bytes_mapped.load(Ordering::Relaxed),
            small_files: self.small_files_read.load(Ordering::Relaxed),
            mmap_files: self.mmap_files_read.load(Ordering::Relaxed),
            extension_rejects: self.extension_rejects.load(Ordering::Relaxed),
            name_hits: self.name_hits.load(Ordering::Relaxed),
            content_hits: self.content_hits.load(Ordering::Relaxed),
            file_errors: self.file_errors.load(Ordering::Relaxed),
        }
    }

    /// Logs current statistics
    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Scan stats:\n\
             Bytes read/mapped: {}/{}\n\
             Files read (small/mmap): {}/{}\n\
             Extension rejects: {}\n\
             Hits (name/content): {}/{}\n\
             File errors: {}",
            stats.bytes_read,
            stats.bytes_mapped,
            stats.small_files,
            stats.mmap_files,
            stats.extension_rejects,
            stats.name_hits,
            stats.content_hits,
            stats.file_errors
        );
    }
}

impl Default for ScanMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the scan counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub bytes_read: u64,
    pub bytes_mapped: u64,
    pub small_files: u64,
    pub mmap_files: u64,
    pub extension_rejects: u64,
    pub name_hits: u64,
    pub content_hits: u64,
    pub file_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_read_tracking() {
        let metrics = ScanMetrics::new();

        metrics.record_content_read(1000); // Small file
        metrics.record_content_read(20_000_000); // Memory mapped file

        let stats = metrics.get_stats();
        assert_eq!(stats.small_files, 1);
        assert_eq!(stats.mmap_files, 1);
        assert_eq!(stats.bytes_read, 1000);
        assert_eq!(stats.bytes_mapped, 20_000_000);
    }

    #[test]
    fn test_outcome_tracking() {
        let metrics = ScanMetrics::new();
        metrics.record_name_hit();
        metrics.record_content_hit();
        metrics.record_content_hit();
        metrics.record_extension_reject();
        metrics.record_file_error();

        let stats = metrics.get_stats();
        assert_eq!(stats.name_hits, 1);
        assert_eq!(stats.content_hits, 2);
        assert_eq!(stats.extension_rejects, 1);
        assert_eq!(stats.file_errors, 1);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = ScanMetrics::new();
        let clone = metrics.clone();
        clone.record_name_hit();
        assert_eq!(metrics.get_stats().name_hits, 1);
    }
}
