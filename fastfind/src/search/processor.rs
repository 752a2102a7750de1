use memchr::memmem::Finder;
use memmap2::Mmap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::trace;

use crate::errors::SearchResult;
use crate::metrics::ScanMetrics;

// Files below this size are read into memory, the rest are mapped
pub(crate) const SMALL_FILE_THRESHOLD: u64 = 32 * 1024; // 32KB

/// Raw byte search over file contents
#[derive(Debug, Clone, Copy)]
pub struct ContentScanner<'a> {
    metrics: &'a ScanMetrics,
}

impl<'a> ContentScanner<'a> {
    pub fn new(metrics: &'a ScanMetrics) -> Self {
        Self { metrics }
    }

    /// Gets the metrics this scanner records into
    pub fn metrics(&self) -> &ScanMetrics {
        self.metrics
    }

    /// Returns whether the file's bytes contain `needle`.
    ///
    /// Empty files never contain anything. No decoding happens: the
    /// comparison is byte for byte.
    pub fn contains(&self, path: &Path, needle: &Finder<'_>) -> SearchResult<bool> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        if size == 0 {
            trace!("Empty file, nothing to scan: {}", path.display());
            return Ok(false);
        }
        self.metrics.record_content_read(size);

        if size < SMALL_FILE_THRESHOLD {
            self.scan_small_file(&file, size, path, needle)
        } else {
            self.scan_mmap_file(&file, path, needle)
        }
    }

    fn scan_small_file(
        &self,
        mut file: &File,
        size: u64,
        path: &Path,
        needle: &Finder<'_>,
    ) -> SearchResult<bool> {
        trace!("Reading small file: {}", path.display());
        let mut bytes = Vec::with_capacity(size as usize);
        file.read_to_end(&mut bytes)?;
        Ok(needle.find(&bytes).is_some())
    }

    fn scan_mmap_file(&self, file: &File, path: &Path, needle: &Finder<'_>) -> SearchResult<bool> {
        trace!("Mapping file: {}", path.display());
        // Read-only map, unmapped before returning
        let mmap = unsafe { Mmap::map(file) }?;
        Ok(needle.find(&mmap).is_some())
    }
}
