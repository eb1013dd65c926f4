//! Sizing for a hazard table.
//!
//! The values bound the worst-case memory held by the reclamation scheme and
//! the cost of a single scan, so they are fixed when a table is built.

use crate::error::{HazardError, HazardResult};

/// Default upper bound on the number of hazard records in one table.
pub const MAX_THREADS: usize = 128;

/// Default number of hazard slots per record (K).
pub const SLOTS_PER_THREAD: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HazardConfig {
    max_threads: usize,
    slots_per_thread: usize,
    scan_threshold: usize,
}

impl HazardConfig {
    pub fn new(max_threads: usize, slots_per_thread: usize) -> Self {
        HazardConfig {
            max_threads,
            slots_per_thread,
            scan_threshold: slots_per_thread,
        }
    }

    /// Upper bound on the number of records, and so on the number of threads
    /// that can be inside an operation at the same time.
    pub fn max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Sets K. Also resets the scan threshold to K.
    pub fn slots_per_thread(mut self, slots: usize) -> Self {
        self.slots_per_thread = slots;
        self.scan_threshold = slots;
        self
    }

    /// Number of retired pointers a record collects before it scans.
    pub fn scan_threshold(mut self, threshold: usize) -> Self {
        self.scan_threshold = threshold;
        self
    }

    pub fn get_max_threads(&self) -> usize {
        self.max_threads
    }

    pub fn get_slots_per_thread(&self) -> usize {
        self.slots_per_thread
    }

    pub fn get_scan_threshold(&self) -> usize {
        self.scan_threshold
    }

    pub fn validate(&self) -> HazardResult<()> {
        if self.max_threads == 0 {
            return Err(HazardError::InvalidConfig("max_threads must be at least 1"));
        }
        if self.slots_per_thread == 0 {
            return Err(HazardError::InvalidConfig("slots_per_thread must be at least 1"));
        }
        if self.scan_threshold == 0 {
            return Err(HazardError::InvalidConfig("scan_threshold must be at least 1"));
        }
        Ok(())
    }
}

impl Default for HazardConfig {
    fn default() -> Self {
        HazardConfig::new(MAX_THREADS, SLOTS_PER_THREAD)
    }
}
