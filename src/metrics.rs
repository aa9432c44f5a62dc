//! Metrics collection for log sinks
//!
//! Lock-free counters for appended and dropped records, writes, rotations
//! and errors by kind, with snapshots and a text report.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Counters collected by one sink
#[derive(Debug)]
pub struct SinkMetrics {
    // Record counts
    /// Records accepted by `append`
    records_appended: AtomicUsize,
    /// Records lost to failures
    records_dropped: AtomicUsize,

    // Write metrics
    /// Completed write calls
    write_count: AtomicUsize,
    /// Bytes handed to the OS
    bytes_written: AtomicUsize,
    /// Flushes that only fed the compressor
    deferred_flushes: AtomicUsize,
    /// Total flush duration in nanoseconds
    flush_duration_ns: AtomicU64,

    // Rotation metrics
    /// Active files retired
    rotations: AtomicUsize,
    /// Shards reopened without retiring a file
    reopens: AtomicUsize,

    // Error counts
    open_errors: AtomicUsize,
    write_errors: AtomicUsize,
    compression_errors: AtomicUsize,
    rotation_errors: AtomicUsize,
    other_errors: AtomicUsize,

    start_time: Instant,
}

/// Point-in-time copy of [`SinkMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub records_appended: usize,
    pub records_dropped: usize,
    pub write_count: usize,
    pub bytes_written: usize,
    pub deferred_flushes: usize,
    pub rotations: usize,
    pub reopens: usize,
    pub open_errors: usize,
    pub write_errors: usize,
    pub compression_errors: usize,
    pub rotation_errors: usize,
    pub other_errors: usize,
}

impl MetricsSnapshot {
    /// Sum of all error counters
    pub fn total_errors(&self) -> usize {
        self.open_errors
            + self.write_errors
            + self.compression_errors
            + self.rotation_errors
            + self.other_errors
    }
}

impl Default for SinkMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            records_appended: AtomicUsize::new(0),
            records_dropped: AtomicUsize::new(0),

            write_count: AtomicUsize::new(0),
            bytes_written: AtomicUsize::new(0),
            deferred_flushes: AtomicUsize::new(0),
            flush_duration_ns: AtomicU64::new(0),

            rotations: AtomicUsize::new(0),
            reopens: AtomicUsize::new(0),

            open_errors: AtomicUsize::new(0),
            write_errors: AtomicUsize::new(0),
            compression_errors: AtomicUsize::new(0),
            rotation_errors: AtomicUsize::new(0),
            other_errors: AtomicUsize::new(0),

            start_time: Instant::now(),
        }
    }

    /// Increment appended records
    pub fn increment_appended(&self) {
        self.records_appended.fetch_add(1, Ordering::Relaxed);
    }

    /// Add dropped records
    pub fn add_dropped(&self, count: usize) {
        self.records_dropped.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a completed write of `bytes`
    pub fn record_write(&self, bytes: usize) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Increment flushes that stayed in the compressor
    pub fn increment_deferred(&self) {
        self.deferred_flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a flush duration
    pub fn record_flush_duration(&self, duration: Duration) {
        self.flush_duration_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Increment rotations
    pub fn increment_rotations(&self) {
        self.rotations.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment reopens
    pub fn increment_reopens(&self) {
        self.reopens.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an error of the given kind
    pub fn record_error(&self, kind: ErrorKind) {
        let counter = match kind {
            ErrorKind::Open => &self.open_errors,
            ErrorKind::Write => &self.write_errors,
            ErrorKind::Compression => &self.compression_errors,
            ErrorKind::Rotation => &self.rotation_errors,
            ErrorKind::Config | ErrorKind::Other => &self.other_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get appended record count
    pub fn get_appended(&self) -> usize {
        self.records_appended.load(Ordering::Relaxed)
    }

    /// Get dropped record count
    pub fn get_dropped(&self) -> usize {
        self.records_dropped.load(Ordering::Relaxed)
    }

    /// Get bytes written
    pub fn get_bytes_written(&self) -> usize {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Get total flush duration
    pub fn get_flush_duration(&self) -> Duration {
        Duration::from_nanos(self.flush_duration_ns.load(Ordering::Relaxed))
    }

    /// Get uptime
    pub fn get_uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Copy every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_appended: self.records_appended.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            write_count: self.write_count.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            deferred_flushes: self.deferred_flushes.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            reopens: self.reopens.load(Ordering::Relaxed),
            open_errors: self.open_errors.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            compression_errors: self.compression_errors.load(Ordering::Relaxed),
            rotation_errors: self.rotation_errors.load(Ordering::Relaxed),
            other_errors: self.other_errors.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        for counter in [
            &self.records_appended,
            &self.records_dropped,
            &self.write_count,
            &self.bytes_written,
            &self.deferred_flushes,
            &self.rotations,
            &self.reopens,
            &self.open_errors,
            &self.write_errors,
            &self.compression_errors,
            &self.rotation_errors,
            &self.other_errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.flush_duration_ns.store(0, Ordering::Relaxed);
    }

    /// Get a report of all metrics
    pub fn get_report(&self) -> String {
        let snapshot = self.snapshot();
        let mut report = String::new();

        report.push_str("=== Sink Metrics Report ===\n\n");
        report.push_str(&format!("Uptime: {:?}\n\n", self.get_uptime()));

        report.push_str("Records:\n");
        report.push_str(&format!("  Appended: {}\n", snapshot.records_appended));
        report.push_str(&format!("  Dropped: {}\n\n", snapshot.records_dropped));

        report.push_str("Writes:\n");
        report.push_str(&format!("  Write Calls: {}\n", snapshot.write_count));
        report.push_str(&format!("  Bytes Written: {}\n", snapshot.bytes_written));
        report.push_str(&format!("  Deferred Flushes: {}\n", snapshot.deferred_flushes));
        if snapshot.write_count > 0 {
            let avg = self.get_flush_duration().as_micros() / snapshot.write_count as u128;
            report.push_str(&format!("  Avg. Flush Time: {}µs\n", avg));
        }

        report.push_str("\nRotation:\n");
        report.push_str(&format!("  Rotations: {}\n", snapshot.rotations));
        report.push_str(&format!("  Reopens: {}\n\n", snapshot.reopens));

        report.push_str("Errors:\n");
        report.push_str(&format!("  Open: {}\n", snapshot.open_errors));
        report.push_str(&format!("  Write: {}\n", snapshot.write_errors));
        report.push_str(&format!("  Compression: {}\n", snapshot.compression_errors));
        report.push_str(&format!("  Rotation: {}\n", snapshot.rotation_errors));
        report.push_str(&format!("  Other: {}\n", snapshot.other_errors));

        report
    }
}
