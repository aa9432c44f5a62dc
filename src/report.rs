//! Diagnostic side channel
//!
//! Sinks never return I/O failures to their callers. Every failure is handed
//! to an [`ErrorReporter`] together with the number of records it cost.

use std::fmt;

use parking_lot::Mutex;

use crate::error::{Error, ErrorKind};

/// Receives sink failures
pub trait ErrorReporter: Send + Sync + fmt::Debug {
    /// Report `error`, which caused `dropped` records to be lost
    fn report(&self, error: &Error, dropped: usize);
}

/// Render a report the way it appears in diagnostics
pub fn describe(error: &Error, dropped: usize) -> String {
    if dropped > 0 {
        format!("Dropped {} logs. {}", dropped, error)
    } else {
        error.to_string()
    }
}

/// Reports through `tracing` at error level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, error: &Error, dropped: usize) {
        tracing::error!(dropped, kind = %error.kind(), "{}", describe(error, dropped));
    }
}

/// One collected report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Error classification
    pub kind: ErrorKind,
    /// Records lost
    pub dropped: usize,
    /// Rendered message
    pub message: String,
}

/// Collects reports in memory
#[derive(Debug, Default)]
pub struct MemoryReporter {
    reports: Mutex<Vec<Report>>,
}

impl MemoryReporter {
    /// Create an empty reporter
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every report so far
    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().clone()
    }

    /// Remove and return every report so far
    pub fn take(&self) -> Vec<Report> {
        std::mem::take(&mut *self.reports.lock())
    }

    /// Total records reported as dropped
    pub fn dropped(&self) -> usize {
        self.reports.lock().iter().map(|r| r.dropped).sum()
    }

    /// Check if nothing was reported
    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }
}

impl ErrorReporter for MemoryReporter {
    fn report(&self, error: &Error, dropped: usize) {
        self.reports.lock().push(Report {
            kind: error.kind(),
            dropped,
            message: describe(error, dropped),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_memory_reporter() {
        let reporter = MemoryReporter::new();
        assert!(reporter.is_empty());

        let err = Error::write("app.log", io::Error::new(io::ErrorKind::Other, "No space left on device"));
        reporter.report(&err, 3);
        reporter.report(&Error::Closed, 1);

        let reports = reporter.reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].kind, ErrorKind::Write);
        assert!(reports[0].message.starts_with("Dropped 3 logs. Write"));
        assert!(reports[0].message.contains("No space left on device"));
        assert_eq!(reporter.dropped(), 4);

        assert_eq!(reporter.take().len(), 2);
        assert!(reporter.is_empty());
    }

    #[test]
    fn test_describe_without_drops() {
        let err = Error::rotation("app.log", "permission denied");
        assert_eq!(describe(&err, 0), err.to_string());
    }
}
