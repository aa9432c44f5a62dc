//! The rotating, buffering log sink
//!
//! A [`LogSink`] accepts already formatted records, buffers them, spreads
//! them round-robin over its shards and rotates the shards according to its
//! configuration. No failure ever escapes `append`, `flush` or `close`: every
//! problem goes to the sink's [`ErrorReporter`].

use std::collections::VecDeque;
use std::fs::File;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};

use crate::clock::{Clock, SystemClock};
use crate::compression::CompressionFactory;
use crate::config::{RollingMode, SinkConfig};
use crate::error::{Error, Result};
use crate::log_buffer::{FlushOutcome, LogBuffer};
use crate::metrics::SinkMetrics;
use crate::report::{ErrorReporter, TracingReporter};
use crate::shard::{
    acquire_lock_file, RotationAction, RotationPolicy, ShardHandle, ShardInfo, ShardSet, ShardStats,
};

/// Mutable state guarded by the sink lock
struct SinkState {
    shards: ShardSet,
    pending: VecDeque<LogBuffer>,
    next_shard: usize,
    closed: bool,
}

/// A multi-file log sink
pub struct LogSink {
    /// Normalized configuration
    config: SinkConfig,
    /// Shards and buffers
    state: Mutex<SinkState>,
    /// Time source for rotation
    clock: Arc<dyn Clock>,
    /// Side channel for failures
    reporter: Arc<dyn ErrorReporter>,
    /// Metrics collector
    metrics: SinkMetrics,
    /// Advisory lock held for the sink's lifetime
    _lock_file: Option<File>,
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("files", &self.config.files)
            .field("clock", &self.clock)
            .field("reporter", &self.reporter)
            .finish()
    }
}

impl LogSink {
    /// Create a sink using the system clock and the tracing reporter
    pub fn new(config: SinkConfig) -> Result<Self> {
        Self::with_runtime(config, Arc::new(SystemClock), Arc::new(TracingReporter))
    }

    /// Create a sink with an explicit clock and reporter.
    ///
    /// Fails only on configuration errors. Files are opened lazily by the
    /// first append; a lock file that cannot be taken is reported and
    /// otherwise ignored.
    pub fn with_runtime(
        config: SinkConfig,
        clock: Arc<dyn Clock>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self> {
        config.validate()?;
        let config = config.normalized();

        let lock_file = match &config.lock_file {
            Some(path) => match acquire_lock_file(path) {
                Ok(file) => Some(file),
                Err(source) => {
                    reporter.report(
                        &Error::Lock {
                            path: path.clone(),
                            source,
                        },
                        0,
                    );
                    None
                }
            },
            None => None,
        };

        let policy = match config.rolling {
            RollingMode::Never => RotationPolicy::None,
            RollingMode::Size {
                max_file_size,
                max_backup_index,
            } => RotationPolicy::SizeBased {
                max_bytes: max_file_size,
                max_backups: max_backup_index,
            },
            RollingMode::Calendar { schedule } => {
                RotationPolicy::calendar(schedule, config.time_basis, clock.now())
            }
        };

        let shards = ShardSet::new(
            config.files.clone(),
            config.postfix(),
            config.append,
            config.close_on_exec,
            policy,
            config.reopen_delay(),
        );

        tracing::debug!(
            "Created sink over {} files ({}, {:?})",
            shards.len(),
            config.compression_algorithm,
            config.rolling
        );

        Ok(Self {
            config,
            state: Mutex::new(SinkState {
                shards,
                pending: VecDeque::new(),
                next_shard: 0,
                closed: false,
            }),
            clock,
            reporter,
            metrics: SinkMetrics::new(),
            _lock_file: lock_file,
        })
    }

    /// Get the normalized configuration
    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Get the metrics collector
    pub fn metrics(&self) -> &SinkMetrics {
        &self.metrics
    }

    /// Snapshot of every shard
    pub fn shard_info(&self) -> Vec<ShardInfo> {
        self.state.lock().shards.infos()
    }

    /// Aggregate shard statistics
    pub fn shard_stats(&self) -> ShardStats {
        self.state.lock().shards.stats()
    }

    /// Check if the sink has been closed
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Append one formatted record.
    ///
    /// The record is buffered and written once the buffer threshold is
    /// reached, immediately when `immediate_flush` is set, or at close.
    pub fn append(&self, record: &[u8]) {
        let mut state = self.state.lock();
        if state.closed {
            self.report(Error::Closed, 1);
            return;
        }

        let now = self.clock.now();
        if !self.ensure_initialized(&mut state, now) {
            return;
        }

        let shard_count = state.shards.len();
        let mut buffer = match state.pending.pop_front() {
            Some(buffer) => buffer,
            None => self.new_buffer(),
        };

        let index = if buffer.is_bound() {
            buffer.shard_index()
        } else {
            state.next_shard % shard_count
        };
        let prepared = self.prepare_shard(&mut state, index, now);
        if state.closed {
            self.abandon_after_close(&mut state, buffer);
            return;
        }
        let handle = match prepared {
            Some(handle) => handle,
            None => {
                state.pending.push_back(buffer);
                return;
            }
        };

        // The shard was rotated since the buffer was bound to it
        if buffer.is_stale(Some(&handle)) {
            self.flush_buffer(&mut state, &mut buffer, true, true);
            if state.closed {
                self.abandon_after_close(&mut state, buffer);
                return;
            }
        }

        if !buffer.is_bound() {
            let next = state.next_shard % shard_count;
            let current = if next == index {
                state.shards.handle(next)
            } else {
                None
            };
            let handle = match current {
                Some(handle) => handle,
                None => {
                    let prepared = self.prepare_shard(&mut state, next, now);
                    if state.closed {
                        self.abandon_after_close(&mut state, buffer);
                        return;
                    }
                    match prepared {
                        Some(handle) => handle,
                        None => {
                            state.pending.push_back(buffer);
                            return;
                        }
                    }
                }
            };
            buffer.bind(handle);
            state.next_shard = (next + 1) % shard_count;
        }

        buffer.append(record);
        self.metrics.increment_appended();

        if buffer.should_flush() || self.config.immediate_flush {
            self.flush_buffer(&mut state, &mut buffer, false, true);

            // A compressed stream must end before its handle goes stale
            if buffer.is_compressed() {
                let current = state.shards.handle(buffer.shard_index());
                if buffer.is_stale(current.as_ref()) {
                    self.flush_buffer(&mut state, &mut buffer, true, true);
                }
            }
        }

        if state.closed && !buffer.is_empty() {
            self.flush_buffer(&mut state, &mut buffer, true, false);
            return;
        }
        state.pending.push_back(buffer);
    }

    /// Force every pending buffer to disk without closing the sink
    pub fn flush(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        let now = self.clock.now();
        self.flush_pending(&mut state, now, true);
    }

    /// Flush every pending buffer and close all files.
    ///
    /// Closing a closed sink does nothing.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        let now = self.clock.now();
        self.flush_pending(&mut state, now, false);
        state.pending.clear();
        state.shards.close_all();
        state.closed = true;

        tracing::debug!("Closed sink over {:?}", self.config.files);
    }

    /// Drop the current record because `close` ran while the lock was
    /// released, and write out whatever `buffer` still holds.
    fn abandon_after_close(&self, state: &mut MutexGuard<'_, SinkState>, mut buffer: LogBuffer) {
        self.report(Error::Closed, 1);
        if buffer.is_empty() {
            return;
        }
        if buffer.is_bound() {
            self.flush_buffer(state, &mut buffer, true, false);
        } else {
            let dropped = buffer.discard();
            self.report(Error::Closed, dropped);
        }
    }

    fn report(&self, error: Error, dropped: usize) {
        self.metrics.record_error(error.kind());
        self.metrics.add_dropped(dropped);
        self.reporter.report(&error, dropped);
    }

    fn new_buffer(&self) -> LogBuffer {
        let compressor = CompressionFactory::create_compressor(
            self.config.compression_algorithm,
            self.config.compression_level,
            self.config.buffer_size,
            self.config.buffer_growth_factor,
        );
        match compressor {
            Some(compressor) => LogBuffer::with_compressor(
                self.config.buffer_size,
                compressor,
                self.config.compress_flush_size as u64,
            ),
            None => LogBuffer::new(self.config.buffer_size),
        }
    }

    /// Open every shard once. Returns `false` if none could be opened.
    fn ensure_initialized(&self, state: &mut SinkState, now: DateTime<Utc>) -> bool {
        if state.shards.is_initialized() {
            return true;
        }

        let failures = state.shards.open_all(now);
        let opened = state.shards.is_initialized();
        let last = failures.len();
        for (i, (_, err)) in failures.into_iter().enumerate() {
            let dropped = usize::from(!opened && i + 1 == last);
            self.report(Error::from(err), dropped);
        }
        opened
    }

    /// Rotate a shard if due and return its handle.
    ///
    /// `None` means the shard could not be opened; the record has been
    /// reported as dropped.
    fn prepare_shard(
        &self,
        state: &mut MutexGuard<'_, SinkState>,
        index: usize,
        now: DateTime<Utc>,
    ) -> Option<Arc<ShardHandle>> {
        let outcome = match state.shards.rotate_if_needed(index, now) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.report(Error::from(err), 1);
                return None;
            }
        };

        for warning in outcome.warnings {
            self.report(Error::from(warning), 0);
        }

        match outcome.action {
            RotationAction::Unchanged => {}
            RotationAction::Reopened => self.metrics.increment_reopens(),
            RotationAction::Rotated => {
                self.metrics.increment_rotations();
                if state.shards.policy().is_calendar() {
                    self.flush_stale(state);
                }
            }
        }

        state.shards.handle(index)
    }

    /// Force-flush every pending buffer bound to a replaced handle
    fn flush_stale(&self, state: &mut MutexGuard<'_, SinkState>) {
        let inner: &mut SinkState = state;
        let mut stale = Vec::new();
        let mut fresh = VecDeque::with_capacity(inner.pending.len());
        for buffer in inner.pending.drain(..) {
            let current = inner.shards.handle(buffer.shard_index());
            if buffer.is_stale(current.as_ref()) {
                stale.push(buffer);
            } else {
                fresh.push_back(buffer);
            }
        }
        inner.pending = fresh;

        for mut buffer in stale {
            self.flush_buffer(state, &mut buffer, true, true);
            state.pending.push_back(buffer);
        }
    }

    /// Force-flush all pending buffers, opening shards for unbound ones
    fn flush_pending(&self, state: &mut MutexGuard<'_, SinkState>, now: DateTime<Utc>, unlock: bool) {
        let buffers: Vec<LogBuffer> = state.pending.drain(..).collect();
        for mut buffer in buffers {
            if !buffer.is_empty() {
                if !buffer.is_bound() {
                    match state.shards.get_or_open(buffer.shard_index(), now) {
                        Ok(handle) => buffer.bind(handle),
                        Err(err) => {
                            let dropped = buffer.discard();
                            self.report(Error::from(err), dropped);
                        }
                    }
                }
                if buffer.is_bound() {
                    self.flush_buffer(state, &mut buffer, true, unlock);
                }
            }
            state.pending.push_back(buffer);
        }
    }

    /// Flush one buffer that is not in the pending list.
    ///
    /// With `unlock` the sink lock is released for the duration of the
    /// write. Returns `false` if the flush failed.
    fn flush_buffer(
        &self,
        state: &mut MutexGuard<'_, SinkState>,
        buffer: &mut LogBuffer,
        force: bool,
        unlock: bool,
    ) -> bool {
        let handle_id = buffer.handle_id();
        let started = Instant::now();
        let result = if unlock {
            MutexGuard::unlocked(state, || buffer.flush(force))
        } else {
            buffer.flush(force)
        };
        self.metrics.record_flush_duration(started.elapsed());

        match result {
            Ok(FlushOutcome::Written(bytes)) => {
                self.metrics.record_write(bytes);
                let index = buffer.shard_index();
                if handle_id.is_some() && state.shards.handle(index).map(|h| h.id()) == handle_id {
                    state.shards.record_written(index, bytes);
                }
                true
            }
            Ok(FlushOutcome::Deferred) => {
                self.metrics.increment_deferred();
                true
            }
            Ok(FlushOutcome::Empty) => true,
            Err(failure) => {
                if failure.error.is_write_error() {
                    if let Some(id) = failure.handle_id {
                        state.shards.close_if_current(failure.shard_index, id);
                    }
                }
                self.report(failure.error, failure.dropped);
                false
            }
        }
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::CompressionAlgorithm;
    use crate::error::ErrorKind;
    use crate::report::MemoryReporter;
    use crate::shard::{Schedule, TimeBasis};
    use chrono::TimeZone;
    use flate2::read::MultiGzDecoder;
    use proptest::prelude::*;
    use std::fs;
    use std::io::Read;
    use std::path::Path;
    use std::thread;
    use tempfile::tempdir;

    fn path_str(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    fn sink_with(config: SinkConfig) -> (LogSink, Arc<MemoryReporter>) {
        let reporter = Arc::new(MemoryReporter::new());
        let sink = LogSink::with_runtime(config, Arc::new(SystemClock), reporter.clone()).unwrap();
        (sink, reporter)
    }

    fn gunzip(path: &Path) -> Vec<u8> {
        let mut decoded = Vec::new();
        MultiGzDecoder::new(fs::File::open(path).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        decoded
    }

    #[test]
    fn test_no_writes_below_threshold() {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("app.log");
        let (sink, reporter) = sink_with(SinkConfig::new().with_file(&base).with_buffer_size(4096));

        let mut expected = Vec::new();
        for i in 0..20 {
            let record = format!("record {}\n", i);
            sink.append(record.as_bytes());
            expected.extend_from_slice(record.as_bytes());
        }

        assert_eq!(fs::metadata(&base).unwrap().len(), 0);
        assert_eq!(sink.metrics().snapshot().write_count, 0);

        sink.close();
        assert_eq!(fs::read(&base).unwrap(), expected);
        assert!(reporter.is_empty());
    }

    #[test]
    fn test_plain_round_trip() {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("app.log");
        let (sink, _) = sink_with(SinkConfig::new().with_file(&base).with_buffer_size(512));

        let mut expected = Vec::new();
        for i in 0..500 {
            let record = format!("{} {}\n", i, "x".repeat(i % 37));
            sink.append(record.as_bytes());
            expected.extend_from_slice(record.as_bytes());
        }
        sink.close();

        assert_eq!(fs::read(&base).unwrap(), expected);
        let snapshot = sink.metrics().snapshot();
        assert_eq!(snapshot.records_appended, 500);
        assert_eq!(snapshot.bytes_written, expected.len());
    }

    #[test]
    fn test_truncate_mode() {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("app.log");
        fs::write(&base, "old contents\n").unwrap();

        let (sink, _) = sink_with(SinkConfig::new().with_file(&base).with_append(false));
        sink.append(b"new\n");
        sink.close();

        assert_eq!(fs::read_to_string(&base).unwrap(), "new\n");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_gzip_round_trip(
            records in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..300), 1..80),
            flush_points in prop::collection::vec(any::<bool>(), 80),
        ) {
            let temp_dir = tempdir().unwrap();
            let base = temp_dir.path().join("app.log");
            let (sink, reporter) = sink_with(
                SinkConfig::new()
                    .with_file(&base)
                    .with_buffer_size(512)
                    .with_compression_algorithm(CompressionAlgorithm::Gzip)
                    .with_compress_flush_size(512),
            );

            let mut expected = Vec::new();
            for (record, flush) in records.iter().zip(flush_points.iter()) {
                sink.append(record);
                expected.extend_from_slice(record);
                if *flush {
                    sink.flush();
                }
            }
            sink.close();

            let written = temp_dir.path().join("app.log.gz");
            prop_assert_eq!(gunzip(&written), expected);
            prop_assert!(reporter.is_empty());
        }
    }

    #[test]
    fn test_gzip_threshold_writes_members() {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("app.log");
        let (sink, _) = sink_with(
            SinkConfig::new()
                .with_file(&base)
                .with_buffer_size(512)
                .with_compression_algorithm(CompressionAlgorithm::Gzip)
                .with_compress_flush_size(4096),
        );

        let mut expected = Vec::new();
        for i in 0..400 {
            let record = format!("line {:05} of compressed output\n", i);
            sink.append(record.as_bytes());
            expected.extend_from_slice(record.as_bytes());
        }

        let written = temp_dir.path().join("app.log.gz");
        let snapshot = sink.metrics().snapshot();
        assert!(snapshot.write_count > 1);
        assert!(snapshot.deferred_flushes > 0);
        assert!(fs::metadata(&written).unwrap().len() > 0);

        sink.close();
        assert_eq!(gunzip(&written), expected);
    }

    #[test]
    fn test_size_rotation_chain() {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("app.log");
        let base_str = path_str(&base);
        fs::write(format!("{}.1", base_str), "one").unwrap();
        fs::write(format!("{}.2", base_str), "two").unwrap();

        let (sink, reporter) = sink_with(
            SinkConfig::new()
                .with_file(&base)
                .with_immediate_flush(true)
                .with_size_rolling(200 * 1024, 2),
        );

        let record = vec![b'x'; 1023]
            .into_iter()
            .chain(std::iter::once(b'\n'))
            .collect::<Vec<u8>>();
        for _ in 0..200 {
            sink.append(&record);
        }
        assert_eq!(fs::metadata(&base).unwrap().len(), 200 * 1024);
        assert_eq!(fs::read_to_string(format!("{}.1", base_str)).unwrap(), "one");

        sink.append(&record);
        sink.close();

        assert_eq!(fs::metadata(&base).unwrap().len(), 1024);
        assert_eq!(fs::metadata(format!("{}.1", base_str)).unwrap().len(), 200 * 1024);
        assert_eq!(fs::read_to_string(format!("{}.2", base_str)).unwrap(), "one");
        assert!(!Path::new(&format!("{}.3", base_str)).exists());

        assert!(reporter.is_empty());
        assert_eq!(sink.metrics().snapshot().rotations, 1);
    }

    #[test]
    fn test_hourly_rotation() {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("app.log");
        let base_str = path_str(&base);

        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 10, 10, 59, 30).unwrap()));
        let reporter = Arc::new(MemoryReporter::new());
        let sink = LogSink::with_runtime(
            SinkConfig::new()
                .with_file(&base)
                .with_immediate_flush(true)
                .with_schedule(Schedule::Hourly)
                .with_time_basis(TimeBasis::Utc),
            clock.clone(),
            reporter.clone(),
        )
        .unwrap();

        sink.append(b"before\n");
        clock.set(Utc.with_ymd_and_hms(2024, 3, 10, 11, 0, 10).unwrap());
        sink.append(b"after\n");
        sink.close();

        assert_eq!(fs::read_to_string(format!("{}.2024-03-10-10", base_str)).unwrap(), "before\n");
        assert_eq!(fs::read_to_string(format!("{}.2024-03-10-11", base_str)).unwrap(), "after\n");
        assert!(!base.exists());
        assert!(reporter.is_empty());
    }

    #[test]
    fn test_calendar_rotation_flushes_gzip_stream() {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("app.log");
        let base_str = path_str(&base);

        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 10, 12, 14, 0).unwrap()));
        let reporter = Arc::new(MemoryReporter::new());
        let sink = LogSink::with_runtime(
            SinkConfig::new()
                .with_file(&base)
                .with_buffer_size(512)
                .with_compression_algorithm(CompressionAlgorithm::Gzip)
                .with_schedule(Schedule::minutely(15))
                .with_time_basis(TimeBasis::Utc),
            clock.clone(),
            reporter.clone(),
        )
        .unwrap();

        let early = "early record\n".repeat(60);
        sink.append(early.as_bytes());
        clock.set(Utc.with_ymd_and_hms(2024, 3, 10, 12, 16, 0).unwrap());
        sink.append(b"late record\n");
        sink.close();

        let first = gunzip(Path::new(&format!("{}.2024-03-10-12-00.gz", base_str)));
        let second = gunzip(Path::new(&format!("{}.2024-03-10-12-15.gz", base_str)));
        assert_eq!(first, early.as_bytes());
        assert_eq!(second, b"late record\n");
        assert!(reporter.is_empty());
    }

    #[test]
    fn test_round_robin_fan_out() {
        let temp_dir = tempdir().unwrap();
        let files: Vec<_> = ["a.log", "b.log", "c.log"]
            .iter()
            .map(|name| temp_dir.path().join(name))
            .collect();
        let (sink, _) = sink_with(SinkConfig::new().with_files(&files).with_immediate_flush(true));

        for i in 0..9 {
            sink.append(format!("r{}\n", i).as_bytes());
        }
        sink.close();

        assert_eq!(fs::read_to_string(&files[0]).unwrap(), "r0\nr3\nr6\n");
        assert_eq!(fs::read_to_string(&files[1]).unwrap(), "r1\nr4\nr7\n");
        assert_eq!(fs::read_to_string(&files[2]).unwrap(), "r2\nr5\nr8\n");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_write_failure_closes_and_reopens() {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("app.log");
        std::os::unix::fs::symlink("/dev/full", &base).unwrap();

        let (sink, reporter) = sink_with(
            SinkConfig::new()
                .with_file(&base)
                .with_immediate_flush(true)
                .with_reopen_delay_secs(0),
        );

        sink.append(b"lost\n");
        let reports = reporter.take();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, ErrorKind::Write);
        assert_eq!(reports[0].dropped, 1);
        assert!(reports[0].message.starts_with("Dropped 1 logs. Write"));
        assert!(!sink.shard_info()[0].is_open);

        fs::remove_file(&base).unwrap();
        sink.append(b"kept\n");
        sink.close();

        assert!(reporter.is_empty());
        assert_eq!(fs::read_to_string(&base).unwrap(), "kept\n");
        assert_eq!(sink.metrics().snapshot().records_dropped, 1);
    }

    #[test]
    fn test_open_failure_recovers() {
        let temp_dir = tempdir().unwrap();
        let blocker = temp_dir.path().join("logs");
        fs::write(&blocker, "not a directory").unwrap();
        let base = blocker.join("app.log");

        let (sink, reporter) = sink_with(
            SinkConfig::new()
                .with_file(&base)
                .with_immediate_flush(true)
                .with_reopen_delay_secs(0),
        );

        sink.append(b"dropped\n");
        let reports = reporter.take();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, ErrorKind::Open);
        assert_eq!(reports[0].dropped, 1);

        fs::remove_file(&blocker).unwrap();
        sink.append(b"written\n");
        sink.close();

        assert!(reporter.is_empty());
        assert_eq!(fs::read_to_string(&base).unwrap(), "written\n");
    }

    #[test]
    fn test_append_after_close() {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("app.log");
        let (sink, reporter) = sink_with(SinkConfig::new().with_file(&base));

        sink.append(b"kept\n");
        sink.close();
        sink.close();
        assert!(sink.is_closed());

        sink.append(b"late\n");
        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].dropped, 1);
        assert_eq!(fs::read_to_string(&base).unwrap(), "kept\n");
    }

    #[test]
    fn test_drop_flushes() {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("app.log");
        {
            let (sink, _) = sink_with(SinkConfig::new().with_file(&base));
            sink.append(b"buffered\n");
        }
        assert_eq!(fs::read_to_string(&base).unwrap(), "buffered\n");
    }

    #[test]
    fn test_concurrent_appends() {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("app.log");
        let (sink, reporter) = sink_with(SinkConfig::new().with_file(&base).with_buffer_size(512));
        let sink = Arc::new(sink);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let sink = Arc::clone(&sink);
                thread::spawn(move || {
                    for i in 0..500 {
                        sink.append(format!("t{}-{}\n", t, i).as_bytes());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        sink.close();

        let contents = fs::read_to_string(&base).unwrap();
        let mut lines: Vec<&str> = contents.lines().collect();
        lines.sort_unstable();
        let mut expected: Vec<String> = (0..4)
            .flat_map(|t| (0..500).map(move |i| format!("t{}-{}", t, i)))
            .collect();
        expected.sort_unstable();

        assert_eq!(lines, expected);
        assert!(reporter.is_empty());
    }

    #[test]
    fn test_lock_file_conflict_is_reported() {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("app.log");
        let lock = temp_dir.path().join("app.log.lock");

        let (first, first_reporter) = sink_with(SinkConfig::new().with_file(&base).with_lock_file(&lock));
        let (second, second_reporter) = sink_with(SinkConfig::new().with_file(&base).with_lock_file(&lock));

        assert!(first_reporter.is_empty());
        let reports = second_reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, ErrorKind::Open);

        second.append(b"still works\n");
        drop(second);
        drop(first);
        assert_eq!(fs::read_to_string(&base).unwrap(), "still works\n");
    }

    #[test]
    fn test_huge_reopen_delay_does_not_panic() {
        let temp_dir = tempdir().unwrap();
        let blocker = temp_dir.path().join("logs");
        fs::write(&blocker, "not a directory").unwrap();

        let (sink, reporter) = sink_with(
            SinkConfig::new()
                .with_file(blocker.join("app.log"))
                .with_reopen_delay_secs(9_000_000_000_000_000),
        );

        sink.append(b"first\n");
        sink.append(b"second\n");

        let reports = reporter.take();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.kind == ErrorKind::Open && r.dropped == 1));
        sink.close();
    }

    #[test]
    fn test_compression_failure_keeps_shard_open() {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("app.log");
        let (sink, reporter) = sink_with(SinkConfig::new().with_file(&base));

        sink.append(b"plain\n");
        {
            let mut state = sink.state.lock();
            let handle = state.shards.handle(0).unwrap();
            let mut buffer = LogBuffer::with_compressor(
                512,
                Box::new(crate::compression::testing::RejectingCompressor::default()),
                0,
            );
            buffer.bind(handle);
            buffer.append(b"one\n");
            buffer.append(b"two\n");
            assert!(!sink.flush_buffer(&mut state, &mut buffer, true, true));
        }

        let reports = reporter.take();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, ErrorKind::Compression);
        assert_eq!(reports[0].dropped, 2);
        assert!(sink.shard_info()[0].is_open);

        sink.append(b"after\n");
        sink.close();
        assert_eq!(fs::read_to_string(&base).unwrap(), "plain\nafter\n");
        assert!(reporter.is_empty());
    }

    #[test]
    fn test_failed_backup_rename_keeps_writing() {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("app.log");
        let blocker = temp_dir.path().join("app.log.1");
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("keep"), "x").unwrap();

        let (sink, reporter) = sink_with(
            SinkConfig::new()
                .with_file(&base)
                .with_immediate_flush(true)
                .with_size_rolling(200 * 1024, 1),
        );

        let mut record = vec![b'x'; 1023];
        record.push(b'\n');
        for _ in 0..201 {
            sink.append(&record);
        }
        sink.close();

        let reports = reporter.reports();
        assert!(!reports.is_empty());
        assert!(reports
            .iter()
            .all(|r| r.kind == ErrorKind::Rotation && r.dropped == 0));
        assert_eq!(fs::metadata(&base).unwrap().len(), 201 * 1024);
        assert!(blocker.is_dir());

        let snapshot = sink.metrics().snapshot();
        assert_eq!(snapshot.rotations, 0);
        assert_eq!(snapshot.records_dropped, 0);
    }

    /// Closes the owning sink from inside the unlocked write
    #[derive(Debug, Default)]
    struct ClosingCompressor {
        sink: Arc<Mutex<Option<std::sync::Weak<LogSink>>>>,
        output: Vec<u8>,
    }

    impl crate::compression::StreamCompressor for ClosingCompressor {
        fn compress(&mut self, input: &[u8]) -> Result<()> {
            self.output.extend_from_slice(input);
            Ok(())
        }

        fn finish(&mut self) -> Result<&[u8]> {
            let sink = self.sink.lock().take().and_then(|weak| weak.upgrade());
            if let Some(sink) = sink {
                sink.close();
            }
            Ok(&self.output)
        }

        fn reset(&mut self) {
            self.output.clear();
        }

        fn input_bytes(&self) -> u64 {
            self.output.len() as u64
        }

        fn algorithm(&self) -> CompressionAlgorithm {
            CompressionAlgorithm::Gzip
        }

        fn level(&self) -> u32 {
            0
        }
    }

    #[test]
    fn test_close_during_stale_flush_stops_append() {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("app.log");
        let base_str = path_str(&base);

        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 10, 10, 30, 0).unwrap()));
        let reporter = Arc::new(MemoryReporter::new());
        let sink = Arc::new(
            LogSink::with_runtime(
                SinkConfig::new()
                    .with_file(&base)
                    .with_schedule(Schedule::Hourly)
                    .with_time_basis(TimeBasis::Utc),
                clock.clone(),
                reporter.clone(),
            )
            .unwrap(),
        );

        sink.append(b"plain\n");
        let closer = ClosingCompressor::default();
        *closer.sink.lock() = Some(Arc::downgrade(&sink));
        {
            let mut state = sink.state.lock();
            let handle = state.shards.handle(0).unwrap();
            let mut buffer = LogBuffer::with_compressor(512, Box::new(closer), 1024);
            buffer.bind(handle);
            buffer.append(b"early\n");
            state.pending.clear();
            state.pending.push_back(buffer);
        }

        clock.set(Utc.with_ymd_and_hms(2024, 3, 10, 11, 0, 5).unwrap());
        sink.append(b"late\n");

        assert!(sink.is_closed());
        assert!(sink.shard_info().iter().all(|info| !info.is_open));

        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, ErrorKind::Other);
        assert_eq!(reports[0].dropped, 1);

        assert_eq!(fs::read_to_string(format!("{}.2024-03-10-10", base_str)).unwrap(), "early\n");
        let next = fs::read_to_string(format!("{}.2024-03-10-11", base_str)).unwrap();
        assert!(next.is_empty());
    }

    #[test]
    fn test_invalid_config() {
        assert!(LogSink::new(SinkConfig::new()).is_err());
    }
}
