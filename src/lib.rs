//! Rotating, buffering multi-file log sink
//!
//! A [`LogSink`] takes already formatted records, batches them in memory and
//! writes them round-robin across one or more files. Files can be rotated by
//! size, with a numbered backup chain, or on calendar boundaries, and each
//! write can be a gzip member so the files stay readable with `zcat`.
//!
//! Failures never reach the caller of [`LogSink::append`]. They are handed to
//! an [`ErrorReporter`] along with the number of records they cost.
//!
//! ```no_run
//! use cocoon_sink::{CompressionAlgorithm, LogSink, SinkConfig};
//!
//! let sink = LogSink::new(
//!     SinkConfig::new()
//!         .with_file("/var/log/app.log")
//!         .with_compression_algorithm(CompressionAlgorithm::Gzip)
//!         .with_size_rolling(64 * 1024 * 1024, 5),
//! )?;
//! sink.append(b"service started\n");
//! sink.close();
//! # Ok::<(), cocoon_sink::Error>(())
//! ```

pub mod buffer;
pub mod clock;
pub mod compression;
pub mod config;
pub mod error;
pub mod log_buffer;
pub mod metrics;
pub mod registry;
pub mod report;
pub mod shard;
pub mod sink;

pub use buffer::DynamicBuffer;
pub use clock::{Clock, ManualClock, SystemClock};
pub use compression::{CompressionFactory, GzipStream, StreamCompressor};
pub use config::{AppenderKind, CompressionAlgorithm, RollingMode, SinkConfig};
pub use error::{Error, ErrorKind, Result};
pub use log_buffer::{FlushError, FlushOutcome, LogBuffer};
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use registry::SinkRegistry;
pub use report::{ErrorReporter, MemoryReporter, Report, TracingReporter};
pub use shard::{
    CalendarRotation, RotationPolicy, Schedule, ShardError, ShardInfo, ShardSet, ShardStats, TimeBasis,
};
pub use sink::LogSink;
