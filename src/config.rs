//! Configuration for log sinks
//!
//! This module provides the configuration of one sink, its normalization
//! rules and parsers for JSON documents and appender property maps.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer::DEFAULT_GROWTH_FACTOR;
use crate::error::{Error, Result};
use crate::shard::{Schedule, TimeBasis, GZIP_POSTFIX};

/// Smallest accepted buffer threshold in bytes
pub const MIN_BUFFER_SIZE: usize = 512;
/// Default buffer threshold in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024;
/// Upper bound of the minimum compressed flush threshold
pub const MIN_COMPRESS_FLUSH_SIZE: usize = 4 * 1024;
/// Default compressed flush threshold in bytes
pub const DEFAULT_COMPRESS_FLUSH_SIZE: usize = 512 * 1024;
/// Smallest accepted size limit for size-based rotation
pub const MIN_ROLLING_FILE_SIZE: u64 = 200 * 1024;
/// Default size limit for size-based rotation
pub const DEFAULT_ROLLING_FILE_SIZE: u64 = 10 * 1024 * 1024;
/// Default gzip compression level
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Compression algorithms supported by sinks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum CompressionAlgorithm {
    /// Records are written verbatim
    None,
    /// Records are written as gzip members
    Gzip,
}

impl Default for CompressionAlgorithm {
    fn default() -> Self {
        Self::None
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "gz" | "gzip" => Ok(Self::Gzip),
            _ => Err(Error::config(format!("Unknown compression algorithm: {}", s))),
        }
    }
}

impl CompressionAlgorithm {
    /// Get the name of the compression algorithm
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gz",
        }
    }

    /// Check if compression is enabled
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// File name postfix of compressed files
    pub fn postfix(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Gzip => GZIP_POSTFIX,
        }
    }
}

/// How a sink retires its active files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RollingMode {
    /// Files grow without bound
    Never,
    /// Numbered backups once the active file reaches `max_file_size`
    Size {
        max_file_size: u64,
        max_backup_index: u32,
    },
    /// Timestamped files on a calendar schedule
    Calendar { schedule: Schedule },
}

impl Default for RollingMode {
    fn default() -> Self {
        Self::Never
    }
}

/// The appender flavor a property map describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppenderKind {
    /// Plain file appender without rotation
    File,
    /// Size-based rotation
    Rolling,
    /// Calendar-based rotation
    DailyRolling,
}

impl AppenderKind {
    /// Parse an appender class name such as `RollingFileAppender`
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        let name = name.rsplit("::").next().unwrap_or(name);
        match name {
            "FileAppender" => Some(Self::File),
            "RollingFileAppender" => Some(Self::Rolling),
            "DailyRollingFileAppender" => Some(Self::DailyRolling),
            _ => None,
        }
    }
}

/// Configuration options for a sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Base filenames, one shard each
    pub files: Vec<String>,
    /// Append to existing files on first open instead of truncating
    pub append: bool,
    /// Flush after every record
    pub immediate_flush: bool,
    /// Buffered bytes that trigger a flush
    pub buffer_size: usize,

    /// Compression algorithm to use
    pub compression_algorithm: CompressionAlgorithm,
    /// Compression level (0-9)
    pub compression_level: u32,
    /// Compressor input that triggers writing a gzip member
    pub compress_flush_size: usize,
    /// Growth factor of the compressed output buffer
    pub buffer_growth_factor: f64,

    /// Rotation mode
    pub rolling: RollingMode,
    /// Clock calendar schedules are evaluated in
    pub time_basis: TimeBasis,

    /// Seconds to wait before retrying a failed open
    pub reopen_delay_secs: u64,
    /// Close shard descriptors on `exec`
    pub close_on_exec: bool,
    /// Advisory lock file taken at construction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_file: Option<PathBuf>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            append: true,
            immediate_flush: false,
            buffer_size: DEFAULT_BUFFER_SIZE,

            compression_algorithm: CompressionAlgorithm::None,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            compress_flush_size: DEFAULT_COMPRESS_FLUSH_SIZE,
            buffer_growth_factor: DEFAULT_GROWTH_FACTOR,

            rolling: RollingMode::Never,
            time_basis: TimeBasis::Local,

            reopen_delay_secs: 1,
            close_on_exec: false,
            lock_file: None,
        }
    }
}

impl SinkConfig {
    /// Create a new sink configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target file
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.files.push(path.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Replace the target files
    pub fn with_files<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.files = paths
            .into_iter()
            .map(|p| p.as_ref().to_string_lossy().into_owned())
            .collect();
        self
    }

    /// Set append vs truncate on first open
    pub fn with_append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// Set whether to flush after every record
    pub fn with_immediate_flush(mut self, immediate: bool) -> Self {
        self.immediate_flush = immediate;
        self
    }

    /// Set the buffer threshold
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the compression algorithm
    pub fn with_compression_algorithm(mut self, algorithm: CompressionAlgorithm) -> Self {
        self.compression_algorithm = algorithm;
        self
    }

    /// Set the compression level
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    /// Set the compressed flush threshold
    pub fn with_compress_flush_size(mut self, size: usize) -> Self {
        self.compress_flush_size = size;
        self
    }

    /// Set the growth factor of the compressed output buffer
    pub fn with_buffer_growth_factor(mut self, factor: f64) -> Self {
        self.buffer_growth_factor = factor;
        self
    }

    /// Rotate by size
    pub fn with_size_rolling(mut self, max_file_size: u64, max_backup_index: u32) -> Self {
        self.rolling = RollingMode::Size {
            max_file_size,
            max_backup_index,
        };
        self
    }

    /// Rotate on a calendar schedule
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.rolling = RollingMode::Calendar { schedule };
        self
    }

    /// Set the time basis of calendar schedules
    pub fn with_time_basis(mut self, basis: TimeBasis) -> Self {
        self.time_basis = basis;
        self
    }

    /// Set the reopen delay in seconds
    pub fn with_reopen_delay_secs(mut self, secs: u64) -> Self {
        self.reopen_delay_secs = secs;
        self
    }

    /// Set whether descriptors close on `exec`
    pub fn with_close_on_exec(mut self, close: bool) -> Self {
        self.close_on_exec = close;
        self
    }

    /// Set the advisory lock file
    pub fn with_lock_file(mut self, path: impl AsRef<Path>) -> Self {
        self.lock_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Validate the configuration.
    ///
    /// Only settings that normalization cannot repair are rejected.
    pub fn validate(&self) -> Result<()> {
        if self.files.iter().all(|f| f.trim().is_empty()) {
            return Err(Error::config("At least one file name is required"));
        }

        if self.compression_level > 9 {
            return Err(Error::config("Compression level must be between 0 and 9"));
        }

        Ok(())
    }

    /// Apply the minimum values and cross-field rules
    pub fn normalized(mut self) -> Self {
        self.files = self
            .files
            .iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();

        if self.buffer_size < MIN_BUFFER_SIZE {
            tracing::warn!(
                "BufferSize {} is too small. Resetting to {}",
                self.buffer_size,
                MIN_BUFFER_SIZE
            );
            self.buffer_size = MIN_BUFFER_SIZE;
        }

        if self.compression_algorithm.is_enabled() {
            let minimum = self.buffer_size.min(MIN_COMPRESS_FLUSH_SIZE);
            if self.compress_flush_size < minimum {
                tracing::warn!(
                    "CompressFlushSize {} is too small. Resetting to {}",
                    self.compress_flush_size,
                    minimum
                );
                self.compress_flush_size = minimum;
            }
            if self.immediate_flush {
                tracing::warn!("ImmediateFlush is ignored for compressed files");
                self.immediate_flush = false;
            }
        }

        if !(self.buffer_growth_factor > 1.0 && self.buffer_growth_factor.is_finite()) {
            self.buffer_growth_factor = DEFAULT_GROWTH_FACTOR;
        }

        self.rolling = match self.rolling {
            RollingMode::Size {
                max_file_size,
                max_backup_index,
            } => {
                if max_file_size < MIN_ROLLING_FILE_SIZE {
                    tracing::warn!(
                        "MaxFileSize {} is too small. Resetting to {}",
                        max_file_size,
                        MIN_ROLLING_FILE_SIZE
                    );
                }
                RollingMode::Size {
                    max_file_size: max_file_size.max(MIN_ROLLING_FILE_SIZE),
                    max_backup_index: max_backup_index.max(1),
                }
            }
            RollingMode::Calendar { schedule } => RollingMode::Calendar {
                schedule: schedule.normalized(),
            },
            RollingMode::Never => RollingMode::Never,
        };

        self
    }

    /// Get the reopen delay as a Duration
    pub fn reopen_delay(&self) -> Duration {
        Duration::from_secs(self.reopen_delay_secs)
    }

    /// File name postfix of every shard
    pub fn postfix(&self) -> &'static str {
        self.compression_algorithm.postfix()
    }

    /// Parse a configuration from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the configuration to JSON
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Build a configuration from appender properties.
    ///
    /// `File` is a comma separated list of base filenames and is required.
    /// Values that fail to parse keep their defaults.
    pub fn from_properties(kind: AppenderKind, props: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();

        let files = props.get("File").map(String::as_str).unwrap_or("");
        config.files = files
            .split(',')
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        if config.files.is_empty() {
            return Err(Error::config("Invalid filename"));
        }

        read_bool(props, "CloseOnExec", &mut config.close_on_exec);
        read_bool(props, "ImmediateFlush", &mut config.immediate_flush);
        read_bool(props, "Append", &mut config.append);
        read_number(props, "ReopenDelay", &mut config.reopen_delay_secs);
        read_number(props, "BufferSize", &mut config.buffer_size);

        if let Some(path) = props.get("LockFile").filter(|p| !p.trim().is_empty()) {
            config.lock_file = Some(PathBuf::from(path.trim()));
        } else {
            let mut use_lock_file = false;
            read_bool(props, "UseLockFile", &mut use_lock_file);
            if use_lock_file {
                config.lock_file = Some(PathBuf::from(format!("{}.lock", config.files[0])));
            }
        }

        if let Some(compress) = props.get("Compress") {
            config.compression_algorithm = compress.parse().unwrap_or_else(|_| {
                tracing::warn!("Compress value not valid: {}", compress);
                CompressionAlgorithm::None
            });
        }
        if config.compression_algorithm.is_enabled() {
            read_number(props, "CompressFlushSize", &mut config.compress_flush_size);
        }

        let mut use_gmt = false;
        read_bool(props, "UseGmt", &mut use_gmt);
        if use_gmt {
            config.time_basis = TimeBasis::Utc;
        }

        config.rolling = match kind {
            AppenderKind::File => RollingMode::Never,
            AppenderKind::Rolling => {
                let max_file_size = props
                    .get("MaxFileSize")
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| parse_file_size(v))
                    .unwrap_or(DEFAULT_ROLLING_FILE_SIZE);
                let mut max_backup_index = 1u32;
                read_number(props, "MaxBackupIndex", &mut max_backup_index);
                RollingMode::Size {
                    max_file_size,
                    max_backup_index,
                }
            }
            AppenderKind::DailyRolling => {
                let name = props.get("Schedule").map(String::as_str).unwrap_or("");
                let multiple = props
                    .get("Multiple")
                    .map(|m| leading_number(m).unwrap_or(0));
                let schedule = if name.trim().is_empty() {
                    Schedule::Daily
                } else {
                    Schedule::from_name(name, multiple).unwrap_or_else(|| {
                        tracing::warn!("Schedule not valid: {}", name);
                        Schedule::Daily
                    })
                };
                RollingMode::Calendar { schedule }
            }
        };

        Ok(config)
    }

    /// Create a human-readable string representation of the configuration
    pub fn to_string_pretty(&self) -> String {
        let mut result = String::new();

        result.push_str("=== Sink Configuration ===\n\n");

        result.push_str("Files:\n");
        for file in &self.files {
            result.push_str(&format!("  {}{}\n", file, self.postfix()));
        }

        result.push_str("\nBuffering:\n");
        result.push_str(&format!("  Buffer Size: {} bytes\n", self.buffer_size));
        result.push_str(&format!("  Immediate Flush: {}\n", self.immediate_flush));
        result.push_str(&format!("  Append: {}\n", self.append));

        result.push_str("\nCompression:\n");
        result.push_str(&format!("  Algorithm: {}\n", self.compression_algorithm));
        if self.compression_algorithm.is_enabled() {
            result.push_str(&format!("  Level: {}\n", self.compression_level));
            result.push_str(&format!("  Flush Size: {} bytes\n", self.compress_flush_size));
        }

        result.push_str("\nRotation:\n");
        match self.rolling {
            RollingMode::Never => result.push_str("  Mode: never\n"),
            RollingMode::Size {
                max_file_size,
                max_backup_index,
            } => {
                result.push_str("  Mode: size\n");
                result.push_str(&format!("  Max File Size: {} bytes\n", max_file_size));
                result.push_str(&format!("  Max Backup Index: {}\n", max_backup_index));
            }
            RollingMode::Calendar { schedule } => {
                result.push_str("  Mode: calendar\n");
                result.push_str(&format!("  Schedule: {}\n", schedule));
                result.push_str(&format!("  Time Basis: {:?}\n", self.time_basis));
            }
        }

        result.push_str("\nFiles Handling:\n");
        result.push_str(&format!("  Reopen Delay: {}s\n", self.reopen_delay_secs));
        result.push_str(&format!("  Close On Exec: {}\n", self.close_on_exec));
        if let Some(ref lock) = self.lock_file {
            result.push_str(&format!("  Lock File: {:?}\n", lock));
        }

        result
    }
}

/// Read a `true`/`false` property, ignoring anything else
fn read_bool(props: &HashMap<String, String>, key: &str, target: &mut bool) {
    if let Some(value) = props.get(key) {
        match value.trim().to_lowercase().as_str() {
            "true" => *target = true,
            "false" => *target = false,
            _ => tracing::warn!("{} is not a boolean: {}", key, value),
        }
    }
}

/// Read a numeric property, ignoring unparsable values
fn read_number<T: FromStr>(props: &HashMap<String, String>, key: &str, target: &mut T) {
    if let Some(value) = props.get(key) {
        match value.trim().parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!("{} is not a number: {}", key, value),
        }
    }
}

/// Parse the leading decimal digits of `value`, like `atoi`
fn leading_number(value: &str) -> Option<i64> {
    let value = value.trim();
    let (sign, digits) = match value.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, value.strip_prefix('+').unwrap_or(value)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}

/// Parse a size such as `512KB`, `10MB` or `300000`
fn parse_file_size(value: &str) -> u64 {
    let upper = value.trim().to_uppercase();
    let base = leading_number(&upper).unwrap_or(0).max(0) as u64;
    if base == 0 {
        return 0;
    }

    if upper.len() > 2 && upper.ends_with("MB") {
        base.saturating_mul(1024 * 1024)
    } else if upper.len() > 2 && upper.ends_with("KB") {
        base.saturating_mul(1024)
    } else {
        base
    }
}
