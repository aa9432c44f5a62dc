//! Record accumulation and flushing
//!
//! A [`LogBuffer`] collects formatted records for exactly one shard and writes
//! them out either verbatim or through a persistent gzip stream.

use std::sync::Arc;

use crate::compression::StreamCompressor;
use crate::error::Error;
use crate::shard::ShardHandle;

/// What a successful flush did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Bytes were written to the shard with one write call
    Written(usize),
    /// Input went into the compressor; nothing reached the file yet
    Deferred,
    /// There was nothing to write
    Empty,
}

/// A failed flush. The buffer has already dropped its records.
#[derive(Debug)]
pub struct FlushError {
    /// Records lost with this flush
    pub dropped: usize,
    /// Shard the buffer was bound to
    pub shard_index: usize,
    /// Handle the failed write went to, if any
    pub handle_id: Option<u64>,
    /// Underlying error
    pub error: Error,
}

/// Accumulated records bound to one shard
#[derive(Debug)]
pub struct LogBuffer {
    pending: Vec<u8>,
    threshold: usize,
    record_count: usize,
    shard_index: usize,
    handle: Option<Arc<ShardHandle>>,
    compressor: Option<Box<dyn StreamCompressor>>,
    compress_flush_threshold: u64,
}

impl LogBuffer {
    /// Create a plain buffer that asks to be flushed at `threshold` bytes
    pub fn new(threshold: usize) -> Self {
        Self {
            pending: Vec::with_capacity(threshold),
            threshold,
            record_count: 0,
            shard_index: 0,
            handle: None,
            compressor: None,
            compress_flush_threshold: 0,
        }
    }

    /// Create a compressing buffer.
    ///
    /// Flushes feed the compressor; the file is only written once
    /// `flush_threshold` input bytes have accumulated or a flush is forced.
    pub fn with_compressor(
        threshold: usize,
        compressor: Box<dyn StreamCompressor>,
        flush_threshold: u64,
    ) -> Self {
        Self {
            compressor: Some(compressor),
            compress_flush_threshold: flush_threshold,
            ..Self::new(threshold)
        }
    }

    /// Add one formatted record
    pub fn append(&mut self, record: &[u8]) {
        self.pending.extend_from_slice(record);
        self.record_count += 1;
    }

    /// Check whether the uncompressed payload reached the threshold
    pub fn should_flush(&self) -> bool {
        self.pending.len() >= self.threshold
    }

    /// Records held since the last completed write
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// Uncompressed bytes not yet fed anywhere
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    /// Check if the buffer holds no records
    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    /// Check if the buffer compresses
    pub fn is_compressed(&self) -> bool {
        self.compressor.is_some()
    }

    /// Index of the shard the buffer is, or last was, bound to
    pub fn shard_index(&self) -> usize {
        self.shard_index
    }

    /// Identity of the bound handle
    pub fn handle_id(&self) -> Option<u64> {
        self.handle.as_ref().map(|h| h.id())
    }

    /// Check if the buffer is bound to a handle
    pub fn is_bound(&self) -> bool {
        self.handle.is_some()
    }

    /// Bind the buffer to a shard handle
    pub fn bind(&mut self, handle: Arc<ShardHandle>) {
        self.shard_index = handle.index();
        self.handle = Some(handle);
    }

    /// Check whether the buffer is bound to a handle other than `current`
    pub fn is_stale(&self, current: Option<&Arc<ShardHandle>>) -> bool {
        match (&self.handle, current) {
            (Some(bound), Some(current)) => bound.id() != current.id(),
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Write out the accumulated records.
    ///
    /// Plain buffers always write. Compressing buffers write one complete gzip
    /// member when `force` is set or enough input has accumulated, and
    /// otherwise only feed the compressor. After every completed write, and
    /// after every failure, the buffer is empty and unbound.
    pub fn flush(&mut self, force: bool) -> std::result::Result<FlushOutcome, FlushError> {
        let handle = match &self.handle {
            Some(handle) => Arc::clone(handle),
            None => {
                return Err(FlushError {
                    dropped: self.record_count,
                    shard_index: self.shard_index,
                    handle_id: None,
                    error: Error::NoOpenHandle(self.shard_index),
                })
            }
        };

        let result = match self.compressor.as_mut() {
            None => Self::write_plain(&self.pending, &handle),
            Some(compressor) => Self::write_compressed(
                compressor.as_mut(),
                &mut self.pending,
                &handle,
                force,
                self.compress_flush_threshold,
            ),
        };

        match result {
            Ok(FlushOutcome::Deferred) => Ok(FlushOutcome::Deferred),
            Ok(outcome) => {
                self.clear();
                Ok(outcome)
            }
            Err(error) => {
                let failure = FlushError {
                    dropped: self.record_count,
                    shard_index: self.shard_index,
                    handle_id: Some(handle.id()),
                    error,
                };
                if let Some(compressor) = self.compressor.as_mut() {
                    compressor.reset();
                }
                self.clear();
                Err(failure)
            }
        }
    }

    fn write_plain(pending: &[u8], handle: &ShardHandle) -> crate::Result<FlushOutcome> {
        if pending.is_empty() {
            return Ok(FlushOutcome::Empty);
        }
        handle
            .write_all(pending)
            .map_err(|e| Error::write(handle.path(), e))?;
        Ok(FlushOutcome::Written(pending.len()))
    }

    fn write_compressed(
        compressor: &mut dyn StreamCompressor,
        pending: &mut Vec<u8>,
        handle: &ShardHandle,
        force: bool,
        flush_threshold: u64,
    ) -> crate::Result<FlushOutcome> {
        if !pending.is_empty() {
            compressor.compress(pending)?;
            pending.clear();
        }

        if !force && compressor.input_bytes() < flush_threshold {
            return Ok(FlushOutcome::Deferred);
        }
        if compressor.input_bytes() == 0 {
            return Ok(FlushOutcome::Empty);
        }

        let member = compressor.finish()?;
        handle
            .write_all(member)
            .map_err(|e| Error::write(handle.path(), e))?;
        let written = member.len();

        compressor.reset();
        Ok(FlushOutcome::Written(written))
    }

    /// Drop every held record and any compressor state.
    ///
    /// Returns the number of records dropped.
    pub fn discard(&mut self) -> usize {
        let dropped = self.record_count;
        if let Some(compressor) = self.compressor.as_mut() {
            compressor.reset();
        }
        self.clear();
        dropped
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.record_count = 0;
        self.handle = None;
    }
}
