//! Streaming compression for log buffers
//!
//! This module keeps a deflate stream alive across many small flushes and
//! frames everything fed between two hard flushes as one complete gzip member.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use flate2::{Compress, Compression, FlushCompress, Status};

use crate::buffer::DynamicBuffer;
use crate::config::CompressionAlgorithm;
use crate::error::{Error, Result};

/// Free space kept in the output buffer before every deflate call
pub const OUTPUT_MARGIN: usize = 128;

/// Fixed gzip member header: deflate, no flags, no mtime, unknown OS
const GZIP_HEADER: [u8; 10] = [0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff];

/// Trailer size: CRC32 followed by the input size modulo 2^32
const GZIP_TRAILER_LEN: usize = 8;

/// Compression interface for streaming log data
pub trait StreamCompressor: Send + fmt::Debug {
    /// Feed input without forcing output to be produced
    fn compress(&mut self, input: &[u8]) -> Result<()>;

    /// End the stream and return the complete compressed region
    fn finish(&mut self) -> Result<&[u8]>;

    /// Drop all state and start a new stream
    fn reset(&mut self);

    /// Input bytes fed since the last reset
    fn input_bytes(&self) -> u64;

    /// Get compression algorithm
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Get compression level
    fn level(&self) -> u32;
}

/// Factory for creating stream compressors
pub struct CompressionFactory;

impl CompressionFactory {
    /// Create a compressor for `algorithm`, or `None` for uncompressed sinks
    pub fn create_compressor(
        algorithm: CompressionAlgorithm,
        level: u32,
        initial_capacity: usize,
        growth_factor: f64,
    ) -> Option<Box<dyn StreamCompressor>> {
        match algorithm {
            CompressionAlgorithm::None => None,
            CompressionAlgorithm::Gzip => Some(Box::new(GzipStream::new(
                level,
                initial_capacity,
                growth_factor,
            ))),
        }
    }
}

/// A persistent deflate stream producing gzip members
pub struct GzipStream {
    stream: Compress,
    output: DynamicBuffer,
    offset: usize,
    input_bytes: u64,
    crc: crc32fast::Hasher,
    level: u32,
}

impl fmt::Debug for GzipStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GzipStream")
            .field("level", &self.level)
            .field("offset", &self.offset)
            .field("input_bytes", &self.input_bytes)
            .field("capacity", &self.output.capacity())
            .finish()
    }
}

impl GzipStream {
    /// Create a new gzip stream with the given level (clamped to 0..=9)
    pub fn new(level: u32, initial_capacity: usize, growth_factor: f64) -> Self {
        let level = level.min(9);
        let mut gzip = Self {
            stream: Compress::new(Compression::new(level), false),
            output: DynamicBuffer::new(initial_capacity.max(GZIP_HEADER.len() + OUTPUT_MARGIN), growth_factor),
            offset: 0,
            input_bytes: 0,
            crc: crc32fast::Hasher::new(),
            level,
        };
        gzip.write_header();
        gzip
    }

    /// Compressed bytes produced so far, header included
    pub fn pending_output(&self) -> usize {
        self.offset
    }

    fn write_header(&mut self) {
        self.output.as_mut_slice()[..GZIP_HEADER.len()].copy_from_slice(&GZIP_HEADER);
        self.offset = GZIP_HEADER.len();
    }

    /// Run deflate once, returning consumed input and the stream status
    fn step(&mut self, input: &[u8], flush: FlushCompress) -> Result<(usize, Status)> {
        self.output.reserve_after(self.offset, OUTPUT_MARGIN);

        let before_in = self.stream.total_in();
        let before_out = self.stream.total_out();
        let status = self
            .stream
            .compress(input, &mut self.output.as_mut_slice()[self.offset..], flush)
            .map_err(|e| Error::compression(e.to_string()))?;

        let consumed = (self.stream.total_in() - before_in) as usize;
        let produced = (self.stream.total_out() - before_out) as usize;
        self.offset += produced;

        // No progress means the output region is full
        if consumed == 0 && produced == 0 && status != Status::StreamEnd {
            self.output.extend();
        }

        Ok((consumed, status))
    }
}

impl StreamCompressor for GzipStream {
    fn compress(&mut self, input: &[u8]) -> Result<()> {
        self.crc.update(input);
        self.input_bytes += input.len() as u64;

        let mut remaining = input;
        while !remaining.is_empty() {
            let (consumed, status) = self.step(remaining, FlushCompress::None)?;
            remaining = &remaining[consumed..];
            if status == Status::StreamEnd {
                return Err(Error::compression("deflate stream ended while input remained"));
            }
        }

        Ok(())
    }

    fn finish(&mut self) -> Result<&[u8]> {
        loop {
            let (_, status) = self.step(&[], FlushCompress::Finish)?;
            if status == Status::StreamEnd {
                break;
            }
        }

        self.output.reserve_after(self.offset, GZIP_TRAILER_LEN);
        let trailer = &mut self.output.as_mut_slice()[self.offset..self.offset + GZIP_TRAILER_LEN];
        LittleEndian::write_u32(&mut trailer[..4], self.crc.clone().finalize());
        LittleEndian::write_u32(&mut trailer[4..], self.input_bytes as u32);
        self.offset += GZIP_TRAILER_LEN;

        Ok(&self.output.as_slice()[..self.offset])
    }

    fn reset(&mut self) {
        self.stream.reset();
        self.crc = crc32fast::Hasher::new();
        self.input_bytes = 0;
        self.write_header();
    }

    fn input_bytes(&self) -> u64 {
        self.input_bytes
    }

    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Gzip
    }

    fn level(&self) -> u32 {
        self.level
    }
}
