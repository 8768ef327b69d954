// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session output retention for reconnect replay.
//!
//! A bounded FIFO of sequence-numbered chunks. Consumers ask for "everything
//! from sequence N"; when N has already been evicted the read is clamped to
//! the oldest retained chunk and the caller is told a prefix was lost.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

/// One buffered slice of PTY output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// Monotonic per-session sequence number, starting at 1.
    pub sequence: u64,
    pub data: Vec<u8>,
    pub compressed: bool,
    pub timestamp_ms: u64,
}

/// Result of a replay read: the retained chunks at or after the requested
/// sequence, plus whether an evicted prefix was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayRead {
    pub chunks: Vec<OutputChunk>,
    /// True when the requested sequence predates `oldest_sequence`.
    pub data_lost: bool,
}

/// Bounded chunk FIFO with monotonic sequence numbers.
#[derive(Debug)]
pub struct OutputRing {
    chunks: VecDeque<OutputChunk>,
    max_size_bytes: usize,
    max_chunks: usize,
    total_bytes: usize,
    /// Bytes ever written, including evicted chunks.
    cumulative_bytes: u64,
    /// Sequence assigned to the next write (last assigned + 1).
    next_sequence: u64,
    /// Sequence of the oldest retained chunk; advances on eviction.
    oldest_sequence: u64,
}

/// Default retention: 1 MiB of output or 10 000 chunks, whichever trips
/// first.
pub const DEFAULT_MAX_SIZE_BYTES: usize = 1024 * 1024;
pub const DEFAULT_MAX_CHUNKS: usize = 10_000;

impl Default for OutputRing {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE_BYTES, DEFAULT_MAX_CHUNKS)
    }
}

impl OutputRing {
    pub fn new(max_size_bytes: usize, max_chunks: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            max_size_bytes,
            max_chunks,
            total_bytes: 0,
            cumulative_bytes: 0,
            next_sequence: 1,
            oldest_sequence: 1,
        }
    }

    /// Append a chunk, returning its assigned sequence number.
    ///
    /// The input is defensively copied; evicts oldest chunks until the byte
    /// and chunk caps hold again.
    pub fn write(&mut self, data: &[u8], compressed: bool) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        self.total_bytes += data.len();
        self.cumulative_bytes += data.len() as u64;
        self.chunks.push_back(OutputChunk {
            sequence,
            data: data.to_vec(),
            compressed,
            timestamp_ms: now_ms(),
        });

        while self.total_bytes > self.max_size_bytes || self.chunks.len() > self.max_chunks {
            match self.chunks.pop_front() {
                Some(evicted) => {
                    self.total_bytes -= evicted.data.len();
                    self.oldest_sequence = evicted.sequence + 1;
                }
                None => break,
            }
        }

        sequence
    }

    /// All chunks with sequence >= `seq`, in order.
    ///
    /// A request below `oldest_sequence` is clamped and flagged via
    /// `data_lost`.
    pub fn read_from(&self, seq: u64) -> ReplayRead {
        let data_lost = seq < self.oldest_sequence;
        let chunks = self
            .chunks
            .iter()
            .filter(|c| c.sequence >= seq)
            .cloned()
            .collect();
        ReplayRead { chunks, data_lost }
    }

    /// Chunks with sequence in `[from, to]` inclusive.
    pub fn read_range(&self, from: u64, to: u64) -> Vec<OutputChunk> {
        self.chunks
            .iter()
            .filter(|c| c.sequence >= from && c.sequence <= to)
            .cloned()
            .collect()
    }

    /// The trailing `max_bytes` bytes across chunks, oldest to newest.
    /// A partially-included chunk is trimmed from the front.
    pub fn latest_bytes(&self, max_bytes: usize) -> Vec<u8> {
        if max_bytes == 0 {
            return Vec::new();
        }

        let mut take = Vec::new();
        let mut budget = max_bytes;
        for chunk in self.chunks.iter().rev() {
            if chunk.data.len() >= budget {
                take.push(&chunk.data[chunk.data.len() - budget..]);
                budget = 0;
                break;
            }
            take.push(&chunk.data[..]);
            budget -= chunk.data.len();
        }

        let mut out = Vec::with_capacity(max_bytes.min(self.total_bytes));
        for slice in take.iter().rev() {
            out.extend_from_slice(slice);
        }
        out
    }

    /// Whether `seq` is still retrievable.
    pub fn is_sequence_available(&self, seq: u64) -> bool {
        seq >= self.oldest_sequence && seq < self.next_sequence
    }

    /// Sequence of the oldest retained chunk. Monotonically non-decreasing.
    pub fn oldest_sequence(&self) -> u64 {
        self.oldest_sequence
    }

    /// Last assigned sequence number, or 0 before the first write.
    pub fn current_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Bytes ever written through this ring, evicted chunks included.
    pub fn cumulative_bytes(&self) -> u64 {
        self.cumulative_bytes
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "ring_tests.rs"]
mod tests;
