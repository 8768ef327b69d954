// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adaptive DEFLATE for output payloads.
//!
//! Compression level follows the measured link: a rolling throughput
//! estimate classifies the connection as fast, medium, or slow, and slower
//! links get heavier compression. Payloads that don't shrink enough are
//! sent uncompressed.

use std::io::{Read, Write};
use std::time::Duration;

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use tracing::warn;

/// Wire codes for the `compression` byte in output payloads. ZSTD and LZ4
/// are reserved, not implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionType {
    None = 0,
    Deflate = 1,
    Zstd = 2,
    Lz4 = 3,
}

impl CompressionType {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Deflate),
            2 => Some(Self::Zstd),
            3 => Some(Self::Lz4),
            _ => None,
        }
    }
}

/// Tunables for when and how hard to compress.
#[derive(Debug, Clone)]
pub struct CompressionPolicy {
    pub enabled: bool,
    /// Level used before any throughput sample exists.
    pub default_level: u32,
    pub fast_level: u32,
    pub medium_level: u32,
    pub slow_level: u32,
    /// Payloads below this size are never compressed.
    pub min_size: usize,
    /// Keep the compressed form only when compressed/original is below this.
    pub min_ratio: f64,
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            default_level: 6,
            fast_level: 1,
            medium_level: 5,
            slow_level: 9,
            min_size: 256,
            min_ratio: 0.9,
        }
    }
}

/// Link classification from the throughput estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSpeed {
    /// > 1 MiB/s
    Fast,
    /// 100 KiB/s ..= 1 MiB/s
    Medium,
    /// < 100 KiB/s
    Slow,
}

const FAST_THRESHOLD: f64 = 1024.0 * 1024.0;
const SLOW_THRESHOLD: f64 = 100.0 * 1024.0;

/// Smoothing factor for the throughput moving average.
const EMA_ALPHA: f64 = 0.3;

/// Outcome of a compression attempt. `data` is the bytes to put on the
/// wire; `ratio` is compressed/original (1.0 when not compressed).
#[derive(Debug, Clone)]
pub struct CompressionResult {
    pub data: Vec<u8>,
    pub compressed: bool,
    pub compression_type: CompressionType,
    pub ratio: f64,
}

impl CompressionResult {
    fn passthrough(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            compressed: false,
            compression_type: CompressionType::None,
            ratio: 1.0,
        }
    }
}

/// Per-connection compressor holding the throughput estimate.
#[derive(Debug)]
pub struct AdaptiveCompressor {
    policy: CompressionPolicy,
    ema_bytes_per_sec: Option<f64>,
}

impl AdaptiveCompressor {
    pub fn new(policy: CompressionPolicy) -> Self {
        Self { policy, ema_bytes_per_sec: None }
    }

    /// Feed a send measurement into the moving average.
    pub fn record_throughput(&mut self, bytes: usize, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 || bytes == 0 {
            return;
        }
        let sample = bytes as f64 / secs;
        self.ema_bytes_per_sec = Some(match self.ema_bytes_per_sec {
            Some(ema) => EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * ema,
            None => sample,
        });
    }

    /// Current link classification, or `None` before the first sample.
    pub fn link_speed(&self) -> Option<LinkSpeed> {
        self.ema_bytes_per_sec.map(|bps| {
            if bps > FAST_THRESHOLD {
                LinkSpeed::Fast
            } else if bps < SLOW_THRESHOLD {
                LinkSpeed::Slow
            } else {
                LinkSpeed::Medium
            }
        })
    }

    /// DEFLATE level for the current link classification.
    pub fn current_level(&self) -> u32 {
        match self.link_speed() {
            Some(LinkSpeed::Fast) => self.policy.fast_level,
            Some(LinkSpeed::Medium) => self.policy.medium_level,
            Some(LinkSpeed::Slow) => self.policy.slow_level,
            None => self.policy.default_level,
        }
    }

    /// Compress `data` per policy. Never fails: an encoder error falls back
    /// to the uncompressed passthrough.
    pub fn compress(&self, data: &[u8]) -> CompressionResult {
        if !self.policy.enabled || data.len() < self.policy.min_size {
            return CompressionResult::passthrough(data);
        }

        let compressed = match deflate(data, self.current_level()) {
            Ok(out) => out,
            Err(e) => {
                warn!("deflate failed, sending uncompressed: {e}");
                return CompressionResult::passthrough(data);
            }
        };

        let ratio = compressed.len() as f64 / data.len() as f64;
        if ratio >= self.policy.min_ratio {
            return CompressionResult::passthrough(data);
        }

        CompressionResult {
            data: compressed,
            compressed: true,
            compression_type: CompressionType::Deflate,
            ratio,
        }
    }

    pub fn policy(&self) -> &CompressionPolicy {
        &self.policy
    }
}

fn deflate(data: &[u8], level: u32) -> std::io::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompress per the wire `compression` code.
///
/// `None` and unknown/reserved codes return the input unchanged (unknown
/// with a warning); a corrupt DEFLATE stream is an error.
pub fn decompress(data: &[u8], type_code: u8) -> anyhow::Result<Vec<u8>> {
    match CompressionType::from_code(type_code) {
        Some(CompressionType::None) => Ok(data.to_vec()),
        Some(CompressionType::Deflate) => {
            let mut decoder = DeflateDecoder::new(data);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(out)
        }
        Some(CompressionType::Zstd) | Some(CompressionType::Lz4) => {
            warn!("reserved compression type {type_code}, passing payload through");
            Ok(data.to_vec())
        }
        None => {
            warn!("unknown compression type {type_code}, passing payload through");
            Ok(data.to_vec())
        }
    }
}

#[cfg(test)]
#[path = "compress_tests.rs"]
mod tests;
