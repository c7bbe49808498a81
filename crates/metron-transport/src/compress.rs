//! Gzip helpers for request and response bodies.

use crate::error::{Result, TransportError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Compression level used when none is configured.
pub const DEFAULT_LEVEL: u32 = 6;

/// Bodies shorter than this are sent uncompressed.
pub const DEFAULT_MIN_SIZE: usize = 32;

/// Gzip-compresses `data`. Empty input yields empty output.
pub fn compress(data: &[u8], level: u32) -> std::io::Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::new(level));
    encoder.write_all(data)?;
    encoder.finish()
}

/// Inverse of [`compress`]. Empty input yields empty output.
pub fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Returns `true` if a `Content-Encoding` header value lists gzip.
pub fn is_gzip_encoding(value: &str) -> bool {
    value
        .split(',')
        .any(|part| part.trim().eq_ignore_ascii_case("gzip"))
}

/// Size-gated gzip for outgoing bodies.
#[derive(Debug, Clone)]
pub struct Compressor {
    level: u32,
    min_size: usize,
}

impl Compressor {
    pub fn new(level: u32, min_size: usize) -> Result<Self> {
        if level > 9 {
            return Err(TransportError::Config(format!(
                "compression level {level} is out of valid range [0, 9]"
            )));
        }
        Ok(Self { level, min_size })
    }

    pub fn should_compress(&self, body: &[u8]) -> bool {
        !body.is_empty() && body.len() >= self.min_size
    }

    /// Compresses `body` if it passes the size gate. Returns the bytes to send
    /// and whether they are gzip-encoded.
    pub fn encode(&self, body: Vec<u8>) -> Result<(Vec<u8>, bool)> {
        if !self.should_compress(&body) {
            return Ok((body, false));
        }
        let compressed = compress(&body, self.level).map_err(TransportError::Compress)?;
        Ok((compressed, true))
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL,
            min_size: DEFAULT_MIN_SIZE,
        }
    }
}
