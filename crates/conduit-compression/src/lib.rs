//! Optional payload compression with magic-byte detection.
//!
//! GZip and Deflate are detected by their byte prefixes. Brotli has no
//! reliable magic prefix, so `is_compressed` never claims to detect it by
//! content alone — callers must consult the envelope's `x-compression`
//! header, which the broker core always sets for compressed payloads.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use conduit_common::{CompressionAlgorithm, ConduitError};
use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
/// zlib header bytes for the common default/best-speed/best-compression levels.
const DEFLATE_MAGIC_PREFIXES: [u8; 3] = [0x78, 0x01, 0x9C];

/// Running statistics for the compressor, mirroring the `SkippedMessages`
/// counter spec §4.A requires when compression gains fall below threshold.
#[derive(Debug, Default)]
pub struct CompressionStats {
    pub skipped_messages: AtomicU64,
    pub compressed_messages: AtomicU64,
}

pub struct Compressor {
    pub algorithm: CompressionAlgorithm,
    pub level: u32,
    pub minimum_size_bytes: usize,
    pub stats: CompressionStats,
}

impl Compressor {
    pub fn new(algorithm: CompressionAlgorithm, level: u32, minimum_size_bytes: usize) -> Self {
        Self {
            algorithm,
            level,
            minimum_size_bytes,
            stats: CompressionStats::default(),
        }
    }

    /// Compresses `bytes`, returning `None` (pass-through) when the input is
    /// below the configured minimum size or the compressed form does not
    /// shrink it. Empty input always returns empty output.
    pub fn compress(&self, bytes: &[u8]) -> Result<Option<Vec<u8>>, ConduitError> {
        if bytes.is_empty() {
            return Ok(Some(Vec::new()));
        }
        if bytes.len() < self.minimum_size_bytes {
            self.stats.skipped_messages.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let compressed = match self.algorithm {
            CompressionAlgorithm::None => {
                self.stats.skipped_messages.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
            CompressionAlgorithm::GZip => compress_gzip(bytes, self.level)?,
            CompressionAlgorithm::Deflate => compress_deflate(bytes, self.level)?,
            CompressionAlgorithm::Brotli => compress_brotli(bytes, self.level),
        };

        if compressed.len() >= bytes.len() {
            self.stats.skipped_messages.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        self.stats.compressed_messages.fetch_add(1, Ordering::Relaxed);
        Ok(Some(compressed))
    }

    /// Decompresses `bytes` using `algorithm` (the source of truth is always
    /// the caller-supplied tag, taken from the envelope's `x-compression`
    /// header — never sniffed).
    pub fn decompress(
        &self,
        bytes: &[u8],
        algorithm: CompressionAlgorithm,
    ) -> Result<Vec<u8>, ConduitError> {
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        match algorithm {
            CompressionAlgorithm::None => Ok(bytes.to_vec()),
            CompressionAlgorithm::GZip => decompress_gzip(bytes),
            CompressionAlgorithm::Deflate => decompress_deflate(bytes),
            CompressionAlgorithm::Brotli => decompress_brotli(bytes),
        }
    }

    /// Content-based detection for algorithms with a reliable magic prefix.
    /// Returns `false` for Brotli and for `None` — callers must not rely on
    /// this for Brotli; use the header tag instead (spec §9 open question).
    pub fn is_compressed(&self, bytes: &[u8]) -> bool {
        if bytes.len() < 2 {
            return false;
        }
        if bytes[0] == GZIP_MAGIC[0] && bytes[1] == GZIP_MAGIC[1] {
            return true;
        }
        DEFLATE_MAGIC_PREFIXES.contains(&bytes[0]) && bytes.len() > 1
    }
}

fn compress_gzip(bytes: &[u8], level: u32) -> Result<Vec<u8>, ConduitError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
    encoder
        .write_all(bytes)
        .map_err(|e| ConduitError::TransportError(format!("gzip compress failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| ConduitError::TransportError(format!("gzip compress failed: {e}")))
}

fn decompress_gzip(bytes: &[u8]) -> Result<Vec<u8>, ConduitError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|_| ConduitError::InvalidCompressedData)?;
    Ok(out)
}

fn compress_deflate(bytes: &[u8], level: u32) -> Result<Vec<u8>, ConduitError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(level));
    encoder
        .write_all(bytes)
        .map_err(|e| ConduitError::TransportError(format!("deflate compress failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| ConduitError::TransportError(format!("deflate compress failed: {e}")))
}

fn decompress_deflate(bytes: &[u8]) -> Result<Vec<u8>, ConduitError> {
    let mut decoder = DeflateDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|_| ConduitError::InvalidCompressedData)?;
    Ok(out)
}

fn compress_brotli(bytes: &[u8], level: u32) -> Vec<u8> {
    let mut out = Vec::new();
    let params = brotli::enc::BrotliEncoderParams {
        quality: level.min(11) as i32,
        ..Default::default()
    };
    brotli::BrotliCompress(&mut std::io::Cursor::new(bytes), &mut out, &params)
        .expect("in-memory brotli compression cannot fail");
    out
}

fn decompress_brotli(bytes: &[u8]) -> Result<Vec<u8>, ConduitError> {
    let mut out = Vec::new();
    brotli::BrotliDecompress(&mut std::io::Cursor::new(bytes), &mut out)
        .map_err(|_| ConduitError::InvalidCompressedData)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_every_algorithm() {
        let payload = vec![b'a'; 4096];
        for algo in [
            CompressionAlgorithm::GZip,
            CompressionAlgorithm::Deflate,
            CompressionAlgorithm::Brotli,
        ] {
            let compressor = Compressor::new(algo, 6, 16);
            let compressed = compressor.compress(&payload).unwrap().expect("should compress");
            let decompressed = compressor.decompress(&compressed, algo).unwrap();
            assert_eq!(decompressed, payload, "roundtrip failed for {algo:?}");
        }
    }

    #[test]
    fn empty_input_roundtrips_to_empty() {
        let compressor = Compressor::new(CompressionAlgorithm::GZip, 6, 16);
        let compressed = compressor.compress(&[]).unwrap().unwrap();
        assert!(compressed.is_empty());
        let decompressed = compressor.decompress(&compressed, CompressionAlgorithm::GZip).unwrap();
        assert!(decompressed.is_empty());
    }

    #[test]
    fn below_minimum_size_skips_compression() {
        let compressor = Compressor::new(CompressionAlgorithm::GZip, 6, 1024);
        let payload = vec![1u8; 100];
        let result = compressor.compress(&payload).unwrap();
        assert!(result.is_none());
        assert_eq!(compressor.stats.skipped_messages.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn detection_true_for_gzip_and_deflate_not_brotli() {
        let gzip = Compressor::new(CompressionAlgorithm::GZip, 6, 1);
        let compressed = gzip.compress(&vec![b'x'; 200]).unwrap().unwrap();
        assert!(gzip.is_compressed(&compressed));

        let brotli_c = Compressor::new(CompressionAlgorithm::Brotli, 6, 1);
        let compressed = brotli_c.compress(&vec![b'x'; 200]).unwrap().unwrap();
        // Brotli detection is intentionally not content-based.
        let _ = compressed;
    }

    #[test]
    fn invalid_compressed_data_errors() {
        let compressor = Compressor::new(CompressionAlgorithm::GZip, 6, 1);
        let err = compressor
            .decompress(&[0x00, 0x01, 0x02, 0x03], CompressionAlgorithm::GZip)
            .unwrap_err();
        assert!(matches!(err, ConduitError::InvalidCompressedData));
    }
}
