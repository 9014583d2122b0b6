//! Zlib compress/uncompress wrapper with the grow-on-overflow protocol
//! `original_source/libewf/libewf_compression.c` implements by hand around
//! `compress2`/`uncompress`. `flate2` already grows its output buffer as
//! needed, so the retry loop collapses to a single pass, but the public
//! shape (explicit level, explicit failure kind) matches the original.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::error::{EwfError, Result};

/// Compression level recognized by the core, per spec §6 configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    None,
    #[default]
    Fast,
    Best,
}

impl CompressionLevel {
    fn to_flate2(self) -> Compression {
        match self {
            CompressionLevel::None => Compression::none(),
            CompressionLevel::Fast => Compression::fast(),
            CompressionLevel::Best => Compression::best(),
        }
    }

    pub fn is_none(self) -> bool {
        matches!(self, CompressionLevel::None)
    }
}

/// Deflates `data` at `level`. Only fails on a genuine zlib error (not on
/// undersized buffers — the encoder owns its own growth).
pub fn compress(data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2 + 16), level.to_flate2());
    encoder
        .write_all(data)
        .map_err(|e| EwfError::CompressionError(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| EwfError::CompressionError(e.to_string()))
}

/// Inflates `compressed`, pre-sizing the output buffer to
/// `expected_size` (the uncompressed chunk size is always known ahead of
/// time from the volume section) and growing past it if the stream turns
/// out larger — the moral equivalent of the C side's `Z_BUF_ERROR` retry.
pub fn uncompress(compressed: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut data = Vec::with_capacity(expected_size);
    decoder
        .read_to_end(&mut data)
        .map_err(|e| EwfError::CompressionError(e.to_string()))?;
    Ok(data)
}
