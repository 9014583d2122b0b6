//! Configuration recognized by the core (spec §6).

use crate::compression::CompressionLevel;
use crate::error::{EwfError, Result};

pub const MIN_SEGMENT_SIZE: u64 = 1024 * 1024; // 1 MiB
pub const MAX_SEGMENT_SIZE_CEILING: u64 = 2 * 1024 * 1024 * 1024 - 1; // 2 GiB - 1
pub const DEFAULT_SEGMENT_SIZE: u64 = 1024 * 1024 * 1024 + 400 * 1024 * 1024; // 1.4 GiB
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 512; // 64 sectors/chunk x 512-byte sectors
pub const DEFAULT_CACHE_CAPACITY: usize = 16;

/// Character encoding hint for header-value sections (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderCodepage {
    Ascii,
    Cp1252,
    Cp1251,
}

/// Behavior governing a segment chain whose last section is `next` but
/// whose named continuation segment is absent at open time (spec §9, open
/// question #1). Default refuses the open; `BestEffort` truncates the
/// logical medium at the last sealed segment instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingSegmentPolicy {
    #[default]
    Refuse,
    BestEffort,
}

/// Whether to store a chunk uncompressed when the compressed payload
/// does not beat the raw payload by the configured threshold (spec §9,
/// open question #2). Default is the EWF1 behavior: always store
/// compressed when `compression_level != None`, regardless of resulting
/// size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompressionThreshold {
    /// Always store compressed when compression is enabled (EWF1).
    Unconditional,
    /// Store compressed only if `compressed_size < uncompressed_size * ratio`.
    Ratio(f64),
}

impl Default for CompressionThreshold {
    fn default() -> Self {
        CompressionThreshold::Unconditional
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub chunk_size: usize,
    pub compression_level: CompressionLevel,
    pub max_segment_size: u64,
    pub header_codepage: HeaderCodepage,
    pub read_zero_on_error: bool,
    pub cache_capacity: usize,
    pub missing_segment_policy: MissingSegmentPolicy,
    pub compression_threshold: CompressionThreshold,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression_level: CompressionLevel::Fast,
            max_segment_size: DEFAULT_SEGMENT_SIZE,
            header_codepage: HeaderCodepage::Ascii,
            read_zero_on_error: false,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            missing_segment_policy: MissingSegmentPolicy::Refuse,
            compression_threshold: CompressionThreshold::Unconditional,
        }
    }
}

impl Config {
    /// Validates the configuration, returning `InvalidConfiguration` on
    /// the first out-of-range field (spec §6/§7).
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < 512 || !self.chunk_size.is_power_of_two() {
            return Err(EwfError::InvalidConfiguration(format!(
                "chunk_size must be a power of two >= 512, got {}",
                self.chunk_size
            )));
        }
        if self.max_segment_size < MIN_SEGMENT_SIZE || self.max_segment_size > MAX_SEGMENT_SIZE_CEILING {
            return Err(EwfError::InvalidConfiguration(format!(
                "max_segment_size must be in [{}, {}], got {}",
                MIN_SEGMENT_SIZE, MAX_SEGMENT_SIZE_CEILING, self.max_segment_size
            )));
        }
        if self.cache_capacity == 0 {
            return Err(EwfError::InvalidConfiguration(
                "cache_capacity must be >= 1".to_string(),
            ));
        }
        if let CompressionThreshold::Ratio(r) = self.compression_threshold {
            if !(0.0..=1.0).contains(&r) {
                return Err(EwfError::InvalidConfiguration(format!(
                    "compression threshold ratio must be in [0.0, 1.0], got {}",
                    r
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_non_power_of_two_chunk_size() {
        let mut cfg = Config::default();
        cfg.chunk_size = 1000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_segment_size_below_minimum() {
        let mut cfg = Config::default();
        cfg.max_segment_size = 1024;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_cache_capacity() {
        let mut cfg = Config::default();
        cfg.cache_capacity = 0;
        assert!(cfg.validate().is_err());
    }
}
