//! Media/volume values: geometry, sector size, chunk size, media type,
//! compression level (spec §3 "Volume section").
//!
//! Ref: `forensicxlab-exhume_body::ewf::EwfVolumeSection` parses the same
//! four geometry fields positionally; this module keeps that offset
//! layout and adds the remaining fields spec §3 names plus the
//! cross-validation spec §3 mandates.

use crate::error::{EwfError, Result};

/// Media type byte (spec §3 volume section).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Removable,
    Fixed,
    Optical,
    Logical,
    Memory,
    Unknown(u8),
}

impl MediaType {
    fn from_byte(b: u8) -> Self {
        match b {
            0x00 => MediaType::Removable,
            0x01 => MediaType::Fixed,
            0x03 => MediaType::Optical,
            0x0e => MediaType::Logical,
            0x10 => MediaType::Memory,
            other => MediaType::Unknown(other),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            MediaType::Removable => 0x00,
            MediaType::Fixed => 0x01,
            MediaType::Optical => 0x03,
            MediaType::Logical => 0x0e,
            MediaType::Memory => 0x10,
            MediaType::Unknown(b) => b,
        }
    }
}

/// Geometry of the acquired medium, as stored in the `volume`/`disk`
/// section of segment 1.
#[derive(Debug, Clone)]
pub struct VolumeSection {
    pub media_type: MediaType,
    pub chunk_count: u32,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub sector_count: u64,
    pub error_granularity: u32,
    pub compression_level: u8,
    pub media_flags: u8,
    pub guid: [u8; 16],
}

impl VolumeSection {
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.sectors_per_chunk as usize * self.bytes_per_sector as usize
    }

    #[inline]
    pub fn media_size(&self) -> u64 {
        self.sector_count * self.bytes_per_sector as u64
    }

    /// Cross-validates the geometry per spec §3:
    /// `chunk_size == sectors_per_chunk * bytes_per_sector` (implicit by
    /// construction here) and `sector_count <= chunk_count *
    /// sectors_per_chunk`.
    pub fn validate(&self) -> Result<()> {
        if self.sectors_per_chunk == 0 || self.bytes_per_sector == 0 {
            return Err(EwfError::InvalidConfiguration(
                "sectors_per_chunk and bytes_per_sector must be non-zero".into(),
            ));
        }
        let capacity = self.chunk_count as u64 * self.sectors_per_chunk as u64;
        if self.sector_count > capacity {
            return Err(EwfError::InvalidConfiguration(format!(
                "sector_count ({}) exceeds chunk_count * sectors_per_chunk ({})",
                self.sector_count, capacity
            )));
        }
        Ok(())
    }

    /// Parses the EWF1 volume section body (offsets relative to the start
    /// of the section payload, matching
    /// `forensicxlab-exhume_body::ewf::EwfVolumeSection::new`).
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let need = |n: usize| -> Result<()> {
            if buf.len() < n {
                Err(EwfError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "short volume section",
                )))
            } else {
                Ok(())
            }
        };
        need(94)?;

        let media_type = MediaType::from_byte(buf[0]);
        let chunk_count = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let sectors_per_chunk = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let bytes_per_sector = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let sector_count = u32::from_le_bytes(buf[16..20].try_into().unwrap()) as u64;
        let error_granularity = u32::from_le_bytes(buf[52..56].try_into().unwrap());
        let compression_level = buf[56];
        let mut guid = [0u8; 16];
        guid.copy_from_slice(&buf[57..73]);
        let media_flags = buf[1];

        let volume = VolumeSection {
            media_type,
            chunk_count,
            sectors_per_chunk,
            bytes_per_sector,
            sector_count,
            error_granularity,
            compression_level,
            media_flags,
            guid,
        };
        volume.validate()?;
        Ok(volume)
    }

    /// Emits the volume section body, matching the offsets `parse` reads.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; 94];
        buf[0] = self.media_type.to_byte();
        buf[1] = self.media_flags;
        buf[4..8].copy_from_slice(&self.chunk_count.to_le_bytes());
        buf[8..12].copy_from_slice(&self.sectors_per_chunk.to_le_bytes());
        buf[12..16].copy_from_slice(&self.bytes_per_sector.to_le_bytes());
        buf[16..20].copy_from_slice(&(self.sector_count as u32).to_le_bytes());
        buf[52..56].copy_from_slice(&self.error_granularity.to_le_bytes());
        buf[56] = self.compression_level;
        buf[57..73].copy_from_slice(&self.guid);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VolumeSection {
        VolumeSection {
            media_type: MediaType::Fixed,
            chunk_count: 4,
            sectors_per_chunk: 64,
            bytes_per_sector: 512,
            sector_count: 256,
            error_granularity: 64,
            compression_level: 1,
            media_flags: 0x01,
            guid: [0xAB; 16],
        }
    }

    #[test]
    fn roundtrip_emit_parse() {
        let v = sample();
        let bytes = v.to_bytes();
        let parsed = VolumeSection::parse(&bytes).unwrap();
        assert_eq!(parsed.chunk_count, v.chunk_count);
        assert_eq!(parsed.sectors_per_chunk, v.sectors_per_chunk);
        assert_eq!(parsed.bytes_per_sector, v.bytes_per_sector);
        assert_eq!(parsed.sector_count, v.sector_count);
        assert_eq!(parsed.guid, v.guid);
    }

    #[test]
    fn chunk_size_matches_geometry() {
        let v = sample();
        assert_eq!(v.chunk_size(), 64 * 512);
        assert_eq!(v.media_size(), 256 * 512);
    }

    #[test]
    fn rejects_sector_count_exceeding_capacity() {
        let mut v = sample();
        v.sector_count = 1_000_000;
        assert!(v.validate().is_err());
    }
}
