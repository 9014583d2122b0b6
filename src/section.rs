//! Typed section records with CRC (spec §3 "Segment file" / §4.D).
//!
//! Grounded in `forensicxlab-exhume_body::ewf::EwfSectionDescriptor`,
//! which parses the 76-byte EWF1 header positionally but never validates
//! the trailing checksum; this module keeps that positional layout and
//! adds the emit half plus the CRC verification spec §4.D requires.

use crate::codec::adler32;
use crate::error::{EwfError, Result};

/// Size in bytes of an EWF1 section descriptor.
pub const SECTION_HEADER_SIZE: usize = 76;

/// Best-known section type tags (spec §4.D).
pub mod tags {
    pub const HEADER: &str = "header";
    pub const HEADER2: &str = "header2";
    pub const XHEADER: &str = "xheader";
    pub const VOLUME: &str = "volume";
    pub const DISK: &str = "disk";
    pub const DATA: &str = "data";
    pub const TABLE: &str = "table";
    pub const TABLE2: &str = "table2";
    pub const SECTORS: &str = "sectors";
    pub const LTREE: &str = "ltree";
    pub const SESSION: &str = "session";
    pub const ERROR2: &str = "error2";
    pub const HASH: &str = "hash";
    pub const DIGEST: &str = "digest";
    pub const XHASH: &str = "xhash";
    pub const NEXT: &str = "next";
    pub const DONE: &str = "done";
}

/// A parsed section descriptor: `{type_tag[16], next_offset[8], size[8],
/// padding[40], crc[4]}`.
#[derive(Debug, Clone)]
pub struct SectionHeader {
    pub section_type: String,
    pub next_offset: u64,
    pub size: u64,
}

impl SectionHeader {
    /// Decodes the raw fields out of exactly `SECTION_HEADER_SIZE` bytes
    /// without judging the checksum, returning `(header, crc_ok)`.
    fn decode(buf: &[u8]) -> Result<(Self, bool)> {
        if buf.len() < SECTION_HEADER_SIZE {
            return Err(EwfError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "short section header",
            )));
        }
        let computed = adler32(&buf[0..72]);
        let actual_crc = u32::from_le_bytes(buf[72..76].try_into().unwrap());

        let mut section_type = String::from_utf8_lossy(&buf[0..16]).into_owned();
        section_type.retain(|c| c != '\0');

        let next_offset = u64::from_le_bytes(buf[16..24].try_into().unwrap());
        let size = u64::from_le_bytes(buf[24..32].try_into().unwrap());

        Ok((
            SectionHeader {
                section_type,
                next_offset,
                size,
            },
            computed == actual_crc,
        ))
    }

    /// Parses a section descriptor, verifying the Adler-32 checksum over
    /// the first 72 bytes. `CrcMismatch` is fatal for `volume`/`header`
    /// per spec §4.D; callers that should instead fall back to `table2`
    /// use [`parse_tolerant`](Self::parse_tolerant).
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let (header, crc_ok) = Self::decode(buf)?;
        if !crc_ok {
            return Err(EwfError::CrcMismatch { section: "section_header" });
        }
        Ok(header)
    }

    /// Parses a section descriptor's fields regardless of checksum
    /// validity, returning whether the descriptor's own CRC matched.
    /// Segment scanning (`segment::iter_sections`) uses this instead of
    /// [`parse`](Self::parse) so that a single corrupted `table` section
    /// descriptor doesn't abort the whole segment parse before the
    /// `table2` fallback gets a chance to run (spec §4.D/§7) — fatal
    /// cases (`volume`/`header`) are judged by the caller once it knows
    /// which section type it's looking at.
    pub fn parse_tolerant(buf: &[u8]) -> Result<(Self, bool)> {
        Self::decode(buf)
    }

    /// Emits a section descriptor. `next_offset` must already account for
    /// `size` (i.e. `current_offset + SECTION_HEADER_SIZE + size`), the
    /// writer computes it so the CRC can be computed last as spec §4.D
    /// requires ("emission is append-only ... computes CRC last").
    pub fn emit(section_type: &str, next_offset: u64, size: u64) -> [u8; SECTION_HEADER_SIZE] {
        let mut buf = [0u8; SECTION_HEADER_SIZE];
        let tag_bytes = section_type.as_bytes();
        let n = tag_bytes.len().min(16);
        buf[0..n].copy_from_slice(&tag_bytes[0..n]);
        buf[16..24].copy_from_slice(&next_offset.to_le_bytes());
        buf[24..32].copy_from_slice(&size.to_le_bytes());
        // bytes 32..72 are the zero-filled padding.
        let crc = adler32(&buf[0..72]);
        write_crc(&mut buf, crc);
        buf
    }
}

fn write_crc(buf: &mut [u8; SECTION_HEADER_SIZE], crc: u32) {
    buf[72..76].copy_from_slice(&crc.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_then_parse_roundtrips() {
        let raw = SectionHeader::emit(tags::TABLE, 1000, 240);
        let parsed = SectionHeader::parse(&raw).unwrap();
        assert_eq!(parsed.section_type, "table");
        assert_eq!(parsed.next_offset, 1000);
        assert_eq!(parsed.size, 240);
    }

    #[test]
    fn corrupted_crc_is_detected() {
        let mut raw = SectionHeader::emit(tags::DONE, 42, 0);
        raw[72] ^= 0xFF;
        assert!(matches!(
            SectionHeader::parse(&raw),
            Err(EwfError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(SectionHeader::parse(&[0u8; 10]).is_err());
    }
}
