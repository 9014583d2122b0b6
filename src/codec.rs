//! Little-endian integer pack/unpack and the Adler-32 checksum used by
//! every section descriptor and uncompressed chunk trailer.
//!
//! Ref: `original_source/libewf/libewf_endian.c` fixes the exact byte
//! order every multi-byte field in the format uses; this module expresses
//! the same contract with `from_le_bytes`/`to_le_bytes` instead of manual
//! shifting.

use crate::error::{EwfError, Result};

/// Adler-32 modulus (RFC 1950 §9).
const MOD_ADLER: u32 = 65521;

/// Computes the Adler-32 checksum of `data`, initial value 1 as mandated
/// by RFC 1950. Cannot fail.
pub fn adler32(data: &[u8]) -> u32 {
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    // Accumulate in chunks short enough that `b` cannot overflow u32
    // before a modulo reduction; 5552 is the standard NMAX for this
    // checksum's word size.
    for chunk in data.chunks(5552) {
        for &byte in chunk {
            a += byte as u32;
            b += a;
        }
        a %= MOD_ADLER;
        b %= MOD_ADLER;
    }
    (b << 16) | a
}

/// Reads a little-endian `u16` at `buf[..2]`. Fails only on short input.
pub fn read_u16_le(buf: &[u8]) -> Result<u16> {
    let arr: [u8; 2] = buf
        .get(..2)
        .ok_or_else(|| EwfError::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "need 2 bytes for u16")))?
        .try_into()
        .unwrap();
    Ok(u16::from_le_bytes(arr))
}

/// Reads a little-endian `u32` at `buf[..4]`. Fails only on short input.
pub fn read_u32_le(buf: &[u8]) -> Result<u32> {
    let arr: [u8; 4] = buf
        .get(..4)
        .ok_or_else(|| EwfError::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "need 4 bytes for u32")))?
        .try_into()
        .unwrap();
    Ok(u32::from_le_bytes(arr))
}

/// Reads a little-endian `u64` at `buf[..8]`. Fails only on short input.
pub fn read_u64_le(buf: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = buf
        .get(..8)
        .ok_or_else(|| EwfError::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "need 8 bytes for u64")))?
        .try_into()
        .unwrap();
    Ok(u64::from_le_bytes(arr))
}

/// Packs `value` little-endian, appending to `out`. Cannot fail.
pub fn write_u16_le(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Packs `value` little-endian, appending to `out`. Cannot fail.
pub fn write_u32_le(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Packs `value` little-endian, appending to `out`. Cannot fail.
pub fn write_u64_le(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adler32_known_vector() {
        // "Wikipedia" -> 0x11E60398 is the textbook Adler-32 vector.
        assert_eq!(adler32(b"Wikipedia"), 0x11E60398);
    }

    #[test]
    fn adler32_empty_is_one() {
        assert_eq!(adler32(b""), 1);
    }

    #[test]
    fn roundtrip_le_integers() {
        let mut buf = Vec::new();
        write_u16_le(&mut buf, 0x1234);
        write_u32_le(&mut buf, 0xDEAD_BEEF);
        write_u64_le(&mut buf, 0x0123_4567_89AB_CDEF);

        assert_eq!(read_u16_le(&buf[0..2]).unwrap(), 0x1234);
        assert_eq!(read_u32_le(&buf[2..6]).unwrap(), 0xDEAD_BEEF);
        assert_eq!(read_u64_le(&buf[6..14]).unwrap(), 0x0123_4567_89AB_CDEF);
    }

    #[test]
    fn unpack_fails_on_short_input() {
        assert!(read_u32_le(&[0, 1]).is_err());
    }
}
