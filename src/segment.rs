//! Segment file I/O: open/create numbered segment files, sequential
//! section reader/writer, filename numbering and sibling discovery
//! (spec §4.C).
//!
//! Ref: `forensicxlab-exhume_body::ewf::find_files` builds a glob pattern
//! replacing the numeric suffix with a wildcard and sorts the matches;
//! this module keeps that discovery approach but adds contiguity
//! assertion (`MissingSegment`) and the filename *generation* half needed
//! by the write path.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{EwfError, Result};
use crate::section::{SectionHeader, SECTION_HEADER_SIZE};

/// Image flavor, selected from the first-segment magic (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFlavor {
    Ewf1,
    Ewf2,
    L01,
}

pub const EWF1_SIGNATURE: [u8; 8] = [0x45, 0x56, 0x46, 0x09, 0x0D, 0x0A, 0xFF, 0x00];
pub const EWF2_SIGNATURE: [u8; 8] = [0x45, 0x56, 0x46, 0x32, 0x0D, 0x0A, 0x81, 0x00];
pub const L01_SIGNATURE: [u8; 8] = [0x4C, 0x56, 0x46, 0x09, 0x0D, 0x0A, 0xFF, 0x00];

/// Computes the two-letter extension for segment number `n` (1-based),
/// base-26 after 99 per spec §4.C: `E01..E99, EAA, EAB, ...`.
pub fn segment_extension(n: u16, flavor: ImageFlavor) -> String {
    let first_letter = match flavor {
        ImageFlavor::Ewf1 | ImageFlavor::Ewf2 => 'E',
        ImageFlavor::L01 => 'L',
    };
    if n == 0 || n > 99 {
        // n > 99: the trailing two letters advance like a base-26 counter
        // starting at "AA" for segment 100.
        let idx = n.checked_sub(100).unwrap_or(0) as u32;
        let hi = (idx / 26) as u8;
        let lo = (idx % 26) as u8;
        format!("{}{}{}", first_letter, (b'A' + hi) as char, (b'A' + lo) as char)
    } else {
        format!("{}{:02}", first_letter, n)
    }
}

/// Derives the glob pattern used to discover every segment belonging to
/// the same image as `path`, and the sorted list of matches. Ported from
/// `forensicxlab-exhume_body::ewf::find_files`.
pub fn discover_segments(path: &Path) -> Result<Vec<PathBuf>> {
    let path = path
        .canonicalize()
        .map_err(|e| EwfError::Io(e))?;
    let filename = path
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| EwfError::InvalidConfiguration("invalid file name".into()))?;

    if filename.len() < 2 {
        return Err(EwfError::InvalidConfiguration("file name too short".into()));
    }

    let base_filename = &filename[..filename.len() - 2];
    let parent = path
        .parent()
        .ok_or_else(|| EwfError::InvalidConfiguration("no parent directory".into()))?;

    let mut pattern_path = PathBuf::from(parent);
    pattern_path.push(format!("{}??", base_filename));
    let pattern = pattern_path
        .to_str()
        .ok_or_else(|| EwfError::InvalidConfiguration("invalid glob pattern".into()))?
        .to_string();

    let files = glob::glob(&pattern)
        .map_err(|e| EwfError::InvalidConfiguration(format!("glob error: {}", e)))?;
    let mut paths: Vec<PathBuf> = files.filter_map(std::result::Result::ok).collect();
    paths.sort();
    Ok(paths)
}

/// Asserts that segment numbers `1..=paths.len()` are all present with no
/// gap, per spec §4.C: "asserts contiguity from 1, and fails with
/// `MissingSegment(n)` otherwise."
pub fn assert_contiguous(paths: &[PathBuf], flavor: ImageFlavor) -> Result<()> {
    for (i, path) in paths.iter().enumerate() {
        let expected_number = (i + 1) as u16;
        let expected_ext = segment_extension(expected_number, flavor);
        let actual_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        if !actual_ext.eq_ignore_ascii_case(&expected_ext) {
            return Err(EwfError::MissingSegment(expected_number));
        }
    }
    Ok(())
}

/// Builds the path for segment `n` of the same image as `first_path`,
/// replacing `first_path`'s trailing `<letter><NN>` extension (e.g. the
/// `E01` in `image.E01`) with the one for segment `n`.
pub fn segment_path_for(first_path: &Path, n: u16, flavor: ImageFlavor) -> PathBuf {
    let stem = first_path
        .to_str()
        .map(|s| &s[..s.len() - 3])
        .unwrap_or_default();
    PathBuf::from(format!("{}{}", stem, segment_extension(n, flavor)))
}

/// Opens a segment file for sequential, random-access reads.
pub fn open_for_read(path: &Path) -> Result<File> {
    Ok(File::open(path)?)
}

/// Creates a new segment file for writing, truncating any existing file
/// at `path` (write is append-only within a session, spec §3, but the
/// file itself is newly created per segment).
pub fn create_for_write(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .read(true)
        .open(path)?)
}

/// One section discovered while scanning a segment file.
#[derive(Debug, Clone)]
pub struct SectionEntry {
    pub header: SectionHeader,
    /// Absolute offset of the section descriptor itself.
    pub descriptor_offset: u64,
    /// Absolute offset of the section's payload (`descriptor_offset +
    /// SECTION_HEADER_SIZE`).
    pub payload_offset: u64,
    /// Whether this section descriptor's own Adler-32 checksum matched.
    /// `false` is only fatal for sections spec §4.D names as such
    /// (`volume`/`header`); the caller (`handle::scan_segment`) judges
    /// that per section type rather than `iter_sections` aborting the
    /// whole walk on the spot, so a corrupted `table` still gets a chance
    /// to fall back to `table2`.
    pub descriptor_crc_ok: bool,
}

/// Sequentially walks every section of a segment file, starting right
/// after the 13-byte file header, tolerating unknown section types by
/// skipping via `next_offset` (spec §4.C: "Reader must tolerate unknown
/// section types by skipping via `next_offset`").
pub fn iter_sections(file: &mut File, start_offset: u64) -> Result<Vec<SectionEntry>> {
    let mut entries = Vec::new();
    let mut current_offset = start_offset;

    loop {
        file.seek(SeekFrom::Start(current_offset))?;
        let mut buf = [0u8; SECTION_HEADER_SIZE];
        file.read_exact(&mut buf)?;
        let (header, descriptor_crc_ok) = SectionHeader::parse_tolerant(&buf)?;
        let is_done = header.section_type == crate::section::tags::DONE;
        let next_offset = header.next_offset;

        entries.push(SectionEntry {
            descriptor_offset: current_offset,
            payload_offset: current_offset + SECTION_HEADER_SIZE as u64,
            header,
            descriptor_crc_ok,
        });

        if is_done || next_offset == current_offset {
            break;
        }
        current_offset = next_offset;
    }
    Ok(entries)
}

/// Append-only section writer for a single segment file (spec §4.D:
/// "Emission is append-only"). Tracks the current offset so
/// `next_offset` can be filled before the CRC is computed.
pub struct SectionWriter<'a> {
    file: &'a mut File,
    pub current_offset: u64,
}

impl<'a> SectionWriter<'a> {
    pub fn new(file: &'a mut File, current_offset: u64) -> Self {
        SectionWriter { file, current_offset }
    }

    /// Emits one section (header + payload) at the current offset and
    /// advances it.
    pub fn emit(&mut self, section_type: &str, payload: &[u8]) -> Result<u64> {
        let descriptor_offset = self.current_offset;
        let next_offset = descriptor_offset + SECTION_HEADER_SIZE as u64 + payload.len() as u64;
        let header = SectionHeader::emit(section_type, next_offset, payload.len() as u64);

        self.file.seek(SeekFrom::Start(descriptor_offset))?;
        self.file.write_all(&header)?;
        self.file.write_all(payload)?;

        self.current_offset = next_offset;
        Ok(descriptor_offset)
    }

    /// Emits the terminal `done` section whose `next_offset` points back
    /// at itself, per the loop-termination convention in spec §4.C/§4.D.
    pub fn emit_done(&mut self) -> Result<()> {
        let descriptor_offset = self.current_offset;
        let header = SectionHeader::emit(crate::section::tags::DONE, descriptor_offset, 0);
        self.file.seek(SeekFrom::Start(descriptor_offset))?;
        self.file.write_all(&header)?;
        self.current_offset = descriptor_offset + SECTION_HEADER_SIZE as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_extension_follows_base26_after_99() {
        assert_eq!(segment_extension(1, ImageFlavor::Ewf1), "E01");
        assert_eq!(segment_extension(99, ImageFlavor::Ewf1), "E99");
        assert_eq!(segment_extension(100, ImageFlavor::Ewf1), "EAA");
        assert_eq!(segment_extension(101, ImageFlavor::Ewf1), "EAB");
        assert_eq!(segment_extension(1, ImageFlavor::L01), "L01");
    }

    #[test]
    fn write_then_iter_sections_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.E01");
        let mut file = create_for_write(&path).unwrap();
        file.write_all(&[0u8; 13]).unwrap(); // stand-in file header
        {
            let mut writer = SectionWriter::new(&mut file, 13);
            writer.emit("volume", &[1, 2, 3, 4]).unwrap();
            writer.emit_done().unwrap();
        }

        let mut reader = open_for_read(&path).unwrap();
        let entries = iter_sections(&mut reader, 13).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].header.section_type, "volume");
        assert_eq!(entries[1].header.section_type, "done");
    }

    #[test]
    fn detects_gap_in_segment_numbering() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = dir.path().join("image.E01");
        let p3 = dir.path().join("image.E03");
        File::create(&p1).unwrap();
        File::create(&p3).unwrap();
        let paths = vec![p1, p3];
        assert!(matches!(
            assert_contiguous(&paths, ImageFlavor::Ewf1),
            Err(EwfError::MissingSegment(2))
        ));
    }
}
