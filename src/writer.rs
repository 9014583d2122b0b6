//! Write engine: accepts one logical chunk at a time, compresses it per
//! the configured threshold, appends it to the current segment file,
//! and rotates to a new segment once the size budget is spent (spec
//! §4.J).
//!
//! Ref: none of the pack's EWF code writes images (`forensicxlab-exhume_body`
//! is read-only), so the append-then-seal shape here is grounded in
//! `Dil4rd-dpp::udif::writer` (`other_examples/6c3d29e1_...-writer.rs`):
//! a running CRC hasher fed per block, a size-triggered rotation to a new
//! output file, and a closing pass that seals trailing metadata once the
//! data blocks are done. The segment-file specifics (`table`/`table2`/
//! `next`/`done` sections, Adler-32 per-chunk trailer) come from spec §3
//! and `original_source/libewf_compression.c`.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write as _};
use std::path::PathBuf;

use crate::chunk_table::{encode_table_entry, ChunkFlags, ChunkRecord, ChunkTable};
use crate::codec::adler32;
use crate::compression::{self, CompressionLevel};
use crate::config::{CompressionThreshold, Config};
use crate::error::{EwfError, Result};
use crate::integrity::{IntegrityDigest, IntegrityHashers};
use crate::section::{self, tags, SECTION_HEADER_SIZE};
use crate::segment::{self, ImageFlavor, SectionWriter};

/// Lifecycle of the segment file currently being written, per spec §4.J
/// / §9 design note on write-time state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Chunk data is actively being appended.
    Writing,
    /// Chunk data for this segment is done; `table`/`table2` (and, on the
    /// final segment, the remaining trailers) are about to be emitted.
    PendingTrailer,
    /// Trailers emitted; the segment file will not be touched again.
    Sealed,
}

struct OpenSegment {
    file: File,
    path: PathBuf,
    index: u16,
    /// Absolute offset of the next chunk's write (right after the
    /// `sectors` section header that precedes the chunk run).
    cursor: u64,
    /// `cursor` as of the end of the last chunk write — the true end of
    /// the `sectors` run. Frozen here rather than read back off `cursor`
    /// at seal time, because trailer sections (`hash` in particular) are
    /// appended to the same file and advance `cursor` past this point
    /// before `seal_segment` runs; the `sectors` section's own `size`/
    /// `next_offset` must cover only the chunk payload, not whatever was
    /// appended after it (spec §4.D/§4.J).
    chunk_run_end: u64,
    /// Offset of the `sectors` section header, whose `size` field is
    /// only known once the segment is sealed.
    sectors_header_offset: u64,
    /// Per-chunk records written to this segment, relative offsets
    /// collected for the `table`/`table2` sections at rotation/close.
    entries: Vec<ChunkRecord>,
    state: SegmentState,
}

/// Sequential, single-writer append engine for one EWF image (spec
/// §4.J, §5: "at most one writer owns the image at a time").
pub struct WriteEngine {
    base_path: PathBuf,
    flavor: ImageFlavor,
    config: Config,
    chunk_size: usize,
    table: ChunkTable,
    segment: OpenSegment,
    /// Paths of segments already sealed by a rotation, indexed by
    /// (0-based) segment index — kept so a same-session read-back (spec
    /// §8: "write followed by read at the same offset without an
    /// intervening close") can reopen a chunk's segment once it is no
    /// longer the one currently being written.
    sealed_segment_paths: Vec<PathBuf>,
    next_logical_index: u64,
    hashers: IntegrityHashers,
    aborted: bool,
}

impl WriteEngine {
    /// Opens segment 1 and writes the file header plus the caller-supplied
    /// `header`/`header2` and `volume` section payloads (already encoded
    /// by [`crate::header_values::HeaderValueStore`] and
    /// [`crate::volume::VolumeSection`]) ahead of the chunk run.
    pub fn open_new(
        base_path: PathBuf,
        flavor: ImageFlavor,
        config: Config,
        chunk_size: usize,
        header_bytes: &[u8],
        header2_bytes: &[u8],
        volume_bytes: &[u8],
        with_sha1: bool,
    ) -> Result<Self> {
        config.validate()?;
        let path = segment::segment_path_for(&base_path, 1, flavor);
        let mut file = segment::create_for_write(&path)?;

        let signature = match flavor {
            ImageFlavor::Ewf1 => segment::EWF1_SIGNATURE,
            ImageFlavor::Ewf2 => segment::EWF2_SIGNATURE,
            ImageFlavor::L01 => segment::L01_SIGNATURE,
        };
        file.write_all(&signature)?;
        file.write_all(&1u16.to_le_bytes())?; // segment_number = 1
        file.write_all(&[0u8; 3])?; // reserved, rounds the file header to 13 bytes

        let mut writer = SectionWriter::new(&mut file, 13);
        writer.emit(tags::HEADER, header_bytes)?;
        writer.emit(tags::HEADER2, header2_bytes)?;
        writer.emit(tags::VOLUME, volume_bytes)?;
        let sectors_header_offset = writer.current_offset;
        // Placeholder `sectors` header; its `size` is patched in once the
        // run's total byte length is known (spec §4.D: emission is
        // append-only, so we reserve the slot and rewrite it at seal time).
        writer.emit(tags::SECTORS, &[])?;
        let cursor = writer.current_offset;
        drop(writer);

        Ok(WriteEngine {
            base_path,
            flavor,
            config,
            chunk_size,
            table: ChunkTable::new(),
            segment: OpenSegment {
                file,
                path,
                index: 0,
                cursor,
                chunk_run_end: cursor,
                sectors_header_offset,
                entries: Vec::new(),
                state: SegmentState::Writing,
            },
            sealed_segment_paths: Vec::new(),
            next_logical_index: 0,
            hashers: IntegrityHashers::new(with_sha1),
            aborted: false,
        })
    }

    /// Writes one chunk (the final chunk of the medium may be shorter
    /// than `chunk_size`). Rejects anything but the next sequential
    /// logical index (spec §4.J: "non-sequential writes are rejected,
    /// not silently reordered").
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        if self.aborted {
            return Err(EwfError::Aborted);
        }

        self.hashers.update(data);

        let (payload, compressed) = self.encode_chunk(data)?;
        let file_offset = self.segment.cursor;
        self.segment.file.seek(SeekFrom::Start(file_offset))?;
        self.segment.file.write_all(&payload)?;
        self.segment.cursor += payload.len() as u64;
        self.segment.chunk_run_end = self.segment.cursor;

        let record = ChunkRecord {
            segment_index: self.segment.index,
            file_offset,
            stored_size: payload.len() as u32,
            flags: ChunkFlags {
                compressed,
                has_trailing_crc: !compressed,
                ..Default::default()
            },
            logical_index: self.next_logical_index,
        };
        self.table.insert_write(record)?;
        self.segment.entries.push(record);
        self.next_logical_index += 1;

        if self.segment.cursor - self.segment.sectors_header_offset >= self.config.max_segment_size {
            self.rotate()?;
        }
        Ok(())
    }

    /// Compresses `data` unless `CompressionLevel::None`, applying the
    /// configured [`CompressionThreshold`] (spec §9, open question #2):
    /// under `Unconditional` a compressed chunk is always kept; under
    /// `Ratio(r)` the compressed form is only kept if it beats the raw
    /// size by at least `r`.
    fn encode_chunk(&self, data: &[u8]) -> Result<(Vec<u8>, bool)> {
        if self.config.compression_level.is_none() {
            return self.append_trailer(data);
        }
        let compressed = compression::compress(data, self.config.compression_level)?;
        let keep_compressed = match self.config.compression_threshold {
            CompressionThreshold::Unconditional => true,
            CompressionThreshold::Ratio(ratio) => (compressed.len() as f64) < (data.len() as f64) * ratio,
        };
        if keep_compressed {
            Ok((compressed, true))
        } else {
            self.append_trailer(data)
        }
    }

    fn append_trailer(&self, data: &[u8]) -> Result<(Vec<u8>, bool)> {
        let mut raw = data.to_vec();
        raw.extend_from_slice(&adler32(data).to_le_bytes());
        Ok((raw, false))
    }

    /// Seals the current segment's `sectors` size, emits `table`/`table2`
    /// then `done`, and opens a fresh segment file to continue writing
    /// into (spec §4.J segment rotation).
    fn rotate(&mut self) -> Result<()> {
        self.seal_segment(None)?;
        debug_assert_eq!(self.segment.index as usize, self.sealed_segment_paths.len());
        self.sealed_segment_paths.push(self.segment.path.clone());

        let next_index = self.segment.index + 2; // 1-based, next segment number
        let path = segment::segment_path_for(&self.base_path, next_index, self.flavor);
        let mut file = segment::create_for_write(&path)?;

        let signature = match self.flavor {
            ImageFlavor::Ewf1 => segment::EWF1_SIGNATURE,
            ImageFlavor::Ewf2 => segment::EWF2_SIGNATURE,
            ImageFlavor::L01 => segment::L01_SIGNATURE,
        };
        file.write_all(&signature)?;
        file.write_all(&next_index.to_le_bytes())?;
        file.write_all(&[0u8; 3])?;

        let mut writer = SectionWriter::new(&mut file, 13);
        let sectors_header_offset = writer.current_offset;
        writer.emit(tags::SECTORS, &[])?;
        let cursor = writer.current_offset;
        drop(writer);

        self.segment = OpenSegment {
            file,
            path,
            index: next_index - 1,
            cursor,
            chunk_run_end: cursor,
            sectors_header_offset,
            entries: Vec::new(),
            state: SegmentState::Writing,
        };
        Ok(())
    }

    /// Emits `table`, `table2`, and — for the *final* segment only — the
    /// `error2`/`hash` trailers, followed by `done` (spec §4.J: "close-time
    /// trailer emission").
    ///
    /// The `sectors` section's `size`/`next_offset` are patched from
    /// `chunk_run_end`, frozen at the end of the last chunk write, never
    /// from `cursor` — `cursor` may already include a trailer a caller
    /// appended ahead of sealing (the `hash` section used to be written
    /// this way, which inflated the reported chunk-run length and knocked
    /// `hash` off the `next_offset` chain; see `close` below).
    fn seal_segment(&mut self, final_digest: Option<&IntegrityDigest>) -> Result<()> {
        self.segment.state = SegmentState::PendingTrailer;

        let run_end = self.segment.chunk_run_end;
        let run_len = run_end - self.segment.sectors_header_offset - SECTION_HEADER_SIZE as u64;
        let patched = section::SectionHeader::emit(tags::SECTORS, run_end, run_len);
        self.segment.file.seek(SeekFrom::Start(self.segment.sectors_header_offset))?;
        self.segment.file.write_all(&patched)?;

        let base_offset = self.segment.sectors_header_offset + SECTION_HEADER_SIZE as u64;
        let table_payload = build_table_payload(&self.segment.entries, base_offset);

        let mut writer = SectionWriter::new(&mut self.segment.file, run_end);
        writer.emit(tags::TABLE, &table_payload)?;
        writer.emit(tags::TABLE2, &table_payload)?;

        if let Some(digest) = final_digest {
            writer.emit(tags::ERROR2, &[])?;
            let hash_payload = digest_payload(digest);
            writer.emit(tags::HASH, &hash_payload)?;
        }
        writer.emit_done()?;
        self.segment.cursor = writer.current_offset;
        self.segment.state = SegmentState::Sealed;
        Ok(())
    }

    /// Finalizes the image: seals the last segment, folding the
    /// `error2`/`hash` integrity trailers into the sealed section chain
    /// ahead of `done` so a reopen's `next_offset` walk actually reaches
    /// the `hash` section (spec §4.L), and returns the computed digest for
    /// the caller to persist or compare.
    pub fn close(mut self) -> Result<IntegrityDigest> {
        if self.aborted {
            return Err(EwfError::Aborted);
        }
        let digest = self.hashers_take();
        self.seal_segment(Some(&digest))?;
        Ok(digest)
    }

    /// Marks the engine aborted: subsequent `write_chunk`/`close` calls
    /// fail fast with `Aborted` rather than appending further data (spec
    /// §5 abort contract — checked at loop boundaries by the caller).
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    pub fn segment_path(&self) -> &std::path::Path {
        &self.segment.path
    }

    /// Number of whole chunks flushed to disk so far — the boundary
    /// between [`read_chunk_back`](Self::read_chunk_back)-servable data
    /// and whatever tail the caller is still accumulating above this
    /// engine (spec §8 write-then-read property).
    pub fn written_chunk_count(&self) -> u64 {
        self.next_logical_index
    }

    /// Reads back a chunk this engine has already flushed, decompressing
    /// it exactly as the read engine would. Supports reading data just
    /// written without closing the image first (spec §8: "For every
    /// write followed by read at the same offset without an intervening
    /// close: read returns exactly the bytes written").
    pub fn read_chunk_back(&mut self, logical_index: u64) -> Result<Vec<u8>> {
        let record = *self
            .table
            .lookup(logical_index)
            .ok_or(EwfError::ChunkCorrupt(logical_index))?;
        if record.segment_index == self.segment.index {
            let (data, _) = crate::reader::build_chunk_from_file(&self.segment.file, &record, self.chunk_size)?;
            Ok(data)
        } else {
            let path = self
                .sealed_segment_paths
                .get(record.segment_index as usize)
                .ok_or(EwfError::MissingSegment(record.segment_index + 1))?;
            let file = segment::open_for_read(path)?;
            let (data, _) = crate::reader::build_chunk_from_file(&file, &record, self.chunk_size)?;
            Ok(data)
        }
    }

    fn hashers_take(&mut self) -> IntegrityDigest {
        let placeholder = IntegrityHashers::new(false);
        std::mem::replace(&mut self.hashers, placeholder).finalize()
    }
}

/// Builds a `table`/`table2` payload: the flat run of 4-byte entries
/// followed by a trailing Adler-32 over just those entry bytes, so a
/// reopen can detect a corrupted table independently of the section
/// descriptor's own CRC (spec §4.D/§7 `CrcMismatch(section)` → fall back
/// to `table2`).
fn build_table_payload(entries: &[ChunkRecord], base_offset: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * 4 + 4);
    for entry in entries {
        let offset_within_segment = (entry.file_offset - base_offset) as u32;
        let raw = encode_table_entry(entry.flags.compressed, offset_within_segment);
        out.extend_from_slice(&raw.to_le_bytes());
    }
    let crc = adler32(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

fn digest_payload(digest: &IntegrityDigest) -> Vec<u8> {
    let mut out = digest.md5.to_vec();
    if let Some(sha1) = digest.sha1 {
        out.extend_from_slice(&sha1);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ChunkCache;
    use crate::reader;

    #[test]
    fn write_then_read_back_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("image.E01");
        let chunk_size = 16;

        let mut engine = WriteEngine::open_new(
            base.clone(),
            ImageFlavor::Ewf1,
            Config::default(),
            chunk_size,
            b"header-bytes",
            b"header2-bytes",
            b"volume-bytes",
            false,
        )
        .unwrap();

        let chunk0 = vec![0xAAu8; chunk_size];
        let chunk1 = vec![0xBBu8; chunk_size];
        engine.write_chunk(&chunk0).unwrap();
        engine.write_chunk(&chunk1).unwrap();
        let digest = engine.close().unwrap();
        assert_ne!(digest.md5, [0u8; 16]);

        let mut segments = vec![segment::open_for_read(&base).unwrap()];
        let mut table = ChunkTable::new();

        // A minimal end-to-end check: read the first raw chunk payload back
        // directly off disk at the offset the writer used, bypassing the
        // table section parser (covered separately by chunk_table tests).
        let cache = ChunkCache::new(4);
        let config = Config::default();

        let header_section_len = 76 + b"header-bytes".len() as u64;
        let header2_section_len = 76 + b"header2-bytes".len() as u64;
        let volume_section_len = 76 + b"volume-bytes".len() as u64;
        let sectors_header_len = 76u64;
        let chunk0_offset =
            13 + header_section_len + header2_section_len + volume_section_len + sectors_header_len;

        let rec0 = ChunkRecord {
            segment_index: 0,
            file_offset: chunk0_offset,
            stored_size: (chunk_size + 4) as u32,
            flags: ChunkFlags { has_trailing_crc: true, ..Default::default() },
            logical_index: 0,
        };
        table.insert_write(rec0).unwrap();

        let mut out = vec![0u8; chunk_size];
        let n = reader::read_at(&segments, &table, &cache, &config, chunk_size, chunk_size as u64, 0, &mut out).unwrap();
        assert_eq!(n, chunk_size);
        assert_eq!(out, chunk0);
    }

    #[test]
    fn rejects_write_after_abort() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("image.E01");
        let mut engine = WriteEngine::open_new(
            base,
            ImageFlavor::Ewf1,
            Config::default(),
            16,
            b"h",
            b"h2",
            b"v",
            false,
        )
        .unwrap();
        engine.abort();
        let err = engine.write_chunk(&[0u8; 16]).unwrap_err();
        assert!(matches!(err, EwfError::Aborted));
    }

    #[test]
    fn rotates_into_a_second_segment_when_over_budget() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("image.E01");
        let mut config = Config::default();
        config.max_segment_size = crate::config::MIN_SEGMENT_SIZE;
        let chunk_size = 64 * 1024;
        let mut engine = WriteEngine::open_new(
            base,
            ImageFlavor::Ewf1,
            config,
            chunk_size,
            b"h",
            b"h2",
            b"v",
            false,
        )
        .unwrap();

        let big_chunk_count = (crate::config::MIN_SEGMENT_SIZE as usize / chunk_size) + 4;
        for _ in 0..big_chunk_count {
            engine.write_chunk(&vec![0x11u8; chunk_size]).unwrap();
        }
        assert!(engine.segment_path().to_string_lossy().ends_with("E02"));
        engine.close().unwrap();
    }
}
