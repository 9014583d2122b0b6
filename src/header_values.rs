//! Header-value store: opaque key→string map persisted in `header` /
//! `header2` / `xheader` sections (spec §3 "Header values", §9 design
//! note on preferred-source order).
//!
//! Ref: `forensicxlab-exhume_body::ewf::EwfHeaderSection` — the
//! `decode`/`table_to_map`/`parse_metadata` trio is kept close to the
//! original (ASCII-first then UTF-16LE decode, tab-separated schema/value
//! rows, tolerant of a leading BOM or blank line), generalized to merge
//! three sources with a preferred-read order instead of a single blob.

use std::collections::HashMap;

use crate::compression::{self, CompressionLevel};

/// Canonical display order for well-known identifiers, matching
/// `forensicxlab-exhume_body::ewf::EWF::print_info`.
pub const CANONICAL_KEY_ORDER: &[&str] = &[
    "c", "cn", "n", "en", "a", "e", "ex", "t", "nt", "av", "ov", "m", "u", "p", "r",
];

/// Which section a header value was read from, used to implement the
/// preferred-source order `xheader > header2 > header` on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Source {
    Header,
    Header2,
    Xheader,
}

/// One logical key→string map, backed by however many of the three
/// sections were actually present on disk.
#[derive(Debug, Default, Clone)]
pub struct HeaderValueStore {
    map: HashMap<String, String>,
    sources: HashMap<String, Source>,
}

impl HeaderValueStore {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.sources.insert(key.clone(), Source::Header2);
        self.map.insert(key, value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.map.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Merges values decoded from `header`, `header2` or `xheader` into
    /// this store. Later merges at a higher-priority source win on key
    /// collision, per the `xheader > header2 > header` order spec §9
    /// specifies.
    fn merge_from(&mut self, values: HashMap<String, String>, source: Source) {
        for (k, v) in values {
            let incumbent_wins = self
                .sources
                .get(&k)
                .map(|existing| *existing > source)
                .unwrap_or(false);
            if !incumbent_wins {
                self.sources.insert(k.clone(), source);
                self.map.insert(k, v);
            }
        }
    }

    pub fn merge_header(&mut self, raw: &[u8]) {
        self.merge_from(parse_metadata(raw), Source::Header);
    }

    pub fn merge_header2(&mut self, raw: &[u8]) {
        self.merge_from(parse_metadata(raw), Source::Header2);
    }

    pub fn merge_xheader(&mut self, raw: &[u8]) {
        self.merge_from(parse_metadata(raw), Source::Xheader);
    }

    /// Inflates a compressed `header`/`header2`/`xheader` section payload
    /// and parses it with [`parse_metadata`].
    pub fn decode_section(compressed: &[u8]) -> crate::error::Result<HashMap<String, String>> {
        let data = compression::uncompress(compressed, compressed.len() * 4)?;
        Ok(parse_metadata(&data))
    }

    /// Serializes this store into the tab-separated schema/value format
    /// used by `header`/`header2`, then zlib-compresses it at `level`.
    /// Emitted for all three section kinds on write, per spec §9's
    /// compatibility note — `header`/`header2` carry the ASCII/UTF-16
    /// forms, `xheader` carries the same table (a deliberate
    /// simplification versus the real format's XML `xheader`, recorded
    /// in DESIGN.md).
    pub fn encode_section(&self, level: CompressionLevel) -> crate::error::Result<Vec<u8>> {
        let mut keys: Vec<&str> = self.map.keys().map(|s| s.as_str()).collect();
        keys.sort();
        let key_row = keys.join("\t");
        let value_row: Vec<&str> = keys.iter().map(|k| self.map[*k].as_str()).collect();
        let value_row = value_row.join("\t");
        let table = format!("1\n{}\n{}\n", key_row, value_row);
        compression::compress(table.as_bytes(), level)
    }
}

/// Decodes raw bytes as ASCII/UTF-8 first, falling back to UTF-16LE, just
/// like `forensicxlab-exhume_body::ewf::EwfHeaderSection::decode`.
fn decode(raw: &[u8]) -> String {
    if let Ok(txt) = String::from_utf8(raw.to_vec()) {
        return txt;
    }
    if raw.len() % 2 == 0 {
        let utf16: Vec<u16> = raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        if let Ok(txt) = String::from_utf16(&utf16) {
            return txt;
        }
    }
    String::new()
}

fn table_to_map(keys: &str, vals: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (k, v) in keys.split('\t').zip(vals.split('\t')) {
        map.insert(
            k.trim_matches('\0').to_string(),
            v.trim_matches('\0').to_string(),
        );
    }
    map
}

/// Robust parser tolerant of a leading BOM, a blank line before the
/// table, and the legacy "id\\tvalue per line" layout — ported from
/// `forensicxlab-exhume_body::ewf::EwfHeaderSection::parse_metadata`.
fn parse_metadata(raw: &[u8]) -> HashMap<String, String> {
    let txt = decode(raw);
    let mut lines: Vec<&str> = txt
        .split(|c| c == '\n' || c == '\r')
        .filter(|l| !l.trim().is_empty())
        .collect();

    if let Some(first) = lines.first_mut() {
        *first = first.trim_start_matches('\u{FEFF}');
    }

    for i in 0..lines.len().saturating_sub(1) {
        if lines[i].contains('\t') && lines[i + 1].contains('\t') {
            return table_to_map(lines[i], lines[i + 1]);
        }
    }

    let mut map = HashMap::new();
    for l in lines {
        if let Some((k, v)) = l.split_once('\t') {
            map.insert(
                k.trim_matches('\0').to_string(),
                v.trim_matches('\0').to_string(),
            );
        }
    }
    map
}

/// Maps a short identifier to its human-readable label, matching
/// `forensicxlab-exhume_body::ewf::EWF::print_info::pretty`.
pub fn pretty_label(id: &str) -> &str {
    match id {
        "c" | "cn" => "Case Number",
        "n" | "en" => "Evidence Number",
        "a" => "Description",
        "e" | "ex" => "Examiner",
        "t" | "nt" => "Notes",
        "av" => "Application Version",
        "ov" => "OS Version",
        "m" => "Acquisition Date",
        "u" => "System Date",
        "p" => "Password Hash",
        "r" => "Reserved",
        _ => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_with_xheader_precedence() {
        let mut store = HeaderValueStore::default();
        store.merge_from(
            [("c".to_string(), "from-header".to_string())].into(),
            Source::Header,
        );
        store.merge_from(
            [("c".to_string(), "from-xheader".to_string())].into(),
            Source::Xheader,
        );
        assert_eq!(store.get("c"), Some("from-xheader"));

        // A later, lower-priority merge must not clobber the winner.
        store.merge_from(
            [("c".to_string(), "from-header2-late".to_string())].into(),
            Source::Header2,
        );
        assert_eq!(store.get("c"), Some("from-xheader"));
    }

    #[test]
    fn parse_metadata_tolerates_bom_and_blank_lines() {
        let text = "\u{FEFF}\n1\nc\tn\ncasenum\tevidencenum\n";
        let map = parse_metadata(text.as_bytes());
        assert_eq!(map.get("c").map(String::as_str), Some("casenum"));
        assert_eq!(map.get("n").map(String::as_str), Some("evidencenum"));
    }

    #[test]
    fn encode_then_decode_roundtrips_values() {
        let mut store = HeaderValueStore::default();
        store.insert("c", "2024-CASE-01");
        store.insert("en", "Exhibit-1");
        let section = store.encode_section(CompressionLevel::Fast).unwrap();
        let decoded = HeaderValueStore::decode_section(&section).unwrap();
        assert_eq!(decoded.get("c").map(String::as_str), Some("2024-CASE-01"));
        assert_eq!(decoded.get("en").map(String::as_str), Some("Exhibit-1"));
    }
}
