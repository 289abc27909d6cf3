// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stored-file listing (~M661) and thumbnail (~M662) decoding. Both replies
// interleave binary bookkeeping bytes with the useful payload, so decoding
// is a salvage operation: extract what matches, drop the rest.

use forgelink_core::error::Result;
use std::collections::HashSet;
use std::path::Path;

/// File extensions the printer can actually print, longest first so that
/// `.gcode.gx` is not truncated to `.gcode` (nor mistaken for `.gx`).
const KNOWN_EXTENSIONS: [&str; 6] = ["gcode.gx", "gcode", "3mf", "gx", "stl", "obj"];

/// Marker prefix carried by every stored-file entry.
const DATA_PREFIX: &str = "/data/";

/// Extract file names from an `~M661` reply.
///
/// Entries are separated by `::` runs padded with up to two bookkeeping
/// bytes; each useful segment carries `/data/<name>.<ext>`. Unrecognised
/// segments are skipped, repeated names are reported once (in first-seen
/// order), and a reply with no entries decodes to an empty list.
pub fn decode_file_list(reply: &str) -> Vec<String> {
    let Some(start) = reply.find("::") else {
        return Vec::new();
    };

    let mut names = Vec::new();
    let mut seen = HashSet::new();
    for segment in reply[start..].split("::") {
        let Some(pos) = segment.find(DATA_PREFIX) else {
            continue;
        };
        let rest = &segment[pos + DATA_PREFIX.len()..];
        let Some(name) = trim_to_known_extension(rest) else {
            continue;
        };
        if seen.insert(name.to_string()) {
            names.push(name.to_string());
        }
    }
    names
}

/// Cut a segment down to `<name>.<ext>` for the first allow-listed
/// extension found; `None` when no known extension is present.
fn trim_to_known_extension(raw: &str) -> Option<&str> {
    for ext in KNOWN_EXTENSIONS {
        let needle = format!(".{ext}");
        if let Some(pos) = raw.find(needle.as_str()) {
            return Some(&raw[..pos + needle.len()]);
        }
    }
    None
}

/// PNG preview extracted from an `~M662` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailImage {
    pub file_name: String,
    /// Raw PNG bytes, magic included.
    pub data: Vec<u8>,
}

/// Standard 8-byte PNG signature.
const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

impl ThumbnailImage {
    /// Locate the PNG payload: find the textual "ok" acknowledgement, then
    /// the PNG signature anywhere in the remaining bytes. The image runs
    /// from the signature to the end of the reply.
    pub fn parse(reply: &[u8], file_name: &str) -> Option<Self> {
        let ok_pos = find_subslice(reply, b"ok")?;
        let rest = &reply[ok_pos + 2..];
        let png_pos = find_subslice(rest, &PNG_MAGIC)?;
        Some(Self {
            file_name: file_name.to_string(),
            data: rest[png_pos..].to_vec(),
        })
    }

    /// Write the PNG bytes to disk.
    pub fn save_png(&self, path: &Path) -> Result<()> {
        std::fs::write(path, &self.data)?;
        Ok(())
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
