// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Temperature report (~M105) decoding. Firmware generations label the
// extruder segment differently ("T0:", "T):" or "T:"), so the layout is
// captured as an explicit variant instead of a normalising regex.

/// Which extruder-segment layout the firmware emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtruderLabel {
    /// `T0:` — indexed tool (5M generation).
    Indexed,
    /// `T):` — glitched variant seen on some Adventurer 4 builds.
    Parenthesized,
    /// `T:` — plain single-tool label.
    Plain,
}

impl ExtruderLabel {
    /// Match a report token against the known layouts, longest label first.
    fn strip(token: &str) -> Option<(Self, &str)> {
        if let Some(rest) = token.strip_prefix("T0:") {
            return Some((Self::Indexed, rest));
        }
        if let Some(rest) = token.strip_prefix("T):") {
            return Some((Self::Parenthesized, rest));
        }
        token.strip_prefix("T:").map(|rest| (Self::Plain, rest))
    }
}

/// One current/set pair from the report. `set` is absent when the segment
/// carries only a current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempReading {
    pub current: i32,
    pub set: Option<i32>,
}

impl TempReading {
    /// Decode a `current/set` segment value. Some firmware appends a
    /// spurious `/0.0` which is dropped before splitting; fractional
    /// digits are truncated.
    fn parse(raw: &str) -> Option<Self> {
        let cleaned = raw.replacen("/0.0", "", 1);
        match cleaned.split_once('/') {
            Some((current, set)) => Some(Self {
                current: parse_temp_value(current)?,
                set: Some(parse_temp_value(set)?),
            }),
            None => Some(Self {
                current: parse_temp_value(&cleaned)?,
                set: None,
            }),
        }
    }

    pub fn set_or_zero(&self) -> i32 {
        self.set.unwrap_or(0)
    }
}

/// Decoded `~M105` report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempInfo {
    pub extruder: TempReading,
    pub extruder_label: ExtruderLabel,
    pub bed: TempReading,
}

impl TempInfo {
    /// Decode the second reply line, e.g. `T0:210/210 B:60/60 @:0 B@:0`.
    /// A missing extruder segment fails the decode; a missing bed segment
    /// defaults to 0/0 (bedless machines).
    pub fn parse(reply: &str) -> Option<Self> {
        let line = reply.lines().nth(1)?;
        let mut extruder = None;
        let mut bed = None;
        for token in line.split_whitespace() {
            if extruder.is_none() {
                if let Some((label, rest)) = ExtruderLabel::strip(token) {
                    extruder = Some((label, TempReading::parse(rest)?));
                    continue;
                }
            }
            if bed.is_none() {
                if let Some(rest) = token.strip_prefix("B:") {
                    bed = Some(TempReading::parse(rest)?);
                }
            }
        }
        let (extruder_label, extruder) = extruder?;
        Some(Self {
            extruder,
            extruder_label,
            bed: bed.unwrap_or(TempReading {
                current: 0,
                set: Some(0),
            }),
        })
    }

    /// Safe-to-touch threshold used after jobs finish.
    pub fn is_cooled(&self) -> bool {
        self.bed.current <= 40 && self.extruder.current <= 200
    }

    /// Sanity band for continuing a job.
    pub fn are_temps_safe(&self) -> bool {
        self.extruder.current < 250 && self.bed.current < 100
    }
}

/// Truncate the fractional part, then parse the integral digits.
fn parse_temp_value(raw: &str) -> Option<i32> {
    let trimmed = raw.trim();
    let head = match trimmed.split_once('.') {
        Some((head, _)) => head,
        None => trimmed,
    };
    head.parse().ok()
}
