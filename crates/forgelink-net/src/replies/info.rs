// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device identity (~M115) and head position (~M114) decoding.

/// Identity block reported by `~M115`.
///
/// The reply is a fixed ordinal sequence of labelled lines; a missing or
/// mislabelled line fails the whole decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrinterInfo {
    pub type_name: String,
    pub name: String,
    pub firmware_version: String,
    pub serial_number: String,
    /// Build volume line, kept verbatim (e.g. `X:220 Y:220 Z:220`).
    pub dimensions: String,
    pub tool_count: u32,
    pub mac_address: String,
}

impl PrinterInfo {
    pub fn parse(reply: &str) -> Option<Self> {
        let lines: Vec<&str> = reply.lines().collect();
        Some(Self {
            type_name: label_value(lines.get(1)?, "Machine Type:")?,
            name: label_value(lines.get(2)?, "Machine Name:")?,
            firmware_version: label_value(lines.get(3)?, "Firmware:")?,
            serial_number: label_value(lines.get(4)?, "SN:")?,
            dimensions: lines.get(5)?.trim().to_string(),
            tool_count: label_value(lines.get(6)?, "Tool count:")?.parse().ok()?,
            mac_address: label_value(lines.get(7)?, "Mac Address:")?,
        })
    }

    /// 5M Pro machines expose extra hardware (filament runout sensor,
    /// camera); detected from the reported type name.
    pub fn is_pro(&self) -> bool {
        self.type_name.contains("5M") && self.type_name.contains("Pro")
    }
}

impl std::fmt::Display for PrinterInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}) firmware {} SN {}",
            self.name, self.type_name, self.firmware_version, self.serial_number
        )
    }
}

/// Head position reported by `~M114`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationInfo {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl LocationInfo {
    pub fn parse(reply: &str) -> Option<Self> {
        // Line 1: "X:102.33 Y:110.1 Z:35.6 A:0 B:0" — A/B are ignored.
        let line = reply.lines().nth(1)?;
        let mut x = None;
        let mut y = None;
        let mut z = None;
        for token in line.split_whitespace() {
            if let Some(v) = token.strip_prefix("X:") {
                x = Some(v.parse().ok()?);
            } else if let Some(v) = token.strip_prefix("Y:") {
                y = Some(v.parse().ok()?);
            } else if let Some(v) = token.strip_prefix("Z:") {
                z = Some(v.parse().ok()?);
            }
        }
        Some(Self { x: x?, y: y?, z: z? })
    }
}

impl std::fmt::Display for LocationInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "X:{} Y:{} Z:{}", self.x, self.y, self.z)
    }
}

/// Strip a fixed label prefix and return the trimmed remainder.
fn label_value(line: &str, label: &str) -> Option<String> {
    line.trim()
        .strip_prefix(label)
        .map(|value| value.trim().to_string())
}
