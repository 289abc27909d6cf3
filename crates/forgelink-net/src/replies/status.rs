// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Machine state (~M119) and job progress (~M27) decoding.

/// Machine-level state embedded in the `~M119` report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineStatus {
    BuildingFromSd,
    BuildingCompleted,
    Paused,
    Ready,
    Busy,
    Unknown,
}

impl MachineStatus {
    /// Substring match over the report value, in fixed check order.
    fn detect(value: &str) -> Self {
        if value.contains("BUILDING_FROM_SD") {
            Self::BuildingFromSd
        } else if value.contains("BUILDING_COMPLETED") {
            Self::BuildingCompleted
        } else if value.contains("PAUSED") {
            Self::Paused
        } else if value.contains("READY") {
            Self::Ready
        } else if value.contains("BUSY") {
            Self::Busy
        } else {
            Self::Unknown
        }
    }
}

/// Motion-system state embedded in the `~M119` report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMode {
    Moving,
    Paused,
    Ready,
    WaitOnTool,
    Homing,
    Unknown,
}

impl MoveMode {
    fn detect(value: &str) -> Self {
        if value.contains("MOVING") {
            Self::Moving
        } else if value.contains("PAUSED") {
            Self::Paused
        } else if value.contains("READY") {
            Self::Ready
        } else if value.contains("WAIT_ON_TOOL") {
            Self::WaitOnTool
        } else if value.contains("HOMING") {
            Self::Homing
        } else {
            Self::Unknown
        }
    }
}

/// Endstop trigger states; -1 when a key is absent from the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endstop {
    pub x_max: i32,
    pub y_max: i32,
    pub z_min: i32,
}

/// The `Status S:.. L:.. J:.. F:..` flag block; -1 when a key is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFlags {
    pub s: i32,
    pub l: i32,
    pub j: i32,
    pub f: i32,
}

/// Decoded `~M119` report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndstopStatus {
    pub endstop: Endstop,
    pub machine_status: MachineStatus,
    pub move_mode: MoveMode,
    pub flags: StatusFlags,
    pub led_enabled: bool,
    pub current_file: Option<String>,
}

impl EndstopStatus {
    pub fn parse(reply: &str) -> Option<Self> {
        let lines: Vec<&str> = reply.lines().collect();

        let endstop_line = lines.get(1)?.trim();
        if !endstop_line.starts_with("Endstop") {
            return None;
        }
        let endstop = Endstop {
            x_max: key_value(endstop_line, "X-max:"),
            y_max: key_value(endstop_line, "Y-max:"),
            z_min: key_value(endstop_line, "Z-min:"),
        };

        let machine_status =
            MachineStatus::detect(lines.get(2)?.trim().strip_prefix("MachineStatus:")?);
        let move_mode = MoveMode::detect(lines.get(3)?.trim().strip_prefix("MoveMode:")?);

        let status_line = lines.get(4)?.trim();
        if !status_line.starts_with("Status") {
            return None;
        }
        let flags = StatusFlags {
            s: key_value(status_line, "S:"),
            l: key_value(status_line, "L:"),
            j: key_value(status_line, "J:"),
            f: key_value(status_line, "F:"),
        };

        let led_value = lines.get(5)?.trim().strip_prefix("LED:")?;
        let led_enabled = led_value.trim().parse::<i32>().ok()? == 1;

        let file_value = lines.get(6)?.trim().strip_prefix("CurrentFile:")?.trim();
        let current_file = (!file_value.is_empty()).then(|| file_value.to_string());

        Some(Self {
            endstop,
            machine_status,
            move_mode,
            flags,
            led_enabled,
            current_file,
        })
    }

    pub fn is_printing(&self) -> bool {
        self.machine_status == MachineStatus::BuildingFromSd
    }

    pub fn is_print_complete(&self) -> bool {
        self.machine_status == MachineStatus::BuildingCompleted
    }

    pub fn is_ready(&self) -> bool {
        self.machine_status == MachineStatus::Ready && self.move_mode == MoveMode::Ready
    }

    pub fn is_paused(&self) -> bool {
        self.machine_status == MachineStatus::Paused || self.move_mode == MoveMode::Paused
    }
}

/// Job progress reported by `~M27`: SD byte counter plus layer counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrintProgress {
    pub sd_current: u64,
    pub sd_total: u64,
    pub layer_current: u32,
    pub layer_total: u32,
}

impl PrintProgress {
    pub fn parse(reply: &str) -> Option<Self> {
        let lines: Vec<&str> = reply.lines().collect();

        // "SD printing byte 12345/67890"
        let sd = lines.get(1)?.trim().strip_prefix("SD printing byte ")?;
        let (sd_current, sd_total) = split_pair(sd)?;

        // "Layer: 10/250"
        let layer = lines.get(2)?.trim().strip_prefix("Layer:")?;
        let (layer_current, layer_total) = split_pair(layer)?;

        Some(Self {
            sd_current,
            sd_total,
            layer_current,
            layer_total,
        })
    }

    /// Completion percentage from the layer counter, clamped to 0..=100.
    /// `None` when the firmware has not reported a layer total yet.
    pub fn percent(&self) -> Option<u8> {
        if self.layer_total == 0 {
            return None;
        }
        let ratio = f64::from(self.layer_current) / f64::from(self.layer_total) * 100.0;
        Some(ratio.clamp(0.0, 100.0).round() as u8)
    }

    pub fn layer_progress(&self) -> (u32, u32) {
        (self.layer_current, self.layer_total)
    }

    pub fn sd_progress(&self) -> (u64, u64) {
        (self.sd_current, self.sd_total)
    }
}

/// Parse a `current/total` pair.
fn split_pair<T: std::str::FromStr>(raw: &str) -> Option<(T, T)> {
    let (current, total) = raw.split_once('/')?;
    Some((
        current.trim().parse().ok()?,
        total.trim().parse().ok()?,
    ))
}

/// Find `key` and parse the digit run following it; -1 when the key is
/// missing or carries no digits.
fn key_value(line: &str, key: &str) -> i32 {
    let Some(pos) = line.find(key) else {
        return -1;
    };
    let rest = &line[pos + key.len()..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if end == 0 {
        return -1;
    }
    rest[..end].parse().unwrap_or(-1)
}
