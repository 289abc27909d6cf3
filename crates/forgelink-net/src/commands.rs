// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command vocabulary spoken over the TCP control channel. Every command is
// a tilde-prefixed G/M-code line; the printer acknowledges with a text
// reply terminated by an "ok" marker.

/// Start a control session (must precede any other command).
pub const LOGIN: &str = "~M601 S1";
/// End the control session.
pub const LOGOUT: &str = "~M602";
/// Halt everything immediately.
pub const EMERGENCY_STOP: &str = "~M112";
/// Current job progress (SD byte counter + layer counter).
pub const PRINT_STATUS: &str = "~M27";
/// Endstop, machine-status, and LED state report.
pub const ENDSTOP_INFO: &str = "~M119";
/// Device identity (model, name, firmware, serial, dimensions).
pub const INFO_STATUS: &str = "~M115";
/// Current head position.
pub const POSITION: &str = "~M114";
/// Extruder and bed temperature report.
pub const TEMPERATURE: &str = "~M105";
/// LED strip to full white.
pub const LED_ON: &str = "~M146 r255 g255 b255 F0";
/// LED strip off.
pub const LED_OFF: &str = "~M146 r0 g0 b0 F0";
/// Enable the filament runout sensor (5M Pro only).
pub const RUNOUT_SENSOR_ON: &str = "~M405";
/// Disable the filament runout sensor (5M Pro only).
pub const RUNOUT_SENSOR_OFF: &str = "~M406";
/// List printable files on internal storage.
pub const LIST_LOCAL_FILES: &str = "~M661";
/// Fetch the embedded PNG preview of a stored file (takes a path argument).
pub const GET_THUMBNAIL: &str = "~M662";
/// Trigger the built-in camera.
pub const TAKE_PICTURE: &str = "~M240";
/// Home all axes.
pub const HOME_AXES: &str = "~G28";
/// Absolute positioning mode.
pub const MOVE_MODE_ABSOLUTE: &str = "~G90";
/// Pause the running job.
pub const PAUSE_PRINT: &str = "~M25";
/// Resume a paused job.
pub const RESUME_PRINT: &str = "~M24";
/// Abort the running job.
pub const STOP_PRINT: &str = "~M26";

/// Default extrusion feedrate in mm/min.
pub const DEFAULT_EXTRUDE_FEEDRATE: u32 = 450;

/// Start printing a file from internal storage.
pub fn start_job(file_name: &str) -> String {
    format!("~M23 0:/user/{file_name}")
}

/// Request the thumbnail for a stored file path.
pub fn get_thumbnail(file_path: &str) -> String {
    format!("{GET_THUMBNAIL} {file_path}")
}

/// Set the hot-end target without waiting.
pub fn set_extruder_temp(celsius: u32) -> String {
    format!("~M104 S{celsius}")
}

/// Block machine-side until the hot-end reaches the target.
pub fn wait_extruder_temp(celsius: u32) -> String {
    format!("~M109 S{celsius}")
}

/// Set the bed target without waiting.
pub fn set_bed_temp(celsius: u32) -> String {
    format!("~M140 S{celsius}")
}

/// Block machine-side until the bed reaches the target. Heating uses the
/// `S` form; `R` also waits while cooling down to the target.
pub fn wait_bed_temp(celsius: u32, cooling: bool) -> String {
    if cooling {
        format!("~M190 R{celsius}")
    } else {
        format!("~M190 S{celsius}")
    }
}

/// Linear move to an absolute position.
pub fn move_to(x: f64, y: f64, z: f64, feedrate: u32) -> String {
    format!("~G1 X{x} Y{y} Z{z} F{feedrate}")
}

/// Linear move in the XY plane only.
pub fn move_xy(x: f64, y: f64, feedrate: u32) -> String {
    format!("~G1 X{x} Y{y} F{feedrate}")
}

/// Feed filament through the extruder (negative lengths retract).
pub fn extrude(length_mm: i32, feedrate: u32) -> String {
    format!("~G1 E{length_mm} F{feedrate}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_job_targets_user_storage() {
        assert_eq!(start_job("benchy.3mf"), "~M23 0:/user/benchy.3mf");
    }

    #[test]
    fn thumbnail_request_carries_path() {
        assert_eq!(get_thumbnail("/data/benchy.3mf"), "~M662 /data/benchy.3mf");
    }

    #[test]
    fn bed_wait_switches_between_heat_and_cool_forms() {
        assert_eq!(wait_bed_temp(60, false), "~M190 S60");
        assert_eq!(wait_bed_temp(37, true), "~M190 R37");
    }

    #[test]
    fn moves_format_whole_coordinates_without_decimals() {
        assert_eq!(move_to(105.0, 105.0, 220.0, 9000), "~G1 X105 Y105 Z220 F9000");
        assert_eq!(move_xy(10.5, 20.25, 3000), "~G1 X10.5 Y20.25 F3000");
        assert_eq!(extrude(-3, 450), "~G1 E-3 F450");
    }
}
