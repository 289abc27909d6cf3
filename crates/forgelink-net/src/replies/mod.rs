// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pure decoders for command replies. Every decoder takes the complete
// reply (echo line included) and returns `None` on any malformed input —
// a decode never yields a partially-populated value and never errors.

pub mod files;
pub mod info;
pub mod status;
pub mod temp;

pub use files::{ThumbnailImage, decode_file_list};
pub use info::{LocationInfo, PrinterInfo};
pub use status::{EndstopStatus, MachineStatus, MoveMode, PrintProgress};
pub use temp::{ExtruderLabel, TempInfo, TempReading};
