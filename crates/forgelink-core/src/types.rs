// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the forgelink printer client.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Printer model families recognised during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrinterModel {
    Ad5x,
    Adventurer5M,
    Adventurer5MPro,
    Adventurer4,
    Adventurer3,
    /// Responded to discovery but the name matched no known family.
    Unknown,
}

impl PrinterModel {
    /// Human-readable model name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Ad5x => "AD5X",
            Self::Adventurer5M => "Adventurer 5M",
            Self::Adventurer5MPro => "Adventurer 5M Pro",
            Self::Adventurer4 => "Adventurer 4",
            Self::Adventurer3 => "Adventurer 3",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for PrinterModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Which discovery wire format the printer answered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolFormat {
    /// 276-byte response (5M-generation firmware).
    Modern,
    /// 140-byte response (Adventurer 3/4-generation firmware).
    Legacy,
}

/// Printer state reported in the discovery response status field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrinterStatus {
    Ready,
    Busy,
    Error,
    Unknown,
}

impl PrinterStatus {
    /// Map the wire status code to a state.
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => Self::Ready,
            1 => Self::Busy,
            2 => Self::Error,
            _ => Self::Unknown,
        }
    }
}

/// A printer located on the local network via UDP discovery.
///
/// Identity is `(ip_address, command_port)`; when the same printer answers
/// in both wire formats the Modern record wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredPrinter {
    pub model: PrinterModel,
    pub protocol: ProtocolFormat,
    pub name: String,
    pub ip_address: IpAddr,
    /// TCP port accepting the command protocol (normally 8899).
    pub command_port: u16,
    /// Only present in Modern responses.
    pub serial_number: Option<String>,
    /// Only present in Modern responses.
    pub event_port: Option<u16>,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Only present in Modern responses.
    pub product_type: Option<u16>,
    /// Raw status field from the wire.
    pub status_code: u16,
    pub status: PrinterStatus,
}

impl DiscoveredPrinter {
    /// Dedup key: a printer is identified by where its command channel lives.
    pub fn identity(&self) -> (IpAddr, u16) {
        (self.ip_address, self.command_port)
    }
}
