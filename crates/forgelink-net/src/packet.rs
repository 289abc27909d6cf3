// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Discovery datagram decoding. Printers answer a probe with one of two
// fixed-layout binary formats distinguished solely by total length:
// 276 bytes (Modern, 5M generation) or 140 bytes (Legacy, Adventurer 3/4
// generation). Multi-byte integers are big-endian; names are NUL-padded
// UTF-8 fields.

use forgelink_core::error::{FlashForgeError, Result};
use forgelink_core::types::{DiscoveredPrinter, PrinterModel, PrinterStatus, ProtocolFormat};
use std::net::IpAddr;
use tracing::{debug, warn};

/// Exact length of a Modern discovery response.
pub const MODERN_RESPONSE_SIZE: usize = 276;
/// Exact length of a Legacy discovery response.
pub const LEGACY_RESPONSE_SIZE: usize = 140;

/// Product type reported by 5M-family machines.
const PRODUCT_TYPE_5M: u16 = 0x5A02;

// Modern layout.
const MODERN_NAME_RANGE: std::ops::Range<usize> = 0x00..0x84;
const MODERN_COMMAND_PORT: usize = 0x84;
const MODERN_VENDOR_ID: usize = 0x86;
const MODERN_PRODUCT_ID: usize = 0x88;
const MODERN_PRODUCT_TYPE: usize = 0x8C;
const MODERN_EVENT_PORT: usize = 0x8E;
const MODERN_STATUS_CODE: usize = 0x90;
const MODERN_SERIAL_RANGE: std::ops::Range<usize> = 0x92..0x92 + 130;

// Legacy layout.
const LEGACY_NAME_RANGE: std::ops::Range<usize> = 0x00..0x80;
const LEGACY_COMMAND_PORT: usize = 0x84;
const LEGACY_VENDOR_ID: usize = 0x86;
const LEGACY_PRODUCT_ID: usize = 0x88;
const LEGACY_STATUS_CODE: usize = 0x8A;

/// Decode a datagram by exact length. Anything that is neither a Modern
/// nor a Legacy response is dropped with a log line; a malformed packet
/// must never abort a discovery session.
pub fn parse_discovery_response(buf: &[u8], addr: IpAddr) -> Option<DiscoveredPrinter> {
    let parsed = match buf.len() {
        MODERN_RESPONSE_SIZE => parse_modern(buf, addr),
        LEGACY_RESPONSE_SIZE => parse_legacy(buf, addr),
        other => {
            debug!(addr = %addr, size = other, "ignoring datagram of unrecognised length");
            return None;
        }
    };
    match parsed {
        Ok(printer) => Some(printer),
        Err(e) => {
            warn!(addr = %addr, error = %e, "discarding malformed discovery response");
            None
        }
    }
}

/// Decode a 276-byte Modern response.
pub fn parse_modern(buf: &[u8], addr: IpAddr) -> Result<DiscoveredPrinter> {
    if buf.len() < MODERN_RESPONSE_SIZE {
        return Err(FlashForgeError::InvalidResponse {
            size: buf.len(),
            addr: addr.to_string(),
        });
    }

    let name = field_string(&buf[MODERN_NAME_RANGE]);
    let product_type = be_u16(buf, MODERN_PRODUCT_TYPE);
    let status_code = be_u16(buf, MODERN_STATUS_CODE);
    let serial = field_string(&buf[MODERN_SERIAL_RANGE]);

    let printer = DiscoveredPrinter {
        model: detect_modern_model(&name, product_type),
        protocol: ProtocolFormat::Modern,
        name,
        ip_address: addr,
        command_port: be_u16(buf, MODERN_COMMAND_PORT),
        serial_number: (!serial.is_empty()).then_some(serial),
        event_port: Some(be_u16(buf, MODERN_EVENT_PORT)),
        vendor_id: be_u16(buf, MODERN_VENDOR_ID),
        product_id: be_u16(buf, MODERN_PRODUCT_ID),
        product_type: Some(product_type),
        status_code,
        status: PrinterStatus::from_code(status_code),
    };
    debug!(addr = %addr, name = %printer.name, model = %printer.model, "parsed Modern response");
    Ok(printer)
}

/// Decode a 140-byte Legacy response.
pub fn parse_legacy(buf: &[u8], addr: IpAddr) -> Result<DiscoveredPrinter> {
    if buf.len() < LEGACY_RESPONSE_SIZE {
        return Err(FlashForgeError::InvalidResponse {
            size: buf.len(),
            addr: addr.to_string(),
        });
    }

    let name = field_string(&buf[LEGACY_NAME_RANGE]);
    let status_code = be_u16(buf, LEGACY_STATUS_CODE);

    let printer = DiscoveredPrinter {
        model: detect_legacy_model(&name),
        protocol: ProtocolFormat::Legacy,
        name,
        ip_address: addr,
        command_port: be_u16(buf, LEGACY_COMMAND_PORT),
        serial_number: None,
        event_port: None,
        vendor_id: be_u16(buf, LEGACY_VENDOR_ID),
        product_id: be_u16(buf, LEGACY_PRODUCT_ID),
        product_type: None,
        status_code,
        status: PrinterStatus::from_code(status_code),
    };
    debug!(addr = %addr, name = %printer.name, model = %printer.model, "parsed Legacy response");
    Ok(printer)
}

/// NUL-padded UTF-8 field: truncate at the first NUL, replace invalid
/// sequences rather than failing.
fn field_string(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn be_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

/// Model detection for Modern responses. Matching is case-sensitive: the
/// firmware emits fixed product names, and a non-matching case means an
/// unrecognised device, not a formatting variation.
fn detect_modern_model(name: &str, product_type: u16) -> PrinterModel {
    if name.contains("AD5X") {
        return PrinterModel::Ad5x;
    }
    if product_type == PRODUCT_TYPE_5M && name.contains("5M") {
        if name.contains("Pro") {
            return PrinterModel::Adventurer5MPro;
        }
        return PrinterModel::Adventurer5M;
    }
    PrinterModel::Unknown
}

/// Model detection for Legacy responses (name substrings only; the Legacy
/// layout has no product type field).
fn detect_legacy_model(name: &str) -> PrinterModel {
    const AD4: [&str; 3] = ["Adventurer 4", "Adventurer4", "AD4"];
    const AD3: [&str; 3] = ["Adventurer 3", "Adventurer3", "AD3"];
    if AD4.iter().any(|needle| name.contains(needle)) {
        return PrinterModel::Adventurer4;
    }
    if AD3.iter().any(|needle| name.contains(needle)) {
        return PrinterModel::Adventurer3;
    }
    PrinterModel::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn test_addr() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50))
    }

    fn modern_response(name: &str, product_type: u16, status_code: u16) -> Vec<u8> {
        let mut buf = vec![0u8; MODERN_RESPONSE_SIZE];
        buf[..name.len()].copy_from_slice(name.as_bytes());
        buf[MODERN_COMMAND_PORT..MODERN_COMMAND_PORT + 2].copy_from_slice(&8899u16.to_be_bytes());
        buf[MODERN_VENDOR_ID..MODERN_VENDOR_ID + 2].copy_from_slice(&0x2B71u16.to_be_bytes());
        buf[MODERN_PRODUCT_ID..MODERN_PRODUCT_ID + 2].copy_from_slice(&0x0001u16.to_be_bytes());
        buf[MODERN_PRODUCT_TYPE..MODERN_PRODUCT_TYPE + 2]
            .copy_from_slice(&product_type.to_be_bytes());
        buf[MODERN_EVENT_PORT..MODERN_EVENT_PORT + 2].copy_from_slice(&8898u16.to_be_bytes());
        buf[MODERN_STATUS_CODE..MODERN_STATUS_CODE + 2].copy_from_slice(&status_code.to_be_bytes());
        let serial = b"SN5MPRO9001";
        buf[0x92..0x92 + serial.len()].copy_from_slice(serial);
        buf
    }

    fn legacy_response(name: &str, status_code: u16) -> Vec<u8> {
        let mut buf = vec![0u8; LEGACY_RESPONSE_SIZE];
        buf[..name.len()].copy_from_slice(name.as_bytes());
        buf[LEGACY_COMMAND_PORT..LEGACY_COMMAND_PORT + 2].copy_from_slice(&8899u16.to_be_bytes());
        buf[LEGACY_VENDOR_ID..LEGACY_VENDOR_ID + 2].copy_from_slice(&0x2B71u16.to_be_bytes());
        buf[LEGACY_PRODUCT_ID..LEGACY_PRODUCT_ID + 2].copy_from_slice(&0x0002u16.to_be_bytes());
        buf[LEGACY_STATUS_CODE..LEGACY_STATUS_CODE + 2].copy_from_slice(&status_code.to_be_bytes());
        buf
    }

    #[test]
    fn dispatch_accepts_only_exact_lengths() {
        for len in [0, 1, 139, 141, 275, 277, 400] {
            let buf = vec![0u8; len];
            assert!(
                parse_discovery_response(&buf, test_addr()).is_none(),
                "length {len} must not decode"
            );
        }
    }

    #[test]
    fn modern_response_decodes_every_field() {
        let buf = modern_response("Adventurer 5M Pro", PRODUCT_TYPE_5M, 0);
        let printer = parse_discovery_response(&buf, test_addr()).unwrap();
        assert_eq!(printer.protocol, ProtocolFormat::Modern);
        assert_eq!(printer.model, PrinterModel::Adventurer5MPro);
        assert_eq!(printer.name, "Adventurer 5M Pro");
        assert_eq!(printer.command_port, 8899);
        assert_eq!(printer.event_port, Some(8898));
        assert_eq!(printer.vendor_id, 0x2B71);
        assert_eq!(printer.product_id, 0x0001);
        assert_eq!(printer.product_type, Some(PRODUCT_TYPE_5M));
        assert_eq!(printer.serial_number.as_deref(), Some("SN5MPRO9001"));
        assert_eq!(printer.status, PrinterStatus::Ready);
    }

    #[test]
    fn legacy_response_decodes_without_modern_fields() {
        let buf = legacy_response("Adventurer 4", 1);
        let printer = parse_discovery_response(&buf, test_addr()).unwrap();
        assert_eq!(printer.protocol, ProtocolFormat::Legacy);
        assert_eq!(printer.model, PrinterModel::Adventurer4);
        assert_eq!(printer.serial_number, None);
        assert_eq!(printer.event_port, None);
        assert_eq!(printer.product_type, None);
        assert_eq!(printer.status, PrinterStatus::Busy);
    }

    #[test]
    fn short_buffer_reports_size_and_address() {
        let err = parse_modern(&[0u8; 100], test_addr()).unwrap_err();
        match err {
            FlashForgeError::InvalidResponse { size, addr } => {
                assert_eq!(size, 100);
                assert_eq!(addr, "192.168.1.50");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(parse_legacy(&[0u8; 139], test_addr()).is_err());
    }

    #[test]
    fn names_truncate_at_first_nul() {
        let mut buf = modern_response("Adventurer 5M", PRODUCT_TYPE_5M, 0);
        // Garbage beyond the terminator must not leak into the name.
        buf[0x20] = 0xFF;
        let printer = parse_modern(&buf, test_addr()).unwrap();
        assert_eq!(printer.name, "Adventurer 5M");
    }

    #[test]
    fn modern_model_detection_is_case_sensitive() {
        assert_eq!(detect_modern_model("AD5X", 0x1234), PrinterModel::Ad5x);
        assert_eq!(detect_modern_model("ad5x", 0x1234), PrinterModel::Unknown);
        assert_eq!(
            detect_modern_model("Adventurer 5M Pro", PRODUCT_TYPE_5M),
            PrinterModel::Adventurer5MPro
        );
        assert_eq!(
            detect_modern_model("Adventurer 5M", PRODUCT_TYPE_5M),
            PrinterModel::Adventurer5M
        );
        // Right name, wrong product type.
        assert_eq!(
            detect_modern_model("Adventurer 5M Pro", 0x0001),
            PrinterModel::Unknown
        );
        assert_eq!(
            detect_modern_model("adventurer 5m", PRODUCT_TYPE_5M),
            PrinterModel::Unknown
        );
    }

    #[test]
    fn legacy_model_detection_accepts_known_spellings() {
        for name in ["Adventurer 4", "Adventurer4", "My AD4"] {
            assert_eq!(detect_legacy_model(name), PrinterModel::Adventurer4);
        }
        for name in ["Adventurer 3", "Adventurer3", "AD3-Lite"] {
            assert_eq!(detect_legacy_model(name), PrinterModel::Adventurer3);
        }
        assert_eq!(detect_legacy_model("adventurer 4"), PrinterModel::Unknown);
        assert_eq!(detect_legacy_model("Dreamer"), PrinterModel::Unknown);
    }

    #[test]
    fn unknown_status_codes_survive_decoding() {
        let buf = legacy_response("Adventurer 3", 7);
        let printer = parse_legacy(&buf, test_addr()).unwrap();
        assert_eq!(printer.status_code, 7);
        assert_eq!(printer.status, PrinterStatus::Unknown);
    }

    #[test]
    fn empty_serial_field_becomes_none() {
        let mut buf = modern_response("Adventurer 5M", PRODUCT_TYPE_5M, 0);
        for b in &mut buf[0x92..0x92 + 130] {
            *b = 0;
        }
        let printer = parse_modern(&buf, test_addr()).unwrap();
        assert_eq!(printer.serial_number, None);
    }
}
