// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Forgelink Net — UDP printer discovery, persistent TCP command transport,
// and G-code session control for FlashForge Adventurer-series machines.
// This crate bridges between the shared domain types defined in
// `forgelink-core` and the printers on the wire.

pub mod client;
pub mod commands;
pub mod controller;
pub mod discovery;
pub mod keepalive;
pub mod packet;
pub mod replies;
pub mod transport;

pub use client::PrinterClient;
pub use controller::GCodeController;
pub use discovery::{DiscoveryEvent, DiscoveryMonitor, discover, discover_first, monitor};
pub use keepalive::KeepAliveSupervisor;
pub use replies::{
    EndstopStatus, LocationInfo, PrintProgress, PrinterInfo, TempInfo, ThumbnailImage,
};
pub use transport::{COMMAND_PORT, CommandClass, ReplyPolicy, TcpTransport};
