// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for forgelink.

use thiserror::Error;

/// Top-level error type for all forgelink operations.
#[derive(Debug, Error)]
pub enum FlashForgeError {
    // -- Discovery errors --
    #[error("Invalid response size: {size} bytes from {addr}")]
    InvalidResponse { size: usize, addr: String },

    #[error("socket creation failed: {0}")]
    SocketCreation(String),

    #[error("Discovery timeout after {timeout_ms}ms")]
    DiscoveryTimeout { timeout_ms: u64 },

    // -- Transport errors --
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("login failed: {0}")]
    Login(String),

    #[error("command dispatch failed: {0}")]
    Dispatch(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FlashForgeError>;
