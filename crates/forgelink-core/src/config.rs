// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Discovery and transport configuration.

use serde::{Deserialize, Serialize};

/// Tuning for a UDP discovery session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryOptions {
    /// Total receive window per probe round, in milliseconds.
    pub timeout_ms: u64,
    /// Give up early after this long without a valid response.
    pub idle_timeout_ms: u64,
    /// Number of probe rounds before the session ends empty-handed.
    pub max_retries: u32,
    /// Probe the multicast group 225.0.0.9.
    pub use_multicast: bool,
    /// Probe the subnet broadcast address of each local interface.
    pub use_broadcast: bool,
    /// UDP ports to listen on and address probes to.
    pub ports: Vec<u16>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            idle_timeout_ms: 1_500,
            max_retries: 3,
            use_multicast: true,
            use_broadcast: true,
            ports: vec![8899, 19000, 48899],
        }
    }
}

/// Tuning for the TCP command transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportOptions {
    /// Ceiling on establishing the TCP connection, in milliseconds.
    pub connect_timeout_ms: u64,
    /// How long a command waits for the link to become free before
    /// failing with a dispatch error, in milliseconds.
    pub dispatch_wait_ms: u64,
    /// Login handshake attempts before giving up.
    pub login_attempts: u32,
    /// Base interval between keep-alive probes, in milliseconds.
    pub keepalive_base_ms: u64,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            dispatch_wait_ms: 10_000,
            login_attempts: 3,
            keepalive_base_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_defaults_probe_all_standard_ports() {
        let options = DiscoveryOptions::default();
        assert_eq!(options.ports, vec![8899, 19000, 48899]);
        assert!(options.use_multicast);
        assert!(options.use_broadcast);
        assert_eq!(options.timeout_ms, 10_000);
        assert_eq!(options.idle_timeout_ms, 1_500);
        assert_eq!(options.max_retries, 3);
    }

    #[test]
    fn options_survive_serialization() {
        let options = DiscoveryOptions {
            ports: vec![8899],
            use_broadcast: false,
            ..DiscoveryOptions::default()
        };
        let json = serde_json::to_string(&options).unwrap();
        let back: DiscoveryOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ports, vec![8899]);
        assert!(!back.use_broadcast);
        assert!(back.use_multicast);
    }
}
