// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Keep-alive supervision. The printer silently drops control sessions it
// considers idle, and the wire has no heartbeat of its own, so a logged-in
// client probes with a status query. Probes share the ordinary dispatch
// path and therefore never race a foreground command.

use crate::commands;
use crate::transport::TcpTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Interval until the next probe: a struggling link gets probed less
/// often, one extra second per recorded failure.
pub fn probe_interval(base_ms: u64, errors: u32) -> Duration {
    Duration::from_millis(base_ms + u64::from(errors) * 1_000)
}

/// Background probe loop tied to one transport.
///
/// The loop probes first, then sleeps: a session that cannot answer a
/// status query is already dead. One lost probe stops the loop — the next
/// foreground command reconnects and the client starts a fresh supervisor.
pub struct KeepAliveSupervisor {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
    transport: Arc<TcpTransport>,
}

impl KeepAliveSupervisor {
    pub fn start(transport: Arc<TcpTransport>) -> Self {
        let (shutdown, mut stopped) = watch::channel(false);
        let probe_transport = Arc::clone(&transport);
        let handle = tokio::spawn(async move {
            debug!("keep-alive supervisor started");
            loop {
                match probe_transport.send_command(commands::PRINT_STATUS).await {
                    Ok(Some(_)) => probe_transport.record_keepalive_success(),
                    Ok(None) => {
                        let errors = probe_transport.record_keepalive_failure();
                        warn!(errors, "keep-alive probe lost, supervisor stopping");
                        break;
                    }
                    Err(e) => {
                        let errors = probe_transport.record_keepalive_failure();
                        warn!(errors, error = %e, "keep-alive probe failed, supervisor stopping");
                        break;
                    }
                }
                let interval = probe_interval(
                    probe_transport.options().keepalive_base_ms,
                    probe_transport.keepalive_errors(),
                );
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stopped.changed() => {
                        debug!("keep-alive supervisor stopped");
                        break;
                    }
                }
            }
        });
        Self {
            shutdown,
            handle,
            transport,
        }
    }

    /// Cancel the loop; with `logout` a best-effort `~M602` is written
    /// without waiting for a reply.
    pub async fn stop(&self, logout: bool) {
        let _ = self.shutdown.send(true);
        if logout {
            self.transport.fire_and_forget(commands::LOGOUT).await;
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}
