// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer session client: login handshake, typed queries, and session
// teardown over the serialized command transport.

use crate::commands;
use crate::controller::GCodeController;
use crate::keepalive::KeepAliveSupervisor;
use crate::replies::{
    EndstopStatus, LocationInfo, PrintProgress, PrinterInfo, TempInfo, ThumbnailImage,
    decode_file_list,
};
use crate::transport::{COMMAND_PORT, TcpTransport};
use bytes::Bytes;
use forgelink_core::config::TransportOptions;
use forgelink_core::error::{FlashForgeError, Result};
use forgelink_core::types::DiscoveredPrinter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Control session with one printer.
///
/// `login` must succeed before command helpers are useful; afterwards the
/// session stays warm through keep-alive probes and reconnects by itself
/// when the socket dies underneath it.
pub struct PrinterClient {
    transport: Arc<TcpTransport>,
    identity: RwLock<Option<PrinterInfo>>,
    is_pro: AtomicBool,
    logged_in: AtomicBool,
    supervisor: Mutex<Option<KeepAliveSupervisor>>,
}

impl PrinterClient {
    /// Session to `host` on the standard command port.
    pub fn new(host: &str) -> Self {
        Self::with_options(host, COMMAND_PORT, TransportOptions::default())
    }

    /// Session to a discovered printer's advertised command endpoint.
    pub fn for_printer(printer: &DiscoveredPrinter) -> Self {
        Self::with_options(
            &printer.ip_address.to_string(),
            printer.command_port,
            TransportOptions::default(),
        )
    }

    pub fn with_options(host: &str, port: u16, options: TransportOptions) -> Self {
        Self {
            transport: Arc::new(TcpTransport::new(host, port, options)),
            identity: RwLock::new(None),
            is_pro: AtomicBool::new(false),
            logged_in: AtomicBool::new(false),
            supervisor: Mutex::new(None),
        }
    }

    /// Establish the control session.
    ///
    /// Each attempt sends the login command and accepts a reply containing
    /// "ok" unless the firmware reports "Control failed." (another client
    /// may hold the session). Between attempts a logout clears any stale
    /// server-side session, followed by a linear backoff. After the
    /// handshake the printer must identify itself; the identity gates
    /// Pro-only features and the keep-alive loop starts.
    pub async fn login(&self) -> Result<()> {
        let attempts = self.transport.options().login_attempts.max(1);
        for attempt in 1..=attempts {
            match self.transport.send_text(commands::LOGIN).await {
                Ok(Some(reply)) if reply.contains("ok") && !reply.contains("Control failed.") => {
                    info!(addr = %self.transport.addr(), attempt, "control session established");
                    let info = self.get_printer_info().await?.ok_or_else(|| {
                        FlashForgeError::Login("printer did not identify itself".to_string())
                    })?;
                    self.is_pro.store(info.is_pro(), Ordering::Relaxed);
                    info!(identity = %info, pro = info.is_pro(), "printer identified");
                    *self
                        .identity
                        .write()
                        .expect("identity lock poisoned") = Some(info);
                    self.logged_in.store(true, Ordering::Relaxed);
                    self.ensure_supervisor().await;
                    return Ok(());
                }
                Ok(Some(reply)) => {
                    warn!(attempt, reply = reply.trim(), "login rejected");
                }
                Ok(None) => {
                    warn!(attempt, "no reply to login");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "login attempt failed");
                }
            }
            if attempt < attempts {
                let _ = self.transport.send_text(commands::LOGOUT).await;
                tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
            }
        }
        Err(FlashForgeError::Login(format!(
            "no control session after {attempts} attempts"
        )))
    }

    /// End the session: stop the keep-alive loop, best-effort logout,
    /// close the socket.
    pub async fn dispose(&self) {
        self.logged_in.store(false, Ordering::Relaxed);
        if let Some(supervisor) = self.supervisor.lock().await.take() {
            supervisor.stop(true).await;
        }
        self.transport.close().await;
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::Relaxed)
    }

    /// Identity captured at login.
    pub fn printer_info(&self) -> Option<PrinterInfo> {
        self.identity
            .read()
            .expect("identity lock poisoned")
            .clone()
    }

    /// Whether the machine reported itself as a 5M Pro at login.
    pub fn is_pro(&self) -> bool {
        self.is_pro.load(Ordering::Relaxed)
    }

    /// G-code workflow helpers bound to this session.
    pub fn gcode(&self) -> GCodeController<'_> {
        GCodeController::new(self)
    }

    /// Raw command with the reply as text. `Ok(None)` means the exchange
    /// was lost and the link has been reset.
    pub async fn send_text(&self, cmd: &str) -> Result<Option<String>> {
        let reply = self.transport.send_text(cmd).await?;
        if reply.is_some() {
            self.revive_supervisor().await;
        }
        Ok(reply)
    }

    /// Raw command with the reply as bytes.
    pub async fn send_command(&self, cmd: &str) -> Result<Option<Bytes>> {
        let reply = self.transport.send_command(cmd).await?;
        if reply.is_some() {
            self.revive_supervisor().await;
        }
        Ok(reply)
    }

    /// Command that must be positively acknowledged: the reply has to
    /// carry both the echo marker "Received." and "ok".
    pub async fn send_cmd_ok(&self, cmd: &str) -> Result<bool> {
        Ok(self
            .send_text(cmd)
            .await?
            .is_some_and(|reply| reply.contains("Received.") && reply.contains("ok")))
    }

    pub async fn get_printer_info(&self) -> Result<Option<PrinterInfo>> {
        Ok(self
            .send_text(commands::INFO_STATUS)
            .await?
            .and_then(|reply| PrinterInfo::parse(&reply)))
    }

    pub async fn get_temp_info(&self) -> Result<Option<TempInfo>> {
        Ok(self
            .send_text(commands::TEMPERATURE)
            .await?
            .and_then(|reply| TempInfo::parse(&reply)))
    }

    pub async fn get_endstop_status(&self) -> Result<Option<EndstopStatus>> {
        Ok(self
            .send_text(commands::ENDSTOP_INFO)
            .await?
            .and_then(|reply| EndstopStatus::parse(&reply)))
    }

    pub async fn get_print_status(&self) -> Result<Option<PrintProgress>> {
        Ok(self
            .send_text(commands::PRINT_STATUS)
            .await?
            .and_then(|reply| PrintProgress::parse(&reply)))
    }

    pub async fn get_location_info(&self) -> Result<Option<LocationInfo>> {
        Ok(self
            .send_text(commands::POSITION)
            .await?
            .and_then(|reply| LocationInfo::parse(&reply)))
    }

    /// Names of printable files on internal storage (empty when the reply
    /// was lost or carried no entries).
    pub async fn get_file_list(&self) -> Result<Vec<String>> {
        Ok(self
            .send_text(commands::LIST_LOCAL_FILES)
            .await?
            .map(|reply| decode_file_list(&reply))
            .unwrap_or_default())
    }

    /// Fetch the PNG preview embedded in a stored file. The storage path
    /// prefix is added when the caller passes a bare name.
    pub async fn get_thumbnail(&self, file_name: &str) -> Result<Option<ThumbnailImage>> {
        let path = if file_name.starts_with("/data/") {
            file_name.to_string()
        } else {
            format!("/data/{file_name}")
        };
        Ok(self
            .send_command(&commands::get_thumbnail(&path))
            .await?
            .and_then(|bytes| ThumbnailImage::parse(&bytes, file_name)))
    }

    /// Enable the filament runout sensor. Only the 5M Pro has one; on
    /// other machines this is a no-op reporting `false`.
    pub async fn turn_runout_sensor_on(&self) -> Result<bool> {
        if !self.is_pro() {
            warn!("runout sensor control ignored: not a 5M Pro");
            return Ok(false);
        }
        self.send_cmd_ok(commands::RUNOUT_SENSOR_ON).await
    }

    /// Disable the filament runout sensor (5M Pro only).
    pub async fn turn_runout_sensor_off(&self) -> Result<bool> {
        if !self.is_pro() {
            warn!("runout sensor control ignored: not a 5M Pro");
            return Ok(false);
        }
        self.send_cmd_ok(commands::RUNOUT_SENSOR_OFF).await
    }

    /// Start (or restart) the keep-alive loop.
    async fn ensure_supervisor(&self) {
        let mut slot = self.supervisor.lock().await;
        let running = slot.as_ref().is_some_and(KeepAliveSupervisor::is_running);
        if !running {
            *slot = Some(KeepAliveSupervisor::start(Arc::clone(&self.transport)));
        }
    }

    /// A dead probe loop stops itself; once a foreground command proves
    /// the link is back, bring the loop back too.
    async fn revive_supervisor(&self) {
        if self.is_logged_in() {
            self.ensure_supervisor().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Counts {
        logins: AtomicU32,
        logouts: AtomicU32,
        runout_on: AtomicU32,
    }

    fn respond(cmd: &str, login_ok: bool, type_name: &str, counts: &Counts) -> String {
        if cmd.contains("M601") {
            counts.logins.fetch_add(1, Ordering::Relaxed);
            return if login_ok {
                "CMD M601 Received.\nControl Success.\nok\n".to_string()
            } else {
                "CMD M601 Received.\nControl failed.\nok\n".to_string()
            };
        }
        if cmd.contains("M602") {
            counts.logouts.fetch_add(1, Ordering::Relaxed);
            return "CMD M602 Received.\nok\n".to_string();
        }
        if cmd.contains("M115") {
            return format!(
                "CMD M115 Received.\nMachine Type: {type_name}\nMachine Name: TestPrinter\n\
                 Firmware: V1.0.0\nSN: SN001\nX:220 Y:220 Z:220\nTool count: 1\n\
                 Mac Address: AA:BB:CC:DD:EE:FF\nok\n"
            );
        }
        if cmd.contains("M405") {
            counts.runout_on.fetch_add(1, Ordering::Relaxed);
            return "CMD M405 Received.\nok\n".to_string();
        }
        if cmd.contains("M105") {
            return "CMD M105 Received.\nT0:210/210 B:60/60 @:0 B@:0\nok\n".to_string();
        }
        if cmd.contains("M27") {
            return "CMD M27 Received.\nSD printing byte 50/100\nLayer: 25/50\nok\n".to_string();
        }
        if cmd.contains("M661") {
            return "CMD M661 Received.\nok\nD99::!!/data/benchy.3mf::??/data/cube.gcode\n"
                .to_string();
        }
        "CMD Received.\nok\n".to_string()
    }

    /// Line-oriented fake printer.
    async fn spawn_printer(login_ok: bool, type_name: &'static str, counts: Arc<Counts>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let counts = Arc::clone(&counts);
                tokio::spawn(async move {
                    let mut pending = Vec::new();
                    let mut scratch = [0u8; 512];
                    loop {
                        match socket.read(&mut scratch).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => pending.extend_from_slice(&scratch[..n]),
                        }
                        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                            let line: Vec<u8> = pending.drain(..=pos).collect();
                            let cmd = String::from_utf8_lossy(&line).trim().to_string();
                            if cmd.is_empty() {
                                continue;
                            }
                            let reply = respond(&cmd, login_ok, type_name, &counts);
                            if socket.write_all(reply.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn login_captures_identity_and_capabilities() {
        let counts = Arc::new(Counts::default());
        let port = spawn_printer(true, "Adventurer 5M Pro", Arc::clone(&counts)).await;
        let client = PrinterClient::with_options("127.0.0.1", port, TransportOptions::default());

        client.login().await.unwrap();
        assert!(client.is_logged_in());
        assert!(client.is_pro());
        let info = client.printer_info().unwrap();
        assert_eq!(info.name, "TestPrinter");
        assert_eq!(counts.logins.load(Ordering::Relaxed), 1);

        let temps = client.get_temp_info().await.unwrap().unwrap();
        assert_eq!(temps.extruder.current, 210);
        let progress = client.get_print_status().await.unwrap().unwrap();
        assert_eq!(progress.percent(), Some(50));
    }

    #[tokio::test]
    async fn rejected_login_retries_with_logout_between_attempts() {
        let counts = Arc::new(Counts::default());
        let port = spawn_printer(false, "Adventurer 5M", Arc::clone(&counts)).await;
        let client = PrinterClient::with_options("127.0.0.1", port, TransportOptions::default());

        let err = client.login().await.unwrap_err();
        assert!(matches!(err, FlashForgeError::Login(_)));
        assert!(!client.is_logged_in());
        assert_eq!(counts.logins.load(Ordering::Relaxed), 3);
        // A logout precedes every retry (but not the final failure).
        assert_eq!(counts.logouts.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn runout_sensor_is_gated_on_pro_hardware() {
        let counts = Arc::new(Counts::default());
        let port = spawn_printer(true, "Adventurer 5M", Arc::clone(&counts)).await;
        let client = PrinterClient::with_options("127.0.0.1", port, TransportOptions::default());

        client.login().await.unwrap();
        assert!(!client.is_pro());
        assert!(!client.turn_runout_sensor_on().await.unwrap());
        assert_eq!(counts.runout_on.load(Ordering::Relaxed), 0);

        let pro_counts = Arc::new(Counts::default());
        let pro_port = spawn_printer(true, "Adventurer 5M Pro", Arc::clone(&pro_counts)).await;
        let pro = PrinterClient::with_options("127.0.0.1", pro_port, TransportOptions::default());
        pro.login().await.unwrap();
        assert!(pro.turn_runout_sensor_on().await.unwrap());
        assert_eq!(pro_counts.runout_on.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn acknowledgement_requires_echo_and_ok() {
        let counts = Arc::new(Counts::default());
        let port = spawn_printer(true, "Adventurer 5M", Arc::clone(&counts)).await;
        let client = PrinterClient::with_options("127.0.0.1", port, TransportOptions::default());
        // The default fake reply carries both markers.
        assert!(client.send_cmd_ok(commands::LED_ON).await.unwrap());
    }

    #[tokio::test]
    async fn file_list_decodes_through_the_session() {
        let counts = Arc::new(Counts::default());
        let port = spawn_printer(true, "Adventurer 5M", Arc::clone(&counts)).await;
        let client = PrinterClient::with_options("127.0.0.1", port, TransportOptions::default());
        client.login().await.unwrap();

        let files = client.get_file_list().await.unwrap();
        assert_eq!(files, vec!["benchy.3mf", "cube.gcode"]);
    }

    #[tokio::test]
    async fn dispose_sends_a_parting_logout() {
        let counts = Arc::new(Counts::default());
        let port = spawn_printer(true, "Adventurer 5M", Arc::clone(&counts)).await;
        let client = PrinterClient::with_options("127.0.0.1", port, TransportOptions::default());
        client.login().await.unwrap();
        // Let the supervisor's first probe clear the link.
        tokio::time::sleep(Duration::from_millis(200)).await;

        client.dispose().await;
        assert!(!client.is_logged_in());
        // Fire-and-forget write races the close; give it a beat.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counts.logouts.load(Ordering::Relaxed), 1);
    }
}
