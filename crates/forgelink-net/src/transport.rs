// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// TCP command transport. The printer speaks an unframed request/reply
// protocol: one command line in, a reply of unknown length out, with a
// textual "ok" marker as the only boundary signal. Commands are strictly
// serialized through one fair mutex; a timed-out or failed exchange
// destroys the socket and the next command reconnects transparently.

use bytes::{Bytes, BytesMut};
use forgelink_core::config::TransportOptions;
use forgelink_core::error::{FlashForgeError, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

/// TCP port the command protocol listens on.
pub const COMMAND_PORT: u16 = 8899;

/// Reply-boundary behaviour per command family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    /// Ordinary text command.
    Text,
    /// Homing moves all axes; the acknowledgement can take a while.
    Home,
    /// File listing: binary entries keep arriving after the "ok".
    FileList,
    /// Thumbnail: PNG payload follows the acknowledgement and may itself
    /// contain the marker bytes.
    Thumbnail,
}

impl CommandClass {
    /// Classify a command line.
    pub fn for_command(cmd: &str) -> Self {
        if cmd.contains("M661") {
            Self::FileList
        } else if cmd.contains("M662") {
            Self::Thumbnail
        } else if cmd.contains("G28") {
            Self::Home
        } else {
            Self::Text
        }
    }

    /// How to read a reply of this class.
    pub fn policy(self) -> ReplyPolicy {
        match self {
            Self::Text => ReplyPolicy {
                timeout: Duration::from_secs(5),
                grace: Duration::ZERO,
                scan_limit: None,
            },
            Self::Home => ReplyPolicy {
                timeout: Duration::from_secs(15),
                grace: Duration::ZERO,
                scan_limit: None,
            },
            Self::FileList => ReplyPolicy {
                timeout: Duration::from_secs(10),
                grace: Duration::from_millis(500),
                scan_limit: None,
            },
            Self::Thumbnail => ReplyPolicy {
                timeout: Duration::from_secs(10),
                grace: Duration::from_millis(1_500),
                scan_limit: Some(100),
            },
        }
    }
}

/// Declarative reply handling: overall deadline, post-boundary drain
/// window, and an optional cap on how far into the buffer the boundary
/// marker is searched (binary payloads can contain "ok" by accident).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyPolicy {
    pub timeout: Duration,
    pub grace: Duration,
    pub scan_limit: Option<usize>,
}

impl ReplyPolicy {
    /// Has the accumulated buffer reached the reply boundary?
    pub fn boundary_found(&self, buf: &[u8]) -> bool {
        let window = match self.scan_limit {
            Some(limit) if buf.len() > limit => &buf[..limit],
            _ => buf,
        };
        window.windows(2).any(|pair| pair == b"ok")
    }
}

/// One serialized command channel to a printer.
pub struct TcpTransport {
    addr: String,
    options: TransportOptions,
    link: Mutex<Option<TcpStream>>,
    keepalive_errors: AtomicU32,
}

impl TcpTransport {
    pub fn new(host: &str, port: u16, options: TransportOptions) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            options,
            link: Mutex::new(None),
            keepalive_errors: AtomicU32::new(0),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Send one command and collect its reply.
    ///
    /// `Ok(None)` means the exchange failed in a recoverable way (reply
    /// timeout, receive error, peer close): the socket has been dropped
    /// and the next call reconnects. Errors are reserved for the dispatch
    /// ceiling and connection establishment.
    pub async fn send_command(&self, cmd: &str) -> Result<Option<Bytes>> {
        let policy = CommandClass::for_command(cmd).policy();
        let mut guard = self.acquire().await?;
        if guard.is_none() {
            *guard = Some(self.open_stream().await?);
        }
        let Some(stream) = guard.as_mut() else {
            return Err(FlashForgeError::Connection(format!(
                "no link to {}",
                self.addr
            )));
        };

        debug!(cmd, "sending command");
        if let Err(e) = write_line(stream, cmd).await {
            warn!(cmd, error = %e, "write failed, dropping connection");
            *guard = None;
            return Ok(None);
        }
        match read_reply(stream, &policy).await {
            Some(reply) => Ok(Some(reply)),
            None => {
                *guard = None;
                Ok(None)
            }
        }
    }

    /// `send_command` with the reply as lossy UTF-8 text.
    pub async fn send_text(&self, cmd: &str) -> Result<Option<String>> {
        Ok(self
            .send_command(cmd)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Write a command without waiting for any reply. Skipped when the
    /// link is busy or down; used for parting shots like logout.
    pub async fn fire_and_forget(&self, cmd: &str) {
        let Ok(mut guard) = self.link.try_lock() else {
            debug!(cmd, "link busy, skipping fire-and-forget send");
            return;
        };
        if let Some(stream) = guard.as_mut() {
            if let Err(e) = write_line(stream, cmd).await {
                debug!(cmd, error = %e, "fire-and-forget write failed");
            }
        }
    }

    /// Drop the connection if one is open.
    pub async fn close(&self) {
        let mut guard = self.link.lock().await;
        if let Some(mut stream) = guard.take() {
            let _ = stream.shutdown().await;
            info!(addr = %self.addr, "connection closed");
        }
    }

    /// Consecutive keep-alive failures recorded on this link.
    pub fn keepalive_errors(&self) -> u32 {
        self.keepalive_errors.load(Ordering::Relaxed)
    }

    /// Count one failed keep-alive probe; returns the new count.
    pub fn record_keepalive_failure(&self) -> u32 {
        self.keepalive_errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// One healthy probe works the counter back toward zero.
    pub fn record_keepalive_success(&self) {
        let _ = self
            .keepalive_errors
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    /// Take the link mutex, bounded by the dispatch ceiling.
    async fn acquire(&self) -> Result<MutexGuard<'_, Option<TcpStream>>> {
        let wait = Duration::from_millis(self.options.dispatch_wait_ms);
        timeout(wait, self.link.lock()).await.map_err(|_| {
            FlashForgeError::Dispatch(format!(
                "link to {} still busy after {}ms",
                self.addr, self.options.dispatch_wait_ms
            ))
        })
    }

    async fn open_stream(&self) -> Result<TcpStream> {
        info!(addr = %self.addr, "connecting");
        let connect_timeout = Duration::from_millis(self.options.connect_timeout_ms);
        let stream = timeout(connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                FlashForgeError::Connection(format!(
                    "timed out connecting to {} after {}ms",
                    self.addr, self.options.connect_timeout_ms
                ))
            })?
            .map_err(|e| FlashForgeError::Connection(format!("connect to {}: {e}", self.addr)))?;
        Ok(stream)
    }
}

async fn write_line(stream: &mut TcpStream, cmd: &str) -> std::io::Result<()> {
    stream.write_all(cmd.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await
}

/// Accumulate a reply until the policy's boundary, then drain the grace
/// window. `None` on timeout, receive error, or peer close — the caller
/// must treat the socket as dead.
async fn read_reply(stream: &mut TcpStream, policy: &ReplyPolicy) -> Option<Bytes> {
    let mut buf = BytesMut::with_capacity(4096);
    let deadline = Instant::now() + policy.timeout;
    loop {
        let now = Instant::now();
        if now >= deadline {
            warn!(received = buf.len(), "reply timed out");
            return None;
        }
        match timeout(deadline - now, stream.read_buf(&mut buf)).await {
            Err(_) => {
                warn!(received = buf.len(), "reply timed out");
                return None;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "receive failed");
                return None;
            }
            Ok(Ok(0)) => {
                warn!(received = buf.len(), "peer closed mid-reply");
                return None;
            }
            Ok(Ok(_)) => {
                if policy.boundary_found(&buf) {
                    break;
                }
            }
        }
    }

    // Classes with trailing binary data keep reading past the boundary.
    if !policy.grace.is_zero() {
        let grace_deadline = Instant::now() + policy.grace;
        loop {
            let now = Instant::now();
            if now >= grace_deadline {
                break;
            }
            match timeout(grace_deadline - now, stream.read_buf(&mut buf)).await {
                Ok(Ok(n)) if n > 0 => {}
                _ => break,
            }
        }
    }

    debug!(bytes = buf.len(), "reply complete");
    Some(buf.freeze())
}
