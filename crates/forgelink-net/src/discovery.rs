// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// UDP printer discovery. Probes the LAN over multicast and per-interface
// subnet broadcast, decodes the fixed-size reply datagrams, and
// deduplicates printers that answer on more than one channel. Offered in
// two shapes: one-shot collection and a streaming monitor.

use crate::packet::parse_discovery_response;
use forgelink_core::config::DiscoveryOptions;
use forgelink_core::error::{FlashForgeError, Result};
use forgelink_core::types::{DiscoveredPrinter, ProtocolFormat};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Multicast group the printers listen on.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(225, 0, 0, 9);

/// Ports probed via the multicast group.
const MULTICAST_PORTS: [u16; 2] = [8899, 19000];

/// Ports probed via per-subnet broadcast.
const BROADCAST_PORTS: [u16; 2] = [19000, 48899];

/// Payload of a discovery probe; the content is arbitrary, the printers
/// answer any datagram on a discovery port.
const PROBE_PAYLOAD: &[u8] = b"discover";

/// Pause between one-shot retry rounds.
const RETRY_GAP: Duration = Duration::from_secs(1);

/// Largest reply datagram is 276 bytes; leave headroom for unknown firmware.
const RECV_BUFFER: usize = 512;

/// One item from a [`DiscoveryMonitor`] stream.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A printer answered for the first time (or upgraded its record).
    Discovered(DiscoveredPrinter),
    /// The discovery window is over; no further events follow.
    End,
}

/// Streaming handle returned by [`monitor`]. Emits one
/// [`DiscoveryEvent::Discovered`] per printer as answers arrive and a
/// single [`DiscoveryEvent::End`] when the window closes, whether it ran
/// out naturally or [`stop`](Self::stop) was called.
pub struct DiscoveryMonitor {
    events: mpsc::Receiver<DiscoveryEvent>,
    shutdown: watch::Sender<bool>,
}

impl DiscoveryMonitor {
    /// Next event, or `None` once `End` has been consumed.
    pub async fn recv(&mut self) -> Option<DiscoveryEvent> {
        self.events.recv().await
    }

    /// Close the window early. Safe to call more than once.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Probe the LAN and collect every printer that answers.
///
/// Runs up to `max_retries` rounds; a round ends when the full window
/// elapses or the network goes quiet for `idle_timeout_ms`. Retries stop
/// as soon as any round found a printer. An empty network yields an
/// empty list, not an error.
pub async fn discover(options: &DiscoveryOptions) -> Result<Vec<DiscoveredPrinter>> {
    let sockets = open_sockets(options)?;
    let interfaces = local_interfaces();
    let (packet_tx, mut packet_rx) = mpsc::channel::<(Vec<u8>, SocketAddr)>(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    for (_, socket) in &sockets {
        tokio::spawn(receive_loop(
            Arc::clone(socket),
            packet_tx.clone(),
            shutdown_rx.clone(),
        ));
    }
    drop(packet_tx);

    let mut found: HashMap<(IpAddr, u16), DiscoveredPrinter> = HashMap::new();
    let rounds = options.max_retries.max(1);
    for round in 1..=rounds {
        send_probes(&sockets, options, &interfaces).await;
        collect_round(options, &mut packet_rx, &mut found).await;
        if !found.is_empty() {
            break;
        }
        if round < rounds {
            debug!(round, "discovery round came back empty; retrying");
            tokio::time::sleep(RETRY_GAP).await;
        }
    }
    let _ = shutdown_tx.send(true);

    let mut printers: Vec<DiscoveredPrinter> = found.into_values().collect();
    printers.sort_by_key(|p| (p.ip_address, p.command_port));
    info!(count = printers.len(), "discovery finished");
    Ok(printers)
}

/// Probe the LAN and return the first printer that answers.
///
/// The only discovery call that treats silence as an error.
pub async fn discover_first(options: &DiscoveryOptions) -> Result<DiscoveredPrinter> {
    let mut stream = monitor(options).await?;
    while let Some(event) = stream.recv().await {
        match event {
            DiscoveryEvent::Discovered(printer) => {
                stream.stop();
                return Ok(printer);
            }
            DiscoveryEvent::End => break,
        }
    }
    Err(FlashForgeError::DiscoveryTimeout {
        timeout_ms: options.timeout_ms,
    })
}

/// Probe the LAN and stream printers as they answer.
///
/// Probes are re-sent every `timeout_ms` for up to `max_retries` rounds;
/// after the first answer the window also closes once the network stays
/// quiet for `idle_timeout_ms`.
pub async fn monitor(options: &DiscoveryOptions) -> Result<DiscoveryMonitor> {
    let sockets = open_sockets(options)?;
    let interfaces = local_interfaces();
    let (packet_tx, packet_rx) = mpsc::channel::<(Vec<u8>, SocketAddr)>(64);
    let (event_tx, event_rx) = mpsc::channel::<DiscoveryEvent>(32);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    for (_, socket) in &sockets {
        tokio::spawn(receive_loop(
            Arc::clone(socket),
            packet_tx.clone(),
            shutdown_rx.clone(),
        ));
    }
    drop(packet_tx);
    tokio::spawn(coordinate(
        sockets,
        options.clone(),
        interfaces,
        packet_rx,
        event_tx,
        shutdown_rx,
    ));
    Ok(DiscoveryMonitor {
        events: event_rx,
        shutdown: shutdown_tx,
    })
}

/// Bind one UDP socket per configured port, broadcast-capable and joined
/// to the multicast group when that channel is enabled.
fn open_sockets(options: &DiscoveryOptions) -> Result<Vec<(u16, Arc<UdpSocket>)>> {
    let sock_err = |e: std::io::Error| FlashForgeError::SocketCreation(e.to_string());
    let mut sockets = Vec::with_capacity(options.ports.len());
    for &port in &options.ports {
        let raw = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(sock_err)?;
        raw.set_reuse_address(true).map_err(sock_err)?;
        raw.set_broadcast(true).map_err(sock_err)?;
        raw.set_nonblocking(true).map_err(sock_err)?;
        let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        raw.bind(&bind_addr.into()).map_err(sock_err)?;
        let std_socket: std::net::UdpSocket = raw.into();
        let socket = UdpSocket::from_std(std_socket).map_err(sock_err)?;
        if options.use_multicast {
            // Group membership is best effort; broadcast probing still
            // works on networks that filter IGMP.
            if let Err(e) = socket.join_multicast_v4(MULTICAST_GROUP, Ipv4Addr::UNSPECIFIED) {
                warn!(port, error = %e, "multicast join failed");
            }
        }
        debug!(port, "discovery socket bound");
        sockets.push((port, Arc::new(socket)));
    }
    Ok(sockets)
}

/// Forward datagrams from one socket to the coordinator until shutdown.
async fn receive_loop(
    socket: Arc<UdpSocket>,
    packets: mpsc::Sender<(Vec<u8>, SocketAddr)>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = [0u8; RECV_BUFFER];
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, addr)) => {
                    if packets.send((buf[..len].to_vec(), addr)).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "discovery socket receive failed");
                    return;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

/// Drive one monitor window: periodic probes, dedup, event emission, and
/// exactly one `End` on the way out.
async fn coordinate(
    sockets: Vec<(u16, Arc<UdpSocket>)>,
    options: DiscoveryOptions,
    interfaces: Vec<(Ipv4Addr, Ipv4Addr)>,
    mut packets: mpsc::Receiver<(Vec<u8>, SocketAddr)>,
    events: mpsc::Sender<DiscoveryEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let probe_gap = Duration::from_millis(options.timeout_ms);
    let idle = Duration::from_millis(options.idle_timeout_ms);
    let total_deadline = Instant::now() + probe_gap * options.max_retries.max(1);
    let mut next_probe = Instant::now();
    let mut idle_deadline: Option<Instant> = None;
    let mut found: HashMap<(IpAddr, u16), DiscoveredPrinter> = HashMap::new();

    loop {
        let now = Instant::now();
        if now >= total_deadline {
            break;
        }
        if idle_deadline.is_some_and(|deadline| now >= deadline) {
            break;
        }
        if now >= next_probe {
            send_probes(&sockets, &options, &interfaces).await;
            next_probe = now + probe_gap;
        }
        let mut wake = next_probe.min(total_deadline);
        if let Some(deadline) = idle_deadline {
            wake = wake.min(deadline);
        }
        tokio::select! {
            packet = packets.recv() => match packet {
                Some((data, addr)) => {
                    if let Some(printer) = parse_discovery_response(&data, addr.ip()) {
                        idle_deadline = Some(Instant::now() + idle);
                        if record_printer(&mut found, printer.clone())
                            && events.send(DiscoveryEvent::Discovered(printer)).await.is_err()
                        {
                            break;
                        }
                    }
                }
                None => break,
            },
            _ = tokio::time::sleep_until(wake) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    let _ = events.send(DiscoveryEvent::End).await;
}

/// One bounded collection round for [`discover`]: the idle timer is armed
/// at the window open so a silent network ends the round early.
async fn collect_round(
    options: &DiscoveryOptions,
    packets: &mut mpsc::Receiver<(Vec<u8>, SocketAddr)>,
    found: &mut HashMap<(IpAddr, u16), DiscoveredPrinter>,
) {
    let idle = Duration::from_millis(options.idle_timeout_ms);
    let round_deadline = Instant::now() + Duration::from_millis(options.timeout_ms);
    let mut idle_deadline = Instant::now() + idle;
    loop {
        let now = Instant::now();
        let deadline = idle_deadline.min(round_deadline);
        if deadline <= now {
            return;
        }
        match tokio::time::timeout(deadline - now, packets.recv()).await {
            Ok(Some((data, addr))) => {
                if let Some(printer) = parse_discovery_response(&data, addr.ip()) {
                    idle_deadline = Instant::now() + idle;
                    record_printer(found, printer);
                }
            }
            // All receive loops are gone or the window elapsed.
            Ok(None) | Err(_) => return,
        }
    }
}

/// Record an answer, keyed by `(ip, command_port)`. Returns whether the
/// record changed: a new printer, or a Modern answer replacing a Legacy
/// one for the same machine. A Legacy answer never downgrades Modern.
fn record_printer(
    found: &mut HashMap<(IpAddr, u16), DiscoveredPrinter>,
    printer: DiscoveredPrinter,
) -> bool {
    match found.entry(printer.identity()) {
        Entry::Occupied(mut slot) => {
            if slot.get().protocol == ProtocolFormat::Legacy
                && printer.protocol == ProtocolFormat::Modern
            {
                slot.insert(printer);
                true
            } else {
                false
            }
        }
        Entry::Vacant(slot) => {
            slot.insert(printer);
            true
        }
    }
}

/// Send one probe burst from every socket to its port's targets.
async fn send_probes(
    sockets: &[(u16, Arc<UdpSocket>)],
    options: &DiscoveryOptions,
    interfaces: &[(Ipv4Addr, Ipv4Addr)],
) {
    for (port, socket) in sockets {
        for target in probe_targets(*port, options, interfaces) {
            match socket.send_to(PROBE_PAYLOAD, target).await {
                Ok(_) => debug!(target = %target, "discovery probe sent"),
                Err(e) => warn!(target = %target, error = %e, "discovery probe failed"),
            }
        }
    }
}

/// Destinations for a probe from the socket bound to `port`. Multicast
/// and broadcast each cover their own port subset, so disabling both
/// channels (or probing an unlisted port) yields no targets.
fn probe_targets(
    port: u16,
    options: &DiscoveryOptions,
    interfaces: &[(Ipv4Addr, Ipv4Addr)],
) -> Vec<SocketAddr> {
    let mut targets = Vec::new();
    if options.use_multicast && MULTICAST_PORTS.contains(&port) {
        targets.push(SocketAddr::V4(SocketAddrV4::new(MULTICAST_GROUP, port)));
    }
    if options.use_broadcast && BROADCAST_PORTS.contains(&port) {
        for &(ip, mask) in interfaces {
            let broadcast = broadcast_address(ip, mask);
            targets.push(SocketAddr::V4(SocketAddrV4::new(broadcast, port)));
        }
    }
    targets
}

/// Directed broadcast address of the subnet `ip`/`mask`.
fn broadcast_address(ip: Ipv4Addr, mask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) | !u32::from(mask))
}

/// Enumerate local IPv4 interfaces as `(address, netmask)` pairs,
/// loopback excluded.
#[cfg(unix)]
fn local_interfaces() -> Vec<(Ipv4Addr, Ipv4Addr)> {
    let mut interfaces = Vec::new();
    let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();

    // SAFETY:
    // - `ifaddrs` is a valid pointer to a null pointer, which getifaddrs will populate
    // - getifaddrs is a standard POSIX function that allocates and returns a linked list
    // - The returned list must be freed with freeifaddrs (done at end of function)
    let ret = unsafe { libc::getifaddrs(&mut ifaddrs) };
    if ret != 0 {
        warn!("getifaddrs failed; broadcast probing has no interface targets");
        return interfaces;
    }

    let mut ifa = ifaddrs;
    while !ifa.is_null() {
        // SAFETY:
        // - `ifa` is checked to be non-null in the while condition
        // - The pointer comes from getifaddrs which returns valid ifaddrs structures
        // - The structure remains valid until freeifaddrs is called
        let entry = unsafe { &*ifa };
        ifa = entry.ifa_next;

        if entry.ifa_addr.is_null() || entry.ifa_netmask.is_null() {
            continue;
        }
        // SAFETY:
        // - `entry.ifa_addr` and `entry.ifa_netmask` are checked non-null above
        // - The sockaddrs are allocated by getifaddrs and valid until freeifaddrs
        // - We only read sa_family to determine the address type
        let families = unsafe { ((*entry.ifa_addr).sa_family, (*entry.ifa_netmask).sa_family) };
        if families.0 as i32 != libc::AF_INET || families.1 as i32 != libc::AF_INET {
            continue;
        }
        let addr_in = entry.ifa_addr as *const libc::sockaddr_in;
        let mask_in = entry.ifa_netmask as *const libc::sockaddr_in;
        // SAFETY:
        // - sa_family == AF_INET guarantees these are sockaddr_in structures
        // - The pointers are valid as they come from getifaddrs
        // - sockaddr_in is properly aligned (same as sockaddr)
        let ip = Ipv4Addr::from(u32::from_be(unsafe { (*addr_in).sin_addr.s_addr }));
        let mask = Ipv4Addr::from(u32::from_be(unsafe { (*mask_in).sin_addr.s_addr }));
        if ip.is_loopback() {
            continue;
        }
        interfaces.push((ip, mask));
    }

    // SAFETY:
    // - `ifaddrs` is the pointer returned by getifaddrs at the start of the function
    // - The pointer is still valid (not freed yet)
    // - freeifaddrs is the correct function to free memory allocated by getifaddrs
    unsafe { libc::freeifaddrs(ifaddrs) };

    interfaces
}

#[cfg(not(unix))]
fn local_interfaces() -> Vec<(Ipv4Addr, Ipv4Addr)> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgelink_core::types::{PrinterModel, PrinterStatus};

    fn sample_printer(protocol: ProtocolFormat) -> DiscoveredPrinter {
        DiscoveredPrinter {
            model: PrinterModel::Adventurer5M,
            protocol,
            name: "Bench 5M".to_string(),
            ip_address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
            command_port: 8899,
            serial_number: None,
            event_port: None,
            vendor_id: 0x2B71,
            product_id: 0x0001,
            product_type: None,
            status_code: 0,
            status: PrinterStatus::Ready,
        }
    }

    #[test]
    fn broadcast_address_math() {
        let cases = [
            ((192, 168, 1, 10), (255, 255, 255, 0), (192, 168, 1, 255)),
            ((10, 0, 3, 7), (255, 255, 0, 0), (10, 0, 255, 255)),
            ((10, 1, 2, 3), (255, 255, 252, 0), (10, 1, 3, 255)),
        ];
        for ((a, b, c, d), (m1, m2, m3, m4), (e1, e2, e3, e4)) in cases {
            let got = broadcast_address(
                Ipv4Addr::new(a, b, c, d),
                Ipv4Addr::new(m1, m2, m3, m4),
            );
            assert_eq!(got, Ipv4Addr::new(e1, e2, e3, e4));
        }
    }

    #[test]
    fn disabled_channels_produce_no_targets() {
        let options = DiscoveryOptions {
            use_multicast: false,
            use_broadcast: false,
            ..Default::default()
        };
        let interfaces = [(Ipv4Addr::new(192, 168, 1, 10), Ipv4Addr::new(255, 255, 255, 0))];
        for port in [8899, 19000, 48899] {
            assert!(probe_targets(port, &options, &interfaces).is_empty());
        }
    }

    #[test]
    fn probe_targets_split_by_port() {
        let options = DiscoveryOptions::default();
        let interfaces = [(Ipv4Addr::new(192, 168, 1, 10), Ipv4Addr::new(255, 255, 255, 0))];
        let multicast =
            |port: u16| SocketAddr::V4(SocketAddrV4::new(MULTICAST_GROUP, port));
        let broadcast =
            |port: u16| SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 255), port));

        assert_eq!(probe_targets(8899, &options, &interfaces), vec![multicast(8899)]);
        assert_eq!(
            probe_targets(19000, &options, &interfaces),
            vec![multicast(19000), broadcast(19000)]
        );
        assert_eq!(probe_targets(48899, &options, &interfaces), vec![broadcast(48899)]);
    }

    #[test]
    fn dedup_prefers_modern_over_legacy() {
        let mut seen = HashMap::new();
        assert!(record_printer(&mut seen, sample_printer(ProtocolFormat::Legacy)));
        assert!(record_printer(&mut seen, sample_printer(ProtocolFormat::Modern)));
        assert_eq!(seen.len(), 1);
        let kept = seen.values().next().unwrap();
        assert_eq!(kept.protocol, ProtocolFormat::Modern);

        assert!(!record_printer(&mut seen, sample_printer(ProtocolFormat::Legacy)));
        assert!(!record_printer(&mut seen, sample_printer(ProtocolFormat::Modern)));
    }

    #[tokio::test]
    async fn monitor_emits_end_exactly_once_after_stop() {
        // Port 0 binds an ephemeral port that is in no probe set, so the
        // monitor sits on a silent network.
        let options = DiscoveryOptions {
            ports: vec![0],
            timeout_ms: 500,
            idle_timeout_ms: 100,
            max_retries: 2,
            ..Default::default()
        };
        let mut stream = monitor(&options).await.unwrap();
        stream.stop();
        stream.stop();
        assert!(matches!(stream.recv().await, Some(DiscoveryEvent::End)));
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn empty_network_discovery_exits_on_idle_timeout() {
        // The idle timer is armed when the round opens, so silence must
        // end the round long before the full receive window elapses.
        let options = DiscoveryOptions {
            ports: vec![0],
            timeout_ms: 2_000,
            idle_timeout_ms: 150,
            max_retries: 1,
            ..Default::default()
        };
        let started = std::time::Instant::now();
        let printers = discover(&options).await.unwrap();
        assert!(printers.is_empty());
        assert!(
            started.elapsed() < Duration::from_millis(1_000),
            "idle timeout did not cut the round short"
        );
    }

    #[tokio::test]
    async fn discover_first_reports_timeout_on_silence() {
        let options = DiscoveryOptions {
            ports: vec![0],
            timeout_ms: 200,
            idle_timeout_ms: 80,
            max_retries: 1,
            ..Default::default()
        };
        let err = discover_first(&options).await.unwrap_err();
        assert!(matches!(
            err,
            FlashForgeError::DiscoveryTimeout { timeout_ms: 200 }
        ));
    }
}
