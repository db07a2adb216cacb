//! ICMP echo prober with native sockets and a `ping` command fallback.
//!
//! Each echo runs on a blocking thread (spawn_blocking) so the measured
//! round-trip time is not skewed by the async scheduler.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinSet;

use super::{PingerConfig, ProbeError};

/// Maximum number of echo requests waiting for a reply at once.
const MAX_IN_FLIGHT: usize = 5;

const ECHO_PACKET_LEN: usize = 64;

/// ICMP capability state
#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    /// Native ICMP sockets are available
    Native,
    /// Only command fallback is available
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

/// Ping sequence counter for unique identification
static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

fn next_echo_id() -> (u16, u16) {
    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (identifier, sequence)
}

/// Detect ICMP capability by attempting to create a socket.
fn detect_icmp_capability() -> IcmpCapability {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (RAW socket, privileged)");
        return IcmpCapability::Native;
    }

    // Unprivileged on Linux with ping_group_range set, and on macOS
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (DGRAM socket, unprivileged)");
        return IcmpCapability::Native;
    }

    tracing::info!("Ping probe: native ICMP unavailable, using command fallback");
    IcmpCapability::CommandOnly
}

/// Prober bound to a single host.
#[derive(Debug, Clone)]
pub struct Pinger {
    host: String,
    ip: IpAddr,
    config: PingerConfig,
}

impl Pinger {
    /// Resolve `host` and prepare to probe it.
    pub async fn new(host: &str, config: PingerConfig) -> Result<Self, ProbeError> {
        if host.trim().is_empty() {
            return Err(ProbeError::Config("host must not be empty".to_string()));
        }

        let ip = resolve_address(host).await?;
        ICMP_CAPABILITY.get_or_init(detect_icmp_capability);
        tracing::debug!("Resolved {} to {}", host, ip);

        Ok(Self {
            host: host.to_string(),
            ip,
            config,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Probe the host until stopped, sending every reply's round-trip time
    /// on `tx`.
    ///
    /// Returns `Ok(())` when stopped or when the receiving side goes away,
    /// and an error when probing can no longer work at all.
    pub async fn run(
        self,
        tx: mpsc::Sender<Duration>,
        mut stop: broadcast::Receiver<()>,
    ) -> Result<(), ProbeError> {
        let semaphore = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
        let mut in_flight: JoinSet<Result<(), ProbeError>> = JoinSet::new();

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            "Pinging {} ({}) every {:?}",
            self.host,
            self.ip,
            self.config.interval
        );

        loop {
            tokio::select! {
                _ = stop.recv() => {
                    tracing::debug!("Prober for {} stopped", self.host);
                    return Ok(());
                }
                Some(joined) = in_flight.join_next() => {
                    match joined {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => return Err(e),
                        Err(e) => {
                            return Err(ProbeError::Socket(format!("echo task failed: {}", e)));
                        }
                    }
                }
                _ = interval.tick() => {
                    if tx.is_closed() {
                        tracing::debug!("Nobody is listening for replies from {}", self.host);
                        return Ok(());
                    }

                    let permit = match semaphore.clone().try_acquire_owned() {
                        Ok(p) => p,
                        Err(_) => {
                            tracing::warn!("Skipping echo to {} due to overlap limit", self.host);
                            continue;
                        }
                    };

                    let ip = self.ip;
                    let host = self.host.clone();
                    let timeout = self.config.timeout;
                    let tx = tx.clone();

                    in_flight.spawn(async move {
                        let _permit = permit;

                        match echo(ip, &host, timeout).await {
                            Ok(rtt) => {
                                // A closed channel is noticed on the next tick.
                                let _ = tx.send(rtt).await;
                                Ok(())
                            }
                            Err(e) if e.is_fatal() => Err(e),
                            Err(ProbeError::Timeout(_)) => Ok(()),
                            Err(e) => {
                                tracing::debug!("Echo to {} failed: {}", host, e);
                                Ok(())
                            }
                        }
                    });
                }
            }
        }
    }
}

/// Send one echo request and wait for its reply.
async fn echo(ip: IpAddr, host: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);

    if capability == IcmpCapability::CommandOnly {
        return run_ping_command(host, timeout).await;
    }

    let result = tokio::task::spawn_blocking(move || run_blocking_ping(ip, timeout))
        .await
        .map_err(|e| ProbeError::Socket(format!("spawn_blocking failed: {}", e)))?;

    match result {
        Err(ProbeError::Network(msg)) if is_permission_error(&msg) => {
            tracing::warn!(
                "Native ping to {} failed with permission error, falling back to command: {}",
                host,
                msg
            );
            run_ping_command(host, timeout).await
        }
        other => other,
    }
}

fn is_permission_error(msg: &str) -> bool {
    msg.contains("Permission") || msg.contains("Operation not permitted") || msg.contains("denied")
}

/// Resolve hostname to IP address.
async fn resolve_address(address: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    let mut addrs = tokio::net::lookup_host(format!("{}:0", address))
        .await
        .map_err(|e| ProbeError::Config(format!("cannot resolve {}: {}", address, e)))?;

    addrs
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Config(format!("no addresses found for {}", address)))
}

/// Socket family parameters for one IP version.
struct EchoFamily {
    domain: Domain,
    protocol: Protocol,
    request_type: u8,
    reply_type: u8,
}

impl EchoFamily {
    fn for_ip(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Self {
                domain: Domain::IPV4,
                protocol: Protocol::ICMPV4,
                request_type: 8,
                reply_type: 0,
            },
            IpAddr::V6(_) => Self {
                domain: Domain::IPV6,
                protocol: Protocol::ICMPV6,
                request_type: 128,
                reply_type: 129,
            },
        }
    }
}

/// Blocking ICMP echo with precise timing. Runs via spawn_blocking.
fn run_blocking_ping(ip: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
    let family = EchoFamily::for_ip(ip);

    // RAW first (privileged), then DGRAM (unprivileged)
    let (socket, match_id) = match Socket::new(family.domain, Type::RAW, Some(family.protocol)) {
        Ok(socket) => (socket, true),
        Err(_) => {
            let socket = Socket::new(family.domain, Type::DGRAM, Some(family.protocol))
                .map_err(|e| ProbeError::Socket(format!("failed to create ICMP socket: {}", e)))?;
            // Linux rewrites the identifier of DGRAM echoes to the local port
            (socket, false)
        }
    };

    socket
        .set_read_timeout(Some(timeout))
        .map_err(|e| ProbeError::Socket(format!("failed to set timeout: {}", e)))?;
    socket
        .set_write_timeout(Some(timeout))
        .map_err(|e| ProbeError::Socket(format!("failed to set timeout: {}", e)))?;

    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(|e| ProbeError::Network(format!("failed to connect: {}", e)))?;

    let (identifier, sequence) = next_echo_id();
    let packet = build_echo_request(family.request_type, identifier, sequence, ip.is_ipv4());

    let start = Instant::now();

    socket.send(&packet).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            ProbeError::Network(format!("Permission denied: {}", e))
        } else {
            ProbeError::Network(format!("failed to send: {}", e))
        }
    })?;

    // Keep reading until our own reply shows up or the timeout passes
    loop {
        let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
        let len = socket.recv(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                ProbeError::Timeout(timeout)
            }
            _ => ProbeError::Network(format!("failed to receive: {}", e)),
        })?;
        // SAFETY: recv initialized `len` bytes
        let buf: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(ProbeError::Timeout(timeout));
        }

        let expected_id = match_id.then_some(identifier);
        if is_our_reply(buf, family.reply_type, expected_id, sequence) {
            return Ok(elapsed);
        }
    }
}

/// Check whether `buf` holds the echo reply for `identifier`/`sequence`.
///
/// RAW IPv4 sockets deliver the IP header in front of the ICMP message.
/// Pass `None` as `identifier` when the kernel owns it (DGRAM sockets).
fn is_our_reply(buf: &[u8], reply_type: u8, identifier: Option<u16>, sequence: u16) -> bool {
    let offset = if !buf.is_empty() && buf[0] >> 4 == 4 {
        usize::from(buf[0] & 0x0F) * 4
    } else {
        0
    };

    let icmp = match buf.get(offset..offset + 8) {
        Some(header) => header,
        None => return false,
    };

    icmp[0] == reply_type
        && identifier.map_or(true, |id| u16::from_be_bytes([icmp[4], icmp[5]]) == id)
        && u16::from_be_bytes([icmp[6], icmp[7]]) == sequence
}

/// Build an echo request. The ICMPv6 checksum is left for the kernel.
fn build_echo_request(request_type: u8, identifier: u16, sequence: u16, checksum: bool) -> Vec<u8> {
    let mut packet = vec![0u8; ECHO_PACKET_LEN];

    packet[0] = request_type;
    packet[1] = 0; // Code
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    packet[8..16].copy_from_slice(&timestamp.to_be_bytes());

    if checksum {
        let sum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());
    }

    packet
}

/// Compute ICMP checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Run a single echo via the system `ping` command.
async fn run_ping_command(host: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let timeout_secs = timeout.as_secs().max(1);

    let output = Command::new("ping")
        .args(["-c", "1", "-W", &timeout_secs.to_string(), host])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("timeout")
            || stdout.contains("100% packet loss")
            || stdout.contains("100.0% packet loss")
        {
            return Err(ProbeError::Timeout(timeout));
        }
        return Err(ProbeError::Network(format!("ping failed: {}", stdout.trim())));
    }

    parse_ping_output(&stdout)
}

/// Parse the round-trip time out of `ping` output.
///
/// Prefers the per-reply `time=` field, then the summary line average
/// (macOS `round-trip`, Linux `rtt`).
fn parse_ping_output(output: &str) -> Result<Duration, ProbeError> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            r"time[=<](?P<ms>[0-9.]+)\s*ms",
            r"round-trip\s+min/avg/max/stddev\s*=\s*[0-9.]+/(?P<ms>[0-9.]+)/",
            r"rtt\s+min/avg/max/mdev\s*=\s*[0-9.]+/(?P<ms>[0-9.]+)/",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    });

    patterns
        .iter()
        .filter_map(|re| re.captures(output))
        .filter_map(|caps| caps.name("ms")?.as_str().parse::<f64>().ok())
        .map(|ms| Duration::from_nanos((ms * 1_000_000.0).round() as u64))
        .next()
        .ok_or_else(|| ProbeError::Network(format!("failed to parse ping output: {}", output)))
}
