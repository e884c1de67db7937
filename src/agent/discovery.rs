//! Best-effort controller discovery on the local /24.
//!
//! When no controller address is configured the agent takes its own IPv4
//! address, and tries a short TCP connect to the controller port on every
//! host `.1` to `.254` of that /24, in ascending order. The first host that
//! accepts wins. This is a heuristic: it only covers one flat segment, and a
//! controller that answers slower than the probe timeout is missed.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// Routable address used only to select the outbound interface. No packet
/// is sent: connecting a UDP socket just fixes its route.
const ROUTE_PROBE: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 9);

/// Discovery parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverySettings {
    /// Controller port probed on each host.
    pub port: u16,
    /// Connect timeout per host.
    pub probe_timeout: Duration,
    /// Address whose /24 is scanned; auto-detected when `None`.
    pub local_addr: Option<Ipv4Addr>,
}

/// Determine this host's primary IPv4 address.
///
/// # Errors
///
/// Returns [`AppError::Discovery`] if no IPv4 route is available.
pub async fn local_ipv4() -> Result<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(|e| AppError::Discovery(format!("cannot open udp socket: {e}")))?;
    socket
        .connect(ROUTE_PROBE)
        .await
        .map_err(|e| AppError::Discovery(format!("no ipv4 route: {e}")))?;

    match socket.local_addr() {
        Ok(SocketAddr::V4(addr)) if !addr.ip().is_unspecified() => Ok(*addr.ip()),
        Ok(other) => Err(AppError::Discovery(format!(
            "unusable local address {other}"
        ))),
        Err(e) => Err(AppError::Discovery(format!("cannot read local address: {e}"))),
    }
}

/// Usable hosts of the /24 containing `local`, ascending: `.1` to `.254`.
pub fn subnet_hosts(local: Ipv4Addr) -> impl Iterator<Item = IpAddr> {
    let [a, b, c, _] = local.octets();
    (1..=254u8).map(move |d| IpAddr::V4(Ipv4Addr::new(a, b, c, d)))
}

/// Probe `hosts` in order and return the first that accepts on `port`.
///
/// Returns `None` when the range is exhausted or `cancel` fires.
pub async fn probe_hosts<I>(
    hosts: I,
    port: u16,
    probe_timeout: Duration,
    cancel: &CancellationToken,
) -> Option<SocketAddr>
where
    I: IntoIterator<Item = IpAddr>,
{
    for host in hosts {
        let target = SocketAddr::new(host, port);
        let attempt = tokio::time::timeout(probe_timeout, TcpStream::connect(target));

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("discovery cancelled");
                return None;
            }
            outcome = attempt => outcome,
        };

        match outcome {
            Ok(Ok(_probe)) => return Some(target),
            Ok(Err(err)) => debug!(%target, %err, "probe refused"),
            Err(_) => debug!(%target, "probe timed out"),
        }
    }
    None
}

/// Scan the local /24 for a controller.
///
/// # Errors
///
/// Returns [`AppError::Discovery`] if the local address cannot be determined.
/// Finding nothing is `Ok(None)`.
pub async fn discover(
    settings: &DiscoverySettings,
    cancel: &CancellationToken,
) -> Result<Option<SocketAddr>> {
    let local = match settings.local_addr {
        Some(addr) => addr,
        None => local_ipv4().await?,
    };

    let [a, b, c, _] = local.octets();
    info!(network = %format!("{a}.{b}.{c}.1-254"), port = settings.port, "scanning for controller");

    let found = probe_hosts(
        subnet_hosts(local),
        settings.port,
        settings.probe_timeout,
        cancel,
    )
    .await;

    match found {
        Some(addr) => info!(controller = %addr, "controller found"),
        None if cancel.is_cancelled() => {}
        None => warn!("no controller found on the local network"),
    }
    Ok(found)
}
