use pnet::datalink::{self, NetworkInterface};
use pnet::ipnetwork::IpNetwork;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use thiserror::Error;

/// Any port works: connecting a UDP socket only asks the kernel for a route
const DISCARD_PORT: u16 = 9;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("source {0} is not a local address")]
    SourceNotLocal(Ipv4Addr, #[source] io::Error),
    #[error("no route to {0}")]
    NoRoute(Ipv4Addr, #[source] io::Error),
    #[error("no interface owns the egress address {0}")]
    NoInterface(Ipv4Addr),
    #[error("egress interface {name} (index {index}) does not exist")]
    UnknownInterface { name: String, index: u32 },
    #[error("cannot bind the output path to {0}")]
    Bind(String, #[source] io::Error),
    #[error("route lookup failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextHop {
    /// The destination is on one of the egress interface networks
    OnLink,
    /// The destination is reached through a gateway
    Gateway,
}

/// Egress decision for a (source, destination) pair, as returned by the routing table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub interface: String,
    pub index: u32,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub next_hop: NextHop,
}

impl fmt::Display for ResolvedRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let via = match self.next_hop {
            NextHop::OnLink => "on-link",
            NextHop::Gateway => "via gateway",
        };
        write!(
            f,
            "{} from {} dev {} (index {}) {}",
            self.destination, self.source, self.interface, self.index, via
        )
    }
}

/// Asks the kernel routing table how `destination` is reached from `source`.
///
/// The lookup is done by connecting a UDP socket bound to `source`: no packet is sent, but the
/// kernel selects the route, or refuses if there is none. The egress interface is the one that
/// owns the local address picked by the kernel.
pub fn resolve(source: Ipv4Addr, destination: Ipv4Addr) -> Result<ResolvedRoute, RouteError> {
    let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(source), 0)).map_err(|e| {
        match e.kind() {
            io::ErrorKind::AddrNotAvailable => RouteError::SourceNotLocal(source, e),
            _ => RouteError::Io(e),
        }
    })?;
    socket
        .connect(SocketAddr::new(IpAddr::V4(destination), DISCARD_PORT))
        .map_err(|e| RouteError::NoRoute(destination, e))?;

    let egress = match socket.local_addr()?.ip() {
        IpAddr::V4(ip) => ip,
        IpAddr::V6(_) => unreachable!("socket bound to an IPv4 address"),
    };
    log::trace!("Kernel selected {egress} to reach {destination}");

    let interface = datalink::interfaces()
        .into_iter()
        .find(|iface| iface.ips.iter().any(|ip| ip.ip() == IpAddr::V4(egress)))
        .ok_or(RouteError::NoInterface(egress))?;

    let on_link = interface.ips.iter().any(|ip| match ip {
        IpNetwork::V4(net) => net.contains(destination),
        _ => false,
    });

    let route = ResolvedRoute {
        interface: interface.name,
        index: interface.index,
        source: egress,
        destination,
        next_hop: if on_link {
            NextHop::OnLink
        } else {
            NextHop::Gateway
        },
    };
    log::debug!("Route: {route}");
    Ok(route)
}

/// Finds the interface a resolved route leaves through.
///
/// Both the name and the index must still match: an interface renamed or recreated since the
/// lookup is not the egress the route was resolved for.
pub fn egress_interface(route: &ResolvedRoute) -> Result<NetworkInterface, RouteError> {
    datalink::interfaces()
        .into_iter()
        .find(|iface| iface.index == route.index && iface.name == route.interface)
        .ok_or_else(|| RouteError::UnknownInterface {
            name: route.interface.clone(),
            index: route.index,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_route() {
        let route = resolve(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST).unwrap();
        assert_eq!(route.source, Ipv4Addr::LOCALHOST);
        assert_eq!(route.destination, Ipv4Addr::LOCALHOST);
        assert_eq!(route.next_hop, NextHop::OnLink);
    }

    #[test]
    fn test_foreign_source() {
        // TEST-NET-3, never assigned to a local interface
        let err = resolve(Ipv4Addr::new(203, 0, 113, 7), Ipv4Addr::LOCALHOST).unwrap_err();
        assert!(matches!(err, RouteError::SourceNotLocal(..)), "{err:?}");
    }

    #[test]
    fn test_egress_interface() {
        let route = resolve(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST).unwrap();
        let iface = egress_interface(&route).unwrap();
        assert_eq!(iface.name, route.interface);
        assert_eq!(iface.index, route.index);
    }

    #[test]
    fn test_unknown_egress_interface() {
        let route = ResolvedRoute {
            interface: "nonexistent0".to_string(),
            index: 9999,
            source: Ipv4Addr::LOCALHOST,
            destination: Ipv4Addr::LOCALHOST,
            next_hop: NextHop::Gateway,
        };
        let err = egress_interface(&route).unwrap_err();
        assert!(
            matches!(err, RouteError::UnknownInterface { index: 9999, .. }),
            "{err:?}"
        );
    }
}
