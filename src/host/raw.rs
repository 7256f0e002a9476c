use super::{HostError, NetHost};
use crate::route::{self, ResolvedRoute, RouteError};
use crate::template::PacketClone;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Sends clones through a raw IPv4 socket bound to the egress interface of the route.
///
/// The socket is opened with IPPROTO_RAW, which implies a caller-provided header (IP_HDRINCL):
/// Linux keeps the header as built, except for the fields raw(7) always fills in.
pub struct RawSocketHost {
    buffer_size: usize,
    socket: Option<Socket>,
    /// Index of the interface the socket is bound to
    bound_to: Option<u32>,
}

impl RawSocketHost {
    pub fn new(buffer_size: usize) -> Self {
        RawSocketHost {
            buffer_size,
            socket: None,
            bound_to: None,
        }
    }

    /// Restricts the output path to the egress interface of `route` (SO_BINDTODEVICE).
    ///
    /// After this, the kernel never picks another interface for the packets sent.
    pub fn bind(&mut self, route: &ResolvedRoute) -> Result<(), RouteError> {
        let interface = route::egress_interface(route)?;
        let socket = self.socket.as_ref().ok_or_else(|| {
            RouteError::Bind(
                interface.name.clone(),
                io::Error::new(io::ErrorKind::NotConnected, "raw socket not open"),
            )
        })?;
        socket
            .bind_device(Some(interface.name.as_bytes()))
            .map_err(|e| RouteError::Bind(interface.name.clone(), e))?;
        self.bound_to = Some(interface.index);
        log::debug!("Raw socket bound to {}", interface.name);
        Ok(())
    }
}

impl NetHost for RawSocketHost {
    type Route = ResolvedRoute;

    fn attach(&mut self) -> Result<(), HostError> {
        let socket = Socket::new(
            Domain::IPV4,
            Type::RAW,
            Some(Protocol::from(libc::IPPROTO_RAW)),
        )
        .map_err(HostError::Channel)?;
        socket
            .set_send_buffer_size(self.buffer_size)
            .map_err(HostError::Channel)?;
        self.socket = Some(socket);
        self.bound_to = None;
        log::debug!("Raw socket opened");
        Ok(())
    }

    fn resolve_route(
        &mut self,
        source: Ipv4Addr,
        destination: Ipv4Addr,
    ) -> Result<ResolvedRoute, RouteError> {
        let route = route::resolve(source, destination)?;
        self.bind(&route)?;
        Ok(route)
    }

    fn transmit(&mut self, packet: PacketClone, route: &ResolvedRoute) {
        let Some(socket) = self.socket.as_ref() else {
            log::debug!("Transmit before attach, packet dropped");
            return;
        };
        if self.bound_to != Some(route.index) {
            log::debug!(
                "Socket not bound to {} (index {}), packet dropped",
                route.interface,
                route.index
            );
            return;
        }
        let target = SockAddr::from(SocketAddrV4::new(route.destination, 0));
        if let Err(e) = socket.send_to(packet.as_bytes(), &target) {
            log::debug!("Failed to send packet on {}: {e}", route.interface);
        }
        // the kernel copied the bytes: the clone is released here
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::NextHop;
    use crate::template::PacketTemplate;

    fn unknown_route() -> ResolvedRoute {
        ResolvedRoute {
            interface: "nonexistent0".to_string(),
            index: 9999,
            source: Ipv4Addr::LOCALHOST,
            destination: Ipv4Addr::LOCALHOST,
            next_hop: NextHop::Gateway,
        }
    }

    #[test]
    fn test_attach_failure_asks_for_privilege() {
        let mut host = RawSocketHost::new(4096);
        if let Err(e) = host.attach() {
            assert!(matches!(e, HostError::Channel(_)), "{e:?}");
            assert!(e.to_string().contains("root privilege"), "{e}");
        }
    }

    #[test]
    fn test_bind_unknown_interface() {
        let mut host = RawSocketHost::new(4096);
        let err = host.bind(&unknown_route()).unwrap_err();
        assert!(
            matches!(err, RouteError::UnknownInterface { index: 9999, .. }),
            "{err:?}"
        );
    }

    #[test]
    fn test_unbound_route_is_not_sent() {
        let mut host = RawSocketHost::new(4096);
        // a socket is opened when the privilege allows it, the route is never bound
        let _ = host.attach();
        let template =
            PacketTemplate::build(50, Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST, 1).unwrap();
        let watch = template.watch();
        host.transmit(template.try_clone().unwrap(), &unknown_route());
        assert_eq!(watch.outstanding_clones(), 0);
        assert!(host.bound_to.is_none());
        template.release();
    }
}
