use crate::route::RouteError;
use crate::template::PacketClone;
use std::fmt::Debug;
use std::io;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Output through a Linux layer-3 raw socket
pub mod raw;
pub use raw::RawSocketHost;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("cannot open a raw IPv4 socket ({0}). Please retry with root privilege.")]
    Channel(#[source] io::Error),
    #[error("{0}")]
    Unavailable(String),
}

/// The network stack the generator runs in.
///
/// The engine calls `attach` once, then `resolve_route` once, then `transmit` for every clone.
/// All calls are made from the worker thread.
pub trait NetHost: Send + 'static {
    /// Opaque egress handle attached to every transmitted clone
    type Route: Send + Debug;

    /// Acquire the network context packets are injected in
    fn attach(&mut self) -> Result<(), HostError>;

    /// Query the routing table. Called once per run; the route is never refreshed
    fn resolve_route(
        &mut self,
        source: Ipv4Addr,
        destination: Ipv4Addr,
    ) -> Result<Self::Route, RouteError>;

    /// Hand a clone to the IP output path.
    ///
    /// Fire-and-forget: delivery is not reported. The host drops the clone whenever it is done
    /// with the bytes, which is what lets the template be freed.
    fn transmit(&mut self, packet: PacketClone, route: &Self::Route);
}
