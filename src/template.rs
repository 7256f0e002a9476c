use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::{Ipv4Packet, MutableIpv4Packet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;

/// TTL of every generated packet
pub const TEMPLATE_TTL: u8 = 12;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("cannot allocate a {0} bytes packet buffer")]
    Allocation(usize),
    #[error("packet buffer too small for an IPv4 header")]
    Header,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CloneError {
    #[error("{in_flight} clones are still held by the host")]
    Exhausted { in_flight: usize },
}

/// Counts the clones that are alive and wakes up the drain when the last one goes away.
#[derive(Debug)]
struct CloneTracker {
    in_flight: Mutex<usize>,
    drained: Condvar,
    limit: usize,
}

impl CloneTracker {
    fn lock(&self) -> MutexGuard<'_, usize> {
        // the counter stays consistent even if a holder panicked
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self) -> Result<(), CloneError> {
        let mut in_flight = self.lock();
        if *in_flight >= self.limit {
            return Err(CloneError::Exhausted {
                in_flight: *in_flight,
            });
        }
        *in_flight += 1;
        Ok(())
    }

    fn release_one(&self) {
        let mut in_flight = self.lock();
        *in_flight -= 1;
        if *in_flight == 0 {
            self.drained.notify_all();
        }
    }

    fn wait_drained(&self) {
        let in_flight = self.lock();
        let _in_flight = self
            .drained
            .wait_while(in_flight, |n| *n > 0)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// The canonical packet. It is never sent itself: the engine transmits clones of it.
///
/// The bytes are frozen once `build` returns. Clones share them read-only, so no clone can
/// alter the template nor outlive the memory it points to.
#[derive(Debug)]
pub struct PacketTemplate {
    bytes: Arc<Vec<u8>>,
    tracker: Arc<CloneTracker>,
}

impl PacketTemplate {
    /// Allocates and fills the IPv4 header.
    ///
    /// The total length field receives `packet_length` as is, even if it is shorter than the
    /// header itself. The buffer is `max(packet_length, 20)` bytes long and zeroed past the
    /// header.
    ///
    /// # Parameters
    ///
    /// - `packet_length`: value of the total length field and size of the buffer
    /// - `source`, `destination`: addresses written in the header
    /// - `max_in_flight`: maximal number of clones alive at the same time
    pub fn build(
        packet_length: u16,
        source: Ipv4Addr,
        destination: Ipv4Addr,
        max_in_flight: usize,
    ) -> Result<Self, TemplateError> {
        let size = usize::from(packet_length).max(MutableIpv4Packet::minimum_packet_size());
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(size)
            .map_err(|_| TemplateError::Allocation(size))?;
        buffer.resize(size, 0);

        {
            let mut ipv4_packet =
                MutableIpv4Packet::new(&mut buffer[..]).ok_or(TemplateError::Header)?;
            ipv4_packet.set_version(4);
            ipv4_packet.set_header_length(5);
            ipv4_packet.set_dscp(0);
            ipv4_packet.set_ecn(0);
            ipv4_packet.set_total_length(packet_length);
            ipv4_packet.set_identification(0);
            ipv4_packet.set_flags(0);
            ipv4_packet.set_fragment_offset(0);
            ipv4_packet.set_ttl(TEMPLATE_TTL);
            ipv4_packet.set_next_level_protocol(IpNextHeaderProtocols::Udp);
            ipv4_packet.set_checksum(0);
            ipv4_packet.set_source(source);
            ipv4_packet.set_destination(destination);
        }
        log::trace!("Template built: {size} bytes, {source} -> {destination}");

        Ok(PacketTemplate {
            bytes: Arc::new(buffer),
            tracker: Arc::new(CloneTracker {
                in_flight: Mutex::new(0),
                drained: Condvar::new(),
                limit: max_in_flight,
            }),
        })
    }

    /// Creates a new transmittable view of the template.
    ///
    /// Fails when `max_in_flight` clones are still alive. This is transient: the failure goes
    /// away as soon as the host drops some of them.
    pub fn try_clone(&self) -> Result<PacketClone, CloneError> {
        self.tracker.acquire()?;
        Ok(PacketClone {
            bytes: Some(Arc::clone(&self.bytes)),
            tracker: Arc::clone(&self.tracker),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn ipv4(&self) -> Option<Ipv4Packet<'_>> {
        Ipv4Packet::new(&self.bytes)
    }

    pub fn watch(&self) -> TemplateWatch {
        TemplateWatch {
            bytes: Arc::downgrade(&self.bytes),
            tracker: Arc::clone(&self.tracker),
        }
    }

    pub fn outstanding_clones(&self) -> usize {
        *self.tracker.lock()
    }

    /// Frees the template once no clone references it anymore.
    ///
    /// Blocks until the host has dropped every clone, so the backing memory is released
    /// exactly when the last view of it disappears.
    pub fn release(self) {
        let outstanding = self.outstanding_clones();
        if outstanding > 0 {
            log::debug!("Waiting for {outstanding} clones before freeing the template");
        }
        self.tracker.wait_drained();
        // clones drop their bytes before decrementing, so this is the last strong reference
        drop(self.bytes);
        log::debug!("Template freed");
    }
}

/// A view of the template handed to the host output path for one transmission.
///
/// Dropping it gives its slot back to the template.
#[derive(Debug)]
pub struct PacketClone {
    bytes: Option<Arc<Vec<u8>>>,
    tracker: Arc<CloneTracker>,
}

impl PacketClone {
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.as_deref().map_or(&[][..], Vec::as_slice)
    }

    pub fn ipv4(&self) -> Option<Ipv4Packet<'_>> {
        Ipv4Packet::new(self.as_bytes())
    }

    /// Observer of the template this clone was made from
    pub fn origin(&self) -> TemplateWatch {
        TemplateWatch {
            bytes: self.bytes.as_ref().map(Arc::downgrade).unwrap_or_default(),
            tracker: Arc::clone(&self.tracker),
        }
    }
}

impl Drop for PacketClone {
    fn drop(&mut self) {
        self.bytes.take();
        self.tracker.release_one();
    }
}

/// Observes a template without keeping its memory alive.
#[derive(Debug, Clone)]
pub struct TemplateWatch {
    bytes: Weak<Vec<u8>>,
    tracker: Arc<CloneTracker>,
}

impl TemplateWatch {
    pub fn outstanding_clones(&self) -> usize {
        *self.tracker.lock()
    }

    /// True once neither the template nor any clone holds the packet memory
    pub fn is_freed(&self) -> bool {
        self.bytes.strong_count() == 0
    }
}
