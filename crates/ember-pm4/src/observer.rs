//! Packet observers: an injectable hook seeing every packet the encoder
//! emits, used for diagnostic dumps.

use crate::packet::Packet;

/// Hook invoked for every emitted packet
pub trait PacketObserver {
    /// Called with the finished packet before it is returned to the caller
    fn on_packet(&self, packet: &Packet);
}

/// Observer that ignores packets
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl PacketObserver for NullObserver {
    #[inline]
    fn on_packet(&self, _packet: &Packet) {}
}

/// Observer dumping packets through `log::trace!`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl PacketObserver for LogObserver {
    fn on_packet(&self, packet: &Packet) {
        log::trace!(
            "pm4 {} ({} dw): {:08x?}",
            packet.kind(),
            packet.len_dwords(),
            packet.words()
        );
    }
}

impl<O: PacketObserver + ?Sized> PacketObserver for &O {
    fn on_packet(&self, packet: &Packet) {
        (**self).on_packet(packet)
    }
}
