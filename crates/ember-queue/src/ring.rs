//! # Queue Ring
//!
//! Fixed-size circular buffer of 64-byte slots shared between producers and
//! the command processor.
//!
//! ## Slot lifecycle
//!
//! ```text
//!  Free ──reserve──► Reserved ──populate──► Populated ──publish──► Published
//!   ▲                                                                  │
//!   └─────────────────────────── retire ◄──────────────────────────────┘
//! ```
//!
//! Producers take tickets from `write_index` with a fetch-add and own slot
//! `ticket & (size - 1)` until they publish it. Publishing is a release
//! fence followed by a single store of the slot header; the consumer
//! acquire-loads that header before reading the payload.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

use ember_core::bits::Field;
use ember_core::sync::SignalHandle;
use ember_core::{Error, GpuAddr, Result};
use ember_pm4::{Packet, MAX_PACKET_DWORDS};

// =============================================================================
// SLOT FORMAT
// =============================================================================

/// Dwords per slot
pub const SLOT_DWORDS: usize = 16;

/// Bytes per slot
pub const SLOT_BYTES: usize = SLOT_DWORDS * 4;

/// Payload capacity of a slot in dwords
pub const PAYLOAD_DWORDS: usize = 13;

/// First payload dword
const PAYLOAD_START: usize = 1;

/// Signal handle location (low, high)
const SIGNAL_LO: usize = 14;
const SIGNAL_HI: usize = 15;

/// Slot header fields
pub mod header {
    //! Word 0 of every slot

    use super::Field;

    /// Packet type
    pub const TYPE: Field = Field::new(0, 0, 7);
    /// Barrier bit
    pub const BARRIER: Field = Field::bit(0, 8);
    /// Payload length in dwords
    pub const PAYLOAD_DWORDS: Field = Field::new(0, 16, 31);

    /// Vendor-specific (PM4) payload
    pub const TYPE_VENDOR_PM4: u32 = 0;
    /// Slot not valid for consumption
    pub const TYPE_INVALID: u32 = 1;
}

/// Decoded slot header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHeader {
    /// Packet type
    pub packet_type: u32,
    /// Wait for earlier slots to retire before starting
    pub barrier: bool,
    /// Payload length in dwords
    pub payload_dwords: u32,
}

impl SlotHeader {
    /// Header of a retired / never-written slot
    pub const INVALID: Self = Self {
        packet_type: header::TYPE_INVALID,
        barrier: false,
        payload_dwords: 0,
    };

    /// Header publishing a PM4 payload
    pub const fn pm4(payload_dwords: u32, barrier: bool) -> Self {
        Self {
            packet_type: header::TYPE_VENDOR_PM4,
            barrier,
            payload_dwords,
        }
    }

    /// Check whether the slot holds a valid packet
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.packet_type != header::TYPE_INVALID
    }

    /// Encode into a header dword
    pub fn encode(&self) -> u32 {
        let mut word = [0u32];
        header::TYPE.set(&mut word, self.packet_type);
        header::BARRIER.set_flag(&mut word, self.barrier);
        header::PAYLOAD_DWORDS.set(&mut word, self.payload_dwords);
        word[0]
    }

    /// Decode a header dword
    pub fn decode(raw: u32) -> Self {
        let word = [raw];
        Self {
            packet_type: header::TYPE.get(&word),
            barrier: header::BARRIER.flag(&word),
            payload_dwords: header::PAYLOAD_DWORDS.get(&word),
        }
    }
}

/// One queue slot
#[derive(Debug)]
#[repr(C, align(64))]
pub struct Slot {
    words: [AtomicU32; SLOT_DWORDS],
}

impl Slot {
    fn new() -> Self {
        let slot = Self {
            words: Default::default(),
        };
        slot.words[0].store(SlotHeader::INVALID.encode(), Ordering::Relaxed);
        slot
    }

    /// Load the header dword
    #[inline]
    pub fn header(&self, order: Ordering) -> SlotHeader {
        SlotHeader::decode(self.words[0].load(order))
    }

    #[inline]
    pub(crate) fn store_header(&self, header: SlotHeader, order: Ordering) {
        self.words[0].store(header.encode(), order);
    }

    /// Load dword `index` (relaxed; order through the header)
    #[inline]
    pub(crate) fn word(&self, index: usize) -> u32 {
        self.words[index].load(Ordering::Relaxed)
    }

    /// Completion signal attached to the slot
    pub fn signal(&self) -> SignalHandle {
        let lo = self.word(SIGNAL_LO) as u64;
        let hi = self.word(SIGNAL_HI) as u64;
        SignalHandle::from_raw((hi << 32) | lo)
    }

    /// Copy out the payload described by `header`
    pub fn payload(&self, header: &SlotHeader) -> Result<Vec<u32>> {
        let len = header.payload_dwords as usize;
        if len > PAYLOAD_DWORDS {
            return Err(Error::InvalidPacket);
        }
        Ok((PAYLOAD_START..PAYLOAD_START + len).map(|i| self.word(i)).collect())
    }
}

static_assertions::const_assert_eq!(core::mem::size_of::<Slot>(), SLOT_BYTES);
static_assertions::const_assert_eq!(PAYLOAD_DWORDS, MAX_PACKET_DWORDS);
static_assertions::const_assert_eq!(PAYLOAD_START + PAYLOAD_DWORDS, SIGNAL_LO);

// =============================================================================
// RING CONFIGURATION
// =============================================================================

/// Queue ring configuration
#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Number of slots (power of two)
    pub slot_count: u32,
    /// Device address of the slot array
    pub base: GpuAddr,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            slot_count: 64,
            base: GpuAddr::new(0x1_0000_0000),
        }
    }
}

// =============================================================================
// QUEUE RING
// =============================================================================

/// Multi-producer, single-consumer slot ring
#[derive(Debug)]
pub struct QueueRing {
    /// Device address of slot 0
    base: GpuAddr,
    /// Slot array
    slots: Box<[Slot]>,
    /// `size - 1`
    mask: u64,
    /// Next ticket to hand out
    write_index: AtomicU64,
    /// Next slot the consumer will retire
    read_index: AtomicU64,
}

impl QueueRing {
    /// Create a ring with every slot invalid
    pub fn new(config: RingConfig) -> Result<Self> {
        if !config.slot_count.is_power_of_two() {
            return Err(Error::InvalidQueueSize);
        }
        config.base.check_aligned(SLOT_BYTES as u64)?;

        let slots: Vec<Slot> = (0..config.slot_count).map(|_| Slot::new()).collect();
        log::debug!("QueueRing: {} slots at {}", config.slot_count, config.base);

        Ok(Self {
            base: config.base,
            slots: slots.into_boxed_slice(),
            mask: config.slot_count as u64 - 1,
            write_index: AtomicU64::new(0),
            read_index: AtomicU64::new(0),
        })
    }

    /// Number of slots
    #[inline]
    pub fn size(&self) -> u64 {
        self.mask + 1
    }

    /// Device address of slot 0
    #[inline]
    pub fn base_address(&self) -> GpuAddr {
        self.base
    }

    /// Device address of the slot for `index`
    pub fn slot_address(&self, index: u64) -> GpuAddr {
        self.base + (index & self.mask) * SLOT_BYTES as u64
    }

    /// Slot for ticket or read position `index`
    #[inline]
    pub fn slot(&self, index: u64) -> &Slot {
        &self.slots[(index & self.mask) as usize]
    }

    /// Current write index
    #[inline]
    pub fn write_index(&self) -> u64 {
        self.write_index.load(Ordering::Acquire)
    }

    /// Current read index
    #[inline]
    pub fn read_index(&self) -> u64 {
        self.read_index.load(Ordering::Acquire)
    }

    // -------------------------------------------------------------------------
    // Producer side
    // -------------------------------------------------------------------------

    /// Take the next ticket
    ///
    /// Never fails and never waits; the slot may still be occupied, see
    /// [`QueueRing::await_room`].
    #[inline]
    pub fn reserve(&self) -> u64 {
        self.write_index.fetch_add(1, Ordering::AcqRel)
    }

    /// Spin until the slot for `ticket` has been retired
    ///
    /// There is no timeout: an unresponsive consumer spins the caller
    /// forever. Use [`QueueRing::await_room_bounded`] or
    /// [`QueueRing::reserve_bounded`] where that is unacceptable.
    pub fn await_room(&self, ticket: u64) {
        while ticket.wrapping_sub(self.read_index()) >= self.size() {
            core::hint::spin_loop();
        }
    }

    /// Poll at most `max_polls` times for the slot of `ticket` to free up
    pub fn await_room_bounded(&self, ticket: u64, max_polls: u64) -> Result<()> {
        for _ in 0..=max_polls {
            if ticket.wrapping_sub(self.read_index()) < self.size() {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err(Error::Timeout)
    }

    /// Take a ticket only if its slot is free right now
    ///
    /// Returns [`Error::Busy`] without consuming a ticket when the ring is
    /// full.
    pub fn try_reserve(&self) -> Result<u64> {
        let mut write = self.write_index.load(Ordering::Acquire);
        loop {
            if write.wrapping_sub(self.read_index()) >= self.size() {
                return Err(Error::Busy);
            }
            match self.write_index.compare_exchange_weak(
                write,
                write + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(ticket) => return Ok(ticket),
                Err(current) => write = current,
            }
        }
    }

    /// Retry [`QueueRing::try_reserve`] up to `max_polls` times
    pub fn reserve_bounded(&self, max_polls: u64) -> Result<u64> {
        for _ in 0..=max_polls {
            match self.try_reserve() {
                Err(Error::Busy) => core::hint::spin_loop(),
                other => return other,
            }
        }
        log::debug!("QueueRing: no room after {} polls", max_polls);
        Err(Error::Timeout)
    }

    /// Write `packet` and `signal` into the slot of `ticket`
    ///
    /// The header is left untouched; nothing is visible to the consumer
    /// until [`QueueRing::publish`].
    pub fn populate(&self, ticket: u64, packet: &Packet, signal: SignalHandle) -> Result<SlotHeader> {
        if ticket >= self.write_index() || ticket.wrapping_sub(self.read_index()) >= self.size() {
            return Err(Error::InvalidArgument);
        }
        let words = packet.words();
        if words.len() > PAYLOAD_DWORDS {
            return Err(Error::PacketTooLarge);
        }

        let slot = self.slot(ticket);
        for i in 0..PAYLOAD_DWORDS {
            let value = words.get(i).copied().unwrap_or(0);
            slot.words[PAYLOAD_START + i].store(value, Ordering::Relaxed);
        }
        slot.words[SIGNAL_LO].store(signal.raw() as u32, Ordering::Relaxed);
        slot.words[SIGNAL_HI].store((signal.raw() >> 32) as u32, Ordering::Relaxed);

        Ok(SlotHeader::pm4(words.len() as u32, false))
    }

    /// Make the slot of `ticket` visible to the consumer
    pub fn publish(&self, ticket: u64, header: SlotHeader) {
        // Payload stores must not pass the header store
        fence(Ordering::Release);
        self.slot(ticket).store_header(header, Ordering::Relaxed);
    }

    // -------------------------------------------------------------------------
    // Consumer side
    // -------------------------------------------------------------------------

    pub(crate) fn retire(&self, index: u64) {
        self.slot(index).store_header(SlotHeader::INVALID, Ordering::Relaxed);
        self.read_index.store(index + 1, Ordering::Release);
    }
}

static_assertions::assert_impl_all!(QueueRing: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use ember_pm4::PacketEncoder;
    use std::collections::BTreeSet;
    use std::vec::Vec;

    fn ring(slots: u32) -> QueueRing {
        QueueRing::new(RingConfig {
            slot_count: slots,
            ..RingConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_size_must_be_power_of_two() {
        assert_eq!(
            QueueRing::new(RingConfig {
                slot_count: 6,
                ..RingConfig::default()
            })
            .unwrap_err(),
            Error::InvalidQueueSize
        );
        assert_eq!(ring(4).size(), 4);
        assert_eq!(ring(4).slot_address(5), GpuAddr::new(0x1_0000_0040));
    }

    #[test]
    fn test_slot_header_layout() {
        let header = SlotHeader::pm4(8, true);
        assert_eq!(header.encode(), 0x0008_0100);
        assert_eq!(SlotHeader::decode(0x0008_0100), header);
        assert!(!SlotHeader::decode(SlotHeader::INVALID.encode()).is_valid());
    }

    #[test]
    fn test_payload_length_bounded_by_slot() {
        let slot = Slot::new();
        let full = SlotHeader::pm4(PAYLOAD_DWORDS as u32, false);
        assert_eq!(slot.payload(&full).map(|p| p.len()), Ok(PAYLOAD_DWORDS));
        assert_eq!(
            slot.payload(&SlotHeader::pm4(SLOT_DWORDS as u32, false)),
            Err(Error::InvalidPacket)
        );
        assert_eq!(slot.signal(), SignalHandle::NONE);
    }

    #[test]
    fn test_concurrent_reserve_is_contiguous() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 64;
        let ring = ring(4);
        let initial = ring.write_index();

        let tickets: Vec<u64> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| s.spawn(|| (0..PER_THREAD).map(|_| ring.reserve()).collect::<Vec<_>>()))
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        let unique: BTreeSet<u64> = tickets.iter().copied().collect();
        let n = (THREADS * PER_THREAD) as u64;
        assert_eq!(unique.len() as u64, n);
        assert_eq!(unique, (initial..initial + n).collect::<BTreeSet<u64>>());
        assert_eq!(ring.write_index(), initial + n);
    }

    #[test]
    fn test_try_reserve_busy_keeps_ticket() {
        let ring = ring(2);
        assert_eq!(ring.try_reserve(), Ok(0));
        assert_eq!(ring.try_reserve(), Ok(1));
        assert_eq!(ring.try_reserve(), Err(Error::Busy));
        assert_eq!(ring.write_index(), 2);
        assert_eq!(ring.reserve_bounded(8), Err(Error::Timeout));
        assert_eq!(ring.await_room_bounded(2, 8), Err(Error::Timeout));

        ring.retire(0);
        assert_eq!(ring.try_reserve(), Ok(2));
    }

    #[test]
    fn test_populate_requires_ownership() {
        let ring = ring(2);
        let packet = PacketEncoder::new().barrier().unwrap();
        assert_eq!(
            ring.populate(0, &packet, SignalHandle::NONE),
            Err(Error::InvalidArgument)
        );
        let ticket = ring.reserve();
        let header = ring.populate(ticket, &packet, SignalHandle::from_raw(0x1_0000_0002)).unwrap();
        assert_eq!(header.payload_dwords, 2);
        // Unpublished slot stays invalid
        assert!(!ring.slot(ticket).header(Ordering::Acquire).is_valid());

        ring.publish(ticket, header);
        let slot = ring.slot(ticket);
        let seen = slot.header(Ordering::Acquire);
        assert_eq!(seen, header);
        assert_eq!(slot.payload(&seen).unwrap(), packet.words());
        assert_eq!(slot.signal(), SignalHandle::from_raw(0x1_0000_0002));
    }

    #[test]
    fn test_producer_waits_for_room() {
        use core::sync::atomic::AtomicBool;

        let ring = ring(2);
        ring.reserve();
        ring.reserve();
        let ticket = ring.reserve();
        let proceeded = AtomicBool::new(false);

        std::thread::scope(|s| {
            s.spawn(|| {
                ring.await_room(ticket);
                proceeded.store(true, Ordering::Release);
            });

            // Producer cannot make progress while the ring is full
            for _ in 0..1000 {
                std::thread::yield_now();
            }
            assert!(!proceeded.load(Ordering::Acquire));
            ring.retire(0);
        });

        assert!(proceeded.load(Ordering::Acquire));
    }

    #[test]
    fn test_publish_never_exposes_partial_payload() {
        const ROUNDS: u32 = 2000;
        let ring = ring(1);
        let encoder = PacketEncoder::new();

        std::thread::scope(|s| {
            s.spawn(|| {
                for round in 1..=ROUNDS {
                    let packet = encoder
                        .write_memory(GpuAddr::new(round as u64 * 4), round as u64, ember_pm4::DataWidth::Bits32)
                        .unwrap();
                    let ticket = ring.reserve();
                    ring.await_room(ticket);
                    let header = ring.populate(ticket, &packet, SignalHandle::NONE).unwrap();
                    ring.publish(ticket, header);
                }
            });

            let mut read = 0u64;
            while read < ROUNDS as u64 {
                let slot = ring.slot(read);
                let header = slot.header(Ordering::Acquire);
                if !header.is_valid() {
                    core::hint::spin_loop();
                    continue;
                }
                let payload = slot.payload(&header).unwrap();
                let round = (read + 1) as u32;
                // Address and data were written together with the header
                assert_eq!(payload.len(), 5);
                assert_eq!(payload[2], round * 4);
                assert_eq!(payload[4], round);
                ring.retire(read);
                read += 1;
            }
        });
    }
}
