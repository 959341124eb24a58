//! # Submission
//!
//! Producer side of the queue protocol: reserve, await room, populate,
//! publish, notify, and optionally wait for completion.

use ember_core::sync::{SignalApi, SignalHandle, SignalVisibility, WaitHint, WaitTimeout};
use ember_core::Result;
use ember_pm4::Packet;

use crate::completion::ScopedSignal;
use crate::doorbell::Doorbell;
use crate::ring::QueueRing;

// =============================================================================
// SUBMIT CONFIGURATION
// =============================================================================

/// Submission configuration
#[derive(Debug, Clone)]
pub struct SubmitConfig {
    /// Bound on completion waits
    pub completion_timeout: WaitTimeout,
    /// How completion waits spend time between polls
    pub wait_hint: WaitHint,
    /// Set the barrier bit on published slots
    pub barrier: bool,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            completion_timeout: WaitTimeout::Forever,
            wait_hint: WaitHint::Active,
            barrier: false,
        }
    }
}

// =============================================================================
// SUBMITTER
// =============================================================================

/// Producer handle on a queue
///
/// Any number of submitters may share one ring.
pub struct Submitter<'q> {
    ring: &'q QueueRing,
    doorbell: &'q dyn Doorbell,
    config: SubmitConfig,
}

impl<'q> Submitter<'q> {
    /// Submitter with the default configuration
    pub fn new(ring: &'q QueueRing, doorbell: &'q dyn Doorbell) -> Self {
        Self::with_config(ring, doorbell, SubmitConfig::default())
    }

    /// Submitter with an explicit configuration
    pub fn with_config(ring: &'q QueueRing, doorbell: &'q dyn Doorbell, config: SubmitConfig) -> Self {
        Self {
            ring,
            doorbell,
            config,
        }
    }

    /// Target ring
    pub fn ring(&self) -> &'q QueueRing {
        self.ring
    }

    /// Active configuration
    pub fn config(&self) -> &SubmitConfig {
        &self.config
    }

    /// Tell the consumer that slots up to `ticket` are published
    #[inline]
    pub fn notify(&self, ticket: u64) {
        self.doorbell.ring(ticket + 1);
    }

    fn write_slot(&self, ticket: u64, packet: &Packet, signal: SignalHandle) -> Result<()> {
        let mut header = self.ring.populate(ticket, packet, signal)?;
        header.barrier = self.config.barrier;
        self.ring.publish(ticket, header);
        self.notify(ticket);
        log::trace!("submit: ticket {} {} signal {:?}", ticket, packet.kind(), signal);
        Ok(())
    }

    /// Submit `packet`, spinning as long as the ring is full
    ///
    /// Returns the ticket the packet was published under.
    pub fn submit(&self, packet: &Packet, signal: SignalHandle) -> Result<u64> {
        let ticket = self.ring.reserve();
        self.ring.await_room(ticket);
        self.write_slot(ticket, packet, signal)?;
        Ok(ticket)
    }

    /// Submit `packet`, giving up with `Timeout` after `max_polls` polls
    /// for room
    pub fn submit_bounded(&self, packet: &Packet, signal: SignalHandle, max_polls: u64) -> Result<u64> {
        let ticket = self.ring.reserve_bounded(max_polls)?;
        self.write_slot(ticket, packet, signal)?;
        Ok(ticket)
    }

    /// Submit `packet` with a fresh completion signal and wait for it to
    /// retire
    ///
    /// The signal starts at 1 and is expected to read 0 once the consumer
    /// has retired the slot. It is destroyed on every path.
    pub fn submit_and_wait(&self, packet: &Packet, signals: &dyn SignalApi) -> Result<()> {
        let signal = ScopedSignal::new(signals, 1, SignalVisibility::Interrupt)?;
        self.submit(packet, signal.handle())?;
        signal.wait_for(0, self.config.completion_timeout, self.config.wait_hint)?;
        signal.release()
    }
}

impl core::fmt::Debug for Submitter<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Submitter")
            .field("ring", &self.ring.base_address())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doorbell::DoorbellCell;
    use crate::ring::RingConfig;
    use core::sync::atomic::Ordering;
    use ember_core::sync::HostSignals;
    use ember_core::Error;
    use ember_pm4::PacketEncoder;

    fn ring(slots: u32) -> QueueRing {
        QueueRing::new(RingConfig {
            slot_count: slots,
            ..RingConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_submit_publishes_and_rings() {
        let ring = ring(4);
        let bell = DoorbellCell::new();
        let submitter = Submitter::with_config(
            &ring,
            &bell,
            SubmitConfig {
                barrier: true,
                ..SubmitConfig::default()
            },
        );
        let packet = PacketEncoder::new().barrier().unwrap();

        assert_eq!(submitter.submit(&packet, SignalHandle::NONE), Ok(0));
        assert_eq!(submitter.submit(&packet, SignalHandle::NONE), Ok(1));
        assert_eq!(bell.value(), 2);

        let header = ring.slot(1).header(Ordering::Acquire);
        assert!(header.is_valid());
        assert!(header.barrier);
        assert_eq!(header.payload_dwords, 2);
    }

    #[test]
    fn test_submit_bounded_full_ring() {
        let ring = ring(1);
        let bell = DoorbellCell::new();
        let submitter = Submitter::new(&ring, &bell);
        let packet = PacketEncoder::new().barrier().unwrap();

        submitter.submit_bounded(&packet, SignalHandle::NONE, 4).unwrap();
        assert_eq!(
            submitter.submit_bounded(&packet, SignalHandle::NONE, 4),
            Err(Error::Timeout)
        );
        assert_eq!(ring.write_index(), 1);
        assert_eq!(bell.ring_count(), 1);
    }

    #[test]
    fn test_submit_and_wait_times_out_and_cleans_up() {
        let ring = ring(4);
        let bell = DoorbellCell::new();
        let signals = HostSignals::new();
        let submitter = Submitter::with_config(
            &ring,
            &bell,
            SubmitConfig {
                completion_timeout: WaitTimeout::Polls(16),
                ..SubmitConfig::default()
            },
        );
        let packet = PacketEncoder::new().barrier().unwrap();

        // Nobody consumes the slot
        assert_eq!(
            submitter.submit_and_wait(&packet, &signals),
            Err(Error::UnexpectedSignalValue)
        );
        assert_eq!(signals.live_count(), 0);
    }
}
