//! Consumer view of a queue ring.
//!
//! There is exactly one consumer per ring. It acquire-loads the header at
//! `read_index`, trusts the payload only once the header reads valid, and
//! retires the slot by invalidating the header and advancing `read_index`.

use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use ember_core::sync::SignalHandle;
use ember_core::{Error, Result};

use crate::ring::{QueueRing, SlotHeader};

/// A published slot, copied out of the ring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotView {
    /// Read position of the slot
    pub index: u64,
    /// Header as observed
    pub header: SlotHeader,
    /// Payload dwords
    pub payload: Vec<u32>,
    /// Completion signal (`NONE` if absent)
    pub signal: SignalHandle,
}

/// Single consumer of a ring
#[derive(Debug)]
pub struct QueueConsumer<'q> {
    ring: &'q QueueRing,
}

impl<'q> QueueConsumer<'q> {
    /// Attach to `ring`
    pub fn new(ring: &'q QueueRing) -> Self {
        Self { ring }
    }

    /// Ring being consumed
    pub fn ring(&self) -> &'q QueueRing {
        self.ring
    }

    /// Next published slot, if any
    pub fn peek(&self) -> Result<Option<SlotView>> {
        let index = self.ring.read_index();
        let slot = self.ring.slot(index);
        let header = slot.header(Ordering::Acquire);
        if !header.is_valid() {
            return Ok(None);
        }

        Ok(Some(SlotView {
            index,
            header,
            payload: slot.payload(&header)?,
            signal: slot.signal(),
        }))
    }

    /// Release the slot at the read position back to producers
    ///
    /// Only a published slot can be retired. A reserved slot still belongs
    /// to its producer and gives `InvalidArgument`.
    pub fn retire(&mut self) -> Result<u64> {
        let index = self.ring.read_index();
        if !self.ring.slot(index).header(Ordering::Acquire).is_valid() {
            return Err(Error::InvalidArgument);
        }
        self.ring.retire(index);
        Ok(index + 1)
    }
}
