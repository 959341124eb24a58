//! # Ember Queue
//!
//! Lock-free submission of PM4 packets to a compute queue.
//!
//! ## Architecture
//!
//! ```text
//!   producers (any thread)                      consumer (one)
//!  ┌───────────────────────┐               ┌──────────────────────┐
//!  │ Submitter             │               │ QueueConsumer /      │
//!  │  reserve (fetch-add)  │               │ SoftProcessor        │
//!  │  await room           │   QueueRing   │  acquire header      │
//!  │  populate  ───────────┼──► slots ─────┼─► execute payload    │
//!  │  fence + publish      │               │  decrement signal    │
//!  │  ring doorbell        │               │  retire, read_index  │
//!  └──────────┬────────────┘               └──────────┬───────────┘
//!             │  ScopedSignal::wait_for ◄─────────────┘
//! ```
//!
//! No lock protects the ring. Tickets come from a fetch-add on
//! `write_index`, room is checked against `read_index`, and a release fence
//! before the single header store publishes a slot.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod completion;
pub mod consumer;
pub mod dispatch;
pub mod doorbell;
pub mod ring;
pub mod soft;
pub mod submit;

pub use completion::ScopedSignal;
pub use consumer::{QueueConsumer, SlotView};
pub use dispatch::IndirectDispatcher;
pub use doorbell::{Doorbell, DoorbellCell, MmioDoorbell};
pub use ring::{QueueRing, RingConfig, Slot, SlotHeader};
pub use soft::{SoftProcessor, StepOutcome};
pub use submit::{SubmitConfig, Submitter};
