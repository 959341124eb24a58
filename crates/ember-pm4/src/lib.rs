//! # Ember PM4
//!
//! PM4 packet encoding for the gfx9 compute micro-engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        PacketEncoder                         │
//! │   copy template ──► patch fields ──► pack ──► observer       │
//! └───────────────┬───────────────────────────────┬──────────────┘
//!                 │                               │
//!        ┌────────▼────────┐            ┌─────────▼─────────┐
//!        │ PacketTemplates │            │      Packet       │
//!        │ (immutable)     │            │ (value copy)      │
//!        └────────┬────────┘            └─────────┬─────────┘
//!                 │                               │
//!        ┌────────▼────────┐            ┌─────────▼─────────┐
//!        │ records + gfx9  │            │ CommandStream or  │
//!        │ field tables    │            │ queue slot        │
//!        └─────────────────┘            └───────────────────┘
//! ```
//!
//! Every packet kind is an explicit record of named fields with a
//! `pack`/`unpack` pair driven by bit-field tables. [`decode`] inverts the
//! encoder.

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

pub mod decode;
pub mod encoder;
pub mod gfx9;
pub mod header;
pub mod observer;
pub mod packet;
pub mod records;
pub mod stream;
pub mod template;

pub use decode::{decode, Command, Commands};
pub use encoder::{AtomicOp, CacheFlags, CopySource, PacketEncoder, WaitFunction};
pub use gfx9::PacketKind;
pub use observer::{LogObserver, NullObserver, PacketObserver};
pub use packet::{Packet, MAX_PACKET_DWORDS};
pub use records::{DataWidth, RegWindow, WaitTarget};
pub use stream::{CommandBuffer, CommandStream, FixedCommandStream};
pub use template::PacketTemplates;
