//! # Ember Core
//!
//! Foundational types shared by the Ember command-submission stack.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ember-core                             │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │   Types     │  │    Bits     │  │      Error          │  │
//! │  │ (GpuAddr,   │  │ (Field,     │  │    Handling         │  │
//! │  │  ByteSize)  │  │  SplitField)│  │                     │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! │  ┌──────────────────────────┐  ┌──────────────────────────┐ │
//! │  │  Memory (DeviceMemory,   │  │  Sync (SignalApi,        │ │
//! │  │  HostMemory, ScratchPool)│  │  HostSignals)            │ │
//! │  └──────────────────────────┘  └──────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Device-visible memory is never treated as ordinary memory: every access
//! goes through [`memory::DeviceMemory`] with an explicit ordering, since a
//! non-CPU consumer is outside the language memory model.

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

pub mod bits;
pub mod error;
pub mod memory;
pub mod pool;
pub mod sync;
pub mod types;

// Re-exports for convenience
pub use error::{Error, Result};
pub use types::*;
