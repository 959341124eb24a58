//! # Command Streams
//!
//! Append-only sinks receiving serialized packet bytes for later indirect
//! execution.

use alloc::vec::Vec;

use arrayvec::ArrayVec;
use ember_core::{ByteSize, Error, Result};

/// Append-only packet sink
pub trait CommandStream {
    /// Append serialized packet bytes
    ///
    /// Callers hand over whole packets; a partial dword is rejected.
    fn append(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Convert a whole-dword byte slice to dwords (native endian)
fn dwords_of(bytes: &[u8]) -> Result<impl Iterator<Item = u32> + '_> {
    if bytes.len() % 4 != 0 {
        return Err(Error::InvalidArgument);
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]])))
}

// =============================================================================
// COMMAND BUFFER
// =============================================================================

/// Growable command stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBuffer {
    words: Vec<u32>,
}

impl CommandBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Create with room for `dwords` dwords
    pub fn with_capacity(dwords: usize) -> Self {
        Self {
            words: Vec::with_capacity(dwords),
        }
    }

    /// Recorded dwords
    #[inline]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Recorded bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    /// Length in dwords
    #[inline]
    pub fn len_dwords(&self) -> usize {
        self.words.len()
    }

    /// Size in bytes
    #[inline]
    pub fn size(&self) -> ByteSize {
        ByteSize::from_bytes(self.words.len() as u64 * 4)
    }

    /// Check for an empty buffer
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Drop all recorded packets
    pub fn clear(&mut self) {
        self.words.clear();
    }
}

impl CommandStream for CommandBuffer {
    fn append(&mut self, bytes: &[u8]) -> Result<()> {
        let words = dwords_of(bytes)?;
        self.words.extend(words);
        Ok(())
    }
}

// =============================================================================
// FIXED COMMAND STREAM
// =============================================================================

/// Command stream with inline capacity of `N` dwords
#[derive(Debug, Clone, Default)]
pub struct FixedCommandStream<const N: usize> {
    words: ArrayVec<u32, N>,
}

impl<const N: usize> FixedCommandStream<N> {
    /// Create an empty stream
    pub fn new() -> Self {
        Self {
            words: ArrayVec::new(),
        }
    }

    /// Recorded dwords
    #[inline]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Remaining capacity in dwords
    #[inline]
    pub fn remaining(&self) -> usize {
        self.words.remaining_capacity()
    }
}

impl<const N: usize> CommandStream for FixedCommandStream<N> {
    fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() / 4 > self.remaining() {
            return Err(Error::CommandBufferFull);
        }
        let words = dwords_of(bytes)?;
        for word in words {
            self.words.push(word);
        }
        Ok(())
    }
}
