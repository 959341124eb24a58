//! # Device-Visible Memory
//!
//! Memory shared between the host and the command processor.
//!
//! A non-CPU consumer does not participate in the language memory model, so
//! raw pointers into shared memory are never handed around. Every access goes
//! through [`DeviceMemory`] and names its ordering explicitly.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Error, Result};
use crate::types::{ByteSize, GpuAddr};

// =============================================================================
// DEVICE MEMORY CAPABILITY
// =============================================================================

/// Access to device-visible memory
///
/// 32-bit accesses are single-copy atomic and follow the
/// `core::sync::atomic` ordering rules (no `Acquire` stores, no `Release`
/// loads). 64-bit accesses are performed as two 32-bit halves, low half
/// first, unless done through [`DeviceMemory::update_u64`].
pub trait DeviceMemory: Sync {
    /// Atomically load a dword (4-byte aligned)
    fn load_u32(&self, addr: GpuAddr, order: Ordering) -> Result<u32>;

    /// Atomically store a dword (4-byte aligned)
    fn store_u32(&self, addr: GpuAddr, value: u32, order: Ordering) -> Result<()>;

    /// Read-modify-write a qword under the memory's RMW lock
    ///
    /// `f` returns the new value, or `None` to leave memory untouched.
    /// Returns the previous value.
    fn update_u64(&self, addr: GpuAddr, f: &mut dyn FnMut(u64) -> Option<u64>) -> Result<u64>;

    /// Read raw bytes
    fn read_bytes(&self, addr: GpuAddr, buf: &mut [u8]) -> Result<()>;

    /// Write raw bytes
    fn write_bytes(&self, addr: GpuAddr, data: &[u8]) -> Result<()>;

    /// Load a qword as two dwords
    fn load_u64(&self, addr: GpuAddr, order: Ordering) -> Result<u64> {
        let lo = self.load_u32(addr, order)?;
        let hi = self.load_u32(addr + 4, order)?;
        Ok(((hi as u64) << 32) | lo as u64)
    }

    /// Store a qword as two dwords, low half first
    fn store_u64(&self, addr: GpuAddr, value: u64, order: Ordering) -> Result<()> {
        self.store_u32(addr, value as u32, order)?;
        self.store_u32(addr + 4, (value >> 32) as u32, order)
    }

    /// Copy `len` bytes from `src` to `dst`
    ///
    /// Overlapping ranges behave like `memmove`: when `dst` lies inside the
    /// source range the chunks are copied from the end.
    fn copy_bytes(&self, src: GpuAddr, dst: GpuAddr, len: u64) -> Result<()> {
        let mut chunk = [0u8; 256];
        let backward = dst.raw() > src.raw() && dst.raw() - src.raw() < len;
        let mut done = 0u64;
        while done < len {
            let n = core::cmp::min(chunk.len() as u64, len - done);
            let at = if backward { len - done - n } else { done };
            self.read_bytes(src + at, &mut chunk[..n as usize])?;
            self.write_bytes(dst + at, &chunk[..n as usize])?;
            done += n;
        }
        Ok(())
    }
}

// =============================================================================
// HOST MEMORY
// =============================================================================

/// Host-resident arena standing in for device-visible memory
///
/// Backed by dword atomics so a consumer thread can observe it concurrently
/// without data races.
#[derive(Debug)]
pub struct HostMemory {
    /// Device address of the first byte
    base: GpuAddr,
    /// Backing dwords
    words: Box<[AtomicU32]>,
    /// Serializes read-modify-write and byte-granular writes
    rmw: spin::Mutex<()>,
}

impl HostMemory {
    /// Create a zero-filled arena mapped at `base`
    pub fn new(base: GpuAddr, size: ByteSize) -> Result<Self> {
        if !base.is_aligned(4) || size.as_bytes() % 4 != 0 || size == ByteSize::ZERO {
            return Err(Error::InvalidArgument);
        }

        let words: Vec<AtomicU32> = (0..size.as_dwords()).map(|_| AtomicU32::new(0)).collect();
        log::debug!("HostMemory: {} at {}", size, base);

        Ok(Self {
            base,
            words: words.into_boxed_slice(),
            rmw: spin::Mutex::new(()),
        })
    }

    /// Base address
    pub fn base(&self) -> GpuAddr {
        self.base
    }

    /// Arena size
    pub fn size(&self) -> ByteSize {
        ByteSize::from_bytes(self.words.len() as u64 * 4)
    }

    /// Check if `len` bytes at `addr` lie inside the arena
    pub fn contains(&self, addr: GpuAddr, len: u64) -> bool {
        addr >= self.base
            && (addr - self.base)
                .checked_add(len)
                .map_or(false, |end| end <= self.size().as_bytes())
    }

    fn word(&self, addr: GpuAddr) -> Result<&AtomicU32> {
        addr.check_aligned(4)?;
        if !self.contains(addr, 4) {
            return Err(Error::OutOfBounds);
        }
        Ok(&self.words[((addr - self.base) / 4) as usize])
    }

    fn byte_slot(&self, addr: GpuAddr) -> Result<(&AtomicU32, u32)> {
        if !self.contains(addr, 1) {
            return Err(Error::OutOfBounds);
        }
        let offset = addr - self.base;
        Ok((&self.words[(offset / 4) as usize], ((offset % 4) * 8) as u32))
    }
}

impl DeviceMemory for HostMemory {
    fn load_u32(&self, addr: GpuAddr, order: Ordering) -> Result<u32> {
        Ok(self.word(addr)?.load(order))
    }

    fn store_u32(&self, addr: GpuAddr, value: u32, order: Ordering) -> Result<()> {
        self.word(addr)?.store(value, order);
        Ok(())
    }

    fn update_u64(&self, addr: GpuAddr, f: &mut dyn FnMut(u64) -> Option<u64>) -> Result<u64> {
        let lo = self.word(addr)?;
        let hi = self.word(addr + 4)?;

        let _guard = self.rmw.lock();
        let old = ((hi.load(Ordering::Acquire) as u64) << 32) | lo.load(Ordering::Acquire) as u64;
        if let Some(new) = f(old) {
            lo.store(new as u32, Ordering::Release);
            hi.store((new >> 32) as u32, Ordering::Release);
        }
        Ok(old)
    }

    fn read_bytes(&self, addr: GpuAddr, buf: &mut [u8]) -> Result<()> {
        if !self.contains(addr, buf.len() as u64) {
            return Err(Error::OutOfBounds);
        }
        for (i, byte) in buf.iter_mut().enumerate() {
            let (word, shift) = self.byte_slot(addr + i as u64)?;
            *byte = (word.load(Ordering::Acquire) >> shift) as u8;
        }
        Ok(())
    }

    fn write_bytes(&self, addr: GpuAddr, data: &[u8]) -> Result<()> {
        if !self.contains(addr, data.len() as u64) {
            return Err(Error::OutOfBounds);
        }

        let _guard = self.rmw.lock();
        for (i, byte) in data.iter().enumerate() {
            let (word, shift) = self.byte_slot(addr + i as u64)?;
            let current = word.load(Ordering::Relaxed);
            let updated = (current & !(0xFF << shift)) | ((*byte as u32) << shift);
            word.store(updated, Ordering::Release);
        }
        Ok(())
    }
}

static_assertions::assert_impl_all!(HostMemory: Send, Sync);
