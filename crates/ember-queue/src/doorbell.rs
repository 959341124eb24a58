//! # Doorbells
//!
//! Write-only notification targets telling the consumer that new slots are
//! available. Ringing is a hint; the consumer also finds work by polling
//! slot headers.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};

use ember_core::{Error, Result};

// =============================================================================
// MEMORY FENCE OPERATIONS
// =============================================================================

/// Barriers around doorbell writes
pub mod fence {
    //! Memory barrier operations

    /// Compiler fence (prevents reordering)
    #[inline(always)]
    pub fn compiler() {
        core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
    }

    /// Order prior stores before an MMIO store
    #[inline(always)]
    pub fn mmio_write_barrier() {
        #[cfg(target_arch = "x86_64")]
        {
            // Stores are not reordered with other stores on x86_64
            compiler();
        }

        #[cfg(target_arch = "aarch64")]
        {
            // SAFETY: This is a memory barrier instruction
            unsafe {
                core::arch::asm!("dmb st", options(nostack, preserves_flags));
            }
        }

        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            core::sync::atomic::fence(core::sync::atomic::Ordering::Release);
        }
    }
}

// =============================================================================
// DOORBELL TRAIT
// =============================================================================

/// Consumer notification target
pub trait Doorbell: Sync {
    /// Store the new write index
    fn ring(&self, value: u64);
}

// =============================================================================
// ATOMIC CELL
// =============================================================================

/// Doorbell backed by a host atomic, for software consumers and tests
#[derive(Debug, Default)]
pub struct DoorbellCell {
    value: AtomicU64,
    rings: AtomicU64,
}

impl DoorbellCell {
    /// Create a doorbell holding 0
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
            rings: AtomicU64::new(0),
        }
    }

    /// Last value rung
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Number of rings so far
    pub fn ring_count(&self) -> u64 {
        self.rings.load(Ordering::Relaxed)
    }
}

impl Doorbell for DoorbellCell {
    fn ring(&self, value: u64) {
        // Concurrent producers may ring out of order; keep the highest index
        self.value.fetch_max(value, Ordering::AcqRel);
        self.rings.fetch_add(1, Ordering::Relaxed);
    }
}

// =============================================================================
// MMIO DOORBELL
// =============================================================================

/// Doorbell register mapped into the process
#[derive(Debug)]
pub struct MmioDoorbell {
    ptr: NonNull<u64>,
}

impl MmioDoorbell {
    /// Wrap a mapped doorbell register
    ///
    /// # Safety
    /// `ptr` must point to a mapped, 8-byte aligned doorbell register that
    /// stays mapped for the lifetime of the returned value.
    pub unsafe fn new(ptr: *mut u64) -> Result<Self> {
        let ptr = NonNull::new(ptr).ok_or(Error::InvalidAddress)?;
        if ptr.as_ptr() as usize % core::mem::align_of::<u64>() != 0 {
            return Err(Error::MisalignedAddress);
        }
        Ok(Self { ptr })
    }
}

impl Doorbell for MmioDoorbell {
    fn ring(&self, value: u64) {
        fence::mmio_write_barrier();
        // SAFETY: validity and alignment guaranteed by `new`
        unsafe { core::ptr::write_volatile(self.ptr.as_ptr(), value) }
    }
}

// SAFETY: Doorbell writes are single volatile stores to device memory
unsafe impl Send for MmioDoorbell {}
unsafe impl Sync for MmioDoorbell {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_keeps_highest() {
        let bell = DoorbellCell::new();
        bell.ring(3);
        bell.ring(2);
        assert_eq!(bell.value(), 3);
        assert_eq!(bell.ring_count(), 2);
    }

    #[test]
    fn test_mmio_doorbell_writes_register() {
        let mut register = 0u64;
        // SAFETY: `register` outlives the doorbell
        let bell = unsafe { MmioDoorbell::new(&mut register) }.unwrap();
        bell.ring(42);
        drop(bell);
        assert_eq!(register, 42);

        assert_eq!(
            unsafe { MmioDoorbell::new(core::ptr::null_mut()) }.unwrap_err(),
            Error::InvalidAddress
        );
    }
}
