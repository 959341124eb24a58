//! # Memory Pool
//!
//! Scratch and argument buffers attached to packets.

use alloc::vec::Vec;

use crate::error::{Error, Result};
use crate::types::{ByteSize, GpuAddr};

// =============================================================================
// POOL TRAIT
// =============================================================================

/// Allocator for device-visible scratch memory
pub trait MemoryPool: Sync {
    /// Allocate `size` bytes aligned to `alignment` (a power of two)
    fn allocate(&self, size: ByteSize, alignment: u64) -> Result<GpuAddr>;

    /// Return an allocation
    fn free(&self, addr: GpuAddr) -> Result<()>;
}

// =============================================================================
// POOL CONFIGURATION
// =============================================================================

/// Memory pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Block size
    pub block_size: ByteSize,
    /// Number of blocks
    pub num_blocks: u32,
    /// Alignment of every block
    pub alignment: u64,
    /// Pool name for debugging
    pub name: &'static str,
}

impl PoolConfig {
    /// Pool config for indirect command buffers
    pub const fn command_buffer(count: u32) -> Self {
        Self {
            block_size: ByteSize::from_kib(4),
            num_blocks: count,
            alignment: 256,
            name: "command_pool",
        }
    }

    /// Pool config for small kernel argument buffers
    pub const fn kernarg(count: u32) -> Self {
        Self {
            block_size: ByteSize::from_bytes(256),
            num_blocks: count,
            alignment: 64,
            name: "kernarg_pool",
        }
    }

    /// Distance between consecutive blocks
    pub const fn stride(&self) -> u64 {
        (self.block_size.as_bytes() + self.alignment - 1) & !(self.alignment - 1)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::command_buffer(64)
    }
}

/// Pool statistics
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total allocations
    pub allocs: u64,
    /// Total frees
    pub frees: u64,
    /// High water mark
    pub peak_used: u32,
}

// =============================================================================
// SCRATCH POOL
// =============================================================================

#[derive(Debug)]
struct PoolState {
    /// Per-block in-use flag
    in_use: Vec<bool>,
    /// Free block indices (stack for O(1) alloc/free)
    free_stack: Vec<u32>,
    /// Statistics
    stats: PoolStats,
}

/// Fixed-block pool carved out of one device-visible region
#[derive(Debug)]
pub struct ScratchPool {
    /// Configuration
    config: PoolConfig,
    /// Base address
    base: GpuAddr,
    /// Mutable bookkeeping
    state: spin::Mutex<PoolState>,
}

impl ScratchPool {
    /// Create a pool over the region starting at `base`
    pub fn new(base: GpuAddr, config: PoolConfig) -> Result<Self> {
        if !config.alignment.is_power_of_two() || !base.is_aligned(config.alignment) {
            return Err(Error::InvalidArgument);
        }

        // Reverse so the lowest block is handed out first
        let free_stack: Vec<u32> = (0..config.num_blocks).rev().collect();
        let in_use = alloc::vec![false; config.num_blocks as usize];

        Ok(Self {
            config,
            base,
            state: spin::Mutex::new(PoolState {
                in_use,
                free_stack,
                stats: PoolStats::default(),
            }),
        })
    }

    /// Region size needed for `config`
    pub const fn region_size(config: &PoolConfig) -> ByteSize {
        ByteSize::from_bytes(config.num_blocks as u64 * config.stride())
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        self.state.lock().stats.clone()
    }

    /// Get number of free blocks
    pub fn free_count(&self) -> u32 {
        self.state.lock().free_stack.len() as u32
    }

    /// Get pool name
    pub fn name(&self) -> &'static str {
        self.config.name
    }

    fn block_index(&self, addr: GpuAddr) -> Result<usize> {
        if addr < self.base {
            return Err(Error::InvalidAddress);
        }
        let offset = addr - self.base;
        let stride = self.config.stride();
        let index = offset / stride;
        if offset % stride != 0 || index >= self.config.num_blocks as u64 {
            return Err(Error::InvalidAddress);
        }
        Ok(index as usize)
    }
}

impl MemoryPool for ScratchPool {
    fn allocate(&self, size: ByteSize, alignment: u64) -> Result<GpuAddr> {
        if !alignment.is_power_of_two() || alignment > self.config.alignment {
            return Err(Error::InvalidArgument);
        }
        if size > self.config.block_size {
            return Err(Error::SizeUnsupported);
        }

        let mut state = self.state.lock();
        let index = state.free_stack.pop().ok_or(Error::OutOfMemory)?;
        state.in_use[index as usize] = true;
        state.stats.allocs += 1;

        let used = self.config.num_blocks - state.free_stack.len() as u32;
        state.stats.peak_used = state.stats.peak_used.max(used);

        Ok(self.base + index as u64 * self.config.stride())
    }

    fn free(&self, addr: GpuAddr) -> Result<()> {
        let index = self.block_index(addr)?;

        let mut state = self.state.lock();
        if !state.in_use[index] {
            log::warn!("{}: double free of {}", self.config.name, addr);
            return Err(Error::InvalidAddress);
        }

        state.in_use[index] = false;
        state.free_stack.push(index as u32);
        state.stats.frees += 1;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(blocks: u32) -> ScratchPool {
        ScratchPool::new(GpuAddr::new(0x4000), PoolConfig::command_buffer(blocks)).unwrap()
    }

    #[test]
    fn test_allocate_and_free() {
        let pool = pool(2);
        let a = pool.allocate(ByteSize::from_bytes(64), 4).unwrap();
        let b = pool.allocate(ByteSize::KIB_4, 256).unwrap();
        assert_eq!(a, GpuAddr::new(0x4000));
        assert_eq!(b, GpuAddr::new(0x5000));
        assert_eq!(pool.allocate(ByteSize::from_bytes(4), 4), Err(Error::OutOfMemory));

        pool.free(a).unwrap();
        assert_eq!(pool.free_count(), 1);
        assert_eq!(pool.free(a), Err(Error::InvalidAddress));
        assert_eq!(pool.stats().peak_used, 2);
    }

    #[test]
    fn test_rejects_oversized_and_overaligned() {
        let pool = pool(1);
        assert_eq!(pool.allocate(ByteSize::from_kib(8), 4), Err(Error::SizeUnsupported));
        assert_eq!(pool.allocate(ByteSize::from_bytes(4), 4096), Err(Error::InvalidArgument));
        assert_eq!(pool.allocate(ByteSize::from_bytes(4), 3), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_free_foreign_address() {
        let pool = pool(4);
        assert_eq!(pool.free(GpuAddr::new(0x4010)), Err(Error::InvalidAddress));
        assert_eq!(pool.free(GpuAddr::new(0x100)), Err(Error::InvalidAddress));
        assert_eq!(pool.free(GpuAddr::new(0x4000 + 4 * 4096)), Err(Error::InvalidAddress));
    }

    #[test]
    fn test_region_size() {
        let config = PoolConfig::kernarg(8);
        assert_eq!(ScratchPool::region_size(&config), ByteSize::from_bytes(8 * 256));
    }
}
