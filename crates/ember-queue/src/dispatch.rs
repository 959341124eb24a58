//! # Indirect Dispatch
//!
//! Runs a recorded [`CommandBuffer`] by copying it into pool memory and
//! submitting a single INDIRECT_BUFFER packet that points at it.

use ember_core::memory::DeviceMemory;
use ember_core::pool::MemoryPool;
use ember_core::sync::SignalApi;
use ember_core::{Error, GpuAddr, Result};
use ember_pm4::{CommandBuffer, PacketEncoder, PacketObserver};

use crate::submit::Submitter;

/// Indirect buffers are placed on this alignment
pub const IB_ALIGNMENT: u64 = 256;

/// Pool allocation returned on drop
struct PoolBlock<'p> {
    pool: &'p dyn MemoryPool,
    addr: GpuAddr,
}

impl Drop for PoolBlock<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.pool.free(self.addr) {
            log::warn!("dispatch: failed to free {}: {}", self.addr, e);
        }
    }
}

/// Submits command buffers through indirect execution
pub struct IndirectDispatcher<'a, O: PacketObserver> {
    submitter: &'a Submitter<'a>,
    encoder: &'a PacketEncoder<O>,
    memory: &'a dyn DeviceMemory,
    pool: &'a dyn MemoryPool,
    signals: &'a dyn SignalApi,
}

impl<'a, O: PacketObserver> IndirectDispatcher<'a, O> {
    /// Bundle the collaborators of an indirect dispatch
    pub fn new(
        submitter: &'a Submitter<'a>,
        encoder: &'a PacketEncoder<O>,
        memory: &'a dyn DeviceMemory,
        pool: &'a dyn MemoryPool,
        signals: &'a dyn SignalApi,
    ) -> Self {
        Self {
            submitter,
            encoder,
            memory,
            pool,
            signals,
        }
    }

    /// Execute `commands` and wait for completion
    ///
    /// The buffer is freed and the signal destroyed on every path.
    pub fn dispatch(&self, commands: &CommandBuffer) -> Result<()> {
        if commands.is_empty() {
            return Err(Error::InvalidArgument);
        }

        let size = commands.size();
        let block = PoolBlock {
            pool: self.pool,
            addr: self.pool.allocate(size, IB_ALIGNMENT)?,
        };
        self.memory.write_bytes(block.addr, commands.as_bytes())?;

        let packet = self.encoder.indirect_buffer(block.addr, size.as_bytes())?;
        log::debug!(
            "dispatch: {} dwords at {}",
            commands.len_dwords(),
            block.addr
        );
        self.submitter.submit_and_wait(&packet, self.signals)
    }
}

impl<O: PacketObserver> core::fmt::Debug for IndirectDispatcher<'_, O> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IndirectDispatcher")
            .field("submitter", self.submitter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doorbell::DoorbellCell;
    use crate::ring::{QueueRing, RingConfig};
    use crate::soft::{SoftProcessor, StepOutcome};
    use crate::submit::SubmitConfig;
    use core::sync::atomic::{AtomicBool, Ordering};
    use ember_core::memory::HostMemory;
    use ember_core::pool::{PoolConfig, ScratchPool};
    use ember_core::sync::{HostSignals, WaitTimeout};
    use ember_core::ByteSize;
    use ember_pm4::{AtomicOp, CommandStream, DataWidth};

    const MEM_BASE: GpuAddr = GpuAddr::new(0x40_0000);
    const POOL_BASE: GpuAddr = GpuAddr::new(0x40_1000);

    #[test]
    fn test_dispatch_runs_buffer_and_frees() {
        let ring = QueueRing::new(RingConfig {
            slot_count: 4,
            ..RingConfig::default()
        })
        .unwrap();
        let bell = DoorbellCell::new();
        let memory = HostMemory::new(MEM_BASE, ByteSize::from_kib(16)).unwrap();
        let pool = ScratchPool::new(POOL_BASE, PoolConfig::command_buffer(2)).unwrap();
        let signals = HostSignals::new();
        let encoder = PacketEncoder::new();
        let submitter = Submitter::new(&ring, &bell);
        let dispatcher = IndirectDispatcher::new(&submitter, &encoder, &memory, &pool, &signals);

        let a = MEM_BASE.offset(0x10);
        let b = MEM_BASE.offset(0x20);
        let mut cb = CommandBuffer::new();
        encoder
            .write_memory(a, 0x55, DataWidth::Bits32)
            .unwrap()
            .append_to(&mut cb)
            .unwrap();
        encoder.atomic(AtomicOp::Add, b, 3, 0).unwrap().append_to(&mut cb).unwrap();
        encoder.barrier().unwrap().append_to(&mut cb).unwrap();

        let done = AtomicBool::new(false);
        std::thread::scope(|s| {
            s.spawn(|| {
                let mut cp = SoftProcessor::new(&ring, &memory, &signals);
                while !done.load(Ordering::Acquire) {
                    if cp.step().unwrap() != StepOutcome::Retired {
                        std::thread::yield_now();
                    }
                }
            });

            let result = dispatcher.dispatch(&cb);
            done.store(true, Ordering::Release);
            result.unwrap();
        });

        assert_eq!(memory.load_u32(a, Ordering::Acquire), Ok(0x55));
        assert_eq!(memory.load_u64(b, Ordering::Acquire), Ok(3));
        assert_eq!(pool.free_count(), 2);
        assert_eq!(signals.live_count(), 0);
    }

    #[test]
    fn test_dispatch_cleans_up_on_failure() {
        let ring = QueueRing::new(RingConfig {
            slot_count: 4,
            ..RingConfig::default()
        })
        .unwrap();
        let bell = DoorbellCell::new();
        let memory = HostMemory::new(MEM_BASE, ByteSize::from_kib(16)).unwrap();
        let pool = ScratchPool::new(POOL_BASE, PoolConfig::command_buffer(1)).unwrap();
        let signals = HostSignals::new();
        let encoder = PacketEncoder::new();
        let submitter = Submitter::with_config(
            &ring,
            &bell,
            SubmitConfig {
                completion_timeout: WaitTimeout::Polls(8),
                ..SubmitConfig::default()
            },
        );
        let dispatcher = IndirectDispatcher::new(&submitter, &encoder, &memory, &pool, &signals);

        assert_eq!(dispatcher.dispatch(&CommandBuffer::new()), Err(Error::InvalidArgument));

        let mut cb = CommandBuffer::new();
        cb.append(encoder.barrier().unwrap().as_bytes()).unwrap();
        // No consumer: the wait gives up
        assert_eq!(dispatcher.dispatch(&cb), Err(Error::UnexpectedSignalValue));
        assert_eq!(pool.free_count(), 1);
        assert_eq!(signals.live_count(), 0);
    }
}
