//! # Software Command Processor
//!
//! Executes published PM4 slots on the host against [`DeviceMemory`] and an
//! in-memory register file. Used where no device consumer exists, and to
//! exercise the submission protocol end to end.
//!
//! Blocking operations (an unmet WAIT_REG_MEM, a failing blocking
//! compare-and-swap) stall the slot. The processor remembers how many
//! packets of the slot already completed and resumes after them on the next
//! [`SoftProcessor::step`].

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::sync::atomic::{fence, Ordering};

use ember_core::memory::DeviceMemory;
use ember_core::sync::SignalApi;
use ember_core::{Error, GpuAddr, Result};
use ember_pm4::{AtomicOp, Command, Commands, CopySource, DataWidth, WaitTarget};

use crate::consumer::QueueConsumer;
use crate::ring::{header, QueueRing};

/// Deepest INDIRECT_BUFFER nesting executed
pub const MAX_IB_DEPTH: u32 = 4;

/// Result of one [`SoftProcessor::step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// No published slot
    Idle,
    /// The slot at the read position is blocked
    Stalled,
    /// A slot was executed and retired
    Retired,
}

/// Processor statistics
#[derive(Debug, Clone, Default)]
pub struct ProcessorStats {
    /// Slots retired
    pub slots_retired: u64,
    /// Packets executed
    pub packets: u64,
    /// Steps that ended in a stall
    pub stalls: u64,
    /// Interrupts raised by end-of-pipe writes
    pub interrupts: u64,
}

enum Flow {
    Continue,
    Stall,
}

/// Host-side PM4 consumer
pub struct SoftProcessor<'q> {
    consumer: QueueConsumer<'q>,
    memory: &'q dyn DeviceMemory,
    signals: &'q dyn SignalApi,
    registers: BTreeMap<u32, u32>,
    /// Packets of the current slot already executed
    resume_from: u64,
    stats: ProcessorStats,
}

impl<'q> SoftProcessor<'q> {
    /// Consume `ring`
    pub fn new(ring: &'q QueueRing, memory: &'q dyn DeviceMemory, signals: &'q dyn SignalApi) -> Self {
        Self {
            consumer: QueueConsumer::new(ring),
            memory,
            signals,
            registers: BTreeMap::new(),
            resume_from: 0,
            stats: ProcessorStats::default(),
        }
    }

    /// Statistics
    pub fn stats(&self) -> &ProcessorStats {
        &self.stats
    }

    /// Number of interrupts raised so far
    pub fn interrupts(&self) -> u64 {
        self.stats.interrupts
    }

    /// Register value (0 if never written)
    pub fn register(&self, offset: u32) -> u32 {
        self.registers.get(&offset).copied().unwrap_or(0)
    }

    /// Set a register, as a device-side agent would
    pub fn set_register(&mut self, offset: u32, value: u32) {
        self.registers.insert(offset, value);
    }

    /// Execute the slot at the read position, if one is published
    ///
    /// Errors leave the slot in place; a malformed slot blocks the queue as
    /// it would on hardware.
    pub fn step(&mut self) -> Result<StepOutcome> {
        let view = match self.consumer.peek()? {
            Some(view) => view,
            None => return Ok(StepOutcome::Idle),
        };
        if view.header.packet_type != header::TYPE_VENDOR_PM4 {
            return Err(Error::NotSupported);
        }

        let mut executed = 0;
        if let Flow::Stall = self.execute(&view.payload, 0, &mut executed)? {
            self.resume_from = executed;
            self.stats.stalls += 1;
            return Ok(StepOutcome::Stalled);
        }
        self.resume_from = 0;

        if !view.signal.is_none() {
            match self.signals.subtract(view.signal, 1) {
                Ok(_) => {}
                // Waiter timed out and destroyed the signal
                Err(Error::InvalidSignal) => {
                    log::warn!("soft: slot {} signal {:?} already released", view.index, view.signal);
                }
                Err(e) => return Err(e),
            }
        }
        self.consumer.retire()?;
        self.stats.slots_retired += 1;
        log::trace!("soft: retired slot {}", view.index);
        Ok(StepOutcome::Retired)
    }

    /// Step until idle or stalled, returning the number of retired slots
    pub fn drain(&mut self) -> Result<u64> {
        let mut retired = 0;
        while self.step()? == StepOutcome::Retired {
            retired += 1;
        }
        Ok(retired)
    }

    fn execute(&mut self, words: &[u32], depth: u32, executed: &mut u64) -> Result<Flow> {
        for command in Commands::new(words) {
            let command = command?;

            if let Command::IndirectBuffer { addr, size_bytes } = command {
                if depth + 1 > MAX_IB_DEPTH {
                    log::warn!("soft: indirect buffer nesting exceeds {}", MAX_IB_DEPTH);
                    return Err(Error::NotSupported);
                }
                let ib = self.fetch(addr, size_bytes)?;
                if let Flow::Stall = self.execute(&ib, depth + 1, executed)? {
                    return Ok(Flow::Stall);
                }
                continue;
            }

            if *executed < self.resume_from {
                *executed += 1;
                continue;
            }
            if let Flow::Stall = self.run(command)? {
                return Ok(Flow::Stall);
            }
            *executed += 1;
            self.stats.packets += 1;
        }
        Ok(Flow::Continue)
    }

    fn fetch(&self, addr: GpuAddr, size_bytes: u64) -> Result<Vec<u32>> {
        (0..size_bytes / 4)
            .map(|i| self.memory.load_u32(addr + i * 4, Ordering::Acquire))
            .collect()
    }

    fn run(&mut self, command: Command) -> Result<Flow> {
        match command {
            Command::IndirectBuffer { .. } => {}
            Command::Atomic {
                op,
                addr,
                value,
                compare,
            } => {
                let old = self.memory.update_u64(addr, &mut |old| match op {
                    AtomicOp::Add | AtomicOp::Increment => Some(old.wrapping_add(value)),
                    AtomicOp::Subtract | AtomicOp::Decrement => Some(old.wrapping_sub(value)),
                    AtomicOp::Swap => Some(value),
                    AtomicOp::CompareAndSwap | AtomicOp::BlockingCompareAndSwap => {
                        (old == compare).then_some(value)
                    }
                })?;
                if op == AtomicOp::BlockingCompareAndSwap && old != compare {
                    return Ok(Flow::Stall);
                }
            }
            Command::Barrier => fence(Ordering::SeqCst),
            Command::CacheInvalidate { .. } => {
                // Host memory is coherent
            }
            Command::Wait {
                target,
                function,
                mask,
                reference,
            } => {
                let value = match target {
                    WaitTarget::Memory(addr) => self.memory.load_u32(addr, Ordering::Acquire)?,
                    WaitTarget::Register(index) => self.register(index),
                };
                if !function.is_satisfied(value, mask, reference) {
                    return Ok(Flow::Stall);
                }
            }
            Command::WriteMemory { addr, value, width } => match width {
                DataWidth::Bits32 => self.memory.store_u32(addr, value as u32, Ordering::Release)?,
                DataWidth::Bits64 => self.memory.store_u64(addr, value, Ordering::Release)?,
            },
            Command::NotifyAndWrite {
                addr,
                value,
                raise_interrupt,
            } => {
                fence(Ordering::SeqCst);
                self.memory.store_u32(addr, value, Ordering::Release)?;
                if raise_interrupt {
                    self.stats.interrupts += 1;
                }
            }
            Command::WriteRegister { offset, value, .. } => self.set_register(offset, value),
            Command::CopyData {
                source,
                src,
                dst,
                width,
                ..
            } => {
                let value = match source {
                    CopySource::Memory => match width {
                        DataWidth::Bits32 => {
                            self.memory.load_u32(GpuAddr::new(src), Ordering::Acquire)? as u64
                        }
                        DataWidth::Bits64 => self.memory.load_u64(GpuAddr::new(src), Ordering::Acquire)?,
                    },
                    CopySource::Register => {
                        let lo = self.register(src as u32) as u64;
                        let hi = match width {
                            DataWidth::Bits32 => 0,
                            DataWidth::Bits64 => self.register(src as u32 + 1) as u64,
                        };
                        (hi << 32) | lo
                    }
                    // Every counter reads the executed packet count
                    CopySource::PerfCounter => self.stats.packets,
                };
                match width {
                    DataWidth::Bits32 => self.memory.store_u32(dst, value as u32, Ordering::Release)?,
                    DataWidth::Bits64 => self.memory.store_u64(dst, value, Ordering::Release)?,
                }
            }
            Command::DmaCopy {
                src,
                dst,
                byte_count,
                ..
            } => self.memory.copy_bytes(src, dst, byte_count)?,
        }
        Ok(Flow::Continue)
    }
}

impl core::fmt::Debug for SoftProcessor<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SoftProcessor")
            .field("consumer", &self.consumer)
            .field("registers", &self.registers)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doorbell::DoorbellCell;
    use crate::ring::RingConfig;
    use crate::submit::{SubmitConfig, Submitter};
    use core::sync::atomic::AtomicBool;
    use ember_core::memory::HostMemory;
    use ember_core::sync::{
        HostSignals, SignalHandle, SignalVisibility, WaitCondition, WaitHint, WaitTimeout,
    };
    use ember_core::ByteSize;
    use ember_pm4::{CacheFlags, PacketEncoder, WaitFunction};

    const BASE: GpuAddr = GpuAddr::new(0x20_0000);

    struct Rig {
        ring: QueueRing,
        bell: DoorbellCell,
        memory: HostMemory,
        signals: HostSignals,
        encoder: PacketEncoder,
    }

    fn rig(slots: u32) -> Rig {
        Rig {
            ring: QueueRing::new(RingConfig {
                slot_count: slots,
                ..RingConfig::default()
            })
            .unwrap(),
            bell: DoorbellCell::new(),
            memory: HostMemory::new(BASE, ByteSize::KIB_4).unwrap(),
            signals: HostSignals::new(),
            encoder: PacketEncoder::new(),
        }
    }

    #[test]
    fn test_end_to_end_notify() {
        let rig = rig(4);
        let addr = BASE.offset(0x100);
        let done = AtomicBool::new(false);

        std::thread::scope(|s| {
            s.spawn(|| {
                let mut cp = SoftProcessor::new(&rig.ring, &rig.memory, &rig.signals);
                while !done.load(Ordering::Acquire) {
                    if cp.step().unwrap() != StepOutcome::Retired {
                        std::thread::yield_now();
                    }
                }
                assert_eq!(cp.stats().slots_retired, 3);
                assert_eq!(cp.interrupts(), 1);
            });

            let submitter = Submitter::new(&rig.ring, &rig.bell);
            let barrier = rig.encoder.barrier().unwrap();
            let invalidate = rig
                .encoder
                .cache_invalidate(CacheFlags::L1 | CacheFlags::L2)
                .unwrap();
            let notify = rig.encoder.notify_and_write(addr, 0x1, true).unwrap();

            submitter.submit(&barrier, SignalHandle::NONE).unwrap();
            submitter.submit(&invalidate, SignalHandle::NONE).unwrap();
            let result = submitter.submit_and_wait(&notify, &rig.signals);
            done.store(true, Ordering::Release);
            assert_eq!(result, Ok(()));
        });

        assert_eq!(rig.memory.load_u32(addr, Ordering::Acquire), Ok(0x1));
        assert_eq!(rig.signals.live_count(), 0);
        assert_eq!(rig.bell.value(), 3);
    }

    #[test]
    fn test_wait_stalls_until_satisfied() {
        let rig = rig(4);
        let flag = BASE.offset(0x40);
        let out = BASE.offset(0x80);

        let submitter = Submitter::new(&rig.ring, &rig.bell);
        let mut cp = SoftProcessor::new(&rig.ring, &rig.memory, &rig.signals);

        submitter
            .submit(&rig.encoder.write_memory(out, 5, DataWidth::Bits32).unwrap(), SignalHandle::NONE)
            .unwrap();
        submitter
            .submit(
                &rig.encoder
                    .wait_reg_mem(WaitTarget::Memory(flag), WaitFunction::Equal, 0xFF, 1)
                    .unwrap(),
                SignalHandle::NONE,
            )
            .unwrap();
        submitter
            .submit(
                &rig.encoder.atomic(AtomicOp::Increment, out, 1, 0).unwrap(),
                SignalHandle::NONE,
            )
            .unwrap();

        assert_eq!(cp.drain(), Ok(1));
        assert_eq!(cp.step(), Ok(StepOutcome::Stalled));
        assert_eq!(rig.ring.read_index(), 1);

        rig.memory.store_u32(flag, 0x101, Ordering::Release).unwrap();
        assert_eq!(cp.drain(), Ok(2));
        assert_eq!(rig.memory.load_u64(out, Ordering::Acquire), Ok(6));
        assert_eq!(cp.step(), Ok(StepOutcome::Idle));
    }

    #[test]
    fn test_blocking_cas_and_registers() {
        let rig = rig(4);
        let lock = BASE.offset(0x200);
        let submitter = Submitter::new(&rig.ring, &rig.bell);
        let mut cp = SoftProcessor::new(&rig.ring, &rig.memory, &rig.signals);

        rig.memory.store_u64(lock, 1, Ordering::Release).unwrap();
        submitter
            .submit(
                &rig.encoder
                    .atomic(AtomicOp::BlockingCompareAndSwap, lock, 7, 0)
                    .unwrap(),
                SignalHandle::NONE,
            )
            .unwrap();
        assert_eq!(cp.step(), Ok(StepOutcome::Stalled));
        assert_eq!(cp.stats().stalls, 1);

        rig.memory.store_u64(lock, 0, Ordering::Release).unwrap();
        assert_eq!(cp.step(), Ok(StepOutcome::Retired));
        assert_eq!(rig.memory.load_u64(lock, Ordering::Acquire), Ok(7));

        let reg = ember_pm4::gfx9::UCONFIG_REG_START + 0x10;
        submitter
            .submit(&rig.encoder.write_uconfig_reg(reg, 0xAB).unwrap(), SignalHandle::NONE)
            .unwrap();
        submitter
            .submit(
                &rig.encoder
                    .copy_data(CopySource::Register, reg as u64, BASE, DataWidth::Bits32, true)
                    .unwrap(),
                SignalHandle::NONE,
            )
            .unwrap();
        assert_eq!(cp.drain(), Ok(2));
        assert_eq!(cp.register(reg), 0xAB);
        assert_eq!(rig.memory.load_u32(BASE, Ordering::Acquire), Ok(0xAB));
    }

    #[test]
    fn test_signal_decremented_on_retire() {
        let rig = rig(2);
        let submitter = Submitter::new(&rig.ring, &rig.bell);
        let mut cp = SoftProcessor::new(&rig.ring, &rig.memory, &rig.signals);
        let handle = rig.signals.create(2, SignalVisibility::Process).unwrap();

        let packet = rig.encoder.barrier().unwrap();
        submitter.submit(&packet, handle).unwrap();
        submitter.submit(&packet, handle).unwrap();
        assert_eq!(cp.drain(), Ok(2));

        let observed = rig
            .signals
            .wait(handle, WaitCondition::Eq, 0, WaitTimeout::Polls(1), WaitHint::Active)
            .unwrap();
        assert_eq!(observed, 0);
    }

    #[test]
    fn test_retires_slot_after_waiter_timed_out() {
        let rig = rig(4);
        let out = BASE.offset(0x300);
        let submitter = Submitter::with_config(
            &rig.ring,
            &rig.bell,
            SubmitConfig {
                completion_timeout: WaitTimeout::Polls(4),
                ..SubmitConfig::default()
            },
        );
        let mut cp = SoftProcessor::new(&rig.ring, &rig.memory, &rig.signals);

        let barrier = rig.encoder.barrier().unwrap();
        assert_eq!(
            submitter.submit_and_wait(&barrier, &rig.signals),
            Err(Error::UnexpectedSignalValue)
        );
        assert_eq!(rig.signals.live_count(), 0);

        submitter
            .submit(&rig.encoder.write_memory(out, 9, DataWidth::Bits32).unwrap(), SignalHandle::NONE)
            .unwrap();

        assert_eq!(cp.drain(), Ok(2));
        assert_eq!(rig.ring.read_index(), 2);
        assert_eq!(rig.memory.load_u32(out, Ordering::Acquire), Ok(9));
    }

    #[test]
    fn test_indirect_buffer_nesting_limit() {
        let rig = rig(2);
        let submitter = Submitter::new(&rig.ring, &rig.bell);
        let mut cp = SoftProcessor::new(&rig.ring, &rig.memory, &rig.signals);

        // An IB that calls itself
        let ib_addr = BASE.offset(0x400);
        let self_call = rig.encoder.indirect_buffer(ib_addr, 16).unwrap();
        rig.memory.write_bytes(ib_addr, self_call.as_bytes()).unwrap();

        submitter.submit(&self_call, SignalHandle::NONE).unwrap();
        assert_eq!(cp.step(), Err(Error::NotSupported));
        assert_eq!(rig.ring.read_index(), 0);
    }
}
