//! # Packet Encoder
//!
//! One operation per command kind. Each call copies the matching template,
//! validates and patches the call-specific fields and returns a fresh
//! [`Packet`]. The encoder holds no mutable state and can be shared freely
//! between producer threads.

use ember_core::{ByteSize, Error, GpuAddr, Result};

use crate::gfx9::{self, CoherCntl};
use crate::observer::{NullObserver, PacketObserver};
use crate::packet::Packet;
use crate::records::{DataWidth, Record, RegWindow, WaitTarget};
use crate::template::PacketTemplates;

// =============================================================================
// OPERATION SELECTORS
// =============================================================================

/// Atomic memory operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AtomicOp {
    /// `*addr += value`
    Add = 0,
    /// `*addr -= value`
    Subtract = 1,
    /// `*addr = value`
    Swap = 2,
    /// `if *addr == compare { *addr = value }`
    CompareAndSwap = 3,
    /// Compare-and-swap retried until it succeeds
    BlockingCompareAndSwap = 4,
    /// Add with `value == 1`
    Increment = 5,
    /// Subtract with `value == 1`
    Decrement = 6,
}

impl AtomicOp {
    /// TC op code performing this operation
    pub const fn tc_op(self) -> u32 {
        match self {
            Self::Add | Self::Increment => gfx9::tc_op::ATOMIC_ADD_RTN_64,
            Self::Subtract | Self::Decrement => gfx9::tc_op::ATOMIC_SUB_RTN_64,
            Self::Swap => gfx9::tc_op::ATOMIC_SWAP_RTN_64,
            Self::CompareAndSwap | Self::BlockingCompareAndSwap => {
                gfx9::tc_op::ATOMIC_CMPSWAP_RTN_64
            }
        }
    }
}

impl TryFrom<u32> for AtomicOp {
    type Error = Error;

    fn try_from(raw: u32) -> Result<Self> {
        Ok(match raw {
            0 => Self::Add,
            1 => Self::Subtract,
            2 => Self::Swap,
            3 => Self::CompareAndSwap,
            4 => Self::BlockingCompareAndSwap,
            5 => Self::Increment,
            6 => Self::Decrement,
            _ => return Err(Error::InvalidOperation),
        })
    }
}

bitflags::bitflags! {
    /// Caches touched by a cache invalidate
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CacheFlags: u32 {
        /// Vector L1
        const L1 = 1 << 0;
        /// L2
        const L2 = 1 << 1;
        /// Instruction cache
        const INSTRUCTION = 1 << 2;
        /// Scalar constant cache
        const CONSTANT = 1 << 3;
    }
}

impl CacheFlags {
    /// Coherence control bits for these caches
    pub fn coher_cntl(self) -> CoherCntl {
        let mut cntl = CoherCntl::empty();
        if self.contains(Self::L1) {
            cntl |= CoherCntl::TCL1_ACTION_ENA;
        }
        if self.contains(Self::L2) {
            cntl |= CoherCntl::TC_ACTION_ENA;
        }
        if self.contains(Self::INSTRUCTION) {
            cntl |= CoherCntl::SH_ICACHE_ACTION_ENA;
        }
        if self.contains(Self::CONSTANT) {
            cntl |= CoherCntl::SH_KCACHE_ACTION_ENA;
        }
        cntl
    }

    /// Caches named by coherence control bits
    pub fn from_coher_cntl(cntl: CoherCntl) -> Self {
        let mut flags = Self::empty();
        flags.set(Self::L1, cntl.contains(CoherCntl::TCL1_ACTION_ENA));
        flags.set(Self::L2, cntl.contains(CoherCntl::TC_ACTION_ENA));
        flags.set(Self::INSTRUCTION, cntl.contains(CoherCntl::SH_ICACHE_ACTION_ENA));
        flags.set(Self::CONSTANT, cntl.contains(CoherCntl::SH_KCACHE_ACTION_ENA));
        flags
    }
}

/// Comparison performed by a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitFunction {
    /// `(value & mask) == reference`
    Equal,
    /// `(value & mask) != reference`
    NotEqual,
}

impl WaitFunction {
    /// Hardware function code
    pub const fn code(self) -> u32 {
        match self {
            Self::Equal => gfx9::wait_function::EQUAL,
            Self::NotEqual => gfx9::wait_function::NOT_EQUAL,
        }
    }

    /// Decode a hardware function code
    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            gfx9::wait_function::EQUAL => Ok(Self::Equal),
            gfx9::wait_function::NOT_EQUAL => Ok(Self::NotEqual),
            _ => Err(Error::InvalidPacket),
        }
    }

    /// Evaluate against a polled value
    #[inline]
    pub const fn is_satisfied(self, value: u32, mask: u32, reference: u32) -> bool {
        match self {
            Self::Equal => value & mask == reference,
            Self::NotEqual => value & mask != reference,
        }
    }
}

/// Source of a COPY_DATA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CopySource {
    /// Memory-mapped register
    Register = gfx9::copy_src::REGISTER,
    /// Memory (4-byte aligned)
    Memory = gfx9::copy_src::MEMORY,
    /// Performance counter
    PerfCounter = gfx9::copy_src::PERF_COUNTER,
}

impl CopySource {
    /// Hardware source selector
    #[inline]
    pub const fn selector(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for CopySource {
    type Error = Error;

    fn try_from(selector: u32) -> Result<Self> {
        match selector {
            gfx9::copy_src::REGISTER => Ok(Self::Register),
            gfx9::copy_src::MEMORY => Ok(Self::Memory),
            gfx9::copy_src::PERF_COUNTER => Ok(Self::PerfCounter),
            _ => Err(Error::InvalidArgument),
        }
    }
}

// =============================================================================
// ENCODER
// =============================================================================

/// Stateless PM4 packet encoder
#[derive(Debug, Clone)]
pub struct PacketEncoder<O: PacketObserver = NullObserver> {
    templates: PacketTemplates,
    observer: O,
}

impl PacketEncoder {
    /// Encoder with the gfx9 templates and no observer
    pub fn new() -> Self {
        Self::with_observer(NullObserver)
    }
}

impl Default for PacketEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: PacketObserver> PacketEncoder<O> {
    /// Encoder reporting every packet to `observer`
    pub fn with_observer(observer: O) -> Self {
        Self {
            templates: PacketTemplates::gfx9(),
            observer,
        }
    }

    /// Templates this encoder copies from
    pub fn templates(&self) -> &PacketTemplates {
        &self.templates
    }

    /// Installed observer
    pub fn observer(&self) -> &O {
        &self.observer
    }

    fn finish(&self, record: impl Record) -> Result<Packet> {
        let packet = record.pack()?;
        self.observer.on_packet(&packet);
        Ok(packet)
    }

    /// Continue execution at `addr` for `size_bytes`
    pub fn indirect_buffer(&self, addr: GpuAddr, size_bytes: u64) -> Result<Packet> {
        addr.check_aligned(4)?;
        if size_bytes % 4 != 0 {
            return Err(Error::InvalidArgument);
        }
        let dwords = size_bytes / 4;
        if dwords >= gfx9::IB_MAX_DWORDS as u64 {
            return Err(Error::SizeUnsupported);
        }

        let mut ib = self.templates.indirect_buffer;
        ib.ib_base = addr;
        ib.ib_size = dwords as u32;
        self.finish(ib)
    }

    /// Atomic update of the qword at `addr` (8-byte aligned)
    ///
    /// `compare` is only used by the compare-and-swap variants.
    pub fn atomic(&self, op: AtomicOp, addr: GpuAddr, value: u64, compare: u64) -> Result<Packet> {
        addr.check_aligned(8)?;
        if matches!(op, AtomicOp::Increment | AtomicOp::Decrement) && value != 1 {
            return Err(Error::InvalidArgument);
        }

        let mut atomic = match op {
            AtomicOp::BlockingCompareAndSwap => self.templates.blocking_atomic,
            _ => self.templates.atomic,
        };
        atomic.atomic = op.tc_op();
        atomic.addr = addr;
        atomic.src_data = value;
        if matches!(op, AtomicOp::CompareAndSwap | AtomicOp::BlockingCompareAndSwap) {
            atomic.cmp_data = compare;
        }
        self.finish(atomic)
    }

    /// Drain the compute pipeline
    pub fn barrier(&self) -> Result<Packet> {
        self.finish(self.templates.barrier)
    }

    /// Invalidate `flags` caches over the whole address space
    pub fn cache_invalidate(&self, flags: CacheFlags) -> Result<Packet> {
        let mut acquire = self.templates.acquire;
        acquire.coher_cntl = flags.coher_cntl();
        self.finish(acquire)
    }

    /// Invalidate `flags` caches over `[base, base + size)`
    ///
    /// `base` must be 256-byte aligned and `size` a multiple of 256 bytes.
    pub fn cache_invalidate_range(
        &self,
        flags: CacheFlags,
        base: GpuAddr,
        size: ByteSize,
    ) -> Result<Packet> {
        base.check_aligned(256)?;
        if size.as_bytes() % 256 != 0 {
            return Err(Error::InvalidArgument);
        }

        let mut acquire = self.templates.acquire;
        acquire.coher_cntl = flags.coher_cntl();
        acquire.coher_base = base;
        acquire.coher_size = size.as_bytes();
        self.finish(acquire)
    }

    /// Block the consumer until `(*target & mask) <function> reference`
    pub fn wait_reg_mem(
        &self,
        target: WaitTarget,
        function: WaitFunction,
        mask: u32,
        reference: u32,
    ) -> Result<Packet> {
        if let WaitTarget::Memory(addr) = target {
            addr.check_aligned(4)?;
        }

        let mut wait = self.templates.wait;
        wait.target = target;
        wait.function = function.code();
        wait.mask = mask;
        wait.reference = reference;
        self.finish(wait)
    }

    /// Write `value` to `addr` (4-byte aligned) with write confirmation
    pub fn write_memory(&self, addr: GpuAddr, value: u64, width: DataWidth) -> Result<Packet> {
        addr.check_aligned(4)?;
        if width == DataWidth::Bits32 && value > u32::MAX as u64 {
            return Err(Error::InvalidArgument);
        }

        let mut write = self.templates.write_data;
        write.dst_addr = addr;
        write.width = width;
        write.data = value;
        self.finish(write)
    }

    /// End-of-pipe write of `value` to `addr` after a full cache flush
    pub fn notify_and_write(&self, addr: GpuAddr, value: u32, raise_interrupt: bool) -> Result<Packet> {
        addr.check_aligned(4)?;

        let mut release = self.templates.release;
        release.addr = addr;
        release.data = value as u64;
        if raise_interrupt {
            release.int_sel = gfx9::int_sel::AFTER_WRITE_CONFIRM;
        }
        self.finish(release)
    }

    /// Write a user config register (absolute dword offset)
    pub fn write_uconfig_reg(&self, offset: u32, value: u32) -> Result<Packet> {
        self.write_reg(RegWindow::UConfig, offset, value)
    }

    /// Write a shader register (absolute dword offset)
    pub fn write_sh_reg(&self, offset: u32, value: u32) -> Result<Packet> {
        self.write_reg(RegWindow::Sh, offset, value)
    }

    fn write_reg(&self, window: RegWindow, offset: u32, value: u32) -> Result<Packet> {
        let relative = offset
            .checked_sub(window.base())
            .filter(|rel| *rel < gfx9::REG_WINDOW_SPAN)
            .ok_or(Error::InvalidArgument)?;

        let mut set = match window {
            RegWindow::UConfig => self.templates.set_uconfig_reg,
            RegWindow::Sh => self.templates.set_sh_reg,
        };
        set.reg_offset = relative;
        set.value = value;
        self.finish(set)
    }

    /// Copy a register, memory or counter value to `dst` (4-byte aligned)
    pub fn copy_data(
        &self,
        source: CopySource,
        src: u64,
        dst: GpuAddr,
        width: DataWidth,
        wait_for_completion: bool,
    ) -> Result<Packet> {
        if source == CopySource::Memory {
            GpuAddr::new(src).check_aligned(4)?;
        }
        dst.check_aligned(4)?;

        let mut copy = self.templates.copy;
        copy.src_sel = source.selector();
        copy.src = src;
        copy.dst_addr = dst;
        copy.count_sel = width == DataWidth::Bits64;
        copy.wr_confirm = wait_for_completion;
        self.finish(copy)
    }

    /// DMA `byte_count` bytes (below 2^21) from `src` to `dst`
    pub fn dma_copy(
        &self,
        src: GpuAddr,
        dst: GpuAddr,
        byte_count: u64,
        wait_if_overlapping: bool,
    ) -> Result<Packet> {
        if byte_count >= gfx9::DMA_MAX_BYTE_COUNT as u64 {
            return Err(Error::SizeUnsupported);
        }

        let mut dma = self.templates.dma;
        dma.src_addr = src;
        dma.dst_addr = dst;
        dma.byte_count = byte_count as u32;
        dma.raw_wait = wait_if_overlapping;
        self.finish(dma)
    }
}

static_assertions::assert_impl_all!(PacketEncoder: Send, Sync, Clone);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{layout, AtomicMem, WaitRegMem};
    use core::cell::RefCell;
    use std::vec::Vec;

    const ADDR: GpuAddr = GpuAddr::new(0x0000_1234_5678_9A00);

    #[test]
    fn test_increment_matches_add() {
        let enc = PacketEncoder::new();
        let inc = enc.atomic(AtomicOp::Increment, ADDR, 1, 0).unwrap();
        let add = enc.atomic(AtomicOp::Add, ADDR, 1, 0).unwrap();
        assert_eq!(inc, add);

        let dec = enc.atomic(AtomicOp::Decrement, ADDR, 1, 0).unwrap();
        let sub = enc.atomic(AtomicOp::Subtract, ADDR, 1, 0).unwrap();
        assert_eq!(dec, sub);
    }

    #[test]
    fn test_increment_requires_one() {
        let enc = PacketEncoder::new();
        assert_eq!(enc.atomic(AtomicOp::Increment, ADDR, 2, 0), Err(Error::InvalidArgument));
        assert_eq!(enc.atomic(AtomicOp::Decrement, ADDR, 0, 0), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_atomic_alignment() {
        let enc = PacketEncoder::new();
        assert_eq!(
            enc.atomic(AtomicOp::Add, ADDR.offset(4), 1, 0),
            Err(Error::MisalignedAddress)
        );
    }

    #[test]
    fn test_unknown_atomic_op() {
        assert_eq!(AtomicOp::try_from(6), Ok(AtomicOp::Decrement));
        assert_eq!(AtomicOp::try_from(7), Err(Error::InvalidOperation));
    }

    #[test]
    fn test_blocking_cas_sets_loop_fields() {
        let enc = PacketEncoder::new();
        let cas = enc.atomic(AtomicOp::CompareAndSwap, ADDR, 5, 3).unwrap();
        let blocking = enc.atomic(AtomicOp::BlockingCompareAndSwap, ADDR, 5, 3).unwrap();

        let cas = AtomicMem::unpack(cas.words()).unwrap();
        let blocking = AtomicMem::unpack(blocking.words()).unwrap();
        assert_eq!(cas.atomic, gfx9::tc_op::ATOMIC_CMPSWAP_RTN_64);
        assert_eq!(cas.cmp_data, 3);
        assert_eq!(cas.command, gfx9::atomic_command::SINGLE_PASS);
        assert_eq!(cas.loop_interval, 0);

        assert_eq!(blocking.command, gfx9::atomic_command::LOOP_UNTIL_COMPARE_SATISFIED);
        assert_eq!(blocking.loop_interval, gfx9::ATOMIC_LOOP_INTERVAL);
        // Everything compare-and-swap sets is set identically
        assert_eq!(
            AtomicMem {
                command: cas.command,
                loop_interval: cas.loop_interval,
                ..blocking
            },
            cas
        );
    }

    #[test]
    fn test_cache_invalidate_flags() {
        let enc = PacketEncoder::new();
        let none = enc.cache_invalidate(CacheFlags::empty()).unwrap();
        assert_eq!(layout::acquire_mem::COHER_CNTL.get(none.words()), 0);

        let both = enc.cache_invalidate(CacheFlags::L1 | CacheFlags::L2).unwrap();
        assert_eq!(
            layout::acquire_mem::COHER_CNTL.get(both.words()),
            (CoherCntl::TCL1_ACTION_ENA | CoherCntl::TC_ACTION_ENA).bits()
        );
        assert_eq!(both.words()[2], 0xFFFF_FFFF);
        assert_eq!(both.words()[3], 0xFF);
        assert_eq!(both.words()[6], gfx9::POLL_INTERVAL);
    }

    #[test]
    fn test_cache_invalidate_range_alignment() {
        let enc = PacketEncoder::new();
        assert!(enc
            .cache_invalidate_range(CacheFlags::L2, GpuAddr::new(0x1000), ByteSize::KIB_4)
            .is_ok());
        assert_eq!(
            enc.cache_invalidate_range(CacheFlags::L2, GpuAddr::new(0x1080), ByteSize::KIB_4),
            Err(Error::MisalignedAddress)
        );
        assert_eq!(
            enc.cache_invalidate_range(CacheFlags::L2, GpuAddr::new(0x1000), ByteSize::from_bytes(100)),
            Err(Error::InvalidArgument)
        );
    }

    #[test]
    fn test_register_wait_has_no_high_address() {
        let enc = PacketEncoder::new();
        let pkt = enc
            .wait_reg_mem(WaitTarget::Register(0x2345), WaitFunction::NotEqual, 0xF, 0)
            .unwrap();
        assert_eq!(pkt.words()[3], 0);
        let wait = WaitRegMem::unpack(pkt.words()).unwrap();
        assert_eq!(wait.function, gfx9::wait_function::NOT_EQUAL);
        assert_eq!(wait.poll_interval, gfx9::POLL_INTERVAL);
    }

    #[test]
    fn test_memory_wait_alignment() {
        let enc = PacketEncoder::new();
        assert_eq!(
            enc.wait_reg_mem(
                WaitTarget::Memory(GpuAddr::new(0x1002)),
                WaitFunction::Equal,
                !0,
                1
            ),
            Err(Error::MisalignedAddress)
        );
        let pkt = enc
            .wait_reg_mem(WaitTarget::Memory(ADDR), WaitFunction::Equal, !0, 1)
            .unwrap();
        assert_eq!(pkt.words()[2], ADDR.lo32());
        assert_eq!(pkt.words()[3], ADDR.hi32());
    }

    #[test]
    fn test_dma_byte_count_limit() {
        let enc = PacketEncoder::new();
        let (src, dst) = (GpuAddr::new(0x1000), GpuAddr::new(0x8000));
        assert_eq!(enc.dma_copy(src, dst, 1 << 21, false), Err(Error::SizeUnsupported));
        assert_eq!(enc.dma_copy(src, dst, u64::MAX, false), Err(Error::SizeUnsupported));
        let pkt = enc.dma_copy(src, dst, (1 << 21) - 1, true).unwrap();
        assert_eq!(layout::dma_data::BYTE_COUNT.get(pkt.words()), (1 << 21) - 1);
        assert!(layout::dma_data::RAW_WAIT.flag(pkt.words()));
        assert!(layout::dma_data::CP_SYNC.flag(pkt.words()));
    }

    #[test]
    fn test_register_window() {
        let enc = PacketEncoder::new();
        let pkt = enc.write_sh_reg(gfx9::SH_REG_START + 0x20, 0xAB).unwrap();
        assert_eq!(pkt.words(), &[0xC001_7600, 0x20, 0xAB]);
        assert_eq!(enc.write_uconfig_reg(0x100, 0), Err(Error::InvalidArgument));
        assert_eq!(
            enc.write_uconfig_reg(gfx9::UCONFIG_REG_START + gfx9::REG_WINDOW_SPAN, 0),
            Err(Error::InvalidArgument)
        );
    }

    #[test]
    fn test_copy_source_selectors() {
        assert_eq!(CopySource::try_from(4), Ok(CopySource::PerfCounter));
        assert_eq!(CopySource::try_from(2), Err(Error::InvalidArgument));

        let enc = PacketEncoder::new();
        let pkt = enc
            .copy_data(CopySource::PerfCounter, 7, ADDR, DataWidth::Bits64, true)
            .unwrap();
        assert_eq!(layout::copy_data::SRC_SEL.get(pkt.words()), 4);
        assert_eq!(layout::copy_data::DST_SEL.get(pkt.words()), gfx9::DST_SEL_MEMORY);
        assert!(layout::copy_data::COUNT_SEL.flag(pkt.words()));
        assert!(layout::copy_data::WR_CONFIRM.flag(pkt.words()));
    }

    #[test]
    fn test_notify_and_write_interrupt() {
        let enc = PacketEncoder::new();
        let quiet = enc.notify_and_write(ADDR, 1, false).unwrap();
        let loud = enc.notify_and_write(ADDR, 1, true).unwrap();
        assert_eq!(layout::release_mem::INT_SEL.get(quiet.words()), gfx9::int_sel::NONE);
        assert_eq!(
            layout::release_mem::INT_SEL.get(loud.words()),
            gfx9::int_sel::AFTER_WRITE_CONFIRM
        );
        assert_eq!(quiet.words()[1] & 0x3_B000, 0x3_B000);
    }

    #[test]
    fn test_indirect_buffer_size() {
        let enc = PacketEncoder::new();
        assert_eq!(enc.indirect_buffer(ADDR, 6), Err(Error::InvalidArgument));
        assert_eq!(
            enc.indirect_buffer(ADDR, (gfx9::IB_MAX_DWORDS as u64) * 4),
            Err(Error::SizeUnsupported)
        );
        let pkt = enc.indirect_buffer(ADDR, 256).unwrap();
        assert_eq!(layout::indirect_buffer::IB_SIZE.get(pkt.words()), 64);
    }

    struct Recorder(RefCell<Vec<gfx9::PacketKind>>);

    impl PacketObserver for Recorder {
        fn on_packet(&self, packet: &Packet) {
            self.0.borrow_mut().push(packet.kind());
        }
    }

    #[test]
    fn test_observer_sees_packets() {
        let enc = PacketEncoder::with_observer(Recorder(RefCell::new(Vec::new())));
        enc.barrier().unwrap();
        enc.write_memory(ADDR, 1, DataWidth::Bits32).unwrap();
        let _ = enc.write_memory(ADDR.offset(1), 1, DataWidth::Bits32);
        assert_eq!(
            *enc.observer().0.borrow(),
            [gfx9::PacketKind::EventWrite, gfx9::PacketKind::WriteData]
        );
    }
}
