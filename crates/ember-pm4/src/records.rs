//! # Packet Records
//!
//! One struct of named hardware fields per packet kind, with explicit
//! `pack`/`unpack`. Bit positions come from the [`layout`] tables; nothing
//! relies on native struct layout.

use ember_core::{Error, GpuAddr, Result};

use crate::gfx9::{self, CoherCntl, PacketKind, ReleaseActions};
use crate::header::Header;
use crate::packet::Packet;

// =============================================================================
// FIELD LAYOUT TABLES
// =============================================================================

/// Bit layouts, keyed by packet kind
pub mod layout {
    //! Field tables (word 0 is the header)

    use ember_core::bits::{Field, SplitField};

    /// Dword-aligned address: `addr[31:2]` in `lo_word`, `addr[63:32]` in the next dword
    pub const fn dword_addr(lo_word: usize) -> SplitField {
        SplitField::new(Field::new(lo_word, 2, 31), Field::dword(lo_word + 1), 2)
    }

    /// INDIRECT_BUFFER
    pub mod indirect_buffer {
        use super::*;
        /// Buffer address
        pub const IB_BASE: SplitField = dword_addr(1);
        /// Size in dwords
        pub const IB_SIZE: Field = Field::new(3, 0, 19);
        /// Chained IB
        pub const CHAIN: Field = Field::bit(3, 20);
        /// Valid bit
        pub const VALID: Field = Field::bit(3, 23);
        /// VMID
        pub const VMID: Field = Field::new(3, 24, 27);
        /// Cache policy
        pub const CACHE_POLICY: Field = Field::new(3, 28, 29);
    }

    /// ATOMIC_MEM
    pub mod atomic_mem {
        use super::*;
        /// TC op
        pub const ATOMIC: Field = Field::new(1, 0, 6);
        /// Command (single pass / loop)
        pub const COMMAND: Field = Field::new(1, 8, 11);
        /// Cache policy
        pub const CACHE_POLICY: Field = Field::new(1, 25, 26);
        /// Target address
        pub const ADDR: SplitField = SplitField::pair(2);
        /// Source data
        pub const SRC_DATA: SplitField = SplitField::pair(4);
        /// Compare data
        pub const CMP_DATA: SplitField = SplitField::pair(6);
        /// Loop interval
        pub const LOOP_INTERVAL: Field = Field::new(8, 0, 12);
    }

    /// EVENT_WRITE
    pub mod event_write {
        use super::*;
        /// Event type
        pub const EVENT_TYPE: Field = Field::new(1, 0, 5);
        /// Event index
        pub const EVENT_INDEX: Field = Field::new(1, 8, 11);
    }

    /// ACQUIRE_MEM
    pub mod acquire_mem {
        use super::*;
        /// Coherence control
        pub const COHER_CNTL: Field = Field::new(1, 0, 30);
        /// Engine select
        pub const ENGINE_SEL: Field = Field::bit(1, 31);
        /// Size, 256-byte units
        pub const COHER_SIZE: SplitField = SplitField::new(Field::dword(2), Field::new(3, 0, 7), 8);
        /// Base, 256-byte units
        pub const COHER_BASE: SplitField = SplitField::new(Field::dword(4), Field::new(5, 0, 23), 8);
        /// Poll interval
        pub const POLL_INTERVAL: Field = Field::new(6, 0, 15);
    }

    /// WAIT_REG_MEM
    pub mod wait_reg_mem {
        use super::*;
        /// Compare function
        pub const FUNCTION: Field = Field::new(1, 0, 2);
        /// Register or memory
        pub const MEM_SPACE: Field = Field::new(1, 4, 5);
        /// Operation
        pub const OPERATION: Field = Field::new(1, 6, 7);
        /// Engine select
        pub const ENGINE_SEL: Field = Field::new(1, 8, 9);
        /// Memory poll address
        pub const POLL_ADDR: SplitField = dword_addr(2);
        /// Register poll index
        pub const POLL_REG: Field = Field::new(2, 0, 15);
        /// High poll address (memory only)
        pub const POLL_ADDR_HI: Field = Field::dword(3);
        /// Reference value
        pub const REFERENCE: Field = Field::dword(4);
        /// Mask
        pub const MASK: Field = Field::dword(5);
        /// Poll interval
        pub const POLL_INTERVAL: Field = Field::new(6, 0, 15);
    }

    /// WRITE_DATA
    pub mod write_data {
        use super::*;
        /// Destination select
        pub const DST_SEL: Field = Field::new(1, 8, 11);
        /// Address increment disable (0 = increment)
        pub const ADDR_INCR: Field = Field::bit(1, 16);
        /// Write confirm
        pub const WR_CONFIRM: Field = Field::bit(1, 20);
        /// Cache policy
        pub const CACHE_POLICY: Field = Field::new(1, 25, 26);
        /// Engine select
        pub const ENGINE_SEL: Field = Field::new(1, 30, 31);
        /// Destination address
        pub const DST_ADDR: SplitField = dword_addr(2);
        /// First data dword
        pub const DATA_LO: Field = Field::dword(4);
        /// Second data dword (64-bit writes)
        pub const DATA_HI: Field = Field::dword(5);
    }

    /// RELEASE_MEM
    pub mod release_mem {
        use super::*;
        /// Event type
        pub const EVENT_TYPE: Field = Field::new(1, 0, 5);
        /// Event index
        pub const EVENT_INDEX: Field = Field::new(1, 8, 11);
        /// Cache action bits 12..=17
        pub const ACTIONS: Field = Field::new(1, 12, 17);
        /// Cache policy
        pub const CACHE_POLICY: Field = Field::new(1, 25, 26);
        /// Destination select
        pub const DST_SEL: Field = Field::new(2, 16, 17);
        /// Interrupt select
        pub const INT_SEL: Field = Field::new(2, 24, 26);
        /// Data select
        pub const DATA_SEL: Field = Field::new(2, 29, 31);
        /// Destination address
        pub const ADDR: SplitField = dword_addr(3);
        /// Data
        pub const DATA: SplitField = SplitField::pair(5);
        /// Interrupt context id
        pub const INT_CTXID: Field = Field::dword(7);
    }

    /// SET_UCONFIG_REG / SET_SH_REG
    pub mod set_reg {
        use super::*;
        /// Offset from the window base
        pub const REG_OFFSET: Field = Field::new(1, 0, 15);
        /// Value
        pub const VALUE: Field = Field::dword(2);
    }

    /// COPY_DATA
    pub mod copy_data {
        use super::*;
        /// Source select
        pub const SRC_SEL: Field = Field::new(1, 0, 3);
        /// Destination select
        pub const DST_SEL: Field = Field::new(1, 8, 11);
        /// 64-bit count
        pub const COUNT_SEL: Field = Field::bit(1, 16);
        /// Write confirm
        pub const WR_CONFIRM: Field = Field::bit(1, 20);
        /// Engine select
        pub const ENGINE_SEL: Field = Field::new(1, 30, 31);
        /// Source address, register or counter select
        pub const SRC: SplitField = SplitField::pair(2);
        /// Destination address
        pub const DST_ADDR: SplitField = dword_addr(4);
    }

    /// DMA_DATA
    pub mod dma_data {
        use super::*;
        /// Engine
        pub const ENGINE: Field = Field::bit(1, 0);
        /// Source cache policy
        pub const SRC_CACHE_POLICY: Field = Field::new(1, 13, 14);
        /// Destination select
        pub const DST_SEL: Field = Field::new(1, 20, 21);
        /// Destination cache policy
        pub const DST_CACHE_POLICY: Field = Field::new(1, 25, 26);
        /// Source select
        pub const SRC_SEL: Field = Field::new(1, 29, 30);
        /// CP waits for DMA completion
        pub const CP_SYNC: Field = Field::bit(1, 31);
        /// Source address
        pub const SRC_ADDR: SplitField = SplitField::pair(2);
        /// Destination address
        pub const DST_ADDR: SplitField = SplitField::pair(4);
        /// Byte count
        pub const BYTE_COUNT: Field = Field::new(6, 0, 20);
        /// Read-after-write wait
        pub const RAW_WAIT: Field = Field::bit(6, 25);
        /// Disable write confirm
        pub const DIS_WC: Field = Field::bit(6, 26);
    }
}

use layout::*;

// =============================================================================
// RECORD TRAIT
// =============================================================================

/// A packet kind with explicit pack/unpack
pub trait Record: Sized + Copy {
    /// Packet kind this record encodes
    fn kind(&self) -> PacketKind;

    /// Serialize into a fresh packet
    fn pack(&self) -> Result<Packet>;

    /// Parse from words (header first)
    fn unpack(words: &[u32]) -> Result<Self>;
}

/// Validate the header of `words` against the allowed lengths of `kind`
fn check_header(words: &[u32], kind: PacketKind, lengths: &[usize]) -> Result<usize> {
    let header = Header::decode(*words.first().ok_or(Error::InvalidPacket)?)?;
    if header.opcode != kind.format().opcode
        || !lengths.contains(&header.dwords)
        || words.len() < header.dwords
    {
        return Err(Error::InvalidPacket);
    }
    Ok(header.dwords)
}

fn base_length(kind: PacketKind) -> usize {
    kind.format().dwords as usize
}

// =============================================================================
// INDIRECT_BUFFER
// =============================================================================

/// INDIRECT_BUFFER record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectBuffer {
    /// Buffer address (4-byte aligned)
    pub ib_base: GpuAddr,
    /// Buffer size in dwords
    pub ib_size: u32,
    /// Chained IB
    pub chain: bool,
    /// Valid bit
    pub valid: bool,
    /// VMID
    pub vmid: u32,
    /// Cache policy
    pub cache_policy: u32,
}

impl Record for IndirectBuffer {
    fn kind(&self) -> PacketKind {
        PacketKind::IndirectBuffer
    }

    fn pack(&self) -> Result<Packet> {
        use indirect_buffer::*;
        let mut pkt = Packet::new(self.kind(), base_length(self.kind()))?;
        let w = pkt.words_mut();
        IB_BASE.set_addr(w, self.ib_base)?;
        if !IB_SIZE.fits(self.ib_size) {
            return Err(Error::SizeUnsupported);
        }
        IB_SIZE.set(w, self.ib_size);
        CHAIN.set_flag(w, self.chain);
        VALID.set_flag(w, self.valid);
        VMID.set_checked(w, self.vmid)?;
        CACHE_POLICY.set_checked(w, self.cache_policy)?;
        Ok(pkt)
    }

    fn unpack(w: &[u32]) -> Result<Self> {
        use indirect_buffer::*;
        check_header(w, PacketKind::IndirectBuffer, &[base_length(PacketKind::IndirectBuffer)])?;
        Ok(Self {
            ib_base: IB_BASE.get_addr(w),
            ib_size: IB_SIZE.get(w),
            chain: CHAIN.flag(w),
            valid: VALID.flag(w),
            vmid: VMID.get(w),
            cache_policy: CACHE_POLICY.get(w),
        })
    }
}

// =============================================================================
// ATOMIC_MEM
// =============================================================================

/// ATOMIC_MEM record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomicMem {
    /// TC op
    pub atomic: u32,
    /// Command (single pass / loop until compare satisfied)
    pub command: u32,
    /// Cache policy
    pub cache_policy: u32,
    /// Target address (8-byte aligned)
    pub addr: GpuAddr,
    /// Source operand
    pub src_data: u64,
    /// Compare operand
    pub cmp_data: u64,
    /// Clocks between loop iterations
    pub loop_interval: u32,
}

impl Record for AtomicMem {
    fn kind(&self) -> PacketKind {
        PacketKind::AtomicMem
    }

    fn pack(&self) -> Result<Packet> {
        use atomic_mem::*;
        let mut pkt = Packet::new(self.kind(), base_length(self.kind()))?;
        let w = pkt.words_mut();
        ATOMIC.set_checked(w, self.atomic)?;
        COMMAND.set_checked(w, self.command)?;
        CACHE_POLICY.set_checked(w, self.cache_policy)?;
        ADDR.set_addr(w, self.addr)?;
        SRC_DATA.set(w, self.src_data)?;
        CMP_DATA.set(w, self.cmp_data)?;
        LOOP_INTERVAL.set_checked(w, self.loop_interval)?;
        Ok(pkt)
    }

    fn unpack(w: &[u32]) -> Result<Self> {
        use atomic_mem::*;
        check_header(w, PacketKind::AtomicMem, &[base_length(PacketKind::AtomicMem)])?;
        Ok(Self {
            atomic: ATOMIC.get(w),
            command: COMMAND.get(w),
            cache_policy: CACHE_POLICY.get(w),
            addr: ADDR.get_addr(w),
            src_data: SRC_DATA.get(w),
            cmp_data: CMP_DATA.get(w),
            loop_interval: LOOP_INTERVAL.get(w),
        })
    }
}

// =============================================================================
// EVENT_WRITE
// =============================================================================

/// EVENT_WRITE record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventWrite {
    /// Event type
    pub event_type: u32,
    /// Event index
    pub event_index: u32,
}

impl Record for EventWrite {
    fn kind(&self) -> PacketKind {
        PacketKind::EventWrite
    }

    fn pack(&self) -> Result<Packet> {
        use event_write::*;
        let mut pkt = Packet::new(self.kind(), base_length(self.kind()))?;
        let w = pkt.words_mut();
        EVENT_TYPE.set_checked(w, self.event_type)?;
        EVENT_INDEX.set_checked(w, self.event_index)?;
        Ok(pkt)
    }

    fn unpack(w: &[u32]) -> Result<Self> {
        use event_write::*;
        check_header(w, PacketKind::EventWrite, &[base_length(PacketKind::EventWrite)])?;
        Ok(Self {
            event_type: EVENT_TYPE.get(w),
            event_index: EVENT_INDEX.get(w),
        })
    }
}

// =============================================================================
// ACQUIRE_MEM
// =============================================================================

/// ACQUIRE_MEM record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireMem {
    /// Cache actions
    pub coher_cntl: CoherCntl,
    /// Engine select
    pub engine_sel: u32,
    /// Range size in bytes (multiple of 256)
    pub coher_size: u64,
    /// Range base (256-byte aligned)
    pub coher_base: GpuAddr,
    /// Poll interval
    pub poll_interval: u32,
}

impl AcquireMem {
    /// Size value covering the whole address space
    pub const FULL_RANGE_BYTES: u64 = 0xFF_FFFF_FFFF << 8;
}

impl Record for AcquireMem {
    fn kind(&self) -> PacketKind {
        PacketKind::AcquireMem
    }

    fn pack(&self) -> Result<Packet> {
        use acquire_mem::*;
        let mut pkt = Packet::new(self.kind(), base_length(self.kind()))?;
        let w = pkt.words_mut();
        COHER_CNTL.set_checked(w, self.coher_cntl.bits())?;
        ENGINE_SEL.set_checked(w, self.engine_sel)?;
        COHER_SIZE.set(w, self.coher_size).map_err(|e| match e {
            Error::InvalidArgument => Error::SizeUnsupported,
            other => other,
        })?;
        COHER_BASE.set_addr(w, self.coher_base)?;
        POLL_INTERVAL.set_checked(w, self.poll_interval)?;
        Ok(pkt)
    }

    fn unpack(w: &[u32]) -> Result<Self> {
        use acquire_mem::*;
        check_header(w, PacketKind::AcquireMem, &[base_length(PacketKind::AcquireMem)])?;
        Ok(Self {
            coher_cntl: CoherCntl::from_bits_retain(COHER_CNTL.get(w)),
            engine_sel: ENGINE_SEL.get(w),
            coher_size: COHER_SIZE.get(w),
            coher_base: COHER_BASE.get_addr(w),
            poll_interval: POLL_INTERVAL.get(w),
        })
    }
}

// =============================================================================
// WAIT_REG_MEM
// =============================================================================

/// What a wait polls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTarget {
    /// A dword in memory (4-byte aligned)
    Memory(GpuAddr),
    /// A register, by index
    Register(u32),
}

/// WAIT_REG_MEM record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitRegMem {
    /// Compare function
    pub function: u32,
    /// Operation
    pub operation: u32,
    /// Engine select
    pub engine_sel: u32,
    /// Polled location (selects mem_space)
    pub target: WaitTarget,
    /// Reference value
    pub reference: u32,
    /// Mask applied to the polled value
    pub mask: u32,
    /// Poll interval
    pub poll_interval: u32,
}

impl Record for WaitRegMem {
    fn kind(&self) -> PacketKind {
        PacketKind::WaitRegMem
    }

    fn pack(&self) -> Result<Packet> {
        use wait_reg_mem::*;
        let mut pkt = Packet::new(self.kind(), base_length(self.kind()))?;
        let w = pkt.words_mut();
        FUNCTION.set_checked(w, self.function)?;
        OPERATION.set_checked(w, self.operation)?;
        ENGINE_SEL.set_checked(w, self.engine_sel)?;
        match self.target {
            WaitTarget::Memory(addr) => {
                MEM_SPACE.set(w, gfx9::mem_space::MEMORY);
                POLL_ADDR.set_addr(w, addr)?;
            }
            WaitTarget::Register(index) => {
                // No high address word for register polls
                MEM_SPACE.set(w, gfx9::mem_space::REGISTER);
                POLL_REG.set_checked(w, index)?;
            }
        }
        REFERENCE.set(w, self.reference);
        MASK.set(w, self.mask);
        POLL_INTERVAL.set_checked(w, self.poll_interval)?;
        Ok(pkt)
    }

    fn unpack(w: &[u32]) -> Result<Self> {
        use wait_reg_mem::*;
        check_header(w, PacketKind::WaitRegMem, &[base_length(PacketKind::WaitRegMem)])?;
        let target = match MEM_SPACE.get(w) {
            gfx9::mem_space::MEMORY => WaitTarget::Memory(POLL_ADDR.get_addr(w)),
            gfx9::mem_space::REGISTER => WaitTarget::Register(POLL_REG.get(w)),
            _ => return Err(Error::InvalidPacket),
        };
        Ok(Self {
            function: FUNCTION.get(w),
            operation: OPERATION.get(w),
            engine_sel: ENGINE_SEL.get(w),
            target,
            reference: REFERENCE.get(w),
            mask: MASK.get(w),
            poll_interval: POLL_INTERVAL.get(w),
        })
    }
}

// =============================================================================
// WRITE_DATA
// =============================================================================

/// Payload width of data-moving packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataWidth {
    /// 32-bit
    Bits32,
    /// 64-bit
    Bits64,
}

impl DataWidth {
    /// Width from a bit count
    pub fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            32 => Ok(Self::Bits32),
            64 => Ok(Self::Bits64),
            _ => Err(Error::InvalidArgument),
        }
    }

    /// Number of dwords moved
    pub const fn dwords(self) -> usize {
        match self {
            Self::Bits32 => 1,
            Self::Bits64 => 2,
        }
    }
}

/// WRITE_DATA record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteData {
    /// Destination select
    pub dst_sel: u32,
    /// Disable address increment
    pub addr_incr_disable: bool,
    /// Wait for write confirmation
    pub wr_confirm: bool,
    /// Cache policy
    pub cache_policy: u32,
    /// Engine select
    pub engine_sel: u32,
    /// Destination address (4-byte aligned)
    pub dst_addr: GpuAddr,
    /// Payload width
    pub width: DataWidth,
    /// Payload (upper half ignored for 32-bit writes)
    pub data: u64,
}

impl Record for WriteData {
    fn kind(&self) -> PacketKind {
        PacketKind::WriteData
    }

    fn pack(&self) -> Result<Packet> {
        use write_data::*;
        let dwords = base_length(self.kind()) - 1 + self.width.dwords();
        let mut pkt = Packet::new(self.kind(), dwords)?;
        let w = pkt.words_mut();
        DST_SEL.set_checked(w, self.dst_sel)?;
        ADDR_INCR.set_flag(w, self.addr_incr_disable);
        WR_CONFIRM.set_flag(w, self.wr_confirm);
        CACHE_POLICY.set_checked(w, self.cache_policy)?;
        ENGINE_SEL.set_checked(w, self.engine_sel)?;
        DST_ADDR.set_addr(w, self.dst_addr)?;
        DATA_LO.set(w, self.data as u32);
        if self.width == DataWidth::Bits64 {
            DATA_HI.set(w, (self.data >> 32) as u32);
        }
        Ok(pkt)
    }

    fn unpack(w: &[u32]) -> Result<Self> {
        use write_data::*;
        let base = base_length(PacketKind::WriteData);
        let dwords = check_header(w, PacketKind::WriteData, &[base, base + 1])?;
        let (width, data) = if dwords == base {
            (DataWidth::Bits32, DATA_LO.get(w) as u64)
        } else {
            (DataWidth::Bits64, ((DATA_HI.get(w) as u64) << 32) | DATA_LO.get(w) as u64)
        };
        Ok(Self {
            dst_sel: DST_SEL.get(w),
            addr_incr_disable: ADDR_INCR.flag(w),
            wr_confirm: WR_CONFIRM.flag(w),
            cache_policy: CACHE_POLICY.get(w),
            engine_sel: ENGINE_SEL.get(w),
            dst_addr: DST_ADDR.get_addr(w),
            width,
            data,
        })
    }
}

// =============================================================================
// RELEASE_MEM
// =============================================================================

/// RELEASE_MEM record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseMem {
    /// Event type
    pub event_type: u32,
    /// Event index
    pub event_index: u32,
    /// Cache actions taken before the write
    pub actions: ReleaseActions,
    /// Cache policy
    pub cache_policy: u32,
    /// Destination select
    pub dst_sel: u32,
    /// Interrupt select
    pub int_sel: u32,
    /// Data select
    pub data_sel: u32,
    /// Destination address (4-byte aligned)
    pub addr: GpuAddr,
    /// Data written
    pub data: u64,
    /// Interrupt context id
    pub int_ctxid: u32,
}

impl Record for ReleaseMem {
    fn kind(&self) -> PacketKind {
        PacketKind::ReleaseMem
    }

    fn pack(&self) -> Result<Packet> {
        use release_mem::*;
        let mut pkt = Packet::new(self.kind(), base_length(self.kind()))?;
        let w = pkt.words_mut();
        EVENT_TYPE.set_checked(w, self.event_type)?;
        EVENT_INDEX.set_checked(w, self.event_index)?;
        ACTIONS.set(w, self.actions.bits() >> 12);
        CACHE_POLICY.set_checked(w, self.cache_policy)?;
        DST_SEL.set_checked(w, self.dst_sel)?;
        INT_SEL.set_checked(w, self.int_sel)?;
        DATA_SEL.set_checked(w, self.data_sel)?;
        ADDR.set_addr(w, self.addr)?;
        DATA.set(w, self.data)?;
        INT_CTXID.set(w, self.int_ctxid);
        Ok(pkt)
    }

    fn unpack(w: &[u32]) -> Result<Self> {
        use release_mem::*;
        check_header(w, PacketKind::ReleaseMem, &[base_length(PacketKind::ReleaseMem)])?;
        Ok(Self {
            event_type: EVENT_TYPE.get(w),
            event_index: EVENT_INDEX.get(w),
            actions: ReleaseActions::from_bits_retain(ACTIONS.get(w) << 12),
            cache_policy: CACHE_POLICY.get(w),
            dst_sel: DST_SEL.get(w),
            int_sel: INT_SEL.get(w),
            data_sel: DATA_SEL.get(w),
            addr: ADDR.get_addr(w),
            data: DATA.get(w),
            int_ctxid: INT_CTXID.get(w),
        })
    }
}

// =============================================================================
// SET_UCONFIG_REG / SET_SH_REG
// =============================================================================

/// Register window a SET_*_REG packet targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegWindow {
    /// User config registers
    UConfig,
    /// Shader registers
    Sh,
}

impl RegWindow {
    /// First register of the window
    pub const fn base(self) -> u32 {
        match self {
            Self::UConfig => gfx9::UCONFIG_REG_START,
            Self::Sh => gfx9::SH_REG_START,
        }
    }

    /// Packet kind writing this window
    pub const fn kind(self) -> PacketKind {
        match self {
            Self::UConfig => PacketKind::SetUConfigReg,
            Self::Sh => PacketKind::SetShReg,
        }
    }
}

/// SET_UCONFIG_REG / SET_SH_REG record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetReg {
    /// Target window
    pub window: RegWindow,
    /// Offset relative to the window base
    pub reg_offset: u32,
    /// Value
    pub value: u32,
}

impl Record for SetReg {
    fn kind(&self) -> PacketKind {
        self.window.kind()
    }

    fn pack(&self) -> Result<Packet> {
        use set_reg::*;
        let mut pkt = Packet::new(self.kind(), base_length(self.kind()))?;
        let w = pkt.words_mut();
        REG_OFFSET.set_checked(w, self.reg_offset)?;
        VALUE.set(w, self.value);
        Ok(pkt)
    }

    fn unpack(w: &[u32]) -> Result<Self> {
        use set_reg::*;
        let header = Header::decode(*w.first().ok_or(Error::InvalidPacket)?)?;
        let window = match PacketKind::from_opcode(header.opcode) {
            Some(PacketKind::SetUConfigReg) => RegWindow::UConfig,
            Some(PacketKind::SetShReg) => RegWindow::Sh,
            _ => return Err(Error::InvalidPacket),
        };
        check_header(w, window.kind(), &[base_length(window.kind())])?;
        Ok(Self {
            window,
            reg_offset: REG_OFFSET.get(w),
            value: VALUE.get(w),
        })
    }
}

// =============================================================================
// COPY_DATA
// =============================================================================

/// COPY_DATA record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyData {
    /// Source select
    pub src_sel: u32,
    /// Destination select
    pub dst_sel: u32,
    /// 64-bit transfer
    pub count_sel: bool,
    /// Wait for write confirmation
    pub wr_confirm: bool,
    /// Engine select
    pub engine_sel: u32,
    /// Source address, register offset or counter select
    pub src: u64,
    /// Destination address (4-byte aligned)
    pub dst_addr: GpuAddr,
}

impl Record for CopyData {
    fn kind(&self) -> PacketKind {
        PacketKind::CopyData
    }

    fn pack(&self) -> Result<Packet> {
        use copy_data::*;
        let mut pkt = Packet::new(self.kind(), base_length(self.kind()))?;
        let w = pkt.words_mut();
        SRC_SEL.set_checked(w, self.src_sel)?;
        DST_SEL.set_checked(w, self.dst_sel)?;
        COUNT_SEL.set_flag(w, self.count_sel);
        WR_CONFIRM.set_flag(w, self.wr_confirm);
        ENGINE_SEL.set_checked(w, self.engine_sel)?;
        SRC.set(w, self.src)?;
        DST_ADDR.set_addr(w, self.dst_addr)?;
        Ok(pkt)
    }

    fn unpack(w: &[u32]) -> Result<Self> {
        use copy_data::*;
        check_header(w, PacketKind::CopyData, &[base_length(PacketKind::CopyData)])?;
        Ok(Self {
            src_sel: SRC_SEL.get(w),
            dst_sel: DST_SEL.get(w),
            count_sel: COUNT_SEL.flag(w),
            wr_confirm: WR_CONFIRM.flag(w),
            engine_sel: ENGINE_SEL.get(w),
            src: SRC.get(w),
            dst_addr: DST_ADDR.get_addr(w),
        })
    }
}

// =============================================================================
// DMA_DATA
// =============================================================================

/// DMA_DATA record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaData {
    /// Engine
    pub engine: u32,
    /// Source cache policy
    pub src_cache_policy: u32,
    /// Destination select
    pub dst_sel: u32,
    /// Destination cache policy
    pub dst_cache_policy: u32,
    /// Source select
    pub src_sel: u32,
    /// CP waits for the DMA to finish
    pub cp_sync: bool,
    /// Source address
    pub src_addr: GpuAddr,
    /// Destination address
    pub dst_addr: GpuAddr,
    /// Bytes to copy (below 2^21)
    pub byte_count: u32,
    /// Wait for prior DMA writes to the destination
    pub raw_wait: bool,
    /// Skip write confirmation
    pub dis_wc: bool,
}

impl Record for DmaData {
    fn kind(&self) -> PacketKind {
        PacketKind::DmaData
    }

    fn pack(&self) -> Result<Packet> {
        use dma_data::*;
        if !BYTE_COUNT.fits(self.byte_count) {
            return Err(Error::SizeUnsupported);
        }
        let mut pkt = Packet::new(self.kind(), base_length(self.kind()))?;
        let w = pkt.words_mut();
        ENGINE.set_checked(w, self.engine)?;
        SRC_CACHE_POLICY.set_checked(w, self.src_cache_policy)?;
        DST_SEL.set_checked(w, self.dst_sel)?;
        DST_CACHE_POLICY.set_checked(w, self.dst_cache_policy)?;
        SRC_SEL.set_checked(w, self.src_sel)?;
        CP_SYNC.set_flag(w, self.cp_sync);
        SRC_ADDR.set_addr(w, self.src_addr)?;
        DST_ADDR.set_addr(w, self.dst_addr)?;
        BYTE_COUNT.set(w, self.byte_count);
        RAW_WAIT.set_flag(w, self.raw_wait);
        DIS_WC.set_flag(w, self.dis_wc);
        Ok(pkt)
    }

    fn unpack(w: &[u32]) -> Result<Self> {
        use dma_data::*;
        check_header(w, PacketKind::DmaData, &[base_length(PacketKind::DmaData)])?;
        Ok(Self {
            engine: ENGINE.get(w),
            src_cache_policy: SRC_CACHE_POLICY.get(w),
            dst_sel: DST_SEL.get(w),
            dst_cache_policy: DST_CACHE_POLICY.get(w),
            src_sel: SRC_SEL.get(w),
            cp_sync: CP_SYNC.flag(w),
            src_addr: SRC_ADDR.get_addr(w),
            dst_addr: DST_ADDR.get_addr(w),
            byte_count: BYTE_COUNT.get(w),
            raw_wait: RAW_WAIT.flag(w),
            dis_wc: DIS_WC.flag(w),
        })
    }
}

// =============================================================================
// STATIC ASSERTIONS
// =============================================================================

static_assertions::const_assert_eq!(gfx9::DMA_MAX_BYTE_COUNT, dma_data::BYTE_COUNT.max() + 1);
static_assertions::const_assert_eq!(gfx9::IB_MAX_DWORDS, indirect_buffer::IB_SIZE.max() + 1);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indirect_buffer_words() {
        let ib = IndirectBuffer {
            ib_base: GpuAddr::new(0x0000_7F00_1234_5670),
            ib_size: 64,
            chain: false,
            valid: true,
            vmid: 0,
            cache_policy: 0,
        };
        let pkt = ib.pack().unwrap();
        assert_eq!(pkt.words(), &[0xC002_3F00, 0x1234_5670, 0x7F00, 0x0080_0040]);
        assert_eq!(IndirectBuffer::unpack(pkt.words()).unwrap(), ib);
    }

    #[test]
    fn test_wait_reg_mem_register_leaves_high_word() {
        let wait = WaitRegMem {
            function: gfx9::wait_function::EQUAL,
            operation: 0,
            engine_sel: 0,
            target: WaitTarget::Register(0x1234),
            reference: 1,
            mask: 0xFF,
            poll_interval: 4,
        };
        let pkt = wait.pack().unwrap();
        assert_eq!(pkt.words()[2], 0x1234);
        assert_eq!(pkt.words()[3], 0);
        assert_eq!(WaitRegMem::unpack(pkt.words()).unwrap(), wait);
    }

    #[test]
    fn test_write_data_lengths() {
        let mut write = WriteData {
            dst_sel: gfx9::DST_SEL_MEMORY,
            addr_incr_disable: false,
            wr_confirm: true,
            cache_policy: 0,
            engine_sel: 0,
            dst_addr: GpuAddr::new(0x1000),
            width: DataWidth::Bits32,
            data: 0xAABB_CCDD,
        };
        assert_eq!(write.pack().unwrap().len_dwords(), 5);
        write.width = DataWidth::Bits64;
        write.data = 0x1122_3344_AABB_CCDD;
        let pkt = write.pack().unwrap();
        assert_eq!(pkt.len_dwords(), 6);
        assert_eq!(&pkt.words()[4..], &[0xAABB_CCDD, 0x1122_3344]);
        assert_eq!(WriteData::unpack(pkt.words()).unwrap(), write);
    }

    #[test]
    fn test_unpack_rejects_wrong_kind_and_truncation() {
        let event = EventWrite {
            event_type: gfx9::events::CS_PARTIAL_FLUSH,
            event_index: 4,
        };
        let pkt = event.pack().unwrap();
        assert_eq!(AtomicMem::unpack(pkt.words()), Err(Error::InvalidPacket));
        assert_eq!(EventWrite::unpack(&pkt.words()[..1]), Err(Error::InvalidPacket));
        assert_eq!(EventWrite::unpack(&[]), Err(Error::InvalidPacket));
    }

    #[test]
    fn test_acquire_mem_full_range() {
        let acquire = AcquireMem {
            coher_cntl: CoherCntl::TC_ACTION_ENA,
            engine_sel: 0,
            coher_size: AcquireMem::FULL_RANGE_BYTES,
            coher_base: GpuAddr::null(),
            poll_interval: 4,
        };
        let pkt = acquire.pack().unwrap();
        assert_eq!(pkt.words()[2], 0xFFFF_FFFF);
        assert_eq!(pkt.words()[3], 0xFF);
        assert_eq!(AcquireMem::unpack(pkt.words()).unwrap(), acquire);
    }

    #[test]
    fn test_set_reg_window_from_opcode() {
        let set = SetReg {
            window: RegWindow::Sh,
            reg_offset: 0x4C,
            value: 7,
        };
        let pkt = set.pack().unwrap();
        assert_eq!(pkt.kind(), PacketKind::SetShReg);
        assert_eq!(SetReg::unpack(pkt.words()).unwrap(), set);
    }
}
