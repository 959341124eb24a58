//! # GFX9 PM4 Constant Table
//!
//! Opcodes, record sizes and selector values understood by the gfx9
//! compute micro-engine. Everything the encoder knows about the hardware
//! format lives here, keyed by logical packet kind.

use core::fmt;

/// Version of the packet format described by this table
pub const FORMAT_VERSION: u32 = 9;

// =============================================================================
// PACKET KINDS
// =============================================================================

/// Logical packet kinds emitted by the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PacketKind {
    /// Continue execution in another buffer
    IndirectBuffer,
    /// Atomic memory operation
    AtomicMem,
    /// Pipeline event (used for the compute partial flush)
    EventWrite,
    /// Cache maintenance
    AcquireMem,
    /// Wait on a register or memory location
    WaitRegMem,
    /// Write immediate data to memory
    WriteData,
    /// End-of-pipe write with cache flush
    ReleaseMem,
    /// User config register write
    SetUConfigReg,
    /// Shader register write
    SetShReg,
    /// Copy a register/memory/counter value to memory
    CopyData,
    /// DMA copy
    DmaData,
}

/// Static shape of one packet kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketFormat {
    /// IT opcode
    pub opcode: u8,
    /// Record length in dwords, header included
    pub dwords: u8,
}

impl PacketKind {
    /// All kinds, in table order
    pub const ALL: [PacketKind; 11] = [
        Self::IndirectBuffer,
        Self::AtomicMem,
        Self::EventWrite,
        Self::AcquireMem,
        Self::WaitRegMem,
        Self::WriteData,
        Self::ReleaseMem,
        Self::SetUConfigReg,
        Self::SetShReg,
        Self::CopyData,
        Self::DmaData,
    ];

    /// Opcode and base record length
    ///
    /// `WriteData` grows by one dword for 64-bit payloads.
    pub const fn format(self) -> PacketFormat {
        let (opcode, dwords) = match self {
            Self::IndirectBuffer => (opcodes::INDIRECT_BUFFER, 4),
            Self::AtomicMem => (opcodes::ATOMIC_MEM, 9),
            Self::EventWrite => (opcodes::EVENT_WRITE, 2),
            Self::AcquireMem => (opcodes::ACQUIRE_MEM, 7),
            Self::WaitRegMem => (opcodes::WAIT_REG_MEM, 7),
            Self::WriteData => (opcodes::WRITE_DATA, 5),
            Self::ReleaseMem => (opcodes::RELEASE_MEM, 8),
            Self::SetUConfigReg => (opcodes::SET_UCONFIG_REG, 3),
            Self::SetShReg => (opcodes::SET_SH_REG, 3),
            Self::CopyData => (opcodes::COPY_DATA, 6),
            Self::DmaData => (opcodes::DMA_DATA, 7),
        };
        PacketFormat { opcode, dwords }
    }

    /// Reverse lookup from an opcode
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.format().opcode == opcode)
    }

    /// Hardware mnemonic
    pub const fn name(self) -> &'static str {
        match self {
            Self::IndirectBuffer => "INDIRECT_BUFFER",
            Self::AtomicMem => "ATOMIC_MEM",
            Self::EventWrite => "EVENT_WRITE",
            Self::AcquireMem => "ACQUIRE_MEM",
            Self::WaitRegMem => "WAIT_REG_MEM",
            Self::WriteData => "WRITE_DATA",
            Self::ReleaseMem => "RELEASE_MEM",
            Self::SetUConfigReg => "SET_UCONFIG_REG",
            Self::SetShReg => "SET_SH_REG",
            Self::CopyData => "COPY_DATA",
            Self::DmaData => "DMA_DATA",
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// OPCODES
// =============================================================================

/// Type-3 IT opcodes
pub mod opcodes {
    //! IT opcode values

    /// NOP
    pub const NOP: u8 = 0x10;
    /// ATOMIC_MEM
    pub const ATOMIC_MEM: u8 = 0x1E;
    /// WRITE_DATA
    pub const WRITE_DATA: u8 = 0x37;
    /// WAIT_REG_MEM
    pub const WAIT_REG_MEM: u8 = 0x3C;
    /// INDIRECT_BUFFER
    pub const INDIRECT_BUFFER: u8 = 0x3F;
    /// COPY_DATA
    pub const COPY_DATA: u8 = 0x40;
    /// EVENT_WRITE
    pub const EVENT_WRITE: u8 = 0x46;
    /// RELEASE_MEM
    pub const RELEASE_MEM: u8 = 0x49;
    /// DMA_DATA
    pub const DMA_DATA: u8 = 0x50;
    /// ACQUIRE_MEM
    pub const ACQUIRE_MEM: u8 = 0x58;
    /// SET_SH_REG
    pub const SET_SH_REG: u8 = 0x76;
    /// SET_UCONFIG_REG
    pub const SET_UCONFIG_REG: u8 = 0x79;
}

// =============================================================================
// EVENTS
// =============================================================================

/// Event types and indices
pub mod events {
    //! VGT event values

    /// Compute shader partial flush
    pub const CS_PARTIAL_FLUSH: u32 = 0x07;
    /// Cache flush + invalidate, timestamp variant
    pub const CACHE_FLUSH_AND_INV_TS_EVENT: u32 = 0x14;

    /// Event index for non-timestamp events
    pub const INDEX_ANY_NON_TIMESTAMP: u32 = 4;
    /// Event index for end-of-pipe events
    pub const INDEX_END_OF_PIPE: u32 = 5;
}

// =============================================================================
// ATOMICS
// =============================================================================

/// Texture-cache atomic op codes (64-bit, returning)
pub mod tc_op {
    //! TC_OP values

    /// Swap
    pub const ATOMIC_SWAP_RTN_64: u32 = 0x27;
    /// Compare and swap
    pub const ATOMIC_CMPSWAP_RTN_64: u32 = 0x28;
    /// Add
    pub const ATOMIC_ADD_RTN_64: u32 = 0x2F;
    /// Subtract
    pub const ATOMIC_SUB_RTN_64: u32 = 0x30;
}

/// ATOMIC_MEM command field
pub mod atomic_command {
    //! Atomic command values

    /// Perform once
    pub const SINGLE_PASS: u32 = 0;
    /// Retry until the compare is satisfied
    pub const LOOP_UNTIL_COMPARE_SATISFIED: u32 = 1;
}

/// Poll interval (clocks) used by blocking compare-and-swap
pub const ATOMIC_LOOP_INTERVAL: u32 = 128;

// =============================================================================
// WAIT / WRITE / COPY SELECTORS
// =============================================================================

/// WAIT_REG_MEM compare functions
pub mod wait_function {
    //! Function field values

    /// Reference == masked value
    pub const EQUAL: u32 = 3;
    /// Reference != masked value
    pub const NOT_EQUAL: u32 = 4;
}

/// WAIT_REG_MEM memory space
pub mod mem_space {
    //! Memory space values

    /// Poll a register
    pub const REGISTER: u32 = 0;
    /// Poll memory
    pub const MEMORY: u32 = 1;
}

/// Poll interval for WAIT_REG_MEM and ACQUIRE_MEM
pub const POLL_INTERVAL: u32 = 4;

/// Destination selector for memory writes
pub const DST_SEL_MEMORY: u32 = 5;

/// COPY_DATA source selectors
pub mod copy_src {
    //! Source selector values

    /// Memory-mapped register
    pub const REGISTER: u32 = 0;
    /// Memory
    pub const MEMORY: u32 = 1;
    /// Performance counter
    pub const PERF_COUNTER: u32 = 4;
}

/// RELEASE_MEM interrupt selectors
pub mod int_sel {
    //! Interrupt selector values

    /// No interrupt
    pub const NONE: u32 = 0;
    /// Interrupt after the write is confirmed
    pub const AFTER_WRITE_CONFIRM: u32 = 2;
}

/// RELEASE_MEM data selectors
pub mod data_sel {
    //! Data selector values

    /// Discard
    pub const NONE: u32 = 0;
    /// Low 32 bits of data
    pub const DATA_32: u32 = 1;
    /// 64 bits of data
    pub const DATA_64: u32 = 2;
}

// =============================================================================
// REGISTER WINDOWS
// =============================================================================

/// First user config register (dword offset)
pub const UCONFIG_REG_START: u32 = 0xC000;
/// First shader register (dword offset)
pub const SH_REG_START: u32 = 0x2C00;
/// Span of a register window (offset field width)
pub const REG_WINDOW_SPAN: u32 = 0x1_0000;

// =============================================================================
// CACHE CONTROL
// =============================================================================

bitflags::bitflags! {
    /// ACQUIRE_MEM coherence control bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CoherCntl: u32 {
        /// Write back L2
        const TC_WB_ACTION_ENA = 1 << 18;
        /// Invalidate vector L1
        const TCL1_ACTION_ENA = 1 << 22;
        /// Invalidate L2
        const TC_ACTION_ENA = 1 << 23;
        /// Invalidate scalar (constant) cache
        const SH_KCACHE_ACTION_ENA = 1 << 27;
        /// Invalidate instruction cache
        const SH_ICACHE_ACTION_ENA = 1 << 29;
    }
}

bitflags::bitflags! {
    /// RELEASE_MEM cache action bits (dword 1)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReleaseActions: u32 {
        /// Invalidate volatile L1 lines
        const TCL1_VOL_ACTION_ENA = 1 << 12;
        /// Invalidate volatile L2 lines
        const TC_VOL_ACTION_ENA = 1 << 13;
        /// Write back L2
        const TC_WB_ACTION_ENA = 1 << 15;
        /// Invalidate L1
        const TCL1_ACTION_ENA = 1 << 16;
        /// Invalidate L2
        const TC_ACTION_ENA = 1 << 17;
        /// Full write-back and invalidate
        const FLUSH_AND_INVALIDATE = Self::TCL1_VOL_ACTION_ENA.bits()
            | Self::TC_VOL_ACTION_ENA.bits()
            | Self::TC_WB_ACTION_ENA.bits()
            | Self::TCL1_ACTION_ENA.bits()
            | Self::TC_ACTION_ENA.bits();
    }
}

/// DMA_DATA byte count limit (exclusive)
pub const DMA_MAX_BYTE_COUNT: u32 = 1 << 21;

/// INDIRECT_BUFFER size field limit in dwords (exclusive)
pub const IB_MAX_DWORDS: u32 = 1 << 20;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_reverse_lookup() {
        for kind in PacketKind::ALL {
            assert_eq!(PacketKind::from_opcode(kind.format().opcode), Some(kind));
        }
        assert_eq!(PacketKind::from_opcode(opcodes::NOP), None);
    }

    #[test]
    fn test_formats_fit_slot_payload() {
        for kind in PacketKind::ALL {
            assert!(kind.format().dwords as usize + 1 <= crate::MAX_PACKET_DWORDS);
        }
    }

    #[test]
    fn test_release_actions() {
        assert_eq!(ReleaseActions::FLUSH_AND_INVALIDATE.bits(), 0x0003_B000);
    }
}
