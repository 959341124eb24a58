//! # Packet Templates
//!
//! One immutable skeleton per packet kind, built once with the encoder and
//! carrying the static policy bits. Encoder operations copy a template into
//! a local, patch the variable fields and pack it.

use ember_core::GpuAddr;

use crate::gfx9::{self, CoherCntl, ReleaseActions};
use crate::records::{
    AcquireMem, AtomicMem, CopyData, DataWidth, DmaData, EventWrite, IndirectBuffer, ReleaseMem,
    SetReg, RegWindow, WaitRegMem, WaitTarget, WriteData,
};

/// Immutable template set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketTemplates {
    /// INDIRECT_BUFFER with the valid bit set
    pub indirect_buffer: IndirectBuffer,
    /// Single-pass ATOMIC_MEM
    pub atomic: AtomicMem,
    /// ATOMIC_MEM looping until the compare succeeds
    pub blocking_atomic: AtomicMem,
    /// CS partial flush
    pub barrier: EventWrite,
    /// ACQUIRE_MEM over the full address range, no actions
    pub acquire: AcquireMem,
    /// WAIT_REG_MEM with the standard poll interval
    pub wait: WaitRegMem,
    /// Confirmed, auto-incrementing memory write
    pub write_data: WriteData,
    /// End-of-pipe flush + invalidate + 32-bit write
    pub release: ReleaseMem,
    /// SET_UCONFIG_REG
    pub set_uconfig_reg: SetReg,
    /// SET_SH_REG
    pub set_sh_reg: SetReg,
    /// COPY_DATA into memory
    pub copy: CopyData,
    /// CP-synchronized DMA copy
    pub dma: DmaData,
}

impl PacketTemplates {
    /// Build the gfx9 template set
    pub const fn gfx9() -> Self {
        let atomic = AtomicMem {
            atomic: 0,
            command: gfx9::atomic_command::SINGLE_PASS,
            cache_policy: 0,
            addr: GpuAddr::null(),
            src_data: 0,
            cmp_data: 0,
            loop_interval: 0,
        };

        Self {
            indirect_buffer: IndirectBuffer {
                ib_base: GpuAddr::null(),
                ib_size: 0,
                chain: false,
                valid: true,
                vmid: 0,
                cache_policy: 0,
            },
            atomic,
            blocking_atomic: AtomicMem {
                command: gfx9::atomic_command::LOOP_UNTIL_COMPARE_SATISFIED,
                loop_interval: gfx9::ATOMIC_LOOP_INTERVAL,
                ..atomic
            },
            barrier: EventWrite {
                event_type: gfx9::events::CS_PARTIAL_FLUSH,
                event_index: gfx9::events::INDEX_ANY_NON_TIMESTAMP,
            },
            acquire: AcquireMem {
                coher_cntl: CoherCntl::empty(),
                engine_sel: 0,
                coher_size: AcquireMem::FULL_RANGE_BYTES,
                coher_base: GpuAddr::null(),
                poll_interval: gfx9::POLL_INTERVAL,
            },
            wait: WaitRegMem {
                function: gfx9::wait_function::EQUAL,
                operation: 0,
                engine_sel: 0,
                target: WaitTarget::Register(0),
                reference: 0,
                mask: 0,
                poll_interval: gfx9::POLL_INTERVAL,
            },
            write_data: WriteData {
                dst_sel: gfx9::DST_SEL_MEMORY,
                addr_incr_disable: false,
                wr_confirm: true,
                cache_policy: 0,
                engine_sel: 0,
                dst_addr: GpuAddr::null(),
                width: DataWidth::Bits32,
                data: 0,
            },
            release: ReleaseMem {
                event_type: gfx9::events::CACHE_FLUSH_AND_INV_TS_EVENT,
                event_index: gfx9::events::INDEX_END_OF_PIPE,
                actions: ReleaseActions::FLUSH_AND_INVALIDATE,
                cache_policy: 0,
                dst_sel: 0,
                int_sel: gfx9::int_sel::NONE,
                data_sel: gfx9::data_sel::DATA_32,
                addr: GpuAddr::null(),
                data: 0,
                int_ctxid: 0,
            },
            set_uconfig_reg: SetReg {
                window: RegWindow::UConfig,
                reg_offset: 0,
                value: 0,
            },
            set_sh_reg: SetReg {
                window: RegWindow::Sh,
                reg_offset: 0,
                value: 0,
            },
            copy: CopyData {
                src_sel: gfx9::copy_src::REGISTER,
                dst_sel: gfx9::DST_SEL_MEMORY,
                count_sel: false,
                wr_confirm: false,
                engine_sel: 0,
                src: 0,
                dst_addr: GpuAddr::null(),
            },
            dma: DmaData {
                engine: 0,
                src_cache_policy: 0,
                dst_sel: 0,
                dst_cache_policy: 0,
                src_sel: 0,
                cp_sync: true,
                src_addr: GpuAddr::null(),
                dst_addr: GpuAddr::null(),
                byte_count: 0,
                raw_wait: false,
                dis_wc: false,
            },
        }
    }
}

impl Default for PacketTemplates {
    fn default() -> Self {
        Self::gfx9()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Record;

    #[test]
    fn test_templates_pack() {
        let t = PacketTemplates::gfx9();
        assert_eq!(t.barrier.pack().unwrap().words(), &[0xC000_4600, 0x0000_0407]);
        assert_eq!(t.blocking_atomic.loop_interval, 128);
        assert_eq!(t.blocking_atomic.atomic, t.atomic.atomic);
        assert!(t.release.pack().is_ok());
        assert!(t.acquire.pack().is_ok());
    }
}
