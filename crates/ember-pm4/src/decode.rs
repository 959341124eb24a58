//! # Packet Decoder
//!
//! Maps encoded packets back to the semantic operation that produced them.
//! Fields an operation intentionally drops (alignment bits, `Increment` vs
//! `Add` with value 1) decode to their canonical form. A ranged cache
//! invalidate covering `(0, FULL_RANGE_BYTES)` encodes the same words as the
//! unranged one and decodes as `range: None`.

use ember_core::{Error, GpuAddr, Result};

use crate::encoder::{AtomicOp, CacheFlags, CopySource, PacketEncoder, WaitFunction};
use crate::gfx9::{self, PacketKind};
use crate::header::Header;
use crate::observer::PacketObserver;
use crate::packet::Packet;
use crate::records::{
    AcquireMem, AtomicMem, CopyData, DataWidth, DmaData, EventWrite, IndirectBuffer, Record,
    RegWindow, ReleaseMem, SetReg, WaitRegMem, WaitTarget, WriteData,
};

/// A decoded packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Continue at another buffer
    IndirectBuffer {
        /// Buffer address
        addr: GpuAddr,
        /// Buffer size in bytes
        size_bytes: u64,
    },
    /// Atomic update
    Atomic {
        /// Operation
        op: AtomicOp,
        /// Target qword
        addr: GpuAddr,
        /// Operand
        value: u64,
        /// Compare operand (compare-and-swap only, else 0)
        compare: u64,
    },
    /// Pipeline drain
    Barrier,
    /// Cache invalidate
    CacheInvalidate {
        /// Caches
        flags: CacheFlags,
        /// Range as (base, bytes), `None` for the full address space
        range: Option<(GpuAddr, u64)>,
    },
    /// Conditional wait
    Wait {
        /// Polled location
        target: WaitTarget,
        /// Comparison
        function: WaitFunction,
        /// Mask
        mask: u32,
        /// Reference
        reference: u32,
    },
    /// Immediate memory write
    WriteMemory {
        /// Destination
        addr: GpuAddr,
        /// Value
        value: u64,
        /// Width
        width: DataWidth,
    },
    /// End-of-pipe write
    NotifyAndWrite {
        /// Destination
        addr: GpuAddr,
        /// Value
        value: u32,
        /// Interrupt after write confirm
        raise_interrupt: bool,
    },
    /// Register write
    WriteRegister {
        /// Register window
        window: RegWindow,
        /// Absolute register offset
        offset: u32,
        /// Value
        value: u32,
    },
    /// Copy to memory
    CopyData {
        /// Source kind
        source: CopySource,
        /// Source address, register or counter
        src: u64,
        /// Destination
        dst: GpuAddr,
        /// Width
        width: DataWidth,
        /// Write confirmation requested
        wait_for_completion: bool,
    },
    /// DMA copy
    DmaCopy {
        /// Source
        src: GpuAddr,
        /// Destination
        dst: GpuAddr,
        /// Bytes
        byte_count: u64,
        /// Serialize against earlier DMA to the destination
        wait_if_overlapping: bool,
    },
}

/// Decode the packet at the start of `words`
///
/// Returns the command and the number of dwords consumed.
pub fn decode(words: &[u32]) -> Result<(Command, usize)> {
    let header = Header::decode(*words.first().ok_or(Error::InvalidPacket)?)?;
    let kind = PacketKind::from_opcode(header.opcode).ok_or(Error::InvalidPacket)?;
    if words.len() < header.dwords {
        return Err(Error::InvalidPacket);
    }
    let words = &words[..header.dwords];

    let command = match kind {
        PacketKind::IndirectBuffer => {
            let ib = IndirectBuffer::unpack(words)?;
            Command::IndirectBuffer {
                addr: ib.ib_base,
                size_bytes: ib.ib_size as u64 * 4,
            }
        }
        PacketKind::AtomicMem => decode_atomic(AtomicMem::unpack(words)?)?,
        PacketKind::EventWrite => {
            let event = EventWrite::unpack(words)?;
            if event.event_type != gfx9::events::CS_PARTIAL_FLUSH {
                return Err(Error::InvalidPacket);
            }
            Command::Barrier
        }
        PacketKind::AcquireMem => {
            let acquire = AcquireMem::unpack(words)?;
            let range = (acquire.coher_size != AcquireMem::FULL_RANGE_BYTES
                || !acquire.coher_base.is_null())
            .then_some((acquire.coher_base, acquire.coher_size));
            Command::CacheInvalidate {
                flags: CacheFlags::from_coher_cntl(acquire.coher_cntl),
                range,
            }
        }
        PacketKind::WaitRegMem => {
            let wait = WaitRegMem::unpack(words)?;
            Command::Wait {
                target: wait.target,
                function: WaitFunction::from_code(wait.function)?,
                mask: wait.mask,
                reference: wait.reference,
            }
        }
        PacketKind::WriteData => {
            let write = WriteData::unpack(words)?;
            Command::WriteMemory {
                addr: write.dst_addr,
                value: write.data,
                width: write.width,
            }
        }
        PacketKind::ReleaseMem => {
            let release = ReleaseMem::unpack(words)?;
            Command::NotifyAndWrite {
                addr: release.addr,
                value: release.data as u32,
                raise_interrupt: release.int_sel != gfx9::int_sel::NONE,
            }
        }
        PacketKind::SetUConfigReg | PacketKind::SetShReg => {
            let set = SetReg::unpack(words)?;
            Command::WriteRegister {
                window: set.window,
                offset: set.window.base() + set.reg_offset,
                value: set.value,
            }
        }
        PacketKind::CopyData => {
            let copy = CopyData::unpack(words)?;
            Command::CopyData {
                source: CopySource::try_from(copy.src_sel).map_err(|_| Error::InvalidPacket)?,
                src: copy.src,
                dst: copy.dst_addr,
                width: if copy.count_sel {
                    DataWidth::Bits64
                } else {
                    DataWidth::Bits32
                },
                wait_for_completion: copy.wr_confirm,
            }
        }
        PacketKind::DmaData => {
            let dma = DmaData::unpack(words)?;
            Command::DmaCopy {
                src: dma.src_addr,
                dst: dma.dst_addr,
                byte_count: dma.byte_count as u64,
                wait_if_overlapping: dma.raw_wait,
            }
        }
    };

    Ok((command, header.dwords))
}

fn decode_atomic(atomic: AtomicMem) -> Result<Command> {
    let blocking = atomic.command == gfx9::atomic_command::LOOP_UNTIL_COMPARE_SATISFIED;
    let op = match atomic.atomic {
        gfx9::tc_op::ATOMIC_ADD_RTN_64 => AtomicOp::Add,
        gfx9::tc_op::ATOMIC_SUB_RTN_64 => AtomicOp::Subtract,
        gfx9::tc_op::ATOMIC_SWAP_RTN_64 => AtomicOp::Swap,
        gfx9::tc_op::ATOMIC_CMPSWAP_RTN_64 if blocking => AtomicOp::BlockingCompareAndSwap,
        gfx9::tc_op::ATOMIC_CMPSWAP_RTN_64 => AtomicOp::CompareAndSwap,
        _ => return Err(Error::InvalidPacket),
    };
    Ok(Command::Atomic {
        op,
        addr: atomic.addr,
        value: atomic.src_data,
        compare: atomic.cmp_data,
    })
}

/// Iterator over the commands of a packet stream
#[derive(Debug, Clone)]
pub struct Commands<'a> {
    words: &'a [u32],
}

impl<'a> Commands<'a> {
    /// Iterate over `words`
    pub fn new(words: &'a [u32]) -> Self {
        Self { words }
    }
}

impl Iterator for Commands<'_> {
    type Item = Result<Command>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.words.is_empty() {
            return None;
        }
        match decode(self.words) {
            Ok((command, used)) => {
                self.words = &self.words[used..];
                Some(Ok(command))
            }
            Err(e) => {
                self.words = &[];
                Some(Err(e))
            }
        }
    }
}

impl<O: PacketObserver> PacketEncoder<O> {
    /// Encode a decoded command
    pub fn encode(&self, command: &Command) -> Result<Packet> {
        match *command {
            Command::IndirectBuffer { addr, size_bytes } => self.indirect_buffer(addr, size_bytes),
            Command::Atomic {
                op,
                addr,
                value,
                compare,
            } => self.atomic(op, addr, value, compare),
            Command::Barrier => self.barrier(),
            Command::CacheInvalidate { flags, range: None } => self.cache_invalidate(flags),
            Command::CacheInvalidate {
                flags,
                range: Some((base, size)),
            } => self.cache_invalidate_range(flags, base, ember_core::ByteSize::from_bytes(size)),
            Command::Wait {
                target,
                function,
                mask,
                reference,
            } => self.wait_reg_mem(target, function, mask, reference),
            Command::WriteMemory { addr, value, width } => self.write_memory(addr, value, width),
            Command::NotifyAndWrite {
                addr,
                value,
                raise_interrupt,
            } => self.notify_and_write(addr, value, raise_interrupt),
            Command::WriteRegister {
                window: RegWindow::UConfig,
                offset,
                value,
            } => self.write_uconfig_reg(offset, value),
            Command::WriteRegister {
                window: RegWindow::Sh,
                offset,
                value,
            } => self.write_sh_reg(offset, value),
            Command::CopyData {
                source,
                src,
                dst,
                width,
                wait_for_completion,
            } => self.copy_data(source, src, dst, width, wait_for_completion),
            Command::DmaCopy {
                src,
                dst,
                byte_count,
                wait_if_overlapping,
            } => self.dma_copy(src, dst, byte_count, wait_if_overlapping),
        }
    }
}
