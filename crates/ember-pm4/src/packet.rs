//! # Packet Instances
//!
//! A packet is a value copy: produced fresh per call, never shared.

use arrayvec::ArrayVec;
use ember_core::{Error, Result};

use crate::gfx9::PacketKind;
use crate::header::encode_header;
use crate::stream::CommandStream;

/// Largest packet the encoder produces, and the payload capacity of a queue slot
pub const MAX_PACKET_DWORDS: usize = 13;

/// One encoded packet, header included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    kind: PacketKind,
    words: ArrayVec<u32, MAX_PACKET_DWORDS>,
}

impl Packet {
    /// Zero-filled packet of `dwords` dwords with its header written
    pub fn new(kind: PacketKind, dwords: usize) -> Result<Self> {
        if dwords < 2 || dwords > MAX_PACKET_DWORDS {
            return Err(Error::PacketTooLarge);
        }

        let mut words = ArrayVec::new();
        words.extend(core::iter::repeat(0).take(dwords));
        words[0] = encode_header(kind.format().opcode, dwords);

        Ok(Self { kind, words })
    }

    /// Packet kind
    #[inline]
    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    /// Header dword
    #[inline]
    pub fn header(&self) -> u32 {
        self.words[0]
    }

    /// All dwords, header first
    #[inline]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    #[inline]
    pub(crate) fn words_mut(&mut self) -> &mut [u32] {
        &mut self.words
    }

    /// Length in dwords
    #[inline]
    pub fn len_dwords(&self) -> usize {
        self.words.len()
    }

    /// Length in bytes
    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.words.len() * 4
    }

    /// Native-endian byte view
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.words.as_slice())
    }

    /// Append the whole packet to a command stream
    pub fn append_to<S: CommandStream + ?Sized>(&self, stream: &mut S) -> Result<()> {
        stream.append(self.as_bytes())
    }
}
