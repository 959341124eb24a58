//! # Packet Header
//!
//! ```text
//!  31 30 29             16 15        8 7         1  0
//! ┌─────┬─────────────────┬───────────┬───────────┬───┐
//! │type │ count = len - 2 │  opcode   │ reserved  │ P │
//! └─────┴─────────────────┴───────────┴───────────┴───┘
//! ```

use ember_core::bits::{extract_field, insert_field};
use ember_core::{Error, Result};

/// Header type discriminant for type-3 packets
pub const PACKET_TYPE_3: u32 = 3;

/// Build a type-3 header for a record of `dwords` dwords (header included)
#[inline]
pub const fn encode_header(opcode: u8, dwords: usize) -> u32 {
    let mut header = insert_field(0, PACKET_TYPE_3, 30, 31);
    header = insert_field(header, (dwords as u32).wrapping_sub(2), 16, 29);
    insert_field(header, opcode as u32, 8, 15)
}

/// Decoded header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// IT opcode
    pub opcode: u8,
    /// Record length in dwords, header included
    pub dwords: usize,
    /// Predication bit
    pub predicate: bool,
}

impl Header {
    /// Decode a header dword
    pub fn decode(word: u32) -> Result<Self> {
        if extract_field(word, 30, 31) != PACKET_TYPE_3 {
            return Err(Error::InvalidPacket);
        }

        Ok(Self {
            opcode: extract_field(word, 8, 15) as u8,
            dwords: extract_field(word, 16, 29) as usize + 2,
            predicate: extract_field(word, 0, 0) != 0,
        })
    }

    /// Re-encode
    pub const fn encode(&self) -> u32 {
        insert_field(encode_header(self.opcode, self.dwords), self.predicate as u32, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        // RELEASE_MEM, 8 dwords
        assert_eq!(encode_header(0x49, 8), 0xC006_4900);
        // SET_SH_REG, 3 dwords
        assert_eq!(encode_header(0x76, 3), 0xC001_7600);
    }

    #[test]
    fn test_header_decode() {
        let header = Header::decode(0xC007_1E00).unwrap();
        assert_eq!(header.opcode, 0x1E);
        assert_eq!(header.dwords, 9);
        assert!(!header.predicate);
        assert_eq!(header.encode(), 0xC007_1E00);
    }

    #[test]
    fn test_rejects_non_type3() {
        assert_eq!(Header::decode(0x8000_0000), Err(Error::InvalidPacket));
        assert_eq!(Header::decode(0), Err(Error::InvalidPacket));
    }
}
