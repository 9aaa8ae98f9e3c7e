//! UF2 block codec.
//!
//! Layout (all words little-endian):
//!
//! | Offset | Field |
//! |---|---|
//! | 0 | magic start 0 |
//! | 4 | magic start 1 |
//! | 8 | flags |
//! | 12 | target address |
//! | 16 | payload size |
//! | 20 | block index |
//! | 24 | total blocks |
//! | 28 | file size or family id |
//! | 32..508 | payload area |
//! | 508 | magic end |

use std::fmt;
use std::io::Cursor;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use thiserror::Error;

use super::constants::{
    BLOCK_SIZE, FLAG_FAMILY_ID_PRESENT, FOOTER_OFFSET, HEADER_SIZE, MAGIC_END, MAGIC_START0,
    MAGIC_START1, PAYLOAD_AREA,
};

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("Invalid block size: expected 512, got {0}")]
    InvalidLength(usize),
    #[error("Invalid leading magic: 0x{start0:08X} 0x{start1:08X}")]
    InvalidMagic { start0: u32, start1: u32 },
    #[error("Invalid trailing magic: 0x{0:08X}")]
    InvalidEndMagic(u32),
    #[error("Payload of {0} bytes does not fit the 476-byte area")]
    PayloadTooLarge(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One 512-byte UF2 block.
///
/// The payload area is kept at its full reserved width so that padding and
/// real data round-trip untouched.
#[derive(Clone, PartialEq, Eq)]
pub struct ContainerBlock {
    pub flags: u32,
    pub target_addr: u32,
    pub payload_size: u32,
    pub block_no: u32,
    pub num_blocks: u32,
    /// File size, or family id when `FLAG_FAMILY_ID_PRESENT` is set.
    pub file_size_or_family: u32,
    pub payload: [u8; PAYLOAD_AREA],
}

impl ContainerBlock {
    pub const SIZE: usize = BLOCK_SIZE;

    /// Build a block from a payload no wider than the payload area.
    /// Shorter payloads are zero-padded.
    pub fn with_payload(
        flags: u32,
        target_addr: u32,
        payload_size: u32,
        file_size_or_family: u32,
        data: &[u8],
    ) -> Result<Self, BlockError> {
        if data.len() > PAYLOAD_AREA {
            return Err(BlockError::PayloadTooLarge(data.len()));
        }
        let mut payload = [0u8; PAYLOAD_AREA];
        payload[..data.len()].copy_from_slice(data);
        Ok(Self {
            flags,
            target_addr,
            payload_size,
            block_no: 0,
            num_blocks: 0,
            file_size_or_family,
            payload,
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BlockError> {
        if bytes.len() != BLOCK_SIZE {
            return Err(BlockError::InvalidLength(bytes.len()));
        }

        let mut cursor = Cursor::new(&bytes[..HEADER_SIZE]);
        let start0 = cursor.read_u32::<LittleEndian>()?;
        let start1 = cursor.read_u32::<LittleEndian>()?;
        if start0 != MAGIC_START0 || start1 != MAGIC_START1 {
            return Err(BlockError::InvalidMagic { start0, start1 });
        }

        let end = LittleEndian::read_u32(&bytes[FOOTER_OFFSET..]);
        if end != MAGIC_END {
            return Err(BlockError::InvalidEndMagic(end));
        }

        let flags = cursor.read_u32::<LittleEndian>()?;
        let target_addr = cursor.read_u32::<LittleEndian>()?;
        let payload_size = cursor.read_u32::<LittleEndian>()?;
        let block_no = cursor.read_u32::<LittleEndian>()?;
        let num_blocks = cursor.read_u32::<LittleEndian>()?;
        let file_size_or_family = cursor.read_u32::<LittleEndian>()?;

        let mut payload = [0u8; PAYLOAD_AREA];
        payload.copy_from_slice(&bytes[HEADER_SIZE..FOOTER_OFFSET]);

        Ok(Self {
            flags,
            target_addr,
            payload_size,
            block_no,
            num_blocks,
            file_size_or_family,
            payload,
        })
    }

    pub fn encode(&self) -> [u8; BLOCK_SIZE] {
        let mut buf = [0u8; BLOCK_SIZE];
        let words = [
            MAGIC_START0,
            MAGIC_START1,
            self.flags,
            self.target_addr,
            self.payload_size,
            self.block_no,
            self.num_blocks,
            self.file_size_or_family,
        ];
        LittleEndian::write_u32_into(&words, &mut buf[..HEADER_SIZE]);
        buf[HEADER_SIZE..FOOTER_OFFSET].copy_from_slice(&self.payload);
        LittleEndian::write_u32(&mut buf[FOOTER_OFFSET..], MAGIC_END);
        buf
    }

    pub fn has_family_id(&self) -> bool {
        self.flags & FLAG_FAMILY_ID_PRESENT != 0
    }

    pub fn family_id(&self) -> Option<u32> {
        self.has_family_id().then_some(self.file_size_or_family)
    }

    /// Force the family flag on and overwrite header word 7.
    pub fn set_family_id(&mut self, family_id: u32) {
        self.flags |= FLAG_FAMILY_ID_PRESENT;
        self.file_size_or_family = family_id;
    }

    /// Meaningful payload bytes (`payload_size`, clamped to the area).
    pub fn data(&self) -> &[u8] {
        let len = (self.payload_size as usize).min(PAYLOAD_AREA);
        &self.payload[..len]
    }
}

impl fmt::Debug for ContainerBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerBlock")
            .field("flags", &format_args!("0x{:08X}", self.flags))
            .field("target_addr", &format_args!("0x{:08X}", self.target_addr))
            .field("payload_size", &self.payload_size)
            .field("block_no", &self.block_no)
            .field("num_blocks", &self.num_blocks)
            .field(
                "file_size_or_family",
                &format_args!("0x{:08X}", self.file_size_or_family),
            )
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::constants::FAMILY_RP2XXX_ABSOLUTE;

    fn sample_block() -> ContainerBlock {
        let data: Vec<u8> = (0..=255u8).collect();
        let mut block = ContainerBlock::with_payload(
            FLAG_FAMILY_ID_PRESENT | 0x8000_0001,
            0x1000_6000,
            256,
            FAMILY_RP2XXX_ABSOLUTE,
            &data,
        )
        .unwrap();
        block.block_no = 3;
        block.num_blocks = 7;
        block
    }

    #[test]
    fn test_block_roundtrip() {
        let block = sample_block();
        let bytes = block.encode();
        assert_eq!(bytes.len(), BLOCK_SIZE);

        let parsed = ContainerBlock::decode(&bytes).unwrap();
        assert_eq!(parsed, block);
        // Reserved flag bits survive
        assert_eq!(parsed.flags & 0x8000_0001, 0x8000_0001);
        assert_eq!(parsed.family_id(), Some(FAMILY_RP2XXX_ABSOLUTE));
    }

    #[test]
    fn test_encode_layout() {
        let bytes = sample_block().encode();
        assert_eq!(&bytes[0..4], &MAGIC_START0.to_le_bytes());
        assert_eq!(&bytes[4..8], &MAGIC_START1.to_le_bytes());
        assert_eq!(&bytes[12..16], &0x1000_6000u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &3u32.to_le_bytes());
        assert_eq!(&bytes[24..28], &7u32.to_le_bytes());
        assert_eq!(bytes[32], 0);
        assert_eq!(bytes[32 + 255], 255);
        // Padding after the real data stays zero
        assert!(bytes[32 + 256..FOOTER_OFFSET].iter().all(|&b| b == 0));
        assert_eq!(&bytes[508..512], &MAGIC_END.to_le_bytes());
    }

    #[test]
    fn test_decode_wrong_length() {
        assert!(matches!(
            ContainerBlock::decode(&[0u8; 511]),
            Err(BlockError::InvalidLength(511))
        ));
        assert!(matches!(
            ContainerBlock::decode(&[0u8; 1024]),
            Err(BlockError::InvalidLength(1024))
        ));
    }

    #[test]
    fn test_decode_bad_magic() {
        let mut bytes = sample_block().encode();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            ContainerBlock::decode(&bytes),
            Err(BlockError::InvalidMagic { .. })
        ));

        let mut bytes = sample_block().encode();
        bytes[6] ^= 0x01;
        assert!(matches!(
            ContainerBlock::decode(&bytes),
            Err(BlockError::InvalidMagic { .. })
        ));

        let mut bytes = sample_block().encode();
        bytes[511] = 0;
        assert!(matches!(
            ContainerBlock::decode(&bytes),
            Err(BlockError::InvalidEndMagic(_))
        ));
    }

    #[test]
    fn test_decode_keeps_full_payload_area() {
        let mut bytes = sample_block().encode();
        // Bytes beyond payload_size are carried verbatim
        bytes[FOOTER_OFFSET - 1] = 0xAB;
        let parsed = ContainerBlock::decode(&bytes).unwrap();
        assert_eq!(parsed.payload[PAYLOAD_AREA - 1], 0xAB);
        assert_eq!(parsed.data().len(), 256);
    }

    #[test]
    fn test_payload_too_large() {
        let data = vec![0u8; PAYLOAD_AREA + 1];
        assert!(matches!(
            ContainerBlock::with_payload(0, 0, 0, 0, &data),
            Err(BlockError::PayloadTooLarge(477))
        ));
    }

    #[test]
    fn test_set_family_id() {
        let mut block =
            ContainerBlock::with_payload(0, 0x1000_0000, 256, 4096, &[1, 2, 3]).unwrap();
        assert_eq!(block.family_id(), None);
        block.set_family_id(0xE48B_FF59);
        assert!(block.has_family_id());
        assert_eq!(block.family_id(), Some(0xE48B_FF59));
    }
}
