//! Raw binary to UF2 block conversion.

use super::block::ContainerBlock;
use super::constants::{FLAG_FAMILY_ID_PRESENT, PAYLOAD_AREA};
use crate::error::InputError;

/// Check that `width` fits the payload area.
pub fn validate_payload_width(width: usize) -> Result<(), InputError> {
    if width == 0 || width > PAYLOAD_AREA {
        return Err(InputError::InvalidPayloadWidth {
            width,
            max: PAYLOAD_AREA,
        });
    }
    Ok(())
}

/// Slice `data` into blocks of `payload_width` bytes addressed from
/// `load_address`.
///
/// Block `i` targets `load_address + i * payload_width`; the final chunk is
/// zero-padded to the full width. Every block carries the family flag with
/// `family_id` in header word 7.
pub fn convert(
    data: &[u8],
    load_address: u32,
    payload_width: usize,
    family_id: u32,
) -> Result<Vec<ContainerBlock>, InputError> {
    validate_payload_width(payload_width)?;

    let overflow = || InputError::AddressOverflow {
        address: load_address,
        len: data.len(),
    };
    let total = data.len().div_ceil(payload_width);
    let span = u32::try_from(total * payload_width).map_err(|_| overflow())?;
    if total > 0 {
        load_address.checked_add(span - 1).ok_or_else(overflow)?;
    }
    let num_blocks = u32::try_from(total).map_err(|_| overflow())?;

    let blocks = data
        .chunks(payload_width)
        .enumerate()
        .map(|(i, chunk)| {
            let mut payload = [0u8; PAYLOAD_AREA];
            payload[..chunk.len()].copy_from_slice(chunk);
            ContainerBlock {
                flags: FLAG_FAMILY_ID_PRESENT,
                // Range checked above
                target_addr: load_address + (i * payload_width) as u32,
                payload_size: payload_width as u32,
                block_no: i as u32,
                num_blocks,
                file_size_or_family: family_id,
                payload,
            }
        })
        .collect();

    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::constants::{APP_ADDR, DEFAULT_PAYLOAD_WIDTH, FAMILY_RP2XXX_ABSOLUTE};

    #[test]
    fn test_convert_900_bytes() {
        let data: Vec<u8> = (0..900).map(|i| (i % 251) as u8 + 1).collect();
        let blocks = convert(&data, 0x1000_6000, 256, FAMILY_RP2XXX_ABSOLUTE).unwrap();

        assert_eq!(blocks.len(), 4);
        let addrs: Vec<u32> = blocks.iter().map(|b| b.target_addr).collect();
        assert_eq!(addrs, [0x1000_6000, 0x1000_6100, 0x1000_6200, 0x1000_6300]);

        for (i, block) in blocks.iter().take(3).enumerate() {
            assert_eq!(block.data(), &data[i * 256..(i + 1) * 256]);
        }

        let last = &blocks[3];
        assert_eq!(&last.payload[..132], &data[768..]);
        assert!(last.payload[132..256].iter().all(|&b| b == 0));
        assert!(last.payload[256..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_convert_header_fields() {
        let data = vec![0x5A; 1000];
        let blocks =
            convert(&data, APP_ADDR, DEFAULT_PAYLOAD_WIDTH, FAMILY_RP2XXX_ABSOLUTE).unwrap();

        for (i, block) in blocks.iter().enumerate() {
            assert_eq!(block.block_no, i as u32);
            assert_eq!(block.num_blocks, 4);
            assert_eq!(block.payload_size, 256);
            assert_eq!(block.family_id(), Some(FAMILY_RP2XXX_ABSOLUTE));
        }
    }

    #[test]
    fn test_convert_exact_multiple() {
        let data = vec![1u8; 512];
        let blocks = convert(&data, 0x1000_0000, 256, 0).unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[1].data().iter().all(|&b| b == 1));
    }

    #[test]
    fn test_convert_full_area_width() {
        let data = vec![7u8; 500];
        let blocks = convert(&data, 0x1000_0000, PAYLOAD_AREA, 0).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].target_addr, 0x1000_0000 + PAYLOAD_AREA as u32);
        assert_eq!(&blocks[1].payload[..24], &[7u8; 24]);
        assert!(blocks[1].payload[24..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_convert_is_deterministic() {
        let data: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
        let a = convert(&data, APP_ADDR, 256, FAMILY_RP2XXX_ABSOLUTE).unwrap();
        let b = convert(&data, APP_ADDR, 256, FAMILY_RP2XXX_ABSOLUTE).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_convert_empty() {
        let blocks = convert(&[], APP_ADDR, 256, 0).unwrap();
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_convert_invalid_width() {
        assert!(matches!(
            convert(&[1, 2, 3], APP_ADDR, 0, 0),
            Err(InputError::InvalidPayloadWidth { width: 0, .. })
        ));
        assert!(matches!(
            convert(&[1, 2, 3], APP_ADDR, 477, 0),
            Err(InputError::InvalidPayloadWidth { width: 477, .. })
        ));
    }

    #[test]
    fn test_convert_address_overflow() {
        let data = vec![0u8; 512];
        assert!(matches!(
            convert(&data, 0xFFFF_FF00, 256, 0),
            Err(InputError::AddressOverflow { .. })
        ));
        // Exactly reaching the top of the address space is fine
        assert!(convert(&data[..256], 0xFFFF_FF00, 256, 0).is_ok());
    }
}
