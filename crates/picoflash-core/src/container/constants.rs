//! UF2 container format constants.
//!
//! Single source of truth for the block geometry, magic words, flag bits,
//! family identifiers and default flash layout used by the codec, the
//! converter and the composer.

// ============================================================================
// Block Geometry
// ============================================================================

/// Size of one on-wire block.
pub const BLOCK_SIZE: usize = 512;

/// Size of the fixed header (eight little-endian u32 words).
pub const HEADER_SIZE: usize = 32;

/// Offset of the trailing magic word.
pub const FOOTER_OFFSET: usize = 508;

/// Width of the reserved payload area (offsets 32..508).
pub const PAYLOAD_AREA: usize = FOOTER_OFFSET - HEADER_SIZE; // 476 bytes

/// Payload width used when converting raw images (one flash page).
pub const DEFAULT_PAYLOAD_WIDTH: usize = 256;

// ============================================================================
// Magic Words
// ============================================================================

/// First leading magic ('UF2\n').
pub const MAGIC_START0: u32 = 0x0A32_4655;

/// Second leading magic.
pub const MAGIC_START1: u32 = 0x9E5D_5157;

/// Trailing magic.
pub const MAGIC_END: u32 = 0x0AB1_6F30;

// ============================================================================
// Flags
// ============================================================================

/// Block is not meant for main flash.
pub const FLAG_NOT_MAIN_FLASH: u32 = 0x0000_0001;

/// Block is part of a file container.
pub const FLAG_FILE_CONTAINER: u32 = 0x0000_1000;

/// Header word 7 holds a family id rather than a file size.
pub const FLAG_FAMILY_ID_PRESENT: u32 = 0x0000_2000;

/// Payload carries an MD5 checksum.
pub const FLAG_MD5_PRESENT: u32 = 0x0000_4000;

// ============================================================================
// Family Identifiers
// ============================================================================

pub const FAMILY_RP2040: u32 = 0xE48B_FF56;
/// Absolute family: accepted by both RP2040 and RP2350 boot ROMs.
pub const FAMILY_RP2XXX_ABSOLUTE: u32 = 0xE48B_FF57;
pub const FAMILY_RP2350_ARM_S: u32 = 0xE48B_FF59;
pub const FAMILY_RP2350_RISCV: u32 = 0xE48B_FF5A;
pub const FAMILY_RP2350_ARM_NS: u32 = 0xE48B_FF5B;

/// Known families with their command-line names.
pub const KNOWN_FAMILIES: &[(&str, u32)] = &[
    ("rp2040", FAMILY_RP2040),
    ("absolute", FAMILY_RP2XXX_ABSOLUTE),
    ("rp2350-arm-s", FAMILY_RP2350_ARM_S),
    ("rp2350-riscv", FAMILY_RP2350_RISCV),
    ("rp2350-arm-ns", FAMILY_RP2350_ARM_NS),
];

/// Look up a family id by name (case-insensitive).
pub fn family_by_name(name: &str) -> Option<u32> {
    KNOWN_FAMILIES
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|&(_, id)| id)
}

/// Look up the name of a known family id.
pub fn family_name(id: u32) -> Option<&'static str> {
    KNOWN_FAMILIES
        .iter()
        .find(|&&(_, v)| v == id)
        .map(|&(n, _)| n)
}

// ============================================================================
// Default Flash Layout
// ============================================================================

/// Start of XIP flash.
pub const FLASH_BASE: u32 = 0x1000_0000;

/// Second-stage boot loader (256 bytes provided by the SDK).
pub const BOOT2_ADDR: u32 = FLASH_BASE;

/// Bootloader region, directly after boot2.
pub const BOOTLOADER_ADDR: u32 = 0x1000_0100;

/// Application bank A.
pub const APP_ADDR: u32 = 0x1000_6000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_geometry() {
        assert_eq!(PAYLOAD_AREA, 476);
        assert_eq!(HEADER_SIZE + PAYLOAD_AREA + 4, BLOCK_SIZE);
    }

    #[test]
    fn test_family_lookup() {
        assert_eq!(family_by_name("RP2040"), Some(FAMILY_RP2040));
        assert_eq!(family_by_name("absolute"), Some(FAMILY_RP2XXX_ABSOLUTE));
        assert_eq!(family_by_name("esp32"), None);
        assert_eq!(family_name(FAMILY_RP2350_ARM_S), Some("rp2350-arm-s"));
        assert_eq!(family_name(0), None);
    }
}
