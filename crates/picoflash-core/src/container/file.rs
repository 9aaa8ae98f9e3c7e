//! File-level helpers: segment specs, reading inputs, writing and
//! inspecting UF2 images.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::info;

use super::block::ContainerBlock;
use super::compose::{DroppedBlock, Segment, decode_records};
use super::constants::{BLOCK_SIZE, family_by_name};
use crate::error::InputError;

/// Read a whole file, mapping failures to `InputError`.
pub fn read_file(path: &Path) -> Result<Vec<u8>, InputError> {
    std::fs::read(path).map_err(|source| InputError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a raw firmware binary; an empty file is rejected.
pub fn read_raw_file(path: &Path) -> Result<Vec<u8>, InputError> {
    let data = read_file(path)?;
    if data.is_empty() {
        return Err(InputError::EmptyFirmware {
            path: path.to_path_buf(),
        });
    }
    Ok(data)
}

/// Read and decode a UF2 file, skipping invalid records.
pub fn read_container_file(
    path: &Path,
) -> Result<(Vec<ContainerBlock>, Vec<DroppedBlock>), InputError> {
    let bytes = read_file(path)?;
    Ok(decode_records(&path.display().to_string(), &bytes))
}

/// Encode `blocks` into a UF2 file at `path`.
pub fn write_container_file(path: &Path, blocks: &[ContainerBlock]) -> Result<(), InputError> {
    let mut out = Vec::with_capacity(blocks.len() * BLOCK_SIZE);
    for block in blocks {
        out.extend_from_slice(&block.encode());
    }
    std::fs::write(path, &out).map_err(|source| InputError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), blocks = blocks.len(), bytes = out.len(), "Wrote UF2 image");
    Ok(())
}

/// Parse an address in hex (`0x` prefix) or decimal.
pub fn parse_address(s: &str) -> Result<u32, InputError> {
    let trimmed = s.trim().replace('_', "");
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => trimmed.parse::<u32>(),
    };
    parsed.map_err(|_| InputError::InvalidAddress(s.to_string()))
}

/// Parse a family by name (`rp2040`, `absolute`, ...) or as a number.
pub fn parse_family(s: &str) -> Result<u32, InputError> {
    if let Some(id) = family_by_name(s.trim()) {
        return Ok(id);
    }
    parse_address(s).map_err(|_| InputError::UnknownFamily(s.to_string()))
}

/// Command-line description of one segment.
///
/// `path.uf2` is an existing container; `path@address` is a raw binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentSpec {
    Container { path: PathBuf },
    Raw { path: PathBuf, address: u32 },
}

impl SegmentSpec {
    pub fn path(&self) -> &Path {
        match self {
            SegmentSpec::Container { path } | SegmentSpec::Raw { path, .. } => path,
        }
    }

    /// Default segment name: the file stem.
    pub fn default_name(&self) -> String {
        self.path()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path().display().to_string())
    }

    /// Load the file and build a composable segment.
    pub fn load(&self, name: impl Into<String>) -> Result<Segment, InputError> {
        match self {
            SegmentSpec::Container { path } => Ok(Segment::container(name, read_file(path)?)),
            SegmentSpec::Raw { path, address } => {
                Ok(Segment::raw(name, read_raw_file(path)?, *address))
            }
        }
    }
}

impl FromStr for SegmentSpec {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let path = PathBuf::from(s);
        // `@` may appear inside a container file name
        if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("uf2"))
        {
            return Ok(SegmentSpec::Container { path });
        }

        if let Some((path, address)) = s.rsplit_once('@') {
            if path.is_empty() {
                return Err(InputError::InvalidSegmentSpec(s.to_string()));
            }
            return Ok(SegmentSpec::Raw {
                path: PathBuf::from(path),
                address: parse_address(address)?,
            });
        }

        Err(InputError::InvalidSegmentSpec(s.to_string()))
    }
}

/// Load every spec, naming segments from `names` or from the file stems.
pub fn load_segments(specs: &[SegmentSpec], names: &[String]) -> Result<Vec<Segment>, InputError> {
    if specs.is_empty() {
        return Err(InputError::NoSegments);
    }
    if !names.is_empty() && names.len() != specs.len() {
        return Err(InputError::SegmentCountMismatch {
            expected: specs.len(),
            actual: names.len(),
        });
    }

    specs
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            let name = names.get(i).cloned().unwrap_or_else(|| spec.default_name());
            spec.load(name)
        })
        .collect()
}

/// Summary of a UF2 image.
#[derive(Debug, Clone, Default)]
pub struct ImageInfo {
    pub block_count: usize,
    pub start_addr: Option<u32>,
    pub end_addr: Option<u32>,
    pub families: BTreeSet<u32>,
    pub payload_widths: BTreeSet<u32>,
    /// Every block's index equals its position and totals agree.
    pub contiguous: bool,
}

pub fn inspect(blocks: &[ContainerBlock]) -> ImageInfo {
    let total = blocks.len() as u32;
    ImageInfo {
        block_count: blocks.len(),
        start_addr: blocks.iter().map(|b| b.target_addr).min(),
        end_addr: blocks
            .iter()
            .map(|b| b.target_addr.saturating_add(b.payload_size))
            .max(),
        families: blocks.iter().filter_map(ContainerBlock::family_id).collect(),
        payload_widths: blocks.iter().map(|b| b.payload_size).collect(),
        contiguous: blocks
            .iter()
            .enumerate()
            .all(|(i, b)| b.block_no == i as u32 && b.num_blocks == total),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::compose::{ComposeOptions, compose};
    use crate::container::constants::{APP_ADDR, BOOTLOADER_ADDR, FAMILY_RP2XXX_ABSOLUTE};
    use crate::container::convert::convert;

    #[test]
    fn test_parse_family() {
        assert_eq!(parse_family("RP2040").unwrap(), 0xE48B_FF56);
        assert_eq!(parse_family("rp2350-riscv").unwrap(), 0xE48B_FF5A);
        assert_eq!(parse_family("0xE48BFF59").unwrap(), 0xE48B_FF59);
        assert!(matches!(
            parse_family("esp32"),
            Err(InputError::UnknownFamily(_))
        ));
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x10006000").unwrap(), 0x1000_6000);
        assert_eq!(parse_address("0X1000_0100").unwrap(), 0x1000_0100);
        assert_eq!(parse_address("4096").unwrap(), 4096);
        assert!(matches!(
            parse_address("0xZZ"),
            Err(InputError::InvalidAddress(_))
        ));
        assert!(parse_address("0x100000000").is_err());
    }

    #[test]
    fn test_segment_spec_parse() {
        assert_eq!(
            "build/app.bin@0x10006000".parse::<SegmentSpec>().unwrap(),
            SegmentSpec::Raw {
                path: PathBuf::from("build/app.bin"),
                address: APP_ADDR
            }
        );
        assert_eq!(
            "bootloader.UF2".parse::<SegmentSpec>().unwrap(),
            SegmentSpec::Container {
                path: PathBuf::from("bootloader.UF2")
            }
        );
        assert!("app.bin".parse::<SegmentSpec>().is_err());
        assert!("@0x1000".parse::<SegmentSpec>().is_err());
    }

    #[test]
    fn test_segment_spec_uf2_name_with_at_sign() {
        assert_eq!(
            "builds/v1@rc.uf2".parse::<SegmentSpec>().unwrap(),
            SegmentSpec::Container {
                path: PathBuf::from("builds/v1@rc.uf2")
            }
        );
        assert_eq!(
            "builds/v1@rc/app.bin@0x10006000"
                .parse::<SegmentSpec>()
                .unwrap(),
            SegmentSpec::Raw {
                path: PathBuf::from("builds/v1@rc/app.bin"),
                address: APP_ADDR
            }
        );
    }

    #[test]
    fn test_load_segments_name_mismatch() {
        let specs = vec![SegmentSpec::Container {
            path: PathBuf::from("a.uf2"),
        }];
        let names = vec!["a".to_string(), "b".to_string()];
        assert!(matches!(
            load_segments(&specs, &names),
            Err(InputError::SegmentCountMismatch {
                expected: 1,
                actual: 2
            })
        ));
        assert!(matches!(load_segments(&[], &[]), Err(InputError::NoSegments)));
    }

    #[test]
    fn test_read_raw_file_rejects_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(
            read_raw_file(&path),
            Err(InputError::EmptyFirmware { .. })
        ));
        assert!(matches!(
            read_raw_file(&dir.path().join("missing.bin")),
            Err(InputError::Read { .. })
        ));
    }

    #[test]
    fn test_combine_files_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let boot_uf2 = dir.path().join("bootloader.uf2");
        let app_bin = dir.path().join("app.bin");
        let out = dir.path().join("combined.uf2");

        let boot_blocks =
            convert(&[0x11; 600], BOOTLOADER_ADDR, 256, FAMILY_RP2XXX_ABSOLUTE).unwrap();
        write_container_file(&boot_uf2, &boot_blocks).unwrap();
        std::fs::write(&app_bin, vec![0x22; 1000]).unwrap();

        let specs: Vec<SegmentSpec> = [
            boot_uf2.display().to_string(),
            format!("{}@0x10006000", app_bin.display()),
        ]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();
        let segments = load_segments(&specs, &[]).unwrap();
        assert_eq!(segments[0].name, "bootloader");
        assert_eq!(segments[1].name, "app");

        let image = compose(&segments, &ComposeOptions::default()).unwrap();
        write_container_file(&out, &image.blocks).unwrap();

        let (blocks, dropped) = read_container_file(&out).unwrap();
        assert!(dropped.is_empty());
        let info = inspect(&blocks);
        assert_eq!(info.block_count, 3 + 4);
        assert!(info.contiguous);
        assert_eq!(info.start_addr, Some(BOOTLOADER_ADDR));
        assert_eq!(info.end_addr, Some(APP_ADDR + 4 * 256));
        assert_eq!(info.families.len(), 1);
        assert!(info.payload_widths.contains(&256));
    }

    #[test]
    fn test_inspect_detects_gaps() {
        let mut blocks = convert(&[1u8; 768], APP_ADDR, 256, 0).unwrap();
        blocks.remove(1);
        assert!(!inspect(&blocks).contiguous);
    }
}
