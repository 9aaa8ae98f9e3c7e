//! Multi-segment UF2 image composition.
//!
//! Merges block streams from raw binaries and existing UF2 files into one
//! image, renumbering blocks so indices are contiguous across segments.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::block::ContainerBlock;
use super::constants::{BLOCK_SIZE, DEFAULT_PAYLOAD_WIDTH, FAMILY_RP2XXX_ABSOLUTE};
use super::convert::convert;
use crate::error::InputError;

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("Segment '{name}' has no valid blocks")]
    EmptySegment { name: String },
    #[error(transparent)]
    Input(#[from] InputError),
}

/// Where a segment's blocks come from.
#[derive(Debug, Clone)]
pub enum SegmentSource {
    /// Flat binary loaded at `address`.
    Raw { data: Vec<u8>, address: u32 },
    /// Bytes of an existing UF2 file.
    Container(Vec<u8>),
}

/// A named region of the output image.
#[derive(Debug, Clone)]
pub struct Segment {
    pub name: String,
    pub source: SegmentSource,
    /// Fail the whole composition if no valid block survives.
    pub required: bool,
}

impl Segment {
    pub fn raw(name: impl Into<String>, data: Vec<u8>, address: u32) -> Self {
        Self {
            name: name.into(),
            source: SegmentSource::Raw { data, address },
            required: true,
        }
    }

    pub fn container(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            source: SegmentSource::Container(bytes),
            required: true,
        }
    }

    /// Mark this segment as optional: an empty result is skipped instead of failing.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Composition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeOptions {
    /// Payload width for raw segments.
    pub payload_width: usize,
    /// Family id stamped on raw segments.
    pub family_id: u32,
    /// Force this family id onto every output block.
    pub normalize_family: Option<u32>,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            payload_width: DEFAULT_PAYLOAD_WIDTH,
            family_id: FAMILY_RP2XXX_ABSOLUTE,
            normalize_family: None,
        }
    }
}

/// A record that failed to decode and was left out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedBlock {
    pub segment: String,
    /// 0-based record position within the segment's input.
    pub record: usize,
    pub reason: String,
}

/// Where a segment landed in the composed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSummary {
    pub name: String,
    pub first_block: u32,
    pub block_count: u32,
    pub start_addr: u32,
    /// One past the last payload byte of the segment.
    pub end_addr: u32,
}

/// The merged, renumbered image.
#[derive(Debug, Clone)]
pub struct ComposedImage {
    pub blocks: Vec<ContainerBlock>,
    pub segments: Vec<SegmentSummary>,
    pub dropped: Vec<DroppedBlock>,
}

impl ComposedImage {
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Serialize all blocks back to back.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.blocks.len() * BLOCK_SIZE);
        for block in &self.blocks {
            out.extend_from_slice(&block.encode());
        }
        out
    }

    /// Lowest start and highest end address over all segments.
    pub fn address_range(&self) -> Option<(u32, u32)> {
        let start = self.segments.iter().map(|s| s.start_addr).min()?;
        let end = self.segments.iter().map(|s| s.end_addr).max()?;
        Some((start, end))
    }
}

/// Decode every 512-byte record of a UF2 file.
///
/// Records that fail to decode, and a trailing partial record, are logged
/// and returned in the dropped list instead of failing.
pub fn decode_records(segment: &str, bytes: &[u8]) -> (Vec<ContainerBlock>, Vec<DroppedBlock>) {
    let mut blocks = Vec::with_capacity(bytes.len() / BLOCK_SIZE);
    let mut dropped = Vec::new();

    for (record, chunk) in bytes.chunks(BLOCK_SIZE).enumerate() {
        match ContainerBlock::decode(chunk) {
            Ok(block) => blocks.push(block),
            Err(e) => {
                warn!(segment = %segment, record, error = %e, "Skipping invalid block");
                dropped.push(DroppedBlock {
                    segment: segment.to_string(),
                    record,
                    reason: e.to_string(),
                });
            }
        }
    }

    (blocks, dropped)
}

/// Merge `segments` in order into one renumbered image.
pub fn compose(
    segments: &[Segment],
    options: &ComposeOptions,
) -> Result<ComposedImage, ComposeError> {
    if segments.is_empty() {
        return Err(InputError::NoSegments.into());
    }

    let mut blocks: Vec<ContainerBlock> = Vec::new();
    let mut summaries = Vec::with_capacity(segments.len());
    let mut dropped = Vec::new();
    let mut reference_width: Option<u32> = None;

    for segment in segments {
        let segment_blocks = match &segment.source {
            SegmentSource::Raw { data, address } => {
                convert(data, *address, options.payload_width, options.family_id)?
            }
            SegmentSource::Container(bytes) => {
                let (decoded, mut bad) = decode_records(&segment.name, bytes);
                dropped.append(&mut bad);
                decoded
            }
        };

        let (Some(first), Some(last)) = (segment_blocks.first(), segment_blocks.last()) else {
            if segment.required {
                return Err(ComposeError::EmptySegment {
                    name: segment.name.clone(),
                });
            }
            warn!(segment = %segment.name, "Optional segment is empty, skipping");
            continue;
        };

        let width = *reference_width.get_or_insert(first.payload_size);
        if segment_blocks.iter().any(|b| b.payload_size != width) {
            warn!(
                segment = %segment.name,
                expected = width,
                "Segment mixes payload widths; payload areas are carried unchanged"
            );
        }

        let summary = SegmentSummary {
            name: segment.name.clone(),
            first_block: blocks.len() as u32,
            block_count: segment_blocks.len() as u32,
            start_addr: first.target_addr,
            end_addr: last.target_addr.saturating_add(last.payload_size),
        };
        info!(
            segment = %summary.name,
            blocks = summary.block_count,
            start = %format!("0x{:08X}", summary.start_addr),
            end = %format!("0x{:08X}", summary.end_addr),
            "Added segment"
        );
        summaries.push(summary);
        blocks.extend(segment_blocks);
    }

    let total = blocks.len() as u32;
    for (i, block) in blocks.iter_mut().enumerate() {
        block.block_no = i as u32;
        block.num_blocks = total;
        if let Some(family) = options.normalize_family {
            block.set_family_id(family);
        }
    }
    debug!(total, dropped = dropped.len(), "Composition complete");

    Ok(ComposedImage {
        blocks,
        segments: summaries,
        dropped,
    })
}
