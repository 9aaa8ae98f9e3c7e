//! UF2 container module.
//!
//! - `constants`: block geometry, magics, flags, family ids, flash layout
//! - `block`: 512-byte block codec
//! - `convert`: raw binary to block stream
//! - `compose`: multi-segment merge and renumbering
//! - `file`: segment specs and file I/O

pub mod block;
pub mod compose;
pub mod constants;
pub mod convert;
pub mod file;

pub use block::{BlockError, ContainerBlock};
pub use compose::{
    ComposeError, ComposeOptions, ComposedImage, DroppedBlock, Segment, SegmentSource,
    SegmentSummary, compose,
};
pub use convert::convert;
pub use file::{
    ImageInfo, SegmentSpec, inspect, load_segments, parse_address, parse_family,
    read_container_file, write_container_file,
};
