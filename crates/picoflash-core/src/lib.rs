//! picoflash-core: UF2 container tooling and OTA upload for RP2040/RP2350 boards.
//!
//! This crate builds and inspects UF2 firmware containers and pushes
//! firmware images to a device over its `/rest/ota_*` HTTP endpoints.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Container**: Block codec, raw-to-UF2 conversion, multi-segment composition, file I/O
//! - **Payload**: Firmware image with SHA-256 digest, chunk tracking
//! - **Transport**: Device gateway abstraction (HTTP, mock)
//! - **State**: Transfer state machine and per-state handlers
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator and configuration
//!
//! # Example
//!
//! ```no_run
//! use picoflash_core::payload::FirmwareImage;
//! use picoflash_core::session::{SessionConfig, TransferSession};
//! use picoflash_core::transport::HttpGateway;
//!
//! let config = SessionConfig {
//!     host: "192.168.4.1".to_string(),
//!     apply: true,
//!     ..Default::default()
//! };
//!
//! let gateway = HttpGateway::new(&config.host, config.timeouts).expect("HTTP client");
//! let image = FirmwareImage::load("firmware.uf2".as_ref()).expect("firmware");
//! let mut session = TransferSession::new(gateway, config);
//! session.run(&image).expect("OTA failed");
//! ```

pub mod container;
pub mod error;
pub mod events;
pub mod payload;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use container::{
    BlockError, ComposeError, ComposeOptions, ComposedImage, ContainerBlock, ImageInfo, Segment,
    SegmentSpec, compose, convert, inspect, load_segments, read_container_file,
    write_container_file,
};
pub use error::{FailureKind, InputError, TransferError};
pub use events::{LogLevel, NullObserver, TracingObserver, TransferEvent, TransferObserver};
pub use payload::{ChunkState, FirmwareImage};
pub use session::{CancelToken, SessionConfig, TransferReport, TransferSession};
pub use state::{ApplyOutcome, TransferState};
pub use transport::{DeviceGateway, GatewayError, HttpGateway, MockGateway};
