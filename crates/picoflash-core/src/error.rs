//! Error types shared across the container tooling and the transfer session.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::transport::GatewayError;

/// Invalid input supplied by the caller (paths, sizes, segment specs).
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Firmware file is empty: {}", .path.display())]
    EmptyFirmware { path: PathBuf },

    #[error("Cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid segment spec '{0}': expected <file.uf2> or <file.bin>@<address>")]
    InvalidSegmentSpec(String),

    #[error("Invalid address '{0}'")]
    InvalidAddress(String),

    #[error("Invalid payload width {width}: must be between 1 and {max}")]
    InvalidPayloadWidth { width: usize, max: usize },

    #[error("Got {actual} segment names for {expected} segments")]
    SegmentCountMismatch { expected: usize, actual: usize },

    #[error("Unknown family '{0}'")]
    UnknownFamily(String),

    #[error("Segment at 0x{address:08X} with {len} bytes overflows the 32-bit address space")]
    AddressOverflow { address: u32, len: usize },

    #[error("No segments given")]
    NoSegments,

    #[error("Chunk size must be at least 1 byte")]
    InvalidChunkSize,
}

/// Why a transfer session ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Device rejected a call with a structured reason.
    Protocol,
    /// Device reported a digest mismatch at verify.
    Integrity,
    /// Timeout or transport failure.
    Network,
    /// Device never came back after apply.
    DeviceUnresponsive,
    /// Caller cancelled the session.
    Cancelled,
    /// Caller supplied an unusable firmware or configuration.
    Input,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Protocol => write!(f, "protocol error"),
            FailureKind::Integrity => write!(f, "integrity error"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::DeviceUnresponsive => write!(f, "device unresponsive"),
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Input => write!(f, "input error"),
        }
    }
}

/// Fatal outcome of a transfer session.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Device rejected {call}: {reason}")]
    Protocol { call: &'static str, reason: String },

    #[error("Firmware verification failed: {reason}")]
    Integrity { reason: String },

    #[error("Communication failed during {call}: {source}")]
    Network {
        call: &'static str,
        #[source]
        source: GatewayError,
    },

    #[error("Device did not come back online after {attempts} status polls")]
    DeviceUnresponsive { attempts: u32 },

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Invalid input: {0}")]
    Input(#[from] InputError),
}

impl TransferError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TransferError::Protocol { .. } => FailureKind::Protocol,
            TransferError::Integrity { .. } => FailureKind::Integrity,
            TransferError::Network { .. } => FailureKind::Network,
            TransferError::DeviceUnresponsive { .. } => FailureKind::DeviceUnresponsive,
            TransferError::Cancelled => FailureKind::Cancelled,
            TransferError::Input(_) => FailureKind::Input,
        }
    }

    /// Map a gateway error on `call` to the session taxonomy.
    ///
    /// Structured rejections become `Protocol`; everything else is a
    /// communication failure. Callers that need `Integrity` (verify) map
    /// rejections themselves.
    pub fn from_gateway(call: &'static str, err: GatewayError) -> Self {
        match err {
            GatewayError::Rejected { reason } => TransferError::Protocol { call, reason },
            GatewayError::Malformed(reason) => TransferError::Protocol { call, reason },
            other => TransferError::Network {
                call,
                source: other,
            },
        }
    }
}
