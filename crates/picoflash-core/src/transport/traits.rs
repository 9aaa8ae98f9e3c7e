//! Device gateway abstraction.
//!
//! Defines the `DeviceGateway` trait for the device's OTA REST surface,
//! allowing different implementations (HTTP, mock, etc.).

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Device answered with a structured `{error}` body.
    #[error("{reason}")]
    Rejected { reason: String },

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Transport failure: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// Timeout or transport failure, as opposed to a device answer.
    pub fn is_communication(&self) -> bool {
        matches!(self, GatewayError::Timeout { .. } | GatewayError::Network(_))
    }

    /// The reply never arrived intact: a communication failure or a body
    /// cut off mid-stream. Only a well-formed `{error}` is a real answer.
    pub fn is_reply_lost(&self) -> bool {
        self.is_communication() || matches!(self, GatewayError::Malformed(_))
    }
}

/// `status` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeviceStatus {
    /// "idle", "receiving", "verifying", "ready", "applying", "error".
    pub state: String,
    pub progress: u32,
    pub received: u64,
    pub total: u64,
    /// Last error string; "OK" when none.
    pub error: String,
}

impl DeviceStatus {
    /// Device will accept a new `begin` without an abort first.
    pub fn is_ready_for_begin(&self) -> bool {
        matches!(self.state.as_str(), "idle" | "error")
    }
}

/// `write` acknowledgment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct WriteAck {
    /// Device-computed percentage.
    pub progress: u32,
    /// Bytes the device has accepted so far.
    pub received: u64,
}

/// Abstract OTA endpoint interface.
///
/// Calls are strictly sequential; implementations apply their own per-call
/// timeouts and report them as `GatewayError::Timeout`.
pub trait DeviceGateway: Send + Sync {
    fn status(&self) -> Result<DeviceStatus, GatewayError>;

    /// Best-effort abort of an in-progress transfer.
    fn abort(&self) -> Result<(), GatewayError>;

    fn begin(&self, size: usize, sha256_hex: &str) -> Result<(), GatewayError>;

    fn write(&self, chunk: &[u8]) -> Result<WriteAck, GatewayError>;

    /// Finish the upload and verify the digest on the device.
    fn end(&self) -> Result<(), GatewayError>;

    /// Install the verified image. The device reboots and may drop the
    /// connection before answering.
    fn apply(&self) -> Result<(), GatewayError>;

    /// Status query used while waiting for the device after a reboot.
    fn probe(&self) -> Result<DeviceStatus, GatewayError> {
        self.status()
    }
}

impl<G: DeviceGateway + ?Sized> DeviceGateway for &G {
    fn status(&self) -> Result<DeviceStatus, GatewayError> {
        (**self).status()
    }

    fn abort(&self) -> Result<(), GatewayError> {
        (**self).abort()
    }

    fn begin(&self, size: usize, sha256_hex: &str) -> Result<(), GatewayError> {
        (**self).begin(size, sha256_hex)
    }

    fn write(&self, chunk: &[u8]) -> Result<WriteAck, GatewayError> {
        (**self).write(chunk)
    }

    fn end(&self) -> Result<(), GatewayError> {
        (**self).end()
    }

    fn apply(&self) -> Result<(), GatewayError> {
        (**self).apply()
    }

    fn probe(&self) -> Result<DeviceStatus, GatewayError> {
        (**self).probe()
    }
}
