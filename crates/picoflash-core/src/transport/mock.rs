//! Simulated device for testing the transfer state machine.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};

use super::traits::{DeviceGateway, DeviceStatus, GatewayError, WriteAck};

/// Gateway call, as recorded by `MockGateway`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Status,
    Abort,
    Begin { size: usize, sha256: String },
    Write { len: usize },
    End,
    Apply,
    Probe,
}

#[derive(Debug, Default)]
struct DeviceState {
    state: String,
    expected_size: usize,
    expected_digest: String,
    received: Vec<u8>,
}

/// Mock gateway behaving like the device firmware.
///
/// Tracks the upload and verifies the digest at `end`. Failures can be
/// injected per call; queued results take precedence over simulated ones.
pub struct MockGateway {
    device: Arc<Mutex<DeviceState>>,
    calls: Arc<Mutex<Vec<GatewayCall>>>,
    status_results: Arc<Mutex<VecDeque<Result<DeviceStatus, GatewayError>>>>,
    write_failures: Arc<Mutex<VecDeque<(usize, GatewayError)>>>,
    end_failure: Arc<Mutex<Option<GatewayError>>>,
    apply_failure: Arc<Mutex<Option<GatewayError>>>,
    apply_drops_connection: bool,
    /// Failed probes before the device answers again after apply.
    offline_probes: Arc<Mutex<u32>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            device: Arc::new(Mutex::new(DeviceState {
                state: "idle".into(),
                ..Default::default()
            })),
            calls: Arc::new(Mutex::new(Vec::new())),
            status_results: Arc::new(Mutex::new(VecDeque::new())),
            write_failures: Arc::new(Mutex::new(VecDeque::new())),
            end_failure: Arc::new(Mutex::new(None)),
            apply_failure: Arc::new(Mutex::new(None)),
            apply_drops_connection: true,
            offline_probes: Arc::new(Mutex::new(0)),
        }
    }

    /// Start in a given device state (e.g. "receiving" from a stale upload).
    pub fn with_state(self, state: &str) -> Self {
        self.device.lock().unwrap().state = state.to_string();
        self
    }

    /// Whether `apply` drops the connection (true) or answers first.
    pub fn with_apply_response(mut self) -> Self {
        self.apply_drops_connection = false;
        self
    }

    /// Queue a result for the next `status` call.
    pub fn queue_status(&self, result: Result<DeviceStatus, GatewayError>) {
        self.status_results.lock().unwrap().push_back(result);
    }

    /// Fail the write call with the given 0-based index.
    pub fn fail_write(&self, index: usize, error: GatewayError) {
        self.write_failures.lock().unwrap().push_back((index, error));
    }

    /// Fail the next `end` call.
    pub fn fail_end(&self, error: GatewayError) {
        *self.end_failure.lock().unwrap() = Some(error);
    }

    /// Fail the next `apply` call. The device still reboots unless the
    /// error is a rejection.
    pub fn fail_apply(&self, error: GatewayError) {
        *self.apply_failure.lock().unwrap() = Some(error);
    }

    /// Number of probes that time out after apply before the device is back.
    pub fn set_offline_probes(&self, n: u32) {
        *self.offline_probes.lock().unwrap() = n;
    }

    /// Get all recorded calls.
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, GatewayCall::Write { .. }))
            .count()
    }

    /// Bytes the simulated device has received.
    pub fn received(&self) -> Vec<u8> {
        self.device.lock().unwrap().received.clone()
    }

    fn record(&self, call: GatewayCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn current_status(&self) -> DeviceStatus {
        let device = self.device.lock().unwrap();
        let received = device.received.len() as u64;
        DeviceStatus {
            state: device.state.clone(),
            progress: progress_pct(device.received.len(), device.expected_size),
            received,
            total: device.expected_size as u64,
            error: "OK".into(),
        }
    }
}

fn progress_pct(received: usize, total: usize) -> u32 {
    if total == 0 {
        0
    } else {
        ((received * 100) / total) as u32
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceGateway for MockGateway {
    fn status(&self) -> Result<DeviceStatus, GatewayError> {
        self.record(GatewayCall::Status);
        if let Some(result) = self.status_results.lock().unwrap().pop_front() {
            return result;
        }
        Ok(self.current_status())
    }

    fn abort(&self) -> Result<(), GatewayError> {
        self.record(GatewayCall::Abort);
        let mut device = self.device.lock().unwrap();
        device.state = "idle".into();
        device.received.clear();
        Ok(())
    }

    fn begin(&self, size: usize, sha256_hex: &str) -> Result<(), GatewayError> {
        self.record(GatewayCall::Begin {
            size,
            sha256: sha256_hex.to_string(),
        });
        let mut device = self.device.lock().unwrap();
        if !matches!(device.state.as_str(), "idle" | "error") {
            return Err(GatewayError::Rejected {
                reason: "Already in progress".into(),
            });
        }
        if size == 0 {
            return Err(GatewayError::Rejected {
                reason: "Invalid size".into(),
            });
        }
        device.state = "receiving".into();
        device.expected_size = size;
        device.expected_digest = sha256_hex.to_string();
        device.received.clear();
        Ok(())
    }

    fn write(&self, chunk: &[u8]) -> Result<WriteAck, GatewayError> {
        let index = self.write_count();
        self.record(GatewayCall::Write { len: chunk.len() });

        {
            let mut failures = self.write_failures.lock().unwrap();
            if let Some(pos) = failures.iter().position(|(i, _)| *i == index)
                && let Some((_, err)) = failures.remove(pos)
            {
                return Err(err);
            }
        }

        let mut device = self.device.lock().unwrap();
        if device.state != "receiving" {
            return Err(GatewayError::Rejected {
                reason: "Not initialized".into(),
            });
        }
        if device.received.len() + chunk.len() > device.expected_size {
            device.state = "error".into();
            return Err(GatewayError::Rejected {
                reason: "Invalid size".into(),
            });
        }
        device.received.extend_from_slice(chunk);
        Ok(WriteAck {
            progress: progress_pct(device.received.len(), device.expected_size),
            received: device.received.len() as u64,
        })
    }

    fn end(&self) -> Result<(), GatewayError> {
        self.record(GatewayCall::End);
        if let Some(err) = self.end_failure.lock().unwrap().take() {
            return Err(err);
        }

        let mut device = self.device.lock().unwrap();
        if device.received.len() != device.expected_size {
            device.state = "error".into();
            return Err(GatewayError::Rejected {
                reason: "Invalid size".into(),
            });
        }
        let actual = hex::encode(Sha256::digest(&device.received));
        if actual != device.expected_digest {
            device.state = "error".into();
            return Err(GatewayError::Rejected {
                reason: "Checksum mismatch".into(),
            });
        }
        device.state = "ready".into();
        Ok(())
    }

    fn apply(&self) -> Result<(), GatewayError> {
        self.record(GatewayCall::Apply);
        let mut device = self.device.lock().unwrap();
        if let Some(err) = self.apply_failure.lock().unwrap().take() {
            if !matches!(err, GatewayError::Rejected { .. }) {
                device.state = "idle".into();
            }
            return Err(err);
        }
        if device.state != "ready" {
            return Err(GatewayError::Rejected {
                reason: format!("Not ready to apply. Current state: {}", device.state),
            });
        }
        device.state = "idle".into();
        if self.apply_drops_connection {
            return Err(GatewayError::Network("connection reset by peer".into()));
        }
        Ok(())
    }

    fn probe(&self) -> Result<DeviceStatus, GatewayError> {
        self.record(GatewayCall::Probe);
        {
            let mut offline = self.offline_probes.lock().unwrap();
            if *offline > 0 {
                *offline -= 1;
                return Err(GatewayError::Timeout { timeout_ms: 3_000 });
            }
        }
        Ok(self.current_status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_upload_verifies_digest() {
        let mock = MockGateway::new();
        let data = b"firmware".to_vec();
        let digest = hex::encode(Sha256::digest(&data));

        mock.begin(data.len(), &digest).unwrap();
        let ack = mock.write(&data).unwrap();
        assert_eq!(ack.received, 8);
        assert_eq!(ack.progress, 100);
        mock.end().unwrap();
        assert_eq!(mock.status().unwrap().state, "ready");
        assert_eq!(mock.received(), data);
    }

    #[test]
    fn test_mock_digest_mismatch() {
        let mock = MockGateway::new();
        mock.begin(4, &"00".repeat(32)).unwrap();
        mock.write(b"abcd").unwrap();
        assert!(matches!(mock.end(), Err(GatewayError::Rejected { .. })));
        assert_eq!(mock.status().unwrap().state, "error");
    }

    #[test]
    fn test_mock_busy_rejects_begin() {
        let mock = MockGateway::new().with_state("receiving");
        assert!(mock.begin(4, "").is_err());
        mock.abort().unwrap();
        assert_eq!(mock.status().unwrap().state, "idle");
    }

    #[test]
    fn test_mock_injected_write_failure() {
        let mock = MockGateway::new();
        mock.begin(8, "").unwrap();
        mock.fail_write(1, GatewayError::Timeout { timeout_ms: 10 });
        assert!(mock.write(b"abcd").is_ok());
        assert!(matches!(
            mock.write(b"efgh"),
            Err(GatewayError::Timeout { .. })
        ));
        assert_eq!(mock.write_count(), 2);
    }
}
