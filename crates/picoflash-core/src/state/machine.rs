//! State machine implementation for the OTA transfer.

use std::fmt;
use std::time::Instant;

use crate::error::FailureKind;
use crate::events::TransferProgress;
use crate::payload::ChunkState;

/// Transfer state. Initial: `Idle`; terminal: `Complete`, `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    #[default]
    Idle,
    /// Querying device status before starting.
    Checking,
    /// Clearing a stale transfer on the device.
    Aborting,
    /// Announcing size and digest.
    Beginning,
    /// Sending chunks.
    Writing,
    /// Device checks the digest.
    Verifying,
    /// Device installs the image and reboots.
    Applying,
    /// Polling until the device answers again.
    WaitingOnline,
    Complete,
    Failed(FailureKind),
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferState::Idle => write!(f, "IDLE"),
            TransferState::Checking => write!(f, "CHECKING"),
            TransferState::Aborting => write!(f, "ABORTING"),
            TransferState::Beginning => write!(f, "BEGINNING"),
            TransferState::Writing => write!(f, "WRITING"),
            TransferState::Verifying => write!(f, "VERIFYING"),
            TransferState::Applying => write!(f, "APPLYING"),
            TransferState::WaitingOnline => write!(f, "WAITING_ONLINE"),
            TransferState::Complete => write!(f, "COMPLETE"),
            TransferState::Failed(kind) => write!(f, "FAILED ({kind})"),
        }
    }
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Complete | TransferState::Failed(_))
    }

    /// Firmware has passed device-side verification in this state.
    pub fn is_post_verify(&self) -> bool {
        matches!(
            self,
            TransferState::Applying | TransferState::WaitingOnline | TransferState::Complete
        )
    }
}

/// What happened when the apply call was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Device answered before rebooting.
    Acknowledged,
    /// Connection dropped: expected while the device resets.
    ConnectionDropped,
}

/// State machine context holding all runtime state of one session.
#[derive(Debug, Default)]
pub struct TransferContext {
    pub state: TransferState,
    /// Device status check (and abort, if needed) already done.
    pub preflight_done: bool,
    pub chunks: ChunkState,
    pub progress: TransferProgress,
    /// Set when the first chunk goes out.
    pub write_started: Option<Instant>,
    pub apply_outcome: Option<ApplyOutcome>,
    /// Status polls issued while waiting for the device.
    pub poll_attempts: u32,
    /// Non-fatal conditions collected during the run.
    pub warnings: Vec<String>,
}

impl TransferContext {
    pub fn new(image_len: usize, chunk_size: usize) -> Self {
        Self {
            chunks: ChunkState::new(image_len, chunk_size),
            progress: TransferProgress::new(image_len as u64),
            ..Default::default()
        }
    }

    /// Transition to a new state.
    pub fn goto_state(&mut self, new_state: TransferState) {
        tracing::info!(from = %self.state, to = %new_state, "State transition");
        self.state = new_state;
    }

    pub fn should_continue(&self) -> bool {
        !self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TransferState::Idle.is_terminal());
        assert!(!TransferState::WaitingOnline.is_terminal());
        assert!(TransferState::Complete.is_terminal());
        assert!(TransferState::Failed(FailureKind::Network).is_terminal());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(TransferState::WaitingOnline.to_string(), "WAITING_ONLINE");
        assert_eq!(
            TransferState::Failed(FailureKind::Integrity).to_string(),
            "FAILED (integrity error)"
        );
    }

    #[test]
    fn test_context_init() {
        let ctx = TransferContext::new(2500, 1024);
        assert_eq!(ctx.state, TransferState::Idle);
        assert_eq!(ctx.chunks.total, 3);
        assert_eq!(ctx.progress.total_bytes, 2500);
        assert!(ctx.should_continue());
    }
}
