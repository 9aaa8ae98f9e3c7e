//! Transfer session - high-level orchestrator for one OTA upload.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::error::{FailureKind, InputError, TransferError};
use crate::events::{TracingObserver, TransferEvent, TransferObserver, TransferProgress};
use crate::payload::{DEFAULT_CHUNK_SIZE, FirmwareImage};
use crate::state::handlers::{HandlerContext, handle_state};
use crate::state::machine::{ApplyOutcome, TransferContext, TransferState};
use crate::transport::{CallTimeouts, DeviceGateway};

/// Longest uninterrupted sleep before the cancel flag is checked again.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Configuration for a transfer session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Device address, with or without `http://`.
    pub host: String,
    /// Bytes per `write` call.
    pub chunk_size: usize,
    /// Install and reboot after a successful verify.
    pub apply: bool,
    /// Pause after aborting a stale transfer.
    pub abort_settle_ms: u64,
    /// Pause between status polls while the device reboots.
    pub poll_interval_ms: u64,
    pub poll_attempts: u32,
    pub timeouts: CallTimeouts,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "192.168.4.1".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            apply: false,
            abort_settle_ms: 1_000,
            poll_interval_ms: 2_000,
            poll_attempts: 30,
            timeouts: CallTimeouts::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Shared cancellation flag.
///
/// Clones observe the same flag, so a token handed to a signal handler or
/// another thread stops the session at its next device call or sleep.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early with `Cancelled` if the flag is set.
    pub fn sleep(&self, duration: Duration) -> Result<(), TransferError> {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

/// Outcome of a session that did not fail fatally.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub final_state: TransferState,
    /// Device accepted the digest at `end`.
    pub verified: bool,
    /// `apply` was issued.
    pub applied: bool,
    pub apply_outcome: Option<ApplyOutcome>,
    pub progress: TransferProgress,
    /// Non-fatal conditions, in the order they happened.
    pub warnings: Vec<String>,
    /// Status polls issued after apply.
    pub poll_attempts: u32,
}

impl TransferReport {
    /// The device came back after apply, or apply was not requested.
    pub fn is_online(&self) -> bool {
        self.final_state != TransferState::Failed(FailureKind::DeviceUnresponsive)
    }

    /// Treat a device that never came back as an error.
    pub fn ensure_online(&self) -> Result<(), TransferError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(TransferError::DeviceUnresponsive {
                attempts: self.poll_attempts,
            })
        }
    }
}

/// Transfer session - drives one upload through the state machine.
pub struct TransferSession<G: DeviceGateway, O: TransferObserver> {
    gateway: G,
    config: SessionConfig,
    observer: Arc<O>,
    cancel: CancelToken,
    context: TransferContext,
}

impl<G: DeviceGateway> TransferSession<G, TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(gateway: G, config: SessionConfig) -> Self {
        Self::with_observer(gateway, config, Arc::new(TracingObserver))
    }
}

impl<G: DeviceGateway, O: TransferObserver> TransferSession<G, O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(gateway: G, config: SessionConfig, observer: Arc<O>) -> Self {
        Self {
            gateway,
            config,
            observer,
            cancel: CancelToken::new(),
            context: TransferContext::default(),
        }
    }

    /// Token that cancels this session from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> TransferState {
        self.context.state
    }

    /// Progress as of the last acknowledged chunk.
    pub fn progress(&self) -> TransferProgress {
        self.context.progress
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Run the complete transfer for `image`.
    ///
    /// Returns `Err` for fatal failures, with the state left at `Failed`.
    /// A device that stays offline after apply is not fatal: the report
    /// carries `Failed(DeviceUnresponsive)` and a warning.
    #[instrument(skip_all, fields(size = image.len(), host = %self.config.host))]
    pub fn run(&mut self, image: &FirmwareImage) -> Result<TransferReport, TransferError> {
        if self.config.chunk_size == 0 {
            return Err(InputError::InvalidChunkSize.into());
        }

        self.context = TransferContext::new(image.len(), self.config.chunk_size);
        info!(
            chunks = self.context.chunks.total,
            chunk_size = self.config.chunk_size,
            apply = self.config.apply,
            "Starting transfer session"
        );

        while self.context.should_continue() {
            let mut ctx = HandlerContext {
                gateway: &self.gateway,
                observer: self.observer.as_ref(),
                state: &mut self.context,
                image,
                config: &self.config,
                cancel: &self.cancel,
            };

            if let Err(e) = handle_state(&mut ctx) {
                let from = self.context.state;
                let to = TransferState::Failed(e.kind());
                self.context.goto_state(to);
                self.observer.on_event(&TransferEvent::StateChanged { from, to });
                error!(state = %from, error = %e, "Transfer failed");
                self.observer.on_event(&TransferEvent::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
        }

        Ok(self.report())
    }

    fn report(&self) -> TransferReport {
        let final_state = self.context.state;
        let verified = final_state.is_post_verify()
            || final_state == TransferState::Failed(FailureKind::DeviceUnresponsive);
        TransferReport {
            final_state,
            verified,
            applied: self.context.apply_outcome.is_some(),
            apply_outcome: self.context.apply_outcome,
            progress: self.context.progress,
            warnings: self.context.warnings.clone(),
            poll_attempts: self.context.poll_attempts,
        }
    }
}
