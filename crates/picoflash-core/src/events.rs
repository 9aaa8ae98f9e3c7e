//! Event system for UI decoupling.
//!
//! Allows the CLI (or any other front end) to follow a transfer without
//! tight coupling to the session logic.

use std::time::Duration;

use crate::state::TransferState;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Transfer progress, recomputed after every write acknowledgment.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransferProgress {
    /// Bytes handed to the device and acknowledged.
    pub bytes_sent: u64,
    pub total_bytes: u64,
    /// Byte counter reported by the device.
    pub device_received: u64,
    /// Device-reported percentage.
    pub percent: u32,
    pub elapsed: Duration,
    /// Bytes per second since the first chunk.
    pub throughput: f64,
}

impl TransferProgress {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            ..Default::default()
        }
    }

    /// Fold in an acknowledgment for `chunk_len` more bytes.
    pub fn record_ack(
        &mut self,
        chunk_len: usize,
        device_received: u64,
        percent: u32,
        elapsed: Duration,
    ) {
        self.bytes_sent += chunk_len as u64;
        self.device_received = device_received;
        self.percent = percent.min(100);
        self.elapsed = elapsed;
        let secs = elapsed.as_secs_f64();
        self.throughput = if secs > 0.0 {
            self.device_received as f64 / secs
        } else {
            0.0
        };
    }

    /// Host-side percentage, independent of what the device reports.
    pub fn local_percent(&self) -> u32 {
        if self.total_bytes == 0 {
            100
        } else {
            ((self.bytes_sent * 100) / self.total_bytes) as u32
        }
    }
}

/// Events emitted by the transfer session.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// State machine moved.
    StateChanged { from: TransferState, to: TransferState },
    /// Chunk acknowledged.
    Progress(TransferProgress),
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Non-fatal condition the user should see.
    Warning { message: String },
    /// Fatal error; the session is now `Failed`.
    Error { message: String },
    /// Session reached `Complete`.
    Complete,
}

/// Observer trait for receiving transfer events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait TransferObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &TransferEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl TransferObserver for NullObserver {
    fn on_event(&self, _event: &TransferEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl TransferObserver for TracingObserver {
    fn on_event(&self, event: &TransferEvent) {
        match event {
            TransferEvent::StateChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "State changed");
            }
            TransferEvent::Progress(p) => {
                tracing::debug!(
                    sent = p.bytes_sent,
                    total = p.total_bytes,
                    progress = %format!("{}%", p.percent),
                    speed = %format!("{:.1} KB/s", p.throughput / 1024.0),
                    "Progress"
                );
            }
            TransferEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            TransferEvent::Warning { message } => {
                tracing::warn!("{}", message);
            }
            TransferEvent::Error { message } => {
                tracing::error!("{}", message);
            }
            TransferEvent::Complete => {
                tracing::info!("Transfer complete");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_recompute() {
        let mut p = TransferProgress::new(4096);
        p.record_ack(1024, 1024, 25, Duration::from_secs(2));
        assert_eq!(p.bytes_sent, 1024);
        assert_eq!(p.local_percent(), 25);
        assert!((p.throughput - 512.0).abs() < f64::EPSILON);

        p.record_ack(1024, 2048, 50, Duration::ZERO);
        assert_eq!(p.throughput, 0.0);
        assert_eq!(p.percent, 50);
    }
}
