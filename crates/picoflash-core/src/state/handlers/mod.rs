//! State handlers - one step of the transfer per call.
//!
//! This module is split into submodules by phase:
//! - `preflight`: status check and stale-transfer abort
//! - `upload`: begin and chunk writes
//! - `finalize`: verify, apply and wait for the device

mod finalize;
mod preflight;
mod upload;

use std::time::Duration;

use crate::error::TransferError;
use crate::events::{LogLevel, TransferEvent, TransferObserver};
use crate::payload::FirmwareImage;
use crate::session::{CancelToken, SessionConfig};
use crate::state::machine::{TransferContext, TransferState};
use crate::transport::DeviceGateway;

use finalize::{handle_applying, handle_verifying, handle_waiting_online};
use preflight::{handle_aborting, handle_checking, handle_idle};
use upload::{handle_beginning, handle_writing};

/// Handler context containing all resources for one step.
pub struct HandlerContext<'a, G: DeviceGateway, O: TransferObserver> {
    pub gateway: &'a G,
    pub observer: &'a O,
    pub state: &'a mut TransferContext,
    pub image: &'a FirmwareImage,
    pub config: &'a SessionConfig,
    pub cancel: &'a CancelToken,
}

impl<'a, G: DeviceGateway, O: TransferObserver> HandlerContext<'a, G, O> {
    pub(crate) fn emit(&self, event: TransferEvent) {
        self.observer.on_event(&event);
    }

    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(TransferEvent::Log {
            level,
            message: message.into(),
        });
    }

    pub(crate) fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.state.warnings.push(message.clone());
        self.emit(TransferEvent::Warning { message });
    }

    /// Move to `to` and notify the observer.
    pub(crate) fn transition(&mut self, to: TransferState) {
        let from = self.state.state;
        self.state.goto_state(to);
        self.emit(TransferEvent::StateChanged { from, to });
    }

    /// Bail out before the next device call if the caller cancelled.
    pub(crate) fn checkpoint(&self) -> Result<(), TransferError> {
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn sleep(&self, duration: Duration) -> Result<(), TransferError> {
        self.cancel.sleep(duration)
    }
}

/// Run the handler for the current state.
///
/// Fatal conditions come back as `Err`; the caller records them as
/// `Failed`. Handlers move the machine forward through `transition`.
pub fn handle_state<G: DeviceGateway, O: TransferObserver>(
    ctx: &mut HandlerContext<'_, G, O>,
) -> Result<(), TransferError> {
    ctx.checkpoint()?;

    match ctx.state.state {
        TransferState::Idle => handle_idle(ctx),
        TransferState::Checking => handle_checking(ctx),
        TransferState::Aborting => handle_aborting(ctx),
        TransferState::Beginning => handle_beginning(ctx),
        TransferState::Writing => handle_writing(ctx),
        TransferState::Verifying => handle_verifying(ctx),
        TransferState::Applying => handle_applying(ctx),
        TransferState::WaitingOnline => handle_waiting_online(ctx),
        TransferState::Complete | TransferState::Failed(_) => Ok(()),
    }
}
