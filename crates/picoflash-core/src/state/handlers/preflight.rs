//! Preflight handlers (IDLE, CHECKING, ABORTING).

use std::time::Duration;

use tracing::{info, warn};

use super::HandlerContext;
use crate::error::TransferError;
use crate::events::{LogLevel, TransferObserver};
use crate::state::machine::TransferState;
use crate::transport::DeviceGateway;

/// IDLE - check the device once, then begin.
pub fn handle_idle<G: DeviceGateway, O: TransferObserver>(
    ctx: &mut HandlerContext<'_, G, O>,
) -> Result<(), TransferError> {
    if ctx.state.preflight_done {
        ctx.transition(TransferState::Beginning);
    } else {
        ctx.transition(TransferState::Checking);
    }
    Ok(())
}

/// CHECKING - a device busy with another transfer is aborted first.
pub fn handle_checking<G: DeviceGateway, O: TransferObserver>(
    ctx: &mut HandlerContext<'_, G, O>,
) -> Result<(), TransferError> {
    ctx.state.preflight_done = true;

    match ctx.gateway.status() {
        Ok(status) => {
            info!(state = %status.state, "Device status");
            ctx.log(LogLevel::Info, format!("Current state: {}", status.state));
            if status.is_ready_for_begin() {
                ctx.transition(TransferState::Idle);
            } else {
                ctx.log(
                    LogLevel::Warn,
                    "Device is busy with another OTA, aborting first",
                );
                ctx.transition(TransferState::Aborting);
            }
        }
        Err(e) => {
            // Not fatal: begin reports the real problem if the device is unreachable
            warn!(error = %e, "Could not get device status");
            ctx.warn(format!("Could not get status: {e}"));
            ctx.transition(TransferState::Idle);
        }
    }
    Ok(())
}

/// ABORTING - best-effort abort, then let the device settle.
pub fn handle_aborting<G: DeviceGateway, O: TransferObserver>(
    ctx: &mut HandlerContext<'_, G, O>,
) -> Result<(), TransferError> {
    if let Err(e) = ctx.gateway.abort() {
        warn!(error = %e, "Abort request failed");
    }
    ctx.sleep(Duration::from_millis(ctx.config.abort_settle_ms))?;
    ctx.transition(TransferState::Idle);
    Ok(())
}
