//! Finalize handlers (VERIFYING, APPLYING, WAITING_ONLINE).

use std::time::Duration;

use tracing::{debug, info, warn};

use super::HandlerContext;
use crate::error::{FailureKind, TransferError};
use crate::events::{LogLevel, TransferEvent, TransferObserver};
use crate::state::machine::{ApplyOutcome, TransferState};
use crate::transport::{DeviceGateway, GatewayError};

/// VERIFYING - device checks size and digest.
pub fn handle_verifying<G: DeviceGateway, O: TransferObserver>(
    ctx: &mut HandlerContext<'_, G, O>,
) -> Result<(), TransferError> {
    info!("Verifying firmware");

    match ctx.gateway.end() {
        Ok(()) => {}
        Err(GatewayError::Rejected { reason }) => {
            return Err(TransferError::Integrity { reason });
        }
        Err(e) => return Err(TransferError::from_gateway("end", e)),
    }

    ctx.log(LogLevel::Info, "Verification successful");
    if ctx.config.apply {
        ctx.transition(TransferState::Applying);
    } else {
        ctx.log(
            LogLevel::Info,
            "Firmware ready to apply; run again with apply enabled to install",
        );
        ctx.transition(TransferState::Complete);
        ctx.emit(TransferEvent::Complete);
    }
    Ok(())
}

/// APPLYING - install and reboot.
///
/// A dropped connection or cut-off reply here is the device resetting, not a
/// failure. Only a well-formed rejection ends the session.
pub fn handle_applying<G: DeviceGateway, O: TransferObserver>(
    ctx: &mut HandlerContext<'_, G, O>,
) -> Result<(), TransferError> {
    info!("Applying update (device will reboot)");

    let outcome = match ctx.gateway.apply() {
        Ok(()) => ApplyOutcome::Acknowledged,
        Err(e) if e.is_reply_lost() => {
            debug!(error = %e, "Reply lost during apply");
            ApplyOutcome::ConnectionDropped
        }
        Err(e) => return Err(TransferError::from_gateway("apply", e)),
    };

    ctx.state.apply_outcome = Some(outcome);
    ctx.log(
        LogLevel::Info,
        match outcome {
            ApplyOutcome::Acknowledged => "Update applied, device is rebooting",
            ApplyOutcome::ConnectionDropped => "Device is rebooting",
        },
    );
    ctx.transition(TransferState::WaitingOnline);
    Ok(())
}

/// WAITING_ONLINE - one status poll per call, bounded by `poll_attempts`.
///
/// Running out of attempts ends in `Failed(DeviceUnresponsive)` but is only
/// a warning: the image was verified before the reboot.
pub fn handle_waiting_online<G: DeviceGateway, O: TransferObserver>(
    ctx: &mut HandlerContext<'_, G, O>,
) -> Result<(), TransferError> {
    if ctx.state.poll_attempts >= ctx.config.poll_attempts {
        let attempts = ctx.state.poll_attempts;
        warn!(attempts, "Device did not respond after reboot");
        ctx.warn(format!(
            "Device did not respond after reboot ({attempts} status polls). Check manually."
        ));
        ctx.transition(TransferState::Failed(FailureKind::DeviceUnresponsive));
        return Ok(());
    }

    ctx.sleep(Duration::from_millis(ctx.config.poll_interval_ms))?;
    ctx.checkpoint()?;
    ctx.state.poll_attempts += 1;

    match ctx.gateway.probe() {
        Ok(status) => {
            info!(
                attempts = ctx.state.poll_attempts,
                state = %status.state,
                "Device is back online"
            );
            ctx.transition(TransferState::Complete);
            ctx.emit(TransferEvent::Complete);
        }
        Err(e) => {
            debug!(attempt = ctx.state.poll_attempts, error = %e, "Device not back yet");
        }
    }
    Ok(())
}
