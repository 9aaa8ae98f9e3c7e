//! Upload handlers (BEGINNING, WRITING).

use std::time::Instant;

use tracing::{debug, info};

use super::HandlerContext;
use crate::error::TransferError;
use crate::events::{LogLevel, TransferEvent, TransferObserver};
use crate::state::machine::TransferState;
use crate::transport::DeviceGateway;

/// BEGINNING - announce size and SHA-256.
pub fn handle_beginning<G: DeviceGateway, O: TransferObserver>(
    ctx: &mut HandlerContext<'_, G, O>,
) -> Result<(), TransferError> {
    let size = ctx.image.len();
    let digest = ctx.image.digest_hex();
    info!(size, sha256 = %digest, "Starting OTA upload");

    ctx.gateway
        .begin(size, &digest)
        .map_err(|e| TransferError::from_gateway("begin", e))?;

    ctx.log(LogLevel::Info, "OTA started successfully");
    ctx.transition(TransferState::Writing);
    Ok(())
}

/// WRITING - send one chunk and fold its acknowledgment into progress.
///
/// Chunks go out exactly once and in order; any failure ends the session.
pub fn handle_writing<G: DeviceGateway, O: TransferObserver>(
    ctx: &mut HandlerContext<'_, G, O>,
) -> Result<(), TransferError> {
    let image = ctx.image;
    let Some(chunk) = ctx.state.chunks.peek(image.data()) else {
        ctx.transition(TransferState::Verifying);
        return Ok(());
    };

    let started = *ctx.state.write_started.get_or_insert_with(Instant::now);
    let offset = ctx.state.chunks.offset;

    let ack = ctx
        .gateway
        .write(chunk)
        .map_err(|e| TransferError::from_gateway("write", e))?;

    ctx.state.chunks.advance(chunk.len());
    ctx.state
        .progress
        .record_ack(chunk.len(), ack.received, ack.progress, started.elapsed());
    debug!(
        offset,
        len = chunk.len(),
        chunk = ctx.state.chunks.current,
        total = ctx.state.chunks.total,
        received = ack.received,
        "Chunk acknowledged"
    );
    ctx.emit(TransferEvent::Progress(ctx.state.progress));

    if ctx.state.chunks.is_done() {
        let p = ctx.state.progress;
        info!(
            bytes = p.bytes_sent,
            secs = %format!("{:.1}", p.elapsed.as_secs_f64()),
            speed = %format!("{:.1} KB/s", p.throughput / 1024.0),
            "Upload complete"
        );
        ctx.transition(TransferState::Verifying);
    }
    Ok(())
}
