use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use image::ImageFormat;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{storage::ChunkStore, video::VideoOps};

use super::{
    buffer::{ChunkBuffer, PendingChunk},
    source::FrameSource,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const CAPTURE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub frame_interval: Duration,
    pub chunk_duration: Duration,
    pub display_id: u32,
}

/// A chunk file that was written successfully, handed to whoever indexes it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedChunk {
    pub file_path: PathBuf,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub display_id: u32,
    pub frame_count: usize,
}

pub(super) struct CaptureContext {
    pub config: CaptureConfig,
    pub source: Arc<dyn FrameSource>,
    pub video: Arc<dyn VideoOps>,
    pub store: ChunkStore,
    pub chunk_tx: mpsc::Sender<CompletedChunk>,
}

pub(super) async fn capture_loop(
    ctx: CaptureContext,
    cancel_token: CancellationToken,
    mut pause_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(ctx.config.frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut buffer = ChunkBuffer::new();
    if *pause_rx.borrow_and_update() {
        buffer.pause();
    }

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("capture loop shutting down");
                break;
            }
            changed = pause_rx.changed() => {
                if changed.is_err() {
                    log_warn!("capture pause channel closed, stopping loop");
                    break;
                }
                if *pause_rx.borrow_and_update() {
                    buffer.pause();
                    log_info!("capture paused with {} buffered frames", buffer.len());
                } else {
                    buffer.resume();
                    log_info!("capture resumed");
                }
            }
            _ = ticker.tick() => {
                if *pause_rx.borrow() {
                    continue;
                }

                if buffer.is_due(ctx.config.chunk_duration) {
                    flush(&ctx, &mut buffer).await;
                }

                let capture = ctx.source.capture(ctx.config.display_id);
                match tokio::time::timeout(Duration::from_secs(CAPTURE_TIMEOUT_SECS), capture).await {
                    Ok(Ok(frame)) => buffer.push(frame),
                    Ok(Err(err)) => log_warn!("frame capture failed on display {}: {err:?}", ctx.config.display_id),
                    Err(_) => log_warn!("frame capture timeout (> {}s)", CAPTURE_TIMEOUT_SECS),
                }
            }
        }
    }

    flush(&ctx, &mut buffer).await;
}

/// Encodes whatever is buffered into a chunk file. Failures abort this chunk
/// only; the loop keeps running.
async fn flush(ctx: &CaptureContext, buffer: &mut ChunkBuffer) {
    let Some(pending) = buffer.take() else {
        return;
    };

    match write_chunk(ctx, &pending).await {
        Ok(file_path) => {
            log_info!(
                "chunk written: {} ({} frames)",
                file_path.display(),
                pending.frames.len()
            );
            let completed = CompletedChunk {
                file_path,
                start_time: pending.start_time,
                end_time: pending.end_time,
                display_id: ctx.config.display_id,
                frame_count: pending.frames.len(),
            };
            if ctx.chunk_tx.send(completed).await.is_err() {
                log_error!("chunk receiver dropped; chunk will not be indexed");
            }
        }
        Err(err) => log_error!("failed to save chunk starting {}: {err:?}", pending.start_time),
    }
}

async fn write_chunk(ctx: &CaptureContext, pending: &PendingChunk) -> Result<PathBuf> {
    let output = ctx.store.chunk_path(pending.start_time)?;
    if output.exists() {
        bail!("refusing to overwrite existing chunk {}", output.display());
    }

    let staging = ctx.store.staging_dir("frames", pending.start_time)?;
    let result = encode(ctx, pending, &staging, &output).await;
    if let Err(err) = std::fs::remove_dir_all(&staging) {
        log_warn!("failed to remove staging dir {}: {err}", staging.display());
    }
    result.map(|_| output)
}

async fn encode(
    ctx: &CaptureContext,
    pending: &PendingChunk,
    staging: &std::path::Path,
    output: &std::path::Path,
) -> Result<()> {
    let mut frame_paths = Vec::with_capacity(pending.frames.len());
    for (index, frame) in pending.frames.iter().enumerate() {
        let path = staging.join(format!("frame_{index:04}.png"));
        frame
            .image
            .save_with_format(&path, ImageFormat::Png)
            .with_context(|| format!("failed to stage frame {index}"))?;
        frame_paths.push(path);
    }

    let fps = 1.0 / ctx.config.frame_interval.as_secs_f64();
    ctx.video.encode_frames(&frame_paths, fps, output).await
}
