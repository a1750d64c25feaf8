//! Stdio transport.
//!
//! Messages are newline-delimited JSON on stdin/stdout. Empty lines are
//! ignored; end-of-stream is graceful shutdown. Calls may execute
//! concurrently, but every response goes through one writer task so each
//! frame is written atomically and flushed immediately. Diagnostics go to
//! stderr only; nothing but protocol frames touches stdout.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::context::ServerContext;
use crate::protocol::ProtocolEngine;

pub async fn serve_stdio(ctx: Arc<ServerContext>) -> std::io::Result<()> {
    let engine = ProtocolEngine::new(ctx.clone());

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    // Single writer: one frame per send, newline-terminated, flushed.
    let (frame_tx, mut frame_rx) = mpsc::channel::<String>(64);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(frame) = frame_rx.recv().await {
            if let Err(e) = stdout.write_all(frame.as_bytes()).await {
                error!(error = %e, "stdout write failed");
                break;
            }
            if let Err(e) = stdout.write_all(b"\n").await {
                error!(error = %e, "stdout write failed");
                break;
            }
            if let Err(e) = stdout.flush().await {
                error!(error = %e, "stdout flush failed");
                break;
            }
        }
    });

    info!("listening on stdio");

    let mut in_flight = JoinSet::new();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        debug!(bytes = line.len(), "frame received");

        let engine = engine.clone();
        let frame_tx = frame_tx.clone();
        in_flight.spawn(async move {
            if let Some(response) = engine.process_message(&line).await {
                // A closed writer means the transport is gone; the call's
                // audit record is already flushed.
                let _ = frame_tx.send(response).await;
            }
        });
    }

    info!("stdin closed, draining in-flight calls");
    while in_flight.join_next().await.is_some() {}

    drop(frame_tx);
    let _ = writer.await;

    ctx.shutdown().await;
    info!("stdio transport stopped");
    Ok(())
}
