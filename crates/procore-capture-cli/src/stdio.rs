//! Stdio command server: JSON-lines [`Command`]s on stdin, replies and
//! relay events on stdout.
//!
//! Each command runs on its own task, so a `STOP_SCAN` can land while a
//! `TRIGGER_SCAN` is still running. Every relay event is forwarded as it is
//! emitted, in the same tagged shape it has on the bridge.

use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;

use procore_capture::agent::{CaptureAgent, CommandReply};
use procore_capture::relay::{Command, RelayBridge, RelayEvent};

/// Frames the server writes besides relay events.
#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
enum Frame {
    Reply {
        command: &'static str,
        result: CommandReply,
    },
    Error {
        message: String,
    },
}

fn action_name(command: &Command) -> &'static str {
    match command {
        Command::TriggerScan { .. } => "TRIGGER_SCAN",
        Command::StopScan {} => "STOP_SCAN",
        Command::GetPageInfo {} => "GET_PAGE_INFO",
    }
}

fn send_frame<T: Serialize>(tx: &mpsc::UnboundedSender<String>, frame: &T) {
    match serde_json::to_string(frame) {
        Ok(line) => {
            if tx.send(line).is_err() {
                tracing::debug!("Output closed, dropping frame");
            }
        }
        Err(e) => tracing::warn!("Failed to encode frame: {e}"),
    }
}

pub struct StdioServer {
    agent: Arc<CaptureAgent>,
    bridge: RelayBridge,
}

impl StdioServer {
    pub fn new(agent: Arc<CaptureAgent>, bridge: RelayBridge) -> Self {
        Self { agent, bridge }
    }

    /// Serve stdin/stdout until EOF.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!("Stdio server started");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve commands from `reader`, writing frames to `writer`.
    ///
    /// Returns once input ends and every running command has replied.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let writer_task = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Ok::<_, std::io::Error>(())
        });

        let (stop_tx, stop_rx) = oneshot::channel();
        let forwarder = tokio::spawn(forward_events(self.bridge.subscribe(), tx.clone(), stop_rx));

        let mut running = JoinSet::new();
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<Command>(trimmed) {
                Ok(command) => {
                    let agent = Arc::clone(&self.agent);
                    let tx = tx.clone();
                    running.spawn(async move {
                        let name = action_name(&command);
                        let result = agent.handle(command).await;
                        send_frame(&tx, &Frame::Reply {
                            command: name,
                            result,
                        });
                    });
                }
                Err(e) => {
                    tracing::warn!("Parse error: {e}");
                    send_frame(&tx, &Frame::Error {
                        message: format!("invalid command: {e}"),
                    });
                }
            }
        }

        tracing::info!("EOF on stdin, waiting for {} running commands", running.len());
        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("Command task failed: {e}");
            }
        }

        let _ = stop_tx.send(());
        forwarder.await?;
        drop(tx);
        writer_task.await??;
        Ok(())
    }
}

async fn forward_events(
    mut events: broadcast::Receiver<RelayEvent>,
    tx: mpsc::UnboundedSender<String>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            received = events.recv() => match received {
                Ok(event) => send_frame(&tx, &event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Output lagging, skipped {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = &mut stop => {
                while let Ok(event) = events.try_recv() {
                    send_frame(&tx, &event);
                }
                break;
            }
        }
    }
}
