//! Command source: streams the stdout of an arbitrary argv, draining
//! stderr silently. Has no historical-read concept.

use super::{LogSource, RawLine, RotatedFile, SourceStatus, StatusTracker, Workers};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct CommandSource {
    argv: Vec<String>,
    tracker: Arc<StatusTracker>,
    workers: Workers,
}

impl CommandSource {
    pub fn new(argv: Vec<String>) -> Self {
        CommandSource { argv, tracker: Arc::new(StatusTracker::default()), workers: Workers::default() }
    }
}

#[async_trait]
impl LogSource for CommandSource {
    fn name(&self) -> String {
        format!("command:{}", self.argv.join(" "))
    }

    async fn start(
        &self,
        ctx: CancellationToken,
        line_tx: mpsc::Sender<RawLine>,
        err_tx: mpsc::Sender<Error>,
    ) -> Result<()> {
        let (program, args) = self.argv.split_first().ok_or_else(|| Error::validation("command_source", "empty argv"))?;

        let mut child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(Error::Io)?;

        let stdout = child.stdout.take().ok_or_else(|| Error::transient("command_source", self.name(), "no stdout"))?;
        self.tracker.set_connected(true);
        self.tracker.clear_error();

        let name = self.name();
        let tracker = Arc::clone(&self.tracker);
        let internal = CancellationToken::new();
        let pump_cancel = internal.clone();
        let handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut cancelled = false;
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => { cancelled = true; break; }
                    _ = pump_cancel.cancelled() => { cancelled = true; break; }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            tracker.record_line(line.len());
                            if line_tx.send(RawLine::new(line)).await.is_err() {
                                cancelled = true;
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracker.set_error(e.to_string());
                            let _ = err_tx.send(Error::Io(e)).await;
                            break;
                        }
                    },
                }
            }
            let _ = child.kill().await;
            // exit status only matters when the command ended on its own
            match child.wait().await {
                Ok(status) if !cancelled && !status.success() => {
                    let reason = format!("command exited with {status}");
                    tracker.set_error(reason.clone());
                    let _ = err_tx.send(Error::transient("command_source", name, reason)).await;
                }
                Ok(_) => {}
                Err(e) if !cancelled => {
                    tracker.set_error(e.to_string());
                    let _ = err_tx.send(Error::Io(e)).await;
                }
                Err(_) => {}
            }
            tracker.set_connected(false);
        });
        self.workers.store(internal, handle).await;
        Ok(())
    }

    async fn stop(&self) {
        self.workers.stop().await;
        self.tracker.set_connected(false);
    }

    fn status(&self) -> SourceStatus {
        self.tracker.snapshot()
    }

    async fn list_rotated_files(&self, _ctx: &CancellationToken) -> Result<Vec<RotatedFile>> {
        Ok(Vec::new())
    }

    async fn read_range(
        &self,
        _ctx: CancellationToken,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _line_tx: mpsc::Sender<RawLine>,
        _grep: Option<String>,
        _grep_before: usize,
        _grep_after: usize,
    ) -> Result<()> {
        Err(Error::not_supported("command_source", "read_range"))
    }
}
