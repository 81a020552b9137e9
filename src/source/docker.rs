//! Docker source: `docker logs --follow --timestamps` for live tailing,
//! `docker logs --since/--until` for historical range reads.

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

pub struct DockerSource {
    container: String,
    since: Option<String>,
    follow: bool,
    tracker: Arc<StatusTracker>,
    workers: Workers,
}

impl DockerSource {
    pub fn new(container: impl Into<String>, since: Option<String>, follow: Option<bool>) -> Self {
        DockerSource {
            container: container.into(),
            since,
            follow: follow.unwrap_or(true),
            tracker: Arc::new(StatusTracker::default()),
            workers: Workers::default(),
        }
    }
}

#[async_trait]
impl LogSource for DockerSource {
    fn name(&self) -> String {
        format!("docker:{}", self.container)
    }

    async fn start(
        &self,
        ctx: CancellationToken,
        line_tx: mpsc::Sender<RawLine>,
        err_tx: mpsc::Sender<Error>,
    ) -> Result<()> {
        let mut cmd = Command::new("docker");
        cmd.arg("logs");
        if self.follow {
            cmd.arg("--follow");
        }
        if let Some(since) = &self.since {
            cmd.arg("--since").arg(since);
        }
        cmd.arg("--timestamps").arg(&self.container);

        let mut child = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(Error::Io)?;

        let stdout = child.stdout.take().ok_or_else(|| Error::transient("docker_source", self.name(), "no stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| Error::transient("docker_source", self.name(), "no stderr"))?;
        self.tracker.set_connected(true);
        self.tracker.clear_error();

        let name = self.name();
        let tracker = Arc::clone(&self.tracker);
        let internal = CancellationToken::new();
        let pump_cancel = internal.clone();
        let handle = tokio::spawn(async move {
            let mut out_lines = BufReader::new(stdout).lines();
            let mut err_lines = BufReader::new(stderr).lines();
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = pump_cancel.cancelled() => break,
                    line = out_lines.next_line() => match line {
                        Ok(Some(line)) => {
                            tracker.record_line(line.len());
                            if line_tx.send(RawLine::new(line)).await.is_err() {
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
                    line = err_lines.next_line() => {
                        if let Ok(Some(line)) = line {
                            // containers multiplex their own stderr here;
                            // only the CLI's `Error...` lines are failures
                            if line.starts_with("Error") {
                                tracker.set_error(line.clone());
                                let _ = err_tx.send(Error::transient("docker_source", name.clone(), line)).await;
                            }
                        }
                    }
                }
            }
            let _ = child.kill().await;
            let _ = child.wait().await;
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
        ctx: CancellationToken,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        line_tx: mpsc::Sender<RawLine>,
        grep: Option<String>,
        _grep_before: usize,
        _grep_after: usize,
    ) -> Result<()> {
        let matcher = grep.filter(|g| !g.is_empty()).map(|g| super::compile_grep(&g));
        let mut child = Command::new("docker")
            .arg("logs")
            .arg("--timestamps")
            .arg("--since")
            .arg(start.to_rfc3339())
            .arg("--until")
            .arg(end.to_rfc3339())
            .arg(&self.container)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(Error::Io)?;

        let stdout = child.stdout.take().ok_or_else(|| Error::transient("docker_source", self.name(), "no stdout"))?;
        let mut lines = BufReader::new(stdout).lines();

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    let _ = child.kill().await;
                    break;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if matcher.as_ref().map(|re| !re.is_match(&line)).unwrap_or(false) {
                            continue;
                        }
                        self.tracker.record_line(line.len());
                        if line_tx.send(RawLine::new(line)).await.is_err() {
                            let _ = child.kill().await;
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = child.kill().await;
                        return Err(Error::Io(e));
                    }
                },
            }
        }
        let _ = child.wait().await;
        Ok(())
    }
}
