//! Kubernetes source: `kubectl logs -f --timestamps` for live tailing.
//! `kubectl` has no `--until`, so historical range reads use
//! `--since-time` and stop locally once a line's timestamp prefix
//! passes the window end.

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

/// `kubectl logs --timestamps` prefixes each line with an RFC3339Nano
/// timestamp followed by a space: `2024-01-02T03:04:05.123456789Z `.
const TIMESTAMP_PREFIX_LEN: usize = 30;

pub struct KubernetesSource {
    pod: String,
    namespace: Option<String>,
    container: Option<String>,
    since: Option<String>,
    follow: bool,
    tracker: Arc<StatusTracker>,
    workers: Workers,
}

impl KubernetesSource {
    pub fn new(
        pod: impl Into<String>,
        namespace: Option<String>,
        container: Option<String>,
        since: Option<String>,
        follow: Option<bool>,
    ) -> Self {
        KubernetesSource {
            pod: pod.into(),
            namespace,
            container,
            since,
            follow: follow.unwrap_or(true),
            tracker: Arc::new(StatusTracker::default()),
            workers: Workers::default(),
        }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec!["logs".to_string()];
        if let Some(ns) = &self.namespace {
            args.push("-n".to_string());
            args.push(ns.clone());
        }
        args.push("--timestamps".to_string());
        args.push(self.pod.clone());
        if let Some(c) = &self.container {
            args.push("-c".to_string());
            args.push(c.clone());
        }
        args
    }
}

#[async_trait]
impl LogSource for KubernetesSource {
    fn name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("kubernetes:{ns}/{}", self.pod),
            None => format!("kubernetes:{}", self.pod),
        }
    }

    async fn start(
        &self,
        ctx: CancellationToken,
        line_tx: mpsc::Sender<RawLine>,
        err_tx: mpsc::Sender<Error>,
    ) -> Result<()> {
        let mut args = self.base_args();
        if self.follow {
            args.push("-f".to_string());
        }
        if let Some(since) = &self.since {
            args.push("--since".to_string());
            args.push(since.clone());
        }

        let mut child = Command::new("kubectl")
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(Error::Io)?;

        let stdout = child.stdout.take().ok_or_else(|| Error::transient("kubernetes_source", self.name(), "no stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| Error::transient("kubernetes_source", self.name(), "no stderr"))?;
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
                            if line.contains("Error") || line.contains("error") {
                                tracker.set_error(line.clone());
                                let _ = err_tx.send(Error::transient("kubernetes_source", name.clone(), line)).await;
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
        let mut args = self.base_args();
        args.push("--since-time".to_string());
        args.push(start.to_rfc3339());

        let mut child = Command::new("kubectl")
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(Error::Io)?;

        let stdout = child.stdout.take().ok_or_else(|| Error::transient("kubernetes_source", self.name(), "no stdout"))?;
        let mut lines = BufReader::new(stdout).lines();

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    let _ = child.kill().await;
                    break;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        // lines arrive in time order, so the first one
                        // past the window ends the read
                        if let Some(ts) = parse_prefix_timestamp(&line) {
                            if ts > end {
                                let _ = child.kill().await;
                                break;
                            }
                        }
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

fn parse_prefix_timestamp(line: &str) -> Option<DateTime<Utc>> {
    if line.len() < TIMESTAMP_PREFIX_LEN {
        return None;
    }
    let prefix = line[..TIMESTAMP_PREFIX_LEN].trim_end();
    DateTime::parse_from_rfc3339(prefix).ok().map(|dt| dt.with_timezone(&Utc))
}
