//! SSH source: remote `tail -F` for live tailing, a remote `ls`/`grep`
//! pipeline for rotated listings and historical range reads. Pushing
//! the timestamp pre-filter and the caller's grep to the remote side
//! keeps the bulk of the log off the network.

use super::{LogSource, RawLine, RotatedFile, SourceStatus, StatusTracker, Workers};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, Timelike, Utc};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const TAIL_BACKLOG_LINES: &str = "1000";

const COMPRESSED_EXTENSIONS: [&str; 8] = ["zst", "zstd", "gz", "gzip", "bz2", "bzip2", "xz", "lz4"];

pub struct SshSource {
    host: String,
    remote_path: String,
    tracker: Arc<StatusTracker>,
    workers: Workers,
}

impl SshSource {
    pub fn new(host: impl Into<String>, remote_path: impl Into<String>) -> Self {
        SshSource {
            host: host.into(),
            remote_path: remote_path.into(),
            tracker: Arc::new(StatusTracker::default()),
            workers: Workers::default(),
        }
    }
}

#[async_trait]
impl LogSource for SshSource {
    fn name(&self) -> String {
        format!("ssh:{}:{}", self.host, self.remote_path)
    }

    async fn start(
        &self,
        ctx: CancellationToken,
        line_tx: mpsc::Sender<RawLine>,
        err_tx: mpsc::Sender<Error>,
    ) -> Result<()> {
        let remote_cmd = format!("tail -F -n {TAIL_BACKLOG_LINES} {}", shell_quote(&self.remote_path));
        let mut child = Command::new("ssh")
            .arg(&self.host)
            .arg(remote_cmd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(Error::Io)?;

        let stdout = child.stdout.take().ok_or_else(|| Error::transient("ssh_source", self.name(), "no stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| Error::transient("ssh_source", self.name(), "no stderr"))?;
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
                            // tail narrates rotation on stderr; only
                            // surface lines that aren't that chatter
                            if !is_tail_rotation_chatter(&line) {
                                tracker.set_error(line.clone());
                                let _ = err_tx.send(Error::transient("ssh_source", name.clone(), line)).await;
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
        let dir = parent_dir(&self.remote_path);
        let basename = base_name(&self.remote_path);
        let remote_cmd = format!("ls -l --time-style=full-iso {}", shell_quote(&dir));

        let output = Command::new("ssh")
            .arg(&self.host)
            .arg(remote_cmd)
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(Error::Io)?;

        let text = String::from_utf8_lossy(&output.stdout);
        let mut files = Vec::new();
        for line in text.lines() {
            if let Some(file) = parse_ls_line(line, &dir, basename) {
                files.push(file);
            }
        }
        files.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(files)
    }

    async fn read_range(
        &self,
        ctx: CancellationToken,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        line_tx: mpsc::Sender<RawLine>,
        grep: Option<String>,
        grep_before: usize,
        grep_after: usize,
    ) -> Result<()> {
        let remote_cmd =
            build_remote_grep_command(&self.remote_path, start, end, grep.as_deref(), grep_before, grep_after);

        let mut child = Command::new("ssh")
            .arg(&self.host)
            .arg(remote_cmd)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(Error::Io)?;

        let stdout = child.stdout.take().ok_or_else(|| Error::transient("ssh_source", self.name(), "no stdout"))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut cancelled = false;

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    cancelled = true;
                    let _ = child.kill().await;
                    break;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        self.tracker.record_line(line.len());
                        if line_tx.send(RawLine::new(line)).await.is_err() {
                            cancelled = true;
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

        // the post-kill wait error is the cancellation, not a failure
        // of the remote pipeline
        let wait = child.wait().await;
        if cancelled {
            return Err(Error::Cancelled);
        }
        wait.map_err(Error::Io)?;
        Ok(())
    }
}

/// Single-quotes `s` for POSIX shell interpolation: `'` becomes `'\''`.
/// Applied to the remote path, the timestamp pattern, and any
/// caller-supplied grep text before they reach the remote shell.
pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn is_tail_rotation_chatter(line: &str) -> bool {
    line.contains("file truncated")
        || line.contains("has become inaccessible")
        || line.contains("following end of new file")
}

fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
        None => ".".to_string(),
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_compressed_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| COMPRESSED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// `ls -l --time-style=full-iso` rows look like:
/// `-rw-r--r-- 1 user group 1234 2024-01-02 03:04:05.000000000 +0000 app.log`
/// Directories (leading `d`) are skipped.
fn parse_ls_line(line: &str, dir: &str, basename: &str) -> Option<RotatedFile> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 9 || !parts[0].starts_with('-') {
        return None;
    }
    let size: u64 = parts[4].parse().ok()?;
    let date = parts[5];
    let time = parts[6];
    let tz = parts[7];
    let name = parts[8..].join(" ");
    if !name.starts_with(basename) {
        return None;
    }
    let stamp = format!("{date} {time} {tz}");
    let modified = DateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S%.f %z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))?;
    Some(RotatedFile {
        path: format!("{dir}/{name}"),
        compressed: is_compressed_name(&name),
        name,
        size,
        modified,
        start_time: None,
        end_time: None,
    })
}

/// Builds the remote pipeline: a cheap timestamp pre-filter, then the
/// caller's grep with its context margins.
fn build_remote_grep_command(
    path: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    grep: Option<&str>,
    before: usize,
    after: usize,
) -> String {
    let ts_pattern =
        build_timestamp_grep_pattern(start.with_timezone(&Local).naive_local(), end.with_timezone(&Local).naive_local());
    let mut cmd = format!("grep -E {} {}", shell_quote(&ts_pattern), shell_quote(path));

    if let Some(g) = grep.filter(|g| !g.is_empty()) {
        cmd.push_str(" | grep -E");
        if before > 0 {
            cmd.push_str(&format!(" -B {before}"));
        }
        if after > 0 {
            cmd.push_str(&format!(" -A {after}"));
        }
        cmd.push(' ');
        cmd.push_str(&shell_quote(g));
    }
    cmd
}

/// Timestamp prefixes covering `[start, end]` in local wall-clock time,
/// one per full day (`YYYY-MM-DDT`) or bounded hour (`YYYY-MM-DDTHH:`).
/// A day counts as full when it is neither the first nor the last, or
/// when its edge is aligned: the first day starting at 00:00, the last
/// day ending in hour 23.
pub(crate) fn build_timestamp_grep_pattern(start: NaiveDateTime, end: NaiveDateTime) -> String {
    let end = if end < start { start } else { end };
    let mut prefixes = Vec::new();
    let mut day = start.date();
    let last_day = end.date();

    while day <= last_day {
        let is_first = day == start.date();
        let is_last = day == last_day;
        let start_aligned = !is_first || (start.hour() == 0 && start.minute() == 0);
        let end_aligned = !is_last || end.hour() == 23;

        if start_aligned && end_aligned {
            prefixes.push(format!("{}T", day.format("%Y-%m-%d")));
        } else {
            let from_hour = if is_first { start.hour() } else { 0 };
            let to_hour = if is_last { end.hour() } else { 23 };
            for hour in from_hour..=to_hour {
                prefixes.push(format!("{}T{hour:02}:", day.format("%Y-%m-%d")));
            }
        }

        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    match prefixes.len() {
        0 => format!("{}T", start.date().format("%Y-%m-%d")),
        1 => prefixes.remove(0),
        _ => format!("({})", prefixes.join("|")),
    }
}
