//! File source: tails a local file with `tail -F` and replays rotated
//! siblings (optionally compressed) for historical reads.

use super::{LogSource, RawLine, RotatedFile, SourceStatus, StatusTracker, Workers};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Lines longer than this are cut and marked, so one pathological line
/// can't blow up downstream buffers.
const MAX_LINE_BYTES: usize = 1024 * 1024;
const TRUNCATION_SUFFIX: &str = "... [truncated]";
const READ_BUFFER_BYTES: usize = 64 * 1024;
const TAIL_BACKLOG_LINES: &str = "1000";

const COMPRESSED_EXTENSIONS: [&str; 8] = ["zst", "zstd", "gz", "gzip", "bz2", "bzip2", "xz", "lz4"];

pub struct FileSource {
    path: PathBuf,
    /// Whether `path` is the live, currently-written file; when set,
    /// range reads whose window extends past the newest rotated file
    /// also read it.
    current: bool,
    rotated_pattern: Option<String>,
    decompress: Option<String>,
    tracker: Arc<StatusTracker>,
    workers: Workers,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSource {
            path: path.into(),
            current: true,
            rotated_pattern: None,
            decompress: None,
            tracker: Arc::new(StatusTracker::default()),
            workers: Workers::default(),
        }
    }

    pub fn with_rotation(mut self, current: bool, rotated_pattern: Option<String>, decompress: Option<String>) -> Self {
        self.current = current;
        self.rotated_pattern = rotated_pattern;
        self.decompress = decompress;
        self
    }

    fn basename(&self) -> &str {
        self.path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
    }

    /// The glob for rotated siblings: the configured pattern (resolved
    /// relative to the log directory when not absolute), or
    /// `<basename>.*` next to the live file.
    fn rotation_glob(&self) -> String {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        match &self.rotated_pattern {
            Some(pattern) if Path::new(pattern).is_absolute() => pattern.clone(),
            Some(pattern) => dir.join(pattern).to_string_lossy().to_string(),
            None => dir.join(format!("{}.*", self.basename())).to_string_lossy().to_string(),
        }
    }

    fn is_compressed(&self, path: &Path) -> bool {
        if self.decompress.is_some() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| COMPRESSED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }

    async fn stream_file(
        &self,
        ctx: &CancellationToken,
        path: &str,
        compressed: bool,
        matcher: Option<&regex::Regex>,
        line_tx: &mpsc::Sender<RawLine>,
    ) -> Result<()> {
        if compressed {
            self.stream_compressed(ctx, path, matcher, line_tx).await
        } else {
            self.stream_plain(ctx, path, matcher, line_tx).await
        }
    }

    async fn stream_plain(
        &self,
        ctx: &CancellationToken,
        path: &str,
        matcher: Option<&regex::Regex>,
        line_tx: &mpsc::Sender<RawLine>,
    ) -> Result<()> {
        let file = tokio::fs::File::open(path).await.map_err(Error::Io)?;
        let mut lines = BufReader::with_capacity(READ_BUFFER_BYTES, file).lines();
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if matcher.map(|re| !re.is_match(&line)).unwrap_or(false) {
                            continue;
                        }
                        self.tracker.record_line(line.len());
                        if line_tx.send(RawLine::new(truncate_line(line))).await.is_err() {
                            return Ok(());
                        }
                    }
                    Ok(None) => return Ok(()),
                    Err(e) => return Err(Error::Io(e)),
                },
            }
        }
    }

    async fn stream_compressed(
        &self,
        ctx: &CancellationToken,
        path: &str,
        matcher: Option<&regex::Regex>,
        line_tx: &mpsc::Sender<RawLine>,
    ) -> Result<()> {
        let argv = decompress_argv(self.decompress.as_deref(), path);
        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(Error::Io)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::transient("file_source", path.to_string(), "no decompressor stdout"))?;

        let mut lines = BufReader::with_capacity(READ_BUFFER_BYTES, stdout).lines();
        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    let _ = child.kill().await;
                    return Ok(());
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if matcher.map(|re| !re.is_match(&line)).unwrap_or(false) {
                            continue;
                        }
                        self.tracker.record_line(line.len());
                        if line_tx.send(RawLine::new(truncate_line(line))).await.is_err() {
                            let _ = child.kill().await;
                            return Ok(());
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

        let status = child.wait().await.map_err(Error::Io)?;
        if !status.success() && !ctx.is_cancelled() {
            return Err(Error::transient("file_source", path.to_string(), format!("{} exited with {status}", argv[0])));
        }
        Ok(())
    }
}

#[async_trait]
impl LogSource for FileSource {
    fn name(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn start(
        &self,
        ctx: CancellationToken,
        line_tx: mpsc::Sender<RawLine>,
        err_tx: mpsc::Sender<Error>,
    ) -> Result<()> {
        let mut child = Command::new("tail")
            .arg("-F")
            .arg("-n")
            .arg(TAIL_BACKLOG_LINES)
            .arg(&self.path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(Error::Io)?;

        let stdout = child.stdout.take().ok_or_else(|| Error::transient("file_source", self.name(), "no stdout"))?;
        self.tracker.set_connected(true);
        self.tracker.clear_error();

        let tracker = Arc::clone(&self.tracker);
        let internal = CancellationToken::new();
        let pump_cancel = internal.clone();
        let handle = tokio::spawn(async move {
            let mut lines = BufReader::with_capacity(READ_BUFFER_BYTES, stdout).lines();
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = pump_cancel.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            tracker.record_line(line.len());
                            if line_tx.send(RawLine::new(truncate_line(line))).await.is_err() {
                                break;
                            }
                        }
                        // tail exiting is the end of the stream
                        Ok(None) => break,
                        // other read errors are reported but don't end
                        // the stream while the context is live
                        Err(e) => {
                            tracker.set_error(e.to_string());
                            if err_tx.send(Error::Io(e)).await.is_err() {
                                break;
                            }
                        }
                    },
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
        let pattern = self.rotation_glob();
        let mut files = Vec::new();
        for entry in glob::glob(&pattern).map_err(|e| Error::validation("file_source", e.to_string()))? {
            let path = match entry {
                Ok(p) => p,
                Err(_) => continue,
            };
            if path == self.path {
                continue;
            }
            let meta = match tokio::fs::metadata(&path).await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let modified: DateTime<Utc> = meta.modified().map(DateTime::from).unwrap_or_else(|_| Utc::now());
            files.push(RotatedFile {
                name: path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string(),
                path: path.to_string_lossy().to_string(),
                size: meta.len(),
                modified,
                compressed: self.is_compressed(&path),
                start_time: None,
                end_time: None,
            });
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
        _grep_before: usize,
        _grep_after: usize,
    ) -> Result<()> {
        let rotated = self.list_rotated_files(&ctx).await?;
        let (relevant, newest_rotated) = filter_relevant_files(rotated, Some(start), Some(end));
        let matcher = grep.filter(|g| !g.is_empty()).map(|g| super::compile_grep(&g));

        // oldest first, so the consumer sees chronological order
        for file in relevant.iter().rev() {
            if ctx.is_cancelled() {
                return Ok(());
            }
            self.stream_file(&ctx, &file.path, file.compressed, matcher.as_ref(), &line_tx).await?;
        }

        // the live file covers everything newer than the newest archive
        let live_needed = self.current && newest_rotated.map(|newest| end > newest).unwrap_or(true);
        if live_needed && !ctx.is_cancelled() {
            self.stream_file(&ctx, &self.path.to_string_lossy(), false, matcher.as_ref(), &line_tx).await?;
        }
        Ok(())
    }
}

/// Prunes a newest-first rotated listing down to the files that can
/// hold entries in `[start, end]`, and reports the newest mod-time
/// seen. A file's mod-time approximates its last entry; the next-older
/// file's mod-time approximates its first.
pub(crate) fn filter_relevant_files(
    files: Vec<RotatedFile>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> (Vec<RotatedFile>, Option<DateTime<Utc>>) {
    let newest = files.first().map(|f| f.modified);
    let n = files.len();
    let keep: Vec<bool> = (0..n)
        .map(|i| {
            // mod-time below the window start: the file's last entry is
            // already too old
            if let Some(start) = start {
                if files[i].modified < start {
                    return false;
                }
            }
            // next-older file's mod-time past the window end: this
            // file's first entry is already too new
            if let Some(end) = end {
                if i + 1 < n && files[i + 1].modified > end {
                    return false;
                }
            }
            true
        })
        .collect();
    let kept = files.into_iter().zip(keep).filter(|(_, keep)| *keep).map(|(f, _)| f).collect();
    (kept, newest)
}

fn decompress_argv(configured: Option<&str>, path: &str) -> Vec<String> {
    if let Some(cmd) = configured {
        let mut argv: Vec<String> = cmd.split_whitespace().map(str::to_string).collect();
        if argv.is_empty() {
            argv.push("cat".to_string());
        }
        return argv;
    }
    let ext = Path::new(path).extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase();
    let argv: &[&str] = match ext.as_str() {
        "zst" | "zstd" => &["zstd", "-dc"],
        "gz" | "gzip" => &["gzip", "-dc"],
        "bz2" | "bzip2" => &["bzip2", "-dc"],
        "xz" => &["xz", "-dc"],
        "lz4" => &["lz4", "-dc"],
        _ => &["cat"],
    };
    argv.iter().map(|s| s.to_string()).collect()
}

/// Caps a line at 1 MiB, marking the cut. The cut lands on a char
/// boundary so the result stays valid UTF-8.
pub(crate) fn truncate_line(line: String) -> String {
    if line.len() <= MAX_LINE_BYTES {
        return line;
    }
    let mut cut = MAX_LINE_BYTES;
    while cut > 0 && !line.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = line[..cut].to_string();
    out.push_str(TRUNCATION_SUFFIX);
    out
}
