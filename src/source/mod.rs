//! Log sources: the trait every concrete producer (file, command, ssh,
//! docker, kubernetes, service) implements, plus the status-tracking
//! and worker-lifecycle components each one composes.

mod __test__;
pub mod command;
pub mod docker;
pub mod file;
pub mod kubernetes;
pub mod service;
pub mod ssh;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex as StdMutex;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One raw line read from a source, with an optional byte offset for
/// sources that can report one.
#[derive(Debug, Clone)]
pub struct RawLine {
    pub text: String,
    pub offset: Option<u64>,
}

impl RawLine {
    pub fn new(text: impl Into<String>) -> Self {
        RawLine { text: text.into(), offset: None }
    }
}

/// An archived older segment of a log, addressable by path and mod-time.
#[derive(Debug, Clone)]
pub struct RotatedFile {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub compressed: bool,
    /// Estimated entry-time bounds, when the source can cheaply guess
    /// them. Absent for most sources.
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct SourceStatus {
    pub connected: bool,
    pub last_error: Option<String>,
    pub last_connect_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub bytes_read: u64,
    pub lines_read: u64,
}

#[derive(Debug, Default)]
struct StatusInner {
    connected: bool,
    last_error: Option<String>,
    last_connect_at: Option<DateTime<Utc>>,
    last_error_at: Option<DateTime<Utc>>,
    bytes_read: u64,
    lines_read: u64,
}

/// Every source composes one of these rather than implementing its own
/// status bookkeeping. Counters are monotone for the lifetime of the
/// source object.
#[derive(Debug, Default)]
pub struct StatusTracker {
    inner: StdMutex<StatusInner>,
}

impl StatusTracker {
    pub fn set_connected(&self, connected: bool) {
        let mut inner = self.inner.lock().unwrap();
        if connected && !inner.connected {
            inner.last_connect_at = Some(Utc::now());
        }
        inner.connected = connected;
    }

    pub fn set_error(&self, error: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_error = Some(error.into());
        inner.last_error_at = Some(Utc::now());
    }

    pub fn clear_error(&self) {
        self.inner.lock().unwrap().last_error = None;
    }

    /// Records one forwarded line of `bytes` bytes.
    pub fn record_line(&self, bytes: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.lines_read += 1;
        inner.bytes_read += bytes as u64;
    }

    pub fn snapshot(&self) -> SourceStatus {
        let inner = self.inner.lock().unwrap();
        SourceStatus {
            connected: inner.connected,
            last_error: inner.last_error.clone(),
            last_connect_at: inner.last_connect_at,
            last_error_at: inner.last_error_at,
            bytes_read: inner.bytes_read,
            lines_read: inner.lines_read,
        }
    }
}

/// A caller-supplied grep is treated as a regex; one that fails to
/// compile degrades to a literal substring match instead of failing
/// the read.
pub(crate) fn compile_grep(grep: &str) -> regex::Regex {
    regex::Regex::new(grep)
        .unwrap_or_else(|_| regex::Regex::new(&regex::escape(grep)).expect("escaped pattern always compiles"))
}

/// The producer task a source spawns from `start`, kept so `stop` can
/// cancel and join it. `stop` before `start` is a no-op.
#[derive(Default)]
pub struct Workers {
    inner: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Workers {
    pub async fn store(&self, cancel: CancellationToken, handle: JoinHandle<()>) {
        let mut inner = self.inner.lock().await;
        if let Some((old_cancel, old_handle)) = inner.replace((cancel, handle)) {
            old_cancel.cancel();
            old_handle.abort();
        }
    }

    pub async fn stop(&self) {
        let taken = self.inner.lock().await.take();
        if let Some((cancel, handle)) = taken {
            cancel.cancel();
            let _ = handle.await;
        }
    }
}

#[async_trait]
pub trait LogSource: Send + Sync {
    /// Human-readable identifier, stable for a given configuration.
    /// Used in events and as the `Entry::source` tag.
    fn name(&self) -> String;

    /// Spawns the producer work and returns. The return value covers
    /// only synchronous startup failures; after a successful return the
    /// source sends raw lines to `line_tx` and closes it when finished
    /// or when `ctx` is cancelled. Runtime errors go to `err_tx`.
    async fn start(
        &self,
        ctx: CancellationToken,
        line_tx: mpsc::Sender<RawLine>,
        err_tx: mpsc::Sender<crate::error::Error>,
    ) -> Result<()>;

    /// Cancels and joins all spawned work. Idempotent; safe to call
    /// before `start`.
    async fn stop(&self);

    fn status(&self) -> SourceStatus;

    /// Lists rotated/archived files this source can still read from,
    /// newest first. Sources with no file-system archive return an
    /// empty list.
    async fn list_rotated_files(&self, ctx: &CancellationToken) -> Result<Vec<RotatedFile>>;

    /// Synchronously produces historical raw lines for `[start, end]`
    /// in chronological order. `grep` and its context margins are hints
    /// a source may push down to the producer side (ssh) or ignore
    /// entirely (file, which leaves filtering to the consumer). Sources
    /// that cannot address history return `Error::NotSupported`.
    #[allow(clippy::too_many_arguments)]
    async fn read_range(
        &self,
        ctx: CancellationToken,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        line_tx: mpsc::Sender<RawLine>,
        grep: Option<String>,
        grep_before: usize,
        grep_after: usize,
    ) -> Result<()>;
}
