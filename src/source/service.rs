//! Service source: wraps an in-process log buffer owned by a host
//! service instead of a file, command, or remote host. Unlike every
//! other source it spawns no long-lived producer; `start` just marks
//! the source connected and the buffer is read synchronously during
//! `read_range`.

use super::{LogSource, RawLine, RotatedFile, SourceStatus, StatusTracker, Workers};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A buffer line starting with this marker is the engine's own
/// bookkeeping output and is dropped rather than forwarded.
const INTERNAL_MARKER: &str = "[logmux]";

/// In-process log access the host exposes for its own services.
#[async_trait]
pub trait ServiceLogProvider: Send + Sync {
    /// Returns up to `n` of the newest buffered lines for `name`
    /// (`n == 0` means all).
    async fn service_logs(&self, name: &str, n: usize) -> Result<Vec<String>>;

    /// Returns the number of buffered lines for `name`.
    async fn service_log_size(&self, name: &str) -> Result<usize>;
}

pub struct ServiceSource {
    service_name: String,
    provider: Arc<dyn ServiceLogProvider>,
    tracker: Arc<StatusTracker>,
    workers: Workers,
}

impl ServiceSource {
    pub fn new(service_name: impl Into<String>, provider: Arc<dyn ServiceLogProvider>) -> Self {
        ServiceSource {
            service_name: service_name.into(),
            provider,
            tracker: Arc::new(StatusTracker::default()),
            workers: Workers::default(),
        }
    }
}

#[async_trait]
impl LogSource for ServiceSource {
    fn name(&self) -> String {
        format!("service:{}", self.service_name)
    }

    async fn start(
        &self,
        ctx: CancellationToken,
        line_tx: mpsc::Sender<RawLine>,
        err_tx: mpsc::Sender<Error>,
    ) -> Result<()> {
        self.tracker.set_connected(true);
        self.tracker.clear_error();

        let tracker = Arc::clone(&self.tracker);
        let internal = CancellationToken::new();
        let sleep_cancel = internal.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = ctx.cancelled() => {}
                _ = sleep_cancel.cancelled() => {}
            }
            // closing both channels is the stream's only exit signal
            drop(line_tx);
            drop(err_tx);
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
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        line_tx: mpsc::Sender<RawLine>,
        grep: Option<String>,
        _grep_before: usize,
        _grep_after: usize,
    ) -> Result<()> {
        let size = self.provider.service_log_size(&self.service_name).await?;
        let lines = self.provider.service_logs(&self.service_name, size).await?;
        let matcher = grep.filter(|g| !g.is_empty()).map(|g| super::compile_grep(&g));

        for line in lines {
            if ctx.is_cancelled() {
                break;
            }
            if line.starts_with(INTERNAL_MARKER) {
                continue;
            }
            if let Some(re) = &matcher {
                if !re.is_match(&line) {
                    continue;
                }
            }
            self.tracker.record_line(line.len());
            if line_tx.send(RawLine::new(line)).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

