//! Trace manager: two-pass parallel correlation search across a named
//! group of viewers, with persisted reports and a background retention
//! sweep.
//!
//! Pass 1 greps every viewer in the group for the searched ID. Pass 2
//! (optional) extracts correlation IDs from Pass 1's hits via each
//! viewer's configured ID field and re-searches with the ID alternation
//! so related entries that never mention the original ID are picked up
//! too.

mod __test__;
pub mod report;
pub mod storage;

use crate::config::TraceConfig;
use crate::error::{Error, Result};
use crate::events::{publish_optional, Event, EventBus};
use crate::manager::Manager;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use report::{TraceEntry, TraceReport, STATUS_COMPLETED, STATUS_FAILED, STATUS_RUNNING};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use storage::TraceStorage;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Pass 2 batches its ID alternation into chunks this size to stay
/// under remote command-line length limits.
const PASS2_BATCH_SIZE: usize = 50;
const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
const DEFAULT_REPORTS_DIR: &str = "traces";
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 3600);

pub struct TraceRequest {
    pub id: String,
    pub group: String,
    pub name: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub expand_by_id: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteResult {
    pub name: String,
    pub status: String,
}

pub struct TraceManager {
    manager: Arc<Manager>,
    storage: Arc<TraceStorage>,
    /// Group name to member viewer names.
    groups: RwLock<HashMap<String, Vec<String>>>,
    max_age: Duration,
    event_bus: Option<Arc<dyn EventBus>>,
    retention_cancel: CancellationToken,
}

impl TraceManager {
    pub fn new(
        manager: Arc<Manager>,
        storage: TraceStorage,
        groups: HashMap<String, Vec<String>>,
        max_age: Duration,
        event_bus: Option<Arc<dyn EventBus>>,
    ) -> Arc<Self> {
        let trace_manager = Arc::new(TraceManager {
            manager,
            storage: Arc::new(storage),
            groups: RwLock::new(groups),
            max_age,
            event_bus,
            retention_cancel: CancellationToken::new(),
        });
        trace_manager.clone().spawn_retention_sweep();
        trace_manager
    }

    /// Builds a manager from config, resolving `reports_dir` (default
    /// `"traces"`) and `max_age` (default 7 days; accepts the usual
    /// `ms/s/m/h` suffixes plus `d` for days).
    pub fn from_config(
        manager: Arc<Manager>,
        config: &TraceConfig,
        event_bus: Option<Arc<dyn EventBus>>,
    ) -> Result<Arc<Self>> {
        let reports_dir = config.reports_dir.clone().unwrap_or_else(|| DEFAULT_REPORTS_DIR.to_string());
        let max_age = match &config.max_age {
            Some(raw) => crate::util::duration::parse_duration(raw)?,
            None => DEFAULT_MAX_AGE,
        };
        let groups = config.groups.iter().map(|g| (g.name.clone(), g.log_viewers.clone())).collect();
        Ok(TraceManager::new(manager, TraceStorage::new(reports_dir), groups, max_age, event_bus))
    }

    /// Expires once immediately, then hourly.
    fn spawn_retention_sweep(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                let cutoff = Utc::now() - chrono::Duration::from_std(self.max_age).unwrap_or_default();
                match self.storage.delete_older_than(cutoff).await {
                    Ok(deleted) if deleted > 0 => {
                        tracing::info!(deleted, "expired old trace reports");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "trace report expiry failed"),
                }
                tokio::select! {
                    _ = self.retention_cancel.cancelled() => break,
                    _ = tokio::time::sleep(RETENTION_SWEEP_INTERVAL) => {}
                }
            }
        });
    }

    pub async fn update_groups(&self, groups: HashMap<String, Vec<String>>) {
        *self.groups.write().await = groups;
    }

    pub fn shutdown(&self) {
        self.retention_cancel.cancel();
    }

    /// Persists an initial `running` report, emits `trace.started`, and
    /// returns immediately; the search itself runs in a detached
    /// background task so the caller may drop its context.
    pub async fn execute(self: &Arc<Self>, request: TraceRequest) -> Result<ExecuteResult> {
        let viewers = self
            .groups
            .read()
            .await
            .get(&request.group)
            .cloned()
            .ok_or_else(|| Error::not_found("trace group", request.group.clone()))?;

        let created_at = Utc::now();
        let name = request
            .name
            .clone()
            .unwrap_or_else(|| format!("{}-{}", request.id, created_at.format("%Y%m%d-%H%M%S")));

        let initial = TraceReport::build(
            name.clone(),
            request.id.clone(),
            request.group.clone(),
            STATUS_RUNNING,
            created_at,
            request.start,
            request.end,
            Vec::new(),
            0,
            None,
        );
        self.storage.save(&initial).await?;
        publish_optional(
            self.event_bus.as_ref(),
            Event::TraceStarted {
                name: name.clone(),
                trace_id: request.id.clone(),
                group: request.group.clone(),
                log_viewers: viewers.clone(),
            },
        );

        let this = Arc::clone(self);
        let background_name = name.clone();
        tokio::spawn(async move {
            this.run_search(background_name, request, viewers, created_at).await;
        });

        Ok(ExecuteResult { name, status: STATUS_RUNNING.to_string() })
    }

    async fn run_search(self: Arc<Self>, name: String, request: TraceRequest, viewers: Vec<String>, created_at: DateTime<Utc>) {
        let started = tokio::time::Instant::now();
        match self.search(&request, &viewers).await {
            Ok(entries) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                let total_entries = entries.len();
                let report = TraceReport::build(
                    name.clone(),
                    request.id.clone(),
                    request.group.clone(),
                    STATUS_COMPLETED,
                    created_at,
                    request.start,
                    request.end,
                    entries,
                    duration_ms,
                    None,
                );
                if let Err(e) = self.storage.save(&report).await {
                    tracing::error!(report = %name, error = %e, "failed to persist trace report");
                    publish_optional(
                        self.event_bus.as_ref(),
                        Event::TraceFailed { name, trace_id: request.id, group: request.group, error: e.to_string() },
                    );
                    return;
                }
                publish_optional(
                    self.event_bus.as_ref(),
                    Event::TraceCompleted {
                        name: name.clone(),
                        trace_id: request.id,
                        group: request.group,
                        total_entries,
                        duration_ms,
                        report_path: self.storage.path_for(&name).display().to_string(),
                    },
                );
            }
            Err(e) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                let failed = TraceReport::build(
                    name.clone(),
                    request.id.clone(),
                    request.group.clone(),
                    STATUS_FAILED,
                    created_at,
                    request.start,
                    request.end,
                    Vec::new(),
                    duration_ms,
                    Some(e.to_string()),
                );
                if let Err(save_err) = self.storage.save(&failed).await {
                    tracing::error!(report = %name, error = %save_err, "failed to persist failed trace report");
                }
                publish_optional(
                    self.event_bus.as_ref(),
                    Event::TraceFailed { name, trace_id: request.id, group: request.group, error: e.to_string() },
                );
            }
        }
    }

    async fn search(&self, request: &TraceRequest, viewers: &[String]) -> Result<Vec<TraceEntry>> {
        let pass1 = self.correlate(&request.id, request.start, request.end, viewers).await?;
        if !request.expand_by_id || pass1.is_empty() {
            return Ok(pass1);
        }

        // collect correlation IDs via each hit's viewer-configured ID
        // field; viewers with no ID field configured contribute nothing
        let mut ids = HashSet::new();
        for trace_entry in &pass1 {
            if let Some(id_field) = self.manager.id_field(&trace_entry.entry.source).await {
                if let Some(value) = trace_entry.entry.field_as_str(&id_field) {
                    if !value.is_empty() {
                        ids.insert(value);
                    }
                }
            }
        }
        if ids.is_empty() {
            return Ok(pass1);
        }
        let mut ids: Vec<String> = ids.into_iter().collect();
        ids.sort();

        // direct hits come first so dedupe keeps them over re-found
        // copies from the expansion batches
        let mut expanded = pass1.clone();
        let mut any_batch_succeeded = false;
        for batch in ids.chunks(PASS2_BATCH_SIZE) {
            let pattern = format!("({})", batch.iter().map(|id| regex::escape(id)).collect::<Vec<_>>().join("|"));
            match self.correlate(&pattern, request.start, request.end, viewers).await {
                Ok(batch_entries) => {
                    any_batch_succeeded = true;
                    expanded.extend(batch_entries);
                }
                Err(e) => {
                    tracing::warn!(batch_size = batch.len(), error = %e, "trace expansion batch failed");
                }
            }
        }

        // every batch failing degrades to the direct hits
        if !any_batch_succeeded {
            return Ok(pass1);
        }

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for trace_entry in expanded {
            let key = (trace_entry.entry.source.clone(), trace_entry.entry.raw.clone());
            if seen.insert(key) {
                merged.push(trace_entry);
            }
        }
        merged.sort_by_key(|e| e.entry.timestamp);
        Ok(merged)
    }

    /// One correlation pass: fans `grep` out to every viewer in the
    /// group in parallel, starting each lazily. Any single viewer's
    /// error fails the whole pass.
    async fn correlate(
        &self,
        grep: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        viewers: &[String],
    ) -> Result<Vec<TraceEntry>> {
        let ctx = CancellationToken::new();
        let tasks: Vec<_> = viewers
            .iter()
            .map(|viewer_name| {
                let manager = Arc::clone(&self.manager);
                let viewer_name = viewer_name.clone();
                let grep = grep.to_string();
                let ctx = ctx.child_token();
                tokio::spawn(async move {
                    let viewer = manager.get_and_start(&viewer_name).await?;
                    let (entries, err) =
                        viewer.get_historical_entries(ctx, start, end, None, 0, Some(grep), 0, 0).await;
                    if let Some(e) = err {
                        if !e.is_cancelled() {
                            return Err(e);
                        }
                    }
                    Ok(entries.into_iter().map(|entry| TraceEntry { entry, is_context: false }).collect::<Vec<_>>())
                })
            })
            .collect();

        // the first failing member cancels the rest of the pass; the
        // stragglers are still drained so nothing outlives this call
        let mut tasks: FuturesUnordered<_> = tasks.into_iter().collect();
        let mut merged = Vec::new();
        let mut first_error = None;
        while let Some(joined) = tasks.next().await {
            match joined {
                Ok(Ok(entries)) => merged.extend(entries),
                Ok(Err(e)) => {
                    ctx.cancel();
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    ctx.cancel();
                    first_error.get_or_insert(Error::Cancelled);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        merged.sort_by_key(|e| e.entry.timestamp);
        Ok(merged)
    }

    pub fn storage(&self) -> &Arc<TraceStorage> {
        &self.storage
    }
}
