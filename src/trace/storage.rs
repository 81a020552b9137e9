//! JSON-on-disk trace report storage, with strict name sanitization so
//! a caller-supplied report name can never escape the storage root.

use super::report::TraceReport;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// One row of a report listing: enough to render an index without
/// loading every entry.
#[derive(Debug, Clone)]
pub struct ReportSummary {
    pub name: String,
    pub trace_id: String,
    pub group: String,
    pub created_at: DateTime<Utc>,
    pub entry_count: usize,
}

pub struct TraceStorage {
    dir: PathBuf,
}

impl TraceStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        TraceStorage { dir: dir.into() }
    }

    /// Where the report for `name` lives on disk.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_name(name)))
    }

    /// Writes atomically: the report lands under a temp name and is
    /// renamed into place, so readers never observe a half-written file.
    pub async fn save(&self, report: &TraceReport) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(Error::Io)?;
        let path = self.path_for(&report.name);
        let tmp_path = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(report).map_err(|e| Error::parse("trace_storage", e.to_string()))?;
        tokio::fs::write(&tmp_path, body).await.map_err(Error::Io)?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(Error::Io)?;
        Ok(())
    }

    pub async fn load(&self, name: &str) -> Result<TraceReport> {
        let path = self.path_for(name);
        let body = tokio::fs::read(&path).await.map_err(|_| Error::not_found("trace report", name.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| Error::parse("trace_storage", e.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<ReportSummary>> {
        let mut summaries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(_) => return Ok(summaries),
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let file_name = entry.file_name();
            let name = match file_name.to_str().and_then(|n| n.strip_suffix(".json")) {
                Some(name) => name,
                None => continue,
            };
            if let Ok(report) = self.load(name).await {
                summaries.push(ReportSummary {
                    name: report.name,
                    trace_id: report.trace_id,
                    group: report.group,
                    created_at: report.created_at,
                    entry_count: report.entries.len(),
                });
            }
        }
        Ok(summaries)
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name);
        tokio::fs::remove_file(&path).await.map_err(|_| Error::not_found("trace report", name.to_string()))
    }

    /// Deletes every report created before `cutoff`. Returns the number
    /// deleted.
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut deleted = 0;
        for summary in self.list().await? {
            if summary.created_at < cutoff && self.delete(&summary.name).await.is_ok() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

/// Replaces `/`, `\`, and the literal `..` with `_` so a report name
/// can never address a file outside the storage root.
pub(crate) fn sanitize_name(name: &str) -> String {
    name.replace(['/', '\\'], "_").replace("..", "_")
}
