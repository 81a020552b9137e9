#[cfg(test)]
mod __test__ {
    use crate::config::{BufferConfig, LogParserConfig, LogSourceConfig, LogViewerConfig, ParserKind, TraceConfig};
    use crate::manager::Manager;
    use crate::trace::report::{TraceReport, STATUS_COMPLETED, STATUS_RUNNING};
    use crate::trace::storage::{sanitize_name, TraceStorage};
    use crate::trace::{TraceManager, TraceRequest};
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn json_viewer_config(name: &str, path: &str, id_field: Option<&str>) -> LogViewerConfig {
        LogViewerConfig {
            name: name.to_string(),
            source: LogSourceConfig::File {
                path: path.to_string(),
                current: true,
                rotated_pattern: None,
                decompress: None,
            },
            parser: Some(LogParserConfig {
                kind: ParserKind::Json,
                id: id_field.map(str::to_string),
                ..Default::default()
            }),
            buffer: BufferConfig::default(),
            derive: Default::default(),
        }
    }

    async fn started_manager() -> Arc<Manager> {
        let manager = Manager::new(Duration::from_secs(3600), None);
        manager.start(CancellationToken::new()).await;
        manager
    }

    fn groups(name: &str, viewers: &[&str]) -> HashMap<String, Vec<String>> {
        let mut map = HashMap::new();
        map.insert(name.to_string(), viewers.iter().map(|v| v.to_string()).collect());
        map
    }

    async fn wait_for_non_running(storage: &TraceStorage, name: &str) -> TraceReport {
        for _ in 0..100 {
            if let Ok(report) = storage.load(name).await {
                if report.status != STATUS_RUNNING {
                    return report;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        storage.load(name).await.expect("report should exist")
    }

    #[tokio::test]
    async fn execute_runs_pass_one_and_persists_a_completed_report() {
        let log_dir = tempfile::tempdir().unwrap();
        let log_path = log_dir.path().join("app.log");
        let mut file = std::fs::File::create(&log_path).unwrap();
        writeln!(file, r#"{{"timestamp":"2024-01-01T00:00:00Z","level":"info","message":"order abc created","request_id":"req-1"}}"#).unwrap();
        writeln!(file, r#"{{"timestamp":"2024-01-01T00:00:05Z","level":"info","message":"unrelated line","request_id":"req-2"}}"#).unwrap();
        drop(file);

        let manager = started_manager().await;
        let errors = manager.initialize(&[json_viewer_config("app", log_path.to_str().unwrap(), Some("request_id"))]).await;
        assert!(errors.is_empty());

        let storage_dir = tempfile::tempdir().unwrap();
        let trace_manager = TraceManager::new(
            manager.clone(),
            TraceStorage::new(storage_dir.path()),
            groups("orders", &["app"]),
            Duration::from_secs(7 * 24 * 3600),
            None,
        );

        let start: DateTime<Utc> = "2023-01-01T00:00:00Z".parse().unwrap();
        let end = Utc::now() + ChronoDuration::days(1);
        let request = TraceRequest {
            id: "abc".to_string(),
            group: "orders".to_string(),
            name: Some("test-trace".to_string()),
            start,
            end,
            expand_by_id: false,
        };

        let result = trace_manager.execute(request).await.unwrap();
        assert_eq!(result.name, "test-trace");
        assert_eq!(result.status, "running");

        let report = wait_for_non_running(trace_manager.storage(), "test-trace").await;
        assert_eq!(report.status, STATUS_COMPLETED);
        assert_eq!(report.version, "1.0");
        assert_eq!(report.trace_id, "abc");
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].entry.message, "order abc created");
        assert!(!report.entries[0].is_context);
        assert_eq!(report.summary.total_entries, 1);
        assert_eq!(report.summary.by_source.get("app"), Some(&1));

        trace_manager.shutdown();
        manager.stop().await;
    }

    #[tokio::test]
    async fn two_pass_expansion_picks_up_related_entries() {
        let log_dir = tempfile::tempdir().unwrap();
        let nginx_path = log_dir.path().join("nginx.log");
        let api_path = log_dir.path().join("api.log");
        let mut nginx = std::fs::File::create(&nginx_path).unwrap();
        writeln!(nginx, r#"{{"timestamp":"2024-01-01T00:00:01Z","level":"info","message":"GET /orders abc123"}}"#).unwrap();
        drop(nginx);
        let mut api = std::fs::File::create(&api_path).unwrap();
        writeln!(api, r#"{{"timestamp":"2024-01-01T00:00:02Z","level":"info","message":"handling abc123","request_id":"R1"}}"#).unwrap();
        writeln!(api, r#"{{"timestamp":"2024-01-01T00:00:10Z","level":"info","message":"order completed","request_id":"R1"}}"#).unwrap();
        drop(api);

        let manager = started_manager().await;
        manager
            .initialize(&[
                json_viewer_config("nginx", nginx_path.to_str().unwrap(), None),
                json_viewer_config("api", api_path.to_str().unwrap(), Some("request_id")),
            ])
            .await;

        let storage_dir = tempfile::tempdir().unwrap();
        let trace_manager = TraceManager::new(
            manager.clone(),
            TraceStorage::new(storage_dir.path()),
            groups("api-flow", &["nginx", "api"]),
            Duration::from_secs(3600),
            None,
        );

        let request = TraceRequest {
            id: "abc123".to_string(),
            group: "api-flow".to_string(),
            name: Some("flow-trace".to_string()),
            start: "2023-01-01T00:00:00Z".parse().unwrap(),
            end: Utc::now() + ChronoDuration::days(1),
            expand_by_id: true,
        };
        trace_manager.execute(request).await.unwrap();

        let report = wait_for_non_running(trace_manager.storage(), "flow-trace").await;
        assert_eq!(report.status, STATUS_COMPLETED);
        // the second api line never mentions abc123, but shares R1
        assert_eq!(report.summary.total_entries, 3);
        assert_eq!(report.summary.by_source.get("nginx"), Some(&1));
        assert_eq!(report.summary.by_source.get("api"), Some(&2));
        let timestamps: Vec<_> = report.entries.iter().map(|e| e.entry.timestamp).collect();
        let mut sorted = timestamps.clone();
        sorted.sort();
        assert_eq!(timestamps, sorted);

        trace_manager.shutdown();
        manager.stop().await;
    }

    #[tokio::test]
    async fn execute_unknown_group_fails_fast() {
        let manager = started_manager().await;
        let storage_dir = tempfile::tempdir().unwrap();
        let trace_manager =
            TraceManager::new(manager.clone(), TraceStorage::new(storage_dir.path()), HashMap::new(), Duration::from_secs(3600), None);

        let request = TraceRequest {
            id: "abc".to_string(),
            group: "nope".to_string(),
            name: None,
            start: Utc::now(),
            end: Utc::now(),
            expand_by_id: false,
        };
        assert!(trace_manager.execute(request).await.is_err());
        trace_manager.shutdown();
        manager.stop().await;
    }

    #[tokio::test]
    async fn execute_defaults_report_name_from_id_and_timestamp() {
        let log_dir = tempfile::tempdir().unwrap();
        let log_path = log_dir.path().join("app.log");
        std::fs::write(&log_path, "").unwrap();

        let manager = started_manager().await;
        manager.initialize(&[json_viewer_config("app", log_path.to_str().unwrap(), None)]).await;

        let storage_dir = tempfile::tempdir().unwrap();
        let trace_manager = TraceManager::new(
            manager.clone(),
            TraceStorage::new(storage_dir.path()),
            groups("orders", &["app"]),
            Duration::from_secs(3600),
            None,
        );

        let request = TraceRequest {
            id: "xyz".to_string(),
            group: "orders".to_string(),
            name: None,
            start: Utc::now() - ChronoDuration::days(1),
            end: Utc::now() + ChronoDuration::days(1),
            expand_by_id: false,
        };
        let result = trace_manager.execute(request).await.unwrap();
        assert!(result.name.starts_with("xyz-"));

        trace_manager.shutdown();
        manager.stop().await;
    }

    #[tokio::test]
    async fn from_config_resolves_reports_dir_and_max_age() {
        let manager = started_manager().await;
        let storage_dir = tempfile::tempdir().unwrap();
        let config = TraceConfig {
            reports_dir: Some(storage_dir.path().to_str().unwrap().to_string()),
            max_age: Some("14d".to_string()),
            groups: Vec::new(),
        };
        let trace_manager = TraceManager::from_config(manager.clone(), &config, None).unwrap();
        assert!(trace_manager.storage().list().await.unwrap().is_empty());
        trace_manager.shutdown();
        manager.stop().await;
    }

    #[tokio::test]
    async fn from_config_rejects_an_unparseable_max_age() {
        let manager = started_manager().await;
        let config = TraceConfig { reports_dir: None, max_age: Some("not-a-duration".to_string()), groups: Vec::new() };
        assert!(TraceManager::from_config(manager.clone(), &config, None).is_err());
        manager.stop().await;
    }

    mod storage {
        use super::*;

        fn sample_report(name: &str) -> TraceReport {
            TraceReport::build(
                name.to_string(),
                "trace-1".to_string(),
                "group".to_string(),
                STATUS_COMPLETED,
                Utc::now(),
                Utc::now() - ChronoDuration::hours(1),
                Utc::now(),
                Vec::new(),
                42,
                None,
            )
        }

        #[tokio::test]
        async fn save_then_load_round_trips() {
            let dir = tempfile::tempdir().unwrap();
            let storage = TraceStorage::new(dir.path());
            storage.save(&sample_report("abc123")).await.unwrap();
            let loaded = storage.load("abc123").await.unwrap();
            assert_eq!(loaded.name, "abc123");
            assert_eq!(loaded.trace_id, "trace-1");
            assert_eq!(loaded.version, "1.0");
            assert_eq!(loaded.summary.duration_ms, 42);
        }

        #[tokio::test]
        async fn sanitizes_path_traversal_attempts() {
            let dir = tempfile::tempdir().unwrap();
            let storage = TraceStorage::new(dir.path());
            storage.save(&sample_report("../../etc/passwd")).await.unwrap();

            assert!(!dir.path().parent().unwrap().join("etc").exists());
            assert_eq!(sanitize_name("../../etc/passwd"), "____etc_passwd");
            assert!(storage.path_for("../../etc/passwd").starts_with(dir.path()));
        }

        #[tokio::test]
        async fn list_returns_summaries() {
            let dir = tempfile::tempdir().unwrap();
            let storage = TraceStorage::new(dir.path());
            storage.save(&sample_report("one")).await.unwrap();
            storage.save(&sample_report("two")).await.unwrap();

            let mut summaries = storage.list().await.unwrap();
            summaries.sort_by(|a, b| a.name.cmp(&b.name));
            assert_eq!(summaries.len(), 2);
            assert_eq!(summaries[0].name, "one");
            assert_eq!(summaries[0].trace_id, "trace-1");
            assert_eq!(summaries[0].group, "group");
            assert_eq!(summaries[0].entry_count, 0);
        }

        #[tokio::test]
        async fn delete_missing_report_is_not_found() {
            let dir = tempfile::tempdir().unwrap();
            let storage = TraceStorage::new(dir.path());
            assert!(storage.delete("nope").await.is_err());
            assert!(storage.load("nope").await.is_err());
        }

        #[tokio::test]
        async fn delete_older_than_removes_only_expired_reports() {
            let dir = tempfile::tempdir().unwrap();
            let storage = TraceStorage::new(dir.path());
            let mut old_report = sample_report("old");
            old_report.created_at = Utc::now() - ChronoDuration::days(30);
            storage.save(&old_report).await.unwrap();
            storage.save(&sample_report("fresh")).await.unwrap();

            let deleted = storage.delete_older_than(Utc::now() - ChronoDuration::days(7)).await.unwrap();
            assert_eq!(deleted, 1);
            let summaries = storage.list().await.unwrap();
            assert_eq!(summaries.len(), 1);
            assert_eq!(summaries[0].name, "fresh");
        }
    }
}
