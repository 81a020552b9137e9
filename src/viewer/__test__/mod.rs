#[cfg(test)]
mod __test__ {
    use crate::deriver::Deriver;
    use crate::error::{Error, Result};
    use crate::filter::FilterOptions;
    use crate::level::LogLevel;
    use crate::parser::{JsonParser, NoneParser};
    use crate::source::{LogSource, RawLine, RotatedFile, SourceStatus};
    use crate::viewer::Viewer;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    /// A source whose producer emits a canned set of lines, then waits
    /// for cancellation — enough to exercise start/stop and the
    /// parse-derive-buffer-fanout pipeline without real I/O.
    struct CannedSource {
        lines: Vec<String>,
    }

    impl CannedSource {
        fn new(lines: &[&str]) -> Self {
            CannedSource { lines: lines.iter().map(|s| s.to_string()).collect() }
        }
    }

    #[async_trait]
    impl LogSource for CannedSource {
        fn name(&self) -> String {
            "canned".to_string()
        }

        async fn start(
            &self,
            ctx: CancellationToken,
            line_tx: mpsc::Sender<RawLine>,
            _err_tx: mpsc::Sender<Error>,
        ) -> Result<()> {
            let lines = self.lines.clone();
            tokio::spawn(async move {
                for line in lines {
                    if line_tx.send(RawLine::new(line)).await.is_err() {
                        return;
                    }
                }
                ctx.cancelled().await;
            });
            Ok(())
        }

        async fn stop(&self) {}

        fn status(&self) -> SourceStatus {
            SourceStatus::default()
        }

        async fn list_rotated_files(&self, _ctx: &CancellationToken) -> Result<Vec<RotatedFile>> {
            Ok(Vec::new())
        }

        async fn read_range(
            &self,
            _ctx: CancellationToken,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            line_tx: mpsc::Sender<RawLine>,
            grep: Option<String>,
            _grep_before: usize,
            _grep_after: usize,
        ) -> Result<()> {
            for line in &self.lines {
                if let Some(g) = &grep {
                    if !line.contains(g.as_str()) {
                        continue;
                    }
                }
                if line_tx.send(RawLine::new(line.clone())).await.is_err() {
                    break;
                }
            }
            Ok(())
        }
    }

    fn make_viewer(lines: &[&str]) -> Arc<Viewer> {
        Arc::new(Viewer::new("test-viewer", Arc::new(CannedSource::new(lines)), Arc::new(NoneParser), Deriver::default(), 100))
    }

    async fn wait_for_entries(viewer: &Viewer, n: usize) {
        for _ in 0..100 {
            if viewer.buffer().len() >= n {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn start_is_idempotent_and_ingests_lines() {
        let viewer = make_viewer(&["line one", "line two"]);
        viewer.start(CancellationToken::new()).await.unwrap();
        viewer.start(CancellationToken::new()).await.unwrap();

        wait_for_entries(&viewer, 2).await;
        let entries = viewer.get_recent(10);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "line one");
        // every forwarded line keeps its bytes intact and its producer
        assert_eq!(entries[0].raw, "line one");
        assert_eq!(entries[0].source, "test-viewer");

        viewer.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_a_noop_before_start() {
        let viewer = make_viewer(&["only line"]);
        viewer.stop().await;
        assert!(!viewer.is_started());

        viewer.start(CancellationToken::new()).await.unwrap();
        wait_for_entries(&viewer, 1).await;
        viewer.stop().await;
        viewer.stop().await;
        assert!(!viewer.is_started());
    }

    #[tokio::test]
    async fn viewer_can_restart_after_stop() {
        let viewer = make_viewer(&["a"]);
        viewer.start(CancellationToken::new()).await.unwrap();
        wait_for_entries(&viewer, 1).await;
        viewer.stop().await;

        viewer.start(CancellationToken::new()).await.unwrap();
        wait_for_entries(&viewer, 2).await;
        assert_eq!(viewer.buffer().len(), 2);
        viewer.stop().await;
    }

    #[tokio::test]
    async fn subscribers_receive_ingested_entries() {
        let viewer = make_viewer(&["hello"]);
        let mut rx = viewer.subscribe();
        assert_eq!(viewer.subscriber_count(), 1);
        viewer.start(CancellationToken::new()).await.unwrap();

        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.message, "hello");
        assert!(entry.sequence > 0);
        viewer.stop().await;
    }

    #[tokio::test]
    async fn get_entries_applies_the_filter() {
        let viewer = make_viewer(&["a", "b"]);
        viewer.start(CancellationToken::new()).await.unwrap();
        wait_for_entries(&viewer, 2).await;

        let opts = FilterOptions { levels: Some(vec![LogLevel::Error]), ..Default::default() };
        assert!(viewer.get_entries(&opts, 10).is_empty());

        let all = FilterOptions::default();
        assert_eq!(viewer.get_entries(&all, 10).len(), 2);
        viewer.stop().await;
    }

    #[tokio::test]
    async fn error_receiver_is_handed_out_once_per_run() {
        let viewer = make_viewer(&["x"]);
        assert!(viewer.take_error_receiver().is_none());
        viewer.start(CancellationToken::new()).await.unwrap();
        assert!(viewer.take_error_receiver().is_some());
        assert!(viewer.take_error_receiver().is_none());
        viewer.stop().await;
    }

    #[tokio::test]
    async fn get_historical_entries_parses_within_window() {
        let viewer = make_viewer(&["only line"]);
        let start = Utc::now() - chrono::Duration::hours(1);
        let end = Utc::now() + chrono::Duration::hours(1);
        let (entries, err) =
            viewer.get_historical_entries(CancellationToken::new(), start, end, None, 10, None, 0, 0).await;
        assert!(err.is_none());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "only line");
        assert_eq!(entries[0].source, "test-viewer");
    }

    #[tokio::test]
    async fn get_historical_entries_discards_out_of_window_timestamps() {
        let source = CannedSource::new(&[
            r#"{"timestamp":"2024-01-01T00:00:00Z","message":"too old"}"#,
            r#"{"timestamp":"2024-06-01T00:00:00Z","message":"in window"}"#,
            r#"{"timestamp":"2024-12-01T00:00:00Z","message":"too new"}"#,
        ]);
        let viewer = Arc::new(Viewer::new(
            "windowed",
            Arc::new(source),
            Arc::new(JsonParser::default()),
            Deriver::default(),
            100,
        ));
        let start: DateTime<Utc> = "2024-05-01T00:00:00Z".parse().unwrap();
        let end: DateTime<Utc> = "2024-07-01T00:00:00Z".parse().unwrap();
        let (entries, err) =
            viewer.get_historical_entries(CancellationToken::new(), start, end, None, 0, None, 0, 0).await;
        assert!(err.is_none());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "in window");
    }

    #[tokio::test]
    async fn get_historical_entries_stops_at_limit() {
        let lines: Vec<String> = (0..50).map(|i| format!("line {i}")).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let viewer = make_viewer(&refs);
        let start = Utc::now() - chrono::Duration::hours(1);
        let end = Utc::now() + chrono::Duration::hours(1);
        let (entries, err) =
            viewer.get_historical_entries(CancellationToken::new(), start, end, None, 5, None, 0, 0).await;
        assert!(err.is_none());
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].message, "line 0");
    }

    #[tokio::test]
    async fn get_historical_entries_surfaces_producer_error_with_partial_result() {
        struct FailingSource;

        #[async_trait]
        impl LogSource for FailingSource {
            fn name(&self) -> String {
                "failing".to_string()
            }

            async fn start(
                &self,
                _ctx: CancellationToken,
                _line_tx: mpsc::Sender<RawLine>,
                _err_tx: mpsc::Sender<Error>,
            ) -> Result<()> {
                Ok(())
            }

            async fn stop(&self) {}

            fn status(&self) -> SourceStatus {
                SourceStatus::default()
            }

            async fn list_rotated_files(&self, _ctx: &CancellationToken) -> Result<Vec<RotatedFile>> {
                Ok(Vec::new())
            }

            async fn read_range(
                &self,
                _ctx: CancellationToken,
                _start: DateTime<Utc>,
                _end: DateTime<Utc>,
                line_tx: mpsc::Sender<RawLine>,
                _grep: Option<String>,
                _grep_before: usize,
                _grep_after: usize,
            ) -> Result<()> {
                let _ = line_tx.send(RawLine::new("partial line")).await;
                Err(Error::transient("failing", "failing", "stream broke"))
            }
        }

        let viewer =
            Arc::new(Viewer::new("partial", Arc::new(FailingSource), Arc::new(NoneParser), Deriver::default(), 100));
        let start = Utc::now() - chrono::Duration::hours(1);
        let end = Utc::now() + chrono::Duration::hours(1);
        let (entries, err) =
            viewer.get_historical_entries(CancellationToken::new(), start, end, None, 0, None, 0, 0).await;
        assert_eq!(entries.len(), 1, "partial results survive the error");
        assert!(err.is_some());
    }
}
