#[cfg(test)]
mod __test__ {
    use crate::source::StatusTracker;

    #[test]
    fn status_tracker_starts_disconnected_with_no_error() {
        let tracker = StatusTracker::default();
        let status = tracker.snapshot();
        assert!(!status.connected);
        assert_eq!(status.lines_read, 0);
        assert_eq!(status.bytes_read, 0);
        assert!(status.last_error.is_none());
        assert!(status.last_connect_at.is_none());
    }

    #[test]
    fn status_tracker_tracks_connection_lines_and_bytes() {
        let tracker = StatusTracker::default();
        tracker.set_connected(true);
        tracker.record_line(10);
        tracker.record_line(25);
        let status = tracker.snapshot();
        assert!(status.connected);
        assert_eq!(status.lines_read, 2);
        assert_eq!(status.bytes_read, 35);
        assert!(status.last_connect_at.is_some());
    }

    #[test]
    fn status_tracker_error_can_be_set_and_cleared() {
        let tracker = StatusTracker::default();
        tracker.set_error("boom");
        let status = tracker.snapshot();
        assert_eq!(status.last_error, Some("boom".to_string()));
        assert!(status.last_error_at.is_some());
        tracker.clear_error();
        assert!(tracker.snapshot().last_error.is_none());
    }

    mod rotated_pruning {
        use crate::source::file::filter_relevant_files;
        use crate::source::RotatedFile;
        use chrono::{DateTime, Duration, TimeZone, Utc};

        fn file(name: &str, modified: DateTime<Utc>) -> RotatedFile {
            RotatedFile {
                name: name.to_string(),
                path: format!("/var/log/{name}"),
                size: 100,
                modified,
                compressed: name.ends_with(".gz"),
                start_time: None,
                end_time: None,
            }
        }

        fn base() -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
        }

        #[test]
        fn drops_files_entirely_older_than_the_window() {
            // newest first: rotated at +0h, -1d, -2d
            let files = vec![
                file("app.log.1", base()),
                file("app.log.2.gz", base() - Duration::days(1)),
                file("app.log.3.gz", base() - Duration::days(2)),
            ];
            let start = base() - Duration::hours(6);
            let (kept, newest) = filter_relevant_files(files, Some(start), Some(base()));
            let names: Vec<&str> = kept.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names, vec!["app.log.1"]);
            assert_eq!(newest, Some(base()));
        }

        #[test]
        fn drops_files_entirely_newer_than_the_window() {
            // the next-older file's mod-time approximates a file's first
            // entry, so app.log.1 is dropped when app.log.2's mod-time
            // is already past the window end
            let files = vec![
                file("app.log.1", base()),
                file("app.log.2", base() - Duration::hours(1)),
                file("app.log.3", base() - Duration::days(1)),
            ];
            let end = base() - Duration::hours(12);
            let (kept, _) = filter_relevant_files(files, None, Some(end));
            let names: Vec<&str> = kept.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names, vec!["app.log.3"]);
        }

        #[test]
        fn pruning_is_monotone_in_out_of_window_files() {
            // adding a file whose mod-time is outside the window never
            // adds it to the result
            let in_window = vec![file("app.log.1", base())];
            let start = base() - Duration::hours(1);
            let (kept_before, _) = filter_relevant_files(in_window.clone(), Some(start), Some(base()));

            let mut with_stale = in_window;
            with_stale.push(file("app.log.9", base() - Duration::days(30)));
            let (kept_after, _) = filter_relevant_files(with_stale, Some(start), Some(base()));

            let names_before: Vec<&str> = kept_before.iter().map(|f| f.name.as_str()).collect();
            let names_after: Vec<&str> = kept_after.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names_before, names_after);
        }

        #[test]
        fn open_bounds_keep_everything() {
            let files = vec![file("a", base()), file("b", base() - Duration::days(9))];
            let (kept, newest) = filter_relevant_files(files, None, None);
            assert_eq!(kept.len(), 2);
            assert_eq!(newest, Some(base()));
        }
    }

    mod ssh_remote {
        use crate::source::ssh::{build_timestamp_grep_pattern, shell_quote};
        use chrono::NaiveDate;

        #[test]
        fn partial_day_range_emits_one_prefix_per_hour() {
            let start = NaiveDate::from_ymd_opt(2026, 1, 12).unwrap().and_hms_opt(6, 30, 0).unwrap();
            let end = NaiveDate::from_ymd_opt(2026, 1, 12).unwrap().and_hms_opt(8, 15, 0).unwrap();
            assert_eq!(
                build_timestamp_grep_pattern(start, end),
                "(2026-01-12T06:|2026-01-12T07:|2026-01-12T08:)"
            );
        }

        #[test]
        fn aligned_single_day_emits_one_day_prefix() {
            let start = NaiveDate::from_ymd_opt(2026, 1, 12).unwrap().and_hms_opt(0, 0, 0).unwrap();
            let end = NaiveDate::from_ymd_opt(2026, 1, 12).unwrap().and_hms_opt(23, 59, 0).unwrap();
            assert_eq!(build_timestamp_grep_pattern(start, end), "2026-01-12T");
        }

        #[test]
        fn middle_days_are_full_even_between_partial_edges() {
            let start = NaiveDate::from_ymd_opt(2026, 1, 12).unwrap().and_hms_opt(22, 0, 0).unwrap();
            let end = NaiveDate::from_ymd_opt(2026, 1, 14).unwrap().and_hms_opt(1, 0, 0).unwrap();
            assert_eq!(
                build_timestamp_grep_pattern(start, end),
                "(2026-01-12T22:|2026-01-12T23:|2026-01-13T|2026-01-14T00:|2026-01-14T01:)"
            );
        }

        #[test]
        fn single_partial_hour_is_returned_bare() {
            let start = NaiveDate::from_ymd_opt(2026, 1, 12).unwrap().and_hms_opt(6, 30, 0).unwrap();
            let end = NaiveDate::from_ymd_opt(2026, 1, 12).unwrap().and_hms_opt(6, 45, 0).unwrap();
            assert_eq!(build_timestamp_grep_pattern(start, end), "2026-01-12T06:");
        }

        #[test]
        fn shell_quote_escapes_embedded_single_quotes() {
            assert_eq!(shell_quote("it's"), r"'it'\''s'");
        }
    }

    mod service {
        use crate::error::Result;
        use crate::source::service::{ServiceLogProvider, ServiceSource};
        use crate::source::{LogSource, RawLine};
        use async_trait::async_trait;
        use chrono::Utc;
        use std::sync::Arc;
        use tokio::sync::mpsc;
        use tokio_util::sync::CancellationToken;

        struct FixedProvider(Vec<&'static str>);

        #[async_trait]
        impl ServiceLogProvider for FixedProvider {
            async fn service_logs(&self, _name: &str, _n: usize) -> Result<Vec<String>> {
                Ok(self.0.iter().map(|s| s.to_string()).collect())
            }

            async fn service_log_size(&self, _name: &str) -> Result<usize> {
                Ok(self.0.len())
            }
        }

        async fn collect(source: &ServiceSource, grep: Option<&str>) -> Vec<String> {
            let (tx, mut rx) = mpsc::channel::<RawLine>(64);
            source
                .read_range(CancellationToken::new(), Utc::now(), Utc::now(), tx, grep.map(str::to_string), 0, 0)
                .await
                .unwrap();
            let mut out = Vec::new();
            while let Ok(line) = rx.try_recv() {
                out.push(line.text);
            }
            out
        }

        #[tokio::test]
        async fn read_range_drops_internal_marker_lines() {
            let source = ServiceSource::new(
                "billing",
                Arc::new(FixedProvider(vec!["[logmux] subscriber attached", "real line"])),
            );
            assert_eq!(collect(&source, None).await, vec!["real line"]);
        }

        #[tokio::test]
        async fn read_range_applies_grep_as_regex() {
            let source = ServiceSource::new(
                "billing",
                Arc::new(FixedProvider(vec!["order created", "order deleted", "noise"])),
            );
            assert_eq!(collect(&source, Some("order (created|deleted)")).await, vec!["order created", "order deleted"]);
        }

        #[tokio::test]
        async fn unparseable_grep_degrades_to_literal_match() {
            let source = ServiceSource::new("billing", Arc::new(FixedProvider(vec!["weird (pattern", "other"])));
            assert_eq!(collect(&source, Some("(pattern")).await, vec!["weird (pattern"]);
        }

        #[tokio::test]
        async fn name_carries_the_service_prefix() {
            let source = ServiceSource::new("billing", Arc::new(FixedProvider(vec![])));
            assert_eq!(source.name(), "service:billing");
        }

        #[tokio::test]
        async fn read_range_counts_forwarded_lines() {
            let source = ServiceSource::new("billing", Arc::new(FixedProvider(vec!["one", "two"])));
            collect(&source, None).await;
            let status = source.status();
            assert_eq!(status.lines_read, 2);
            assert_eq!(status.bytes_read, 6);
        }
    }

    mod line_truncation {
        use crate::source::file::truncate_line;

        #[test]
        fn short_lines_pass_through_unchanged() {
            assert_eq!(truncate_line("hello".to_string()), "hello");
        }

        #[test]
        fn oversized_lines_are_cut_and_marked() {
            let line = "x".repeat(2 * 1024 * 1024);
            let out = truncate_line(line);
            assert!(out.ends_with("... [truncated]"));
            assert!(out.len() < 2 * 1024 * 1024);
        }

        #[test]
        fn cut_lands_on_a_char_boundary() {
            let line = "é".repeat(1024 * 1024);
            let out = truncate_line(line);
            assert!(out.ends_with("... [truncated]"));
        }
    }
}
