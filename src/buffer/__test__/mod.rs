#[cfg(test)]
mod __test__ {
    use crate::buffer::RingBuffer;
    use crate::entry::Entry;
    use chrono::{Duration, Utc};

    fn msg(s: &str) -> Entry {
        Entry::from_raw(s, None)
    }

    #[test]
    fn wrap_evicts_oldest_first() {
        let buf = RingBuffer::new(5);
        for m in ["A", "B", "C", "D", "E", "F", "G", "H"] {
            buf.add(msg(m));
        }
        let got: Vec<String> = buf.get(0).into_iter().map(|e| e.message).collect();
        assert_eq!(got, vec!["D", "E", "F", "G", "H"]);
    }

    #[test]
    fn sequence_strictly_increases() {
        let buf = RingBuffer::new(3);
        let seqs: Vec<u64> = (0..10).map(|i| buf.add(msg(&i.to_string()))).collect();
        for w in seqs.windows(2) {
            assert!(w[1] > w[0]);
        }
    }

    #[test]
    fn clear_preserves_sequence_counter() {
        let buf = RingBuffer::new(3);
        buf.add(msg("a"));
        buf.add(msg("b"));
        buf.clear();
        assert_eq!(buf.len(), 0);
        let next = buf.add(msg("c"));
        assert_eq!(next, 3);
    }

    #[test]
    fn get_after_and_before() {
        let buf = RingBuffer::new(10);
        for i in 0..5 {
            buf.add(msg(&i.to_string()));
        }
        let after = buf.get_after(2, 0);
        assert_eq!(after.len(), 3);
        assert!(after.iter().all(|e| e.sequence > 2));

        let before = buf.get_before(4, 2);
        assert_eq!(before.len(), 2);
        assert!(before.iter().all(|e| e.sequence < 4));
        // newest-first selection, chronological order on return
        assert!(before[0].sequence < before[1].sequence);
    }

    #[test]
    fn get_range_by_timestamp() {
        let buf = RingBuffer::new(10);
        let base = Utc::now();
        for i in 0..5i64 {
            let mut e = msg(&i.to_string());
            e.timestamp = base + Duration::seconds(i);
            buf.add(e);
        }
        let got = buf.get_range(base + Duration::seconds(1), base + Duration::seconds(3), 0);
        let msgs: Vec<String> = got.into_iter().map(|e| e.message).collect();
        assert_eq!(msgs, vec!["1", "2", "3"]);
    }

    #[test]
    fn get_before_time_is_chronological_and_linear() {
        let buf = RingBuffer::new(100);
        let base = Utc::now();
        for i in 0..50i64 {
            let mut e = msg(&i.to_string());
            e.timestamp = base + Duration::seconds(i);
            buf.add(e);
        }
        let cutoff = base + Duration::seconds(40);
        let got = buf.get_before_time(cutoff, 5);
        let msgs: Vec<i64> = got.into_iter().map(|e| e.message.parse().unwrap()).collect();
        assert_eq!(msgs, vec![35, 36, 37, 38, 39]);
    }

    #[test]
    fn zero_capacity_defaults_to_large_default() {
        let buf = RingBuffer::new(0);
        assert_eq!(buf.capacity(), 100_000);
        let buf = RingBuffer::new(-5);
        assert_eq!(buf.capacity(), 100_000);
    }

    #[test]
    fn boundary_timestamps_on_empty_buffer_are_zero() {
        let buf = RingBuffer::new(10);
        assert_eq!(buf.oldest_timestamp().timestamp(), 0);
        assert_eq!(buf.newest_timestamp().timestamp(), 0);
    }

    #[test]
    fn add_batch_assigns_contiguous_sequences() {
        let buf = RingBuffer::new(10);
        let entries = (0..4).map(|i| msg(&i.to_string())).collect();
        let seqs = buf.add_batch(entries);
        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }

    #[test]
    fn get_filtered_returns_the_first_matches_in_order() {
        let buf = RingBuffer::new(10);
        for i in 0..8 {
            let mut e = msg(&format!("item {i}"));
            e.level = if i % 2 == 0 { crate::level::LogLevel::Error } else { crate::level::LogLevel::Info };
            buf.add(e);
        }
        let opts = crate::filter::FilterOptions {
            levels: Some(vec![crate::level::LogLevel::Error]),
            ..Default::default()
        };
        let got = buf.get_filtered(&opts, 2);
        let msgs: Vec<String> = got.into_iter().map(|e| e.message).collect();
        assert_eq!(msgs, vec!["item 0", "item 2"]);
    }
}
