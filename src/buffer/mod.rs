//! Thread-safe bounded ring buffer of entries: a fixed `Vec<Option<T>>`
//! ring with a head pointer, guarded by a read/write lock so concurrent
//! readers can serve the timestamp- and sequence-indexed query shapes
//! without blocking each other.

mod __test__;

use crate::entry::Entry;
use crate::filter::Filter;
use chrono::{DateTime, Utc};
use std::sync::RwLock;

const DEFAULT_CAPACITY: usize = 100_000;

struct Inner {
    capacity: usize,
    slots: Vec<Option<Entry>>,
    /// Index the next `add` will write to.
    next_write: usize,
    size: usize,
    sequence: u64,
}

impl Inner {
    fn oldest_index(&self) -> usize {
        if self.size < self.capacity {
            0
        } else {
            self.next_write
        }
    }

    /// Indices of all live entries, oldest first.
    fn chronological_indices(&self) -> Vec<usize> {
        let oldest = self.oldest_index();
        (0..self.size).map(|i| (oldest + i) % self.capacity).collect()
    }

    fn push_one(&mut self, mut entry: Entry) -> u64 {
        self.sequence += 1;
        entry.sequence = self.sequence;
        let idx = self.next_write;
        self.slots[idx] = Some(entry);
        self.next_write = (self.next_write + 1) % self.capacity;
        if self.size < self.capacity {
            self.size += 1;
        }
        self.sequence
    }
}

pub struct RingBuffer {
    inner: RwLock<Inner>,
}

impl RingBuffer {
    /// Capacity defaults to 100000 when zero or negative is supplied.
    pub fn new(capacity: i64) -> Self {
        let capacity = if capacity <= 0 { DEFAULT_CAPACITY } else { capacity as usize };
        Inner {
            capacity,
            slots: vec![None; capacity],
            next_write: 0,
            size: 0,
            sequence: 0,
        }
        .into()
    }

    /// Assigns `entry.sequence`, writes at head, advances head modulo
    /// capacity. Returns the assigned sequence number.
    pub fn add(&self, entry: Entry) -> u64 {
        let mut inner = self.inner.write().unwrap();
        inner.push_one(entry)
    }

    /// Equivalent to N atomic `add`s under a single lock acquisition;
    /// sequences are contiguous.
    pub fn add_batch(&self, entries: Vec<Entry>) -> Vec<u64> {
        let mut inner = self.inner.write().unwrap();
        entries.into_iter().map(|e| inner.push_one(e)).collect()
    }

    /// Up to `limit` most-recent entries in chronological order. `limit
    /// == 0` means all.
    pub fn get(&self, limit: usize) -> Vec<Entry> {
        let inner = self.inner.read().unwrap();
        let indices = inner.chronological_indices();
        let indices = take_suffix(&indices, limit);
        indices.iter().map(|&i| inner.slots[i].clone().unwrap()).collect()
    }

    /// Scans chronologically and returns the first `limit` matches.
    /// `limit == 0` means unlimited.
    pub fn get_filtered(&self, filter: &dyn Filter, limit: usize) -> Vec<Entry> {
        let inner = self.inner.read().unwrap();
        let mut out = Vec::new();
        for idx in inner.chronological_indices() {
            let entry = inner.slots[idx].as_ref().unwrap();
            if filter.matches(entry) {
                out.push(entry.clone());
                if limit > 0 && out.len() >= limit {
                    break;
                }
            }
        }
        out
    }

    /// Entries with `sequence > seq`, chronological order, limited.
    pub fn get_after(&self, seq: u64, limit: usize) -> Vec<Entry> {
        let inner = self.inner.read().unwrap();
        let mut out = Vec::new();
        for idx in inner.chronological_indices() {
            let entry = inner.slots[idx].as_ref().unwrap();
            if entry.sequence > seq {
                out.push(entry.clone());
                if limit > 0 && out.len() >= limit {
                    break;
                }
            }
        }
        out
    }

    /// Up to `limit` entries with `sequence < seq`, chronological order
    /// (the newest such entries).
    pub fn get_before(&self, seq: u64, limit: usize) -> Vec<Entry> {
        let inner = self.inner.read().unwrap();
        let matching: Vec<&Entry> = inner
            .chronological_indices()
            .into_iter()
            .map(|i| inner.slots[i].as_ref().unwrap())
            .filter(|e| e.sequence < seq)
            .collect();
        let matching = take_suffix_refs(&matching, limit);
        matching.into_iter().cloned().collect()
    }

    /// Entries with `start <= timestamp <= end`, chronological order,
    /// limited. `limit == 0` means unlimited.
    pub fn get_range(&self, start: DateTime<Utc>, end: DateTime<Utc>, limit: usize) -> Vec<Entry> {
        let inner = self.inner.read().unwrap();
        let mut out = Vec::new();
        for idx in inner.chronological_indices() {
            let entry = inner.slots[idx].as_ref().unwrap();
            if entry.timestamp >= start && entry.timestamp <= end {
                out.push(entry.clone());
                if limit > 0 && out.len() >= limit {
                    break;
                }
            }
        }
        out
    }

    /// Up to `limit` entries strictly before `t`, chronological order.
    /// Linear in `size`: scan newest-first and stop as soon as `limit`
    /// is reached, then reverse once, rather than filtering the whole
    /// buffer and truncating.
    pub fn get_before_time(&self, t: DateTime<Utc>, limit: usize) -> Vec<Entry> {
        let inner = self.inner.read().unwrap();
        let indices = inner.chronological_indices();
        let mut out = Vec::new();
        for &idx in indices.iter().rev() {
            let entry = inner.slots[idx].as_ref().unwrap();
            if entry.timestamp < t {
                out.push(entry.clone());
                if limit > 0 && out.len() >= limit {
                    break;
                }
            }
        }
        out.reverse();
        out
    }

    /// Empties the buffer but preserves the sequence counter.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        let capacity = inner.capacity;
        inner.slots = vec![None; capacity];
        inner.next_write = 0;
        inner.size = 0;
    }

    pub fn oldest_timestamp(&self) -> DateTime<Utc> {
        let inner = self.inner.read().unwrap();
        if inner.size == 0 {
            return zero_time();
        }
        inner.slots[inner.oldest_index()].as_ref().unwrap().timestamp
    }

    pub fn newest_timestamp(&self) -> DateTime<Utc> {
        let inner = self.inner.read().unwrap();
        if inner.size == 0 {
            return zero_time();
        }
        let newest = (inner.next_write + inner.capacity - 1) % inner.capacity;
        inner.slots[newest].as_ref().unwrap().timestamp
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().unwrap().capacity
    }
}

impl From<Inner> for RingBuffer {
    fn from(inner: Inner) -> Self {
        RingBuffer { inner: RwLock::new(inner) }
    }
}

fn zero_time() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(0, 0).unwrap()
}

fn take_suffix(items: &[usize], limit: usize) -> Vec<usize> {
    if limit == 0 || limit >= items.len() {
        items.to_vec()
    } else {
        items[items.len() - limit..].to_vec()
    }
}

fn take_suffix_refs<'a, T>(items: &[&'a T], limit: usize) -> Vec<&'a T> {
    if limit == 0 || limit >= items.len() {
        items.to_vec()
    } else {
        items[items.len() - limit..].to_vec()
    }
}
