//! Viewer: owns one source, parser, deriver and ring buffer, and fans
//! parsed entries out to live subscribers.

mod __test__;

use crate::buffer::RingBuffer;
use crate::deriver::Deriver;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::parser::Parser;
use crate::source::{LogSource, RawLine, SourceStatus};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const LINE_CHANNEL_CAPACITY: usize = 1000;
const ERROR_CHANNEL_CAPACITY: usize = 10;
/// Subscribers that fall behind lose their oldest unread entries; flow
/// control is the subscriber's responsibility, never the pipeline's.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 1024;

struct RunState {
    cancel: CancellationToken,
    consumer: Option<JoinHandle<()>>,
}

pub struct Viewer {
    name: String,
    source: Arc<dyn LogSource>,
    parser: Arc<dyn Parser>,
    deriver: Arc<Deriver>,
    buffer: Arc<RingBuffer>,
    subscribers: broadcast::Sender<Entry>,
    started: AtomicBool,
    run: Mutex<Option<RunState>>,
    /// Handed to the manager's monitor task on start; the source writes
    /// runtime errors here.
    error_rx: StdMutex<Option<mpsc::Receiver<Error>>>,
    last_access: StdMutex<DateTime<Utc>>,
}

impl Viewer {
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn LogSource>,
        parser: Arc<dyn Parser>,
        deriver: Deriver,
        buffer_capacity: i64,
    ) -> Self {
        let (subscribers, _) = broadcast::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        Viewer {
            name: name.into(),
            source,
            parser,
            deriver: Arc::new(deriver),
            buffer: Arc::new(RingBuffer::new(buffer_capacity)),
            subscribers,
            started: AtomicBool::new(false),
            run: Mutex::new(None),
            error_rx: StdMutex::new(None),
            last_access: StdMutex::new(Utc::now()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_name(&self) -> String {
        self.source.name()
    }

    pub fn touch(&self) {
        *self.last_access.lock().unwrap() = Utc::now();
    }

    /// Elapsed time since this viewer was last touched, used by the
    /// manager's idle-eviction sweep.
    pub fn idle_for(&self) -> std::time::Duration {
        let last = *self.last_access.lock().unwrap();
        (Utc::now() - last).to_std().unwrap_or_default()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Starts the source and the consumer pipeline under a child of
    /// `parent`. Calling this on an already-started viewer is a no-op.
    pub async fn start(self: &Arc<Self>, parent: CancellationToken) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let cancel = parent.child_token();
        let (line_tx, mut line_rx) = mpsc::channel::<RawLine>(LINE_CHANNEL_CAPACITY);
        let (err_tx, err_rx) = mpsc::channel::<Error>(ERROR_CHANNEL_CAPACITY);

        if let Err(e) = self.source.start(cancel.clone(), line_tx, err_tx).await {
            self.started.store(false, Ordering::SeqCst);
            return Err(e);
        }
        *self.error_rx.lock().unwrap() = Some(err_rx);

        let this = Arc::clone(self);
        let consumer_cancel = cancel.clone();
        let consumer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = consumer_cancel.cancelled() => break,
                    line = line_rx.recv() => match line {
                        Some(raw) => this.ingest(raw),
                        None => break,
                    },
                }
            }
        });

        *self.run.lock().await = Some(RunState { cancel, consumer: Some(consumer) });
        Ok(())
    }

    fn ingest(&self, raw: RawLine) {
        let mut entry = self.parser.parse(&raw.text);
        entry.source = self.name.clone();
        entry.offset = raw.offset;
        self.deriver.derive(&mut entry);
        let sequence = self.buffer.add(entry.clone());
        entry.sequence = sequence;
        let _ = self.subscribers.send(entry);
    }

    /// Stops the pipeline and joins it. Idempotent; a no-op before
    /// `start`.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        let state = self.run.lock().await.take();
        if let Some(mut state) = state {
            state.cancel.cancel();
            self.source.stop().await;
            if let Some(consumer) = state.consumer.take() {
                let _ = consumer.await;
            }
        }
        *self.error_rx.lock().unwrap() = None;
    }

    pub fn status(&self) -> SourceStatus {
        self.source.status()
    }

    /// Hands the current run's error stream to the caller (the
    /// manager's monitor task). Returns `None` if the viewer isn't
    /// running or the stream was already taken.
    pub fn take_error_receiver(&self) -> Option<mpsc::Receiver<Error>> {
        self.error_rx.lock().unwrap().take()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Entry> {
        self.subscribers.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.receiver_count()
    }

    pub fn get_entries(&self, filter: &dyn Filter, limit: usize) -> Vec<Entry> {
        self.buffer.get_filtered(filter, limit)
    }

    pub fn get_recent(&self, limit: usize) -> Vec<Entry> {
        self.buffer.get(limit)
    }

    pub fn get_entries_after(&self, seq: u64, limit: usize) -> Vec<Entry> {
        self.buffer.get_after(seq, limit)
    }

    pub fn get_entries_before(&self, seq: u64, limit: usize) -> Vec<Entry> {
        self.buffer.get_before(seq, limit)
    }

    pub fn get_entries_range(&self, start: DateTime<Utc>, end: DateTime<Utc>, limit: usize) -> Vec<Entry> {
        self.buffer.get_range(start, end, limit)
    }

    /// Reads historical entries for `[start, end]` from the source's
    /// archives: a producer task streams raw lines through the usual
    /// parse/derive path while this call consumes them, dropping
    /// entries outside the window or rejected by `filter`. Reaching
    /// `limit` (`0` means unlimited) cancels the producer and drains
    /// whatever it already queued.
    ///
    /// A partial result is returned alongside the producer's error when
    /// it failed mid-stream; callers should keep the entries even on
    /// error.
    #[allow(clippy::too_many_arguments)]
    pub async fn get_historical_entries(
        &self,
        ctx: CancellationToken,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: Option<&dyn Filter>,
        limit: usize,
        grep: Option<String>,
        grep_before: usize,
        grep_after: usize,
    ) -> (Vec<Entry>, Option<Error>) {
        self.touch();
        let child = ctx.child_token();
        let (line_tx, mut line_rx) = mpsc::channel::<RawLine>(LINE_CHANNEL_CAPACITY);
        let (done_tx, mut done_rx) = mpsc::channel::<Error>(1);

        let producer = {
            let source = Arc::clone(&self.source);
            let child = child.clone();
            tokio::spawn(async move {
                if let Err(e) = source.read_range(child, start, end, line_tx, grep, grep_before, grep_after).await {
                    if !e.is_cancelled() {
                        let _ = done_tx.send(e).await;
                    }
                }
            })
        };

        let mut entries = Vec::new();
        let mut limit_reached = false;
        while let Some(raw) = line_rx.recv().await {
            let mut entry = self.parser.parse(&raw.text);
            entry.source = self.name.clone();
            entry.offset = raw.offset;
            self.deriver.derive(&mut entry);
            if entry.timestamp < start || entry.timestamp > end {
                continue;
            }
            if let Some(filter) = filter {
                if !filter.matches(&entry) {
                    continue;
                }
            }
            entries.push(entry);
            if limit > 0 && entries.len() >= limit {
                limit_reached = true;
                break;
            }
        }

        if limit_reached {
            // release the producer, then drain so it can observe the
            // cancellation instead of blocking on a full channel
            child.cancel();
            while line_rx.recv().await.is_some() {}
        }

        let _ = producer.await;
        let error = done_rx.try_recv().ok();
        (entries, error)
    }

    pub fn clear_buffer(&self) {
        self.buffer.clear();
    }

    pub fn buffer(&self) -> &Arc<RingBuffer> {
        &self.buffer
    }
}
