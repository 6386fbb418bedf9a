//! Per-path event buffering.
//!
//! A [`BufferedWatcher`] wraps a [`RawWatcher`] and turns its per-event
//! stream into periodic [`EventBatch`]es: events accumulate in a queue,
//! and a monitor thread flushes them to a [`BatchSink`] when the buffer
//! grows past `max_events` or has sat non-empty past the idle timeout.
//!
//! The monitor polls at a tenth of the idle timeout instead of arming a
//! precise timer; this sidesteps timer cancellation races when events
//! keep arriving.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use dw_core::{BufferConfig, RetryConfig};

use crate::events::{ChangeEvent, EventBatch};
use crate::raw::{EventSink, RawWatcher, join_bounded};

/// How long `stop` waits for the monitor thread to exit.
const MONITOR_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Receiver of flushed event batches.
///
/// Called from the buffering monitor thread (one per watched path), so
/// implementations may run concurrently across paths and must be
/// `Send + Sync`. A panicking implementation is caught and logged; the
/// monitor keeps running.
pub trait BatchSink: Send + Sync + 'static {
    /// Accepts one ordered batch of at most `max_events` events.
    ///
    /// The batch is owned by the recipient; the watcher never touches
    /// it again.
    fn on_batch(&self, batch: EventBatch);
}

/// The flush decision, separated from the threads that act on it.
///
/// Flush when the buffer exceeds `max_events`, or when it is non-empty
/// and the idle timeout has elapsed since the last flush.
#[derive(Debug)]
struct FlushGate {
    timeout: Duration,
    max_events: usize,
    last_flush: Instant,
}

impl FlushGate {
    fn new(config: &BufferConfig) -> Self {
        Self {
            timeout: config.flush_timeout(),
            max_events: config.max_events,
            last_flush: Instant::now(),
        }
    }

    fn should_flush(&self, pending: usize, now: Instant) -> bool {
        pending > self.max_events
            || (pending > 0 && now.duration_since(self.last_flush) > self.timeout)
    }

    fn note_flush(&mut self, now: Instant) {
        self.last_flush = now;
    }
}

/// Appends incoming events to the shared queue.
///
/// This is the only work done on the raw watcher's thread; it never
/// blocks beyond the queue lock.
struct QueueSink(Arc<Mutex<VecDeque<ChangeEvent>>>);

impl EventSink for QueueSink {
    fn handle_event(&self, event: ChangeEvent) {
        self.0.lock().push_back(event);
    }
}

/// A buffering watcher for one directory.
///
/// Composes a [`RawWatcher`] (producer thread) with a monitor thread
/// (consumer) over a shared queue. Within one path, events are flushed
/// in the order received, never reordered and never duplicated by this
/// layer.
///
/// # Shutdown
///
/// [`stop`](Self::stop) terminates the monitor first, then the raw
/// watcher, then drains whatever is still queued through the sink
/// (flush-before-stop), so a stopped or replaced watcher never silently
/// drops in-flight events. Idempotent.
pub struct BufferedWatcher<S: BatchSink> {
    raw: RawWatcher,
    config: BufferConfig,
    queue: Arc<Mutex<VecDeque<ChangeEvent>>>,
    sink: Arc<S>,
    monitor: Option<(JoinHandle<()>, Receiver<()>)>,
    monitor_stop: Option<Sender<()>>,
}

impl<S: BatchSink> BufferedWatcher<S> {
    /// Creates an unstarted buffering watcher for `dir`.
    #[must_use]
    pub fn new(dir: Utf8PathBuf, config: BufferConfig, retry: RetryConfig, sink: Arc<S>) -> Self {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let raw = RawWatcher::new(dir, retry, Arc::new(QueueSink(Arc::clone(&queue))));
        Self {
            raw,
            config,
            queue,
            sink,
            monitor: None,
            monitor_stop: None,
        }
    }

    /// The directory this watcher observes.
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Utf8PathBuf {
        self.raw.dir()
    }

    /// Number of events currently queued and not yet flushed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Starts the raw watcher and the flush monitor. No-op if running.
    pub fn start(&mut self) {
        if self.monitor.is_some() {
            return;
        }
        self.raw.start();

        let queue = Arc::clone(&self.queue);
        let sink = Arc::clone(&self.sink);
        let config = self.config;
        let (stop_tx, stop_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let name = format!("buffer-monitor({})", self.raw.dir());
        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            run_monitor_loop(&config, &queue, sink.as_ref(), &stop_rx);
            let _ = done_tx.send(());
        });
        match spawned {
            Ok(handle) => {
                self.monitor = Some((handle, done_rx));
                self.monitor_stop = Some(stop_tx);
            }
            Err(e) => error!(thread = %name, error = %e, "failed to spawn buffer monitor"),
        }
    }

    /// Stops the monitor, then the raw watcher, then flushes any events
    /// still queued.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.monitor_stop.take() {
            let _ = stop_tx.send(());
        }
        if let Some((handle, done_rx)) = self.monitor.take() {
            join_bounded(
                &format!("buffer-monitor({})", self.raw.dir()),
                handle,
                &done_rx,
                MONITOR_STOP_TIMEOUT,
            );
        }
        self.raw.stop();

        // Flush-before-stop: deliver whatever the monitor had not
        // gotten to, still chunked at max_events.
        let drained = drain_queue(&self.queue, self.sink.as_ref(), self.config.max_events);
        if drained > 0 {
            debug!(dir = %self.raw.dir(), events = drained, "flushed pending events on stop");
        }
    }
}

impl<S: BatchSink> Drop for BufferedWatcher<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<S: BatchSink> std::fmt::Debug for BufferedWatcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedWatcher")
            .field("dir", self.raw.dir())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

/// The monitor loop: poll at `timeout/10`, flush when the gate says so.
fn run_monitor_loop<S: BatchSink>(
    config: &BufferConfig,
    queue: &Mutex<VecDeque<ChangeEvent>>,
    sink: &S,
    stop_rx: &Receiver<()>,
) {
    let mut gate = FlushGate::new(config);
    loop {
        match stop_rx.recv_timeout(config.poll_interval()) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        let pending = queue.lock().len();
        let now = Instant::now();
        if gate.should_flush(pending, now) {
            let drained = drain_queue(queue, sink, gate.max_events);
            trace!(events = drained, "flushed");
            gate.note_flush(Instant::now());
        }
    }
}

/// Swaps the queue contents out under the lock, then fires them in
/// chunks of at most `max_events`.
///
/// Firing happens outside the queue lock so `handle_event` never blocks
/// behind a slow sink. Returns the number of events delivered.
fn drain_queue<S: BatchSink>(
    queue: &Mutex<VecDeque<ChangeEvent>>,
    sink: &S,
    max_events: usize,
) -> usize {
    let drained: Vec<ChangeEvent> = {
        let mut guard = queue.lock();
        guard.drain(..).collect()
    };
    let total = drained.len();
    if total == 0 {
        return 0;
    }

    let chunk_size = max_events.max(1);
    let mut events = drained.into_iter();
    loop {
        let chunk: Vec<ChangeEvent> = events.by_ref().take(chunk_size).collect();
        if chunk.is_empty() {
            break;
        }
        let batch = EventBatch::from_events(chunk);
        if catch_unwind(AssertUnwindSafe(|| sink.on_batch(batch))).is_err() {
            error!("batch callback panicked, continuing");
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChangeKind, PathKind};
    use std::fs;
    use tempfile::TempDir;

    struct Batches(Mutex<Vec<EventBatch>>);

    impl Batches {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Vec::new())))
        }

        fn sizes(&self) -> Vec<usize> {
            self.0.lock().iter().map(EventBatch::len).collect()
        }

        fn all_names(&self) -> Vec<String> {
            self.0
                .lock()
                .iter()
                .flat_map(|b| b.iter().map(|e| e.name.clone()))
                .collect()
        }
    }

    impl BatchSink for Batches {
        fn on_batch(&self, batch: EventBatch) {
            self.0.lock().push(batch);
        }
    }

    fn event(name: &str) -> ChangeEvent {
        ChangeEvent::new(
            ChangeKind::Created,
            PathKind::File,
            Utf8PathBuf::from("/dir"),
            name,
        )
    }

    fn wait_until(deadline: Duration, mut pred: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if pred() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        pred()
    }

    #[test]
    fn test_flush_gate_size_threshold() {
        let config = BufferConfig {
            flush_timeout_ms: 1000,
            max_events: 5,
        };
        let gate = FlushGate::new(&config);
        let now = Instant::now();
        assert!(!gate.should_flush(0, now));
        assert!(!gate.should_flush(5, now));
        assert!(gate.should_flush(6, now));
    }

    #[test]
    fn test_flush_gate_idle_threshold() {
        let config = BufferConfig {
            flush_timeout_ms: 1000,
            max_events: 100,
        };
        let mut gate = FlushGate::new(&config);
        let later = Instant::now() + Duration::from_millis(1500);
        assert!(gate.should_flush(1, later));
        // Empty buffers never flush, no matter how long it has been.
        assert!(!gate.should_flush(0, later));

        gate.note_flush(later);
        assert!(!gate.should_flush(1, later));
    }

    #[test]
    fn test_drain_chunks_at_max_events() {
        let queue = Mutex::new(VecDeque::new());
        for i in 0..12 {
            queue.lock().push_back(event(&format!("f{i}")));
        }
        let sink = Batches::new();
        let delivered = drain_queue(&queue, sink.as_ref(), 5);

        assert_eq!(delivered, 12);
        assert_eq!(sink.sizes(), vec![5, 5, 2]);
        assert!(queue.lock().is_empty());

        // Order preserved across chunks.
        let names = sink.all_names();
        assert_eq!(names.first().map(String::as_str), Some("f0"));
        assert_eq!(names.last().map(String::as_str), Some("f11"));
    }

    #[test]
    fn test_drain_empty_queue_fires_nothing() {
        let queue = Mutex::new(VecDeque::new());
        let sink = Batches::new();
        assert_eq!(drain_queue(&queue, sink.as_ref(), 5), 0);
        assert!(sink.sizes().is_empty());
    }

    #[test]
    fn test_panicking_sink_does_not_stop_drain() {
        struct Panicky(Mutex<usize>);
        impl BatchSink for Panicky {
            fn on_batch(&self, _batch: EventBatch) {
                *self.0.lock() += 1;
                #[allow(clippy::panic)]
                {
                    panic!("consumer bug");
                }
            }
        }

        let queue = Mutex::new(VecDeque::new());
        for i in 0..6 {
            queue.lock().push_back(event(&format!("f{i}")));
        }
        let sink = Panicky(Mutex::new(0));
        let delivered = drain_queue(&queue, &sink, 3);
        assert_eq!(delivered, 6);
        // Both chunks were attempted despite the panics.
        assert_eq!(*sink.0.lock(), 2);
    }

    #[test]
    fn test_stop_flushes_pending_events() {
        let tmp = TempDir::new().unwrap();
        let dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        let sink = Batches::new();
        // Long timeout so the monitor will not flush on its own.
        let config = BufferConfig {
            flush_timeout_ms: 60_000,
            max_events: 100,
        };
        let mut watcher =
            BufferedWatcher::new(dir, config, RetryConfig::default(), Arc::clone(&sink));
        watcher.start();

        thread::sleep(Duration::from_millis(200));
        fs::write(tmp.path().join("pending.txt"), b"x").unwrap();
        wait_until(Duration::from_secs(3), || watcher.pending() > 0);

        watcher.stop();
        assert!(
            sink.all_names().iter().any(|n| n == "pending.txt"),
            "stop should flush queued events, got {:?}",
            sink.all_names()
        );
    }

    #[test]
    fn test_idle_flush_delivers_within_tolerance() {
        let tmp = TempDir::new().unwrap();
        let dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        let sink = Batches::new();
        let config = BufferConfig {
            flush_timeout_ms: 300,
            max_events: 100,
        };
        let mut watcher =
            BufferedWatcher::new(dir, config, RetryConfig::default(), Arc::clone(&sink));
        watcher.start();

        thread::sleep(Duration::from_millis(200));
        fs::write(tmp.path().join("idle.txt"), b"x").unwrap();

        let flushed = wait_until(Duration::from_secs(3), || !sink.sizes().is_empty());
        watcher.stop();
        assert!(flushed, "idle timeout should have flushed the buffer");
    }
}
