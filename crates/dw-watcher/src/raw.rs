//! Raw per-directory watching.
//!
//! A [`RawWatcher`] owns exactly one OS-level watch registration on one
//! directory and runs a dedicated worker thread that converts platform
//! notifications into typed [`ChangeEvent`]s. Registration is retried at
//! a fixed interval while the directory does not exist, and re-attempted
//! when the registration is invalidated by the directory disappearing.
//!
//! The worker never propagates errors to the caller: `start` returns
//! immediately and all failures surface as log output, per the retry
//! policy in [`RetryConfig`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use camino::Utf8PathBuf;
use notify::{RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use dw_core::RetryConfig;

use crate::error::WatchError;
use crate::events::{ChangeEvent, map_notify_event};

/// How long `stop` waits for the worker thread to exit before logging
/// and abandoning it.
pub(crate) const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the worker wakes from its blocking receive to check for
/// shutdown and for disappearance of the watched directory.
const RECV_POLL: Duration = Duration::from_millis(500);

/// Receiver of typed change events.
///
/// Implementations are called from the watcher's worker thread and must
/// not block or panic; a slow sink stalls event reception for its path.
pub trait EventSink: Send + Sync + 'static {
    /// Accepts one change event, in OS-delivery order.
    fn handle_event(&self, event: ChangeEvent);
}

/// Waits for a worker to signal completion, joining it if it does and
/// abandoning it with a warning if it does not.
///
/// Worker loops send on their done channel as the last thing they do,
/// so a successful receive means the join below is immediate.
pub(crate) fn join_bounded(
    name: &str,
    handle: JoinHandle<()>,
    done_rx: &Receiver<()>,
    timeout: Duration,
) {
    match done_rx.recv_timeout(timeout) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
            if handle.join().is_err() {
                error!(thread = name, "worker thread panicked");
            }
        }
        Err(RecvTimeoutError::Timeout) => {
            warn!(
                thread = name,
                timeout_ms = timeout.as_millis() as u64,
                "worker did not stop within timeout, abandoning"
            );
            drop(handle);
        }
    }
}

/// Sleeps in small slices so a shutdown request is honored promptly.
fn sleep_checking(total: Duration, shutdown: &AtomicBool) {
    const SLICE: Duration = Duration::from_millis(250);
    let mut remaining = total;
    while !remaining.is_zero() && !shutdown.load(Ordering::Relaxed) {
        let nap = remaining.min(SLICE);
        thread::sleep(nap);
        remaining -= nap;
    }
}

/// A watch on a single directory's immediate children.
///
/// Owns one notify registration and one worker thread. Created in the
/// unstarted state; [`start`](Self::start) spawns the worker and returns
/// immediately, [`stop`](Self::stop) signals termination and waits a
/// bounded time for the worker to exit.
///
/// # Lifecycle
///
/// ```text
/// Unregistered ──start()──► Registering ──► Active ──► (events)
///                               ▲              │
///                               └── retry ─────┘  (dir missing / invalidated)
/// ```
pub struct RawWatcher {
    dir: Utf8PathBuf,
    retry: RetryConfig,
    sink: Arc<dyn EventSink>,
    shutdown: Arc<AtomicBool>,
    worker: Option<(JoinHandle<()>, Receiver<()>)>,
}

impl RawWatcher {
    /// Creates an unstarted watcher for `dir`, delivering events to `sink`.
    #[must_use]
    pub fn new(dir: Utf8PathBuf, retry: RetryConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            dir,
            retry,
            sink,
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// The directory this watcher observes.
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Utf8PathBuf {
        &self.dir
    }

    /// Returns `true` if the worker thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|(handle, _)| !handle.is_finished())
    }

    /// Spawns the worker thread and returns immediately.
    ///
    /// The directory does not need to exist yet; registration is retried
    /// until it does. Calling `start` on a running watcher is a no-op.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            return;
        }
        // Each generation of worker gets its own flag; a worker
        // abandoned by a timed-out stop must keep seeing its stop
        // request rather than a reset one.
        let shutdown = Arc::new(AtomicBool::new(false));
        self.shutdown = Arc::clone(&shutdown);

        let dir = self.dir.clone();
        let retry = self.retry;
        let sink = Arc::clone(&self.sink);
        let (done_tx, done_rx) = mpsc::channel();

        let name = format!("watch({dir})");
        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            run_watch_loop(&dir, retry, sink.as_ref(), &shutdown);
            let _ = done_tx.send(());
        });
        match spawned {
            Ok(handle) => self.worker = Some((handle, done_rx)),
            Err(e) => error!(thread = %name, error = %e, "failed to spawn watch worker"),
        }
    }

    /// Signals the worker to terminate and waits up to [`STOP_TIMEOUT`]
    /// for it to exit.
    ///
    /// A worker that does not exit in time is logged and abandoned
    /// rather than blocking shutdown. Idempotent.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some((handle, done_rx)) = self.worker.take() {
            join_bounded(&format!("watch({})", self.dir), handle, &done_rx, STOP_TIMEOUT);
        }
    }
}

impl Drop for RawWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for RawWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawWatcher")
            .field("dir", &self.dir)
            .field("is_running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Attempts to create a notify watcher registered on `dir`.
fn register(
    dir: &Utf8PathBuf,
    tx: mpsc::Sender<Result<notify::Event, notify::Error>>,
) -> Result<notify::RecommendedWatcher, WatchError> {
    let mut watcher = notify::recommended_watcher(tx)?;
    watcher.watch(dir.as_std_path(), RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// The worker loop: register, receive, classify, retry.
///
/// Only the first missing-path failure after a successful registration
/// is logged; subsequent retries are silent until the directory appears.
fn run_watch_loop(
    dir: &Utf8PathBuf,
    retry: RetryConfig,
    sink: &dyn EventSink,
    shutdown: &AtomicBool,
) {
    let mut log_missing = true;

    'register: while !shutdown.load(Ordering::Relaxed) {
        let (tx, rx) = mpsc::channel();
        let _watcher = match register(dir, tx) {
            Ok(w) => {
                debug!(dir = %dir, "watch registered");
                log_missing = true;
                w
            }
            Err(e) if e.is_missing_path() => {
                if log_missing {
                    warn!(dir = %dir, "watch dir does not exist, waiting for it to exist");
                    log_missing = false;
                }
                sleep_checking(retry.missing_path(), shutdown);
                continue 'register;
            }
            Err(e) => match retry.after_error() {
                Some(pause) => {
                    warn!(dir = %dir, error = %e, "error registering watch, retrying");
                    sleep_checking(pause, shutdown);
                    continue 'register;
                }
                None => {
                    error!(dir = %dir, error = %e, "error registering watch, no recovery configured, worker exiting");
                    return;
                }
            },
        };

        // Receive loop for this registration. The watcher handle must
        // stay alive for its duration.
        loop {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            match rx.recv_timeout(RECV_POLL) {
                Ok(Ok(event)) => match map_notify_event(dir, &event) {
                    Ok(changes) => {
                        for change in changes {
                            sink.handle_event(change);
                        }
                    }
                    Err(e) => warn!(dir = %dir, error = %e, "skipping unmappable notification"),
                },
                Ok(Err(e)) => {
                    let e = WatchError::from(e);
                    match retry.after_error() {
                        Some(pause) => {
                            warn!(dir = %dir, error = %e, "watch error, re-creating the watch");
                            sleep_checking(pause, shutdown);
                            continue 'register;
                        }
                        None => {
                            error!(dir = %dir, error = %e, "watch error, no recovery configured, worker exiting");
                            return;
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    // The registration silently dies with the directory on
                    // some platforms; poll for disappearance.
                    if !dir.as_std_path().exists() {
                        warn!(dir = %dir, "watch dir disappeared, re-registering");
                        continue 'register;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!(dir = %dir, "notification channel closed, re-registering");
                    continue 'register;
                }
            }
        }
    }
    info!(dir = %dir, "watch worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::fs;
    use std::time::Instant;
    use tempfile::TempDir;

    struct Collect(Mutex<Vec<ChangeEvent>>);

    impl Collect {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Vec::new())))
        }

        fn names(&self) -> Vec<String> {
            self.0.lock().iter().map(|e| e.name.clone()).collect()
        }
    }

    impl EventSink for Collect {
        fn handle_event(&self, event: ChangeEvent) {
            self.0.lock().push(event);
        }
    }

    fn wait_until(deadline: Duration, mut pred: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if pred() {
                return true;
            }
            thread::sleep(Duration::from_millis(25));
        }
        pred()
    }

    fn utf8_dir(tmp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_start_stop_idempotent() {
        let tmp = TempDir::new().unwrap();
        let sink = Collect::new();
        let mut watcher = RawWatcher::new(utf8_dir(&tmp), RetryConfig::default(), sink);

        watcher.start();
        watcher.start(); // no-op
        assert!(watcher.is_running());

        watcher.stop();
        watcher.stop(); // no-op
        assert!(!watcher.is_running());
    }

    #[test]
    fn test_receives_create_events() {
        let tmp = TempDir::new().unwrap();
        let sink = Collect::new();
        let events: Arc<dyn EventSink> = Arc::<Collect>::clone(&sink);
        let mut watcher = RawWatcher::new(utf8_dir(&tmp), RetryConfig::default(), events);
        watcher.start();

        // Give the registration a moment before generating activity.
        thread::sleep(Duration::from_millis(200));
        fs::write(tmp.path().join("hello.txt"), b"hi").unwrap();

        let seen = wait_until(Duration::from_secs(3), || {
            sink.names().iter().any(|n| n == "hello.txt")
        });
        watcher.stop();
        assert!(seen, "expected an event for hello.txt, got {:?}", sink.names());
    }

    #[test]
    fn test_restart_uses_fresh_shutdown_flag() {
        let tmp = TempDir::new().unwrap();
        let sink = Collect::new();
        let events: Arc<dyn EventSink> = Arc::<Collect>::clone(&sink);
        let mut watcher = RawWatcher::new(utf8_dir(&tmp), RetryConfig::default(), events);

        watcher.start();
        watcher.stop();
        // The stop request above must not bleed into the next worker
        // generation.
        watcher.start();
        assert!(watcher.is_running());

        thread::sleep(Duration::from_millis(200));
        fs::write(tmp.path().join("second-life.txt"), b"x").unwrap();

        let seen = wait_until(Duration::from_secs(3), || {
            sink.names().iter().any(|n| n == "second-life.txt")
        });
        watcher.stop();
        assert!(seen, "restarted watcher should deliver events, got {:?}", sink.names());
    }

    #[test]
    fn test_missing_dir_registers_when_created() {
        let tmp = TempDir::new().unwrap();
        let target = utf8_dir(&tmp).join("later");
        let sink = Collect::new();
        let retry = RetryConfig {
            missing_path_ms: 100,
            ..RetryConfig::default()
        };
        let events: Arc<dyn EventSink> = Arc::<Collect>::clone(&sink);
        let mut watcher = RawWatcher::new(target.clone(), retry, events);
        watcher.start();

        // Worker is in the registering state; now create the directory.
        thread::sleep(Duration::from_millis(250));
        fs::create_dir(target.as_std_path()).unwrap();
        thread::sleep(Duration::from_millis(400));
        fs::write(target.join("born.txt").as_std_path(), b"x").unwrap();

        let seen = wait_until(Duration::from_secs(4), || {
            sink.names().iter().any(|n| n == "born.txt")
        });
        watcher.stop();
        assert!(seen, "expected an event after the dir appeared, got {:?}", sink.names());
    }
}
