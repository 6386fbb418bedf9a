//! Cross-path damping.
//!
//! A [`DampedRegistry`] layers one more round of coalescing on top of a
//! [`WatcherRegistry`]: batches flushed by *any* watched path land in a
//! single shared buffer, and one damper thread delivers the whole
//! accumulation to a [`DamperSink`] only once the entire watched set
//! has been quiet for the configured window.
//!
//! Without this layer a bulk operation touching many directories (a
//! checkout, an unpack) would produce one callback per path; with it,
//! one burst of activity produces exactly one callback, at the cost of
//! latency equal to the quiet window after the last observed change.
//!
//! The damper thread is signalled over a channel rather than by thread
//! interruption: an `Activity` pulse wakes it from idle, and the
//! damping window is a `recv_timeout` that every further pulse
//! restarts.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use dw_core::Config;

use crate::buffer::BatchSink;
use crate::error::WatchError;
use crate::events::{ChangeEvent, EventBatch};
use crate::raw::join_bounded;

/// How long `close` waits for the damper thread to exit.
const DAMPER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Receiver of the damped, cross-path event stream.
///
/// Called from the single damper thread once per burst of activity,
/// after the quiet window has elapsed with no further changes anywhere
/// in the watched set. A panicking implementation is caught and logged.
pub trait DamperSink: Send + Sync + 'static {
    /// Accepts everything accumulated since the previous delivery, in
    /// per-path arrival order.
    fn on_quiescent(&self, events: EventBatch);
}

/// Wake-up pulses for the damper thread.
///
/// The pulse carries no payload; the data travels through the shared
/// buffer under its own lock.
enum Pulse {
    /// At least one per-path batch just arrived.
    Activity,
    /// The registry is closing; deliver what is buffered and exit.
    Shutdown,
}

/// The per-path side of the damper: appends each flushed batch to the
/// shared buffer, then pulses the damper thread.
///
/// Shared by every buffering watcher in the registry, so `on_batch`
/// runs concurrently across their monitor threads.
pub(crate) struct DamperFeed {
    buffer: Arc<Mutex<Vec<ChangeEvent>>>,
    pulse_tx: Sender<Pulse>,
}

impl BatchSink for DamperFeed {
    fn on_batch(&self, batch: EventBatch) {
        trace!(events = batch.len(), "buffering batch for damper");
        self.buffer.lock().extend(batch);
        // A dropped receiver just means the damper already shut down.
        let _ = self.pulse_tx.send(Pulse::Activity);
    }
}

/// A watcher registry whose output is damped across all paths.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use dw_core::{Config, DamperConfig};
/// use dw_watcher::{DampedRegistry, DamperSink, EventBatch};
///
/// struct Rebuild;
///
/// impl DamperSink for Rebuild {
///     fn on_quiescent(&self, events: EventBatch) {
///         println!("{} changes settled, rebuilding", events.len());
///     }
/// }
///
/// # fn main() -> Result<(), dw_watcher::WatchError> {
/// let config = Config {
///     damper: DamperConfig { quiet_ms: 2000 },
///     ..Config::default()
/// };
/// let mut registry = DampedRegistry::new(config, Arc::new(Rebuild));
/// registry.add("/src/project-a")?;
/// registry.add("/src/project-b")?;
/// # Ok(())
/// # }
/// ```
pub struct DampedRegistry<S: DamperSink> {
    registry: crate::registry::WatcherRegistry<DamperFeed>,
    pulse_tx: Sender<Pulse>,
    damper: Option<(JoinHandle<()>, Receiver<()>)>,
    _sink: std::marker::PhantomData<S>,
}

impl<S: DamperSink> DampedRegistry<S> {
    /// Creates an empty damped registry and starts its damper thread.
    #[must_use]
    pub fn new(config: Config, sink: Arc<S>) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (pulse_tx, pulse_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let quiet = config.damper.quiet_window();
        let thread_buffer = Arc::clone(&buffer);
        let spawned = thread::Builder::new()
            .name("damper".to_owned())
            .spawn(move || {
                run_damper_loop(quiet, &thread_buffer, sink.as_ref(), &pulse_rx);
                let _ = done_tx.send(());
            });
        let damper = match spawned {
            Ok(handle) => Some((handle, done_rx)),
            Err(e) => {
                error!(error = %e, "failed to spawn damper thread");
                None
            }
        };

        let feed = DamperFeed {
            buffer,
            pulse_tx: pulse_tx.clone(),
        };
        let registry = crate::registry::WatcherRegistry::new(
            config.buffer,
            config.retry,
            Arc::new(feed),
        );

        Self {
            registry,
            pulse_tx,
            damper,
            _sink: std::marker::PhantomData,
        }
    }

    /// Starts watching a directory. See [`WatcherRegistry::add`].
    ///
    /// [`WatcherRegistry::add`]: crate::registry::WatcherRegistry::add
    pub fn add(&mut self, path: impl Into<Utf8PathBuf>) -> Result<(), WatchError> {
        self.registry.add(path)
    }

    /// Adds every path in `paths`.
    pub fn add_all<I, P>(&mut self, paths: I) -> Result<(), WatchError>
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        self.registry.add_all(paths)
    }

    /// Stops watching a directory.
    pub fn remove(&mut self, path: &Utf8Path) -> bool {
        self.registry.remove(path)
    }

    /// The paths currently being watched.
    #[must_use]
    pub fn paths_watching(&self) -> Vec<Utf8PathBuf> {
        self.registry.paths_watching()
    }

    /// Returns `true` if no paths are being watched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Stops every watcher, then the damper thread.
    ///
    /// Watchers stop first so their final flushes land in the shared
    /// buffer; the damper then delivers anything buffered as one last
    /// `on_quiescent` before exiting. Idempotent.
    pub fn close(&mut self) {
        self.registry.close();
        let _ = self.pulse_tx.send(Pulse::Shutdown);
        if let Some((handle, done_rx)) = self.damper.take() {
            join_bounded("damper", handle, &done_rx, DAMPER_STOP_TIMEOUT);
        }
    }
}

impl<S: DamperSink> Drop for DampedRegistry<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S: DamperSink> std::fmt::Debug for DampedRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DampedRegistry")
            .field("paths", &self.paths_watching())
            .finish_non_exhaustive()
    }
}

/// The damper state machine.
///
/// Idle until an `Activity` pulse arrives, then re-arms a quiet-window
/// timeout for as long as pulses keep arriving. A window that expires
/// with no pulse means the system is quiescent: swap the buffer for an
/// empty one and deliver.
fn run_damper_loop<S: DamperSink>(
    quiet: Duration,
    buffer: &Mutex<Vec<ChangeEvent>>,
    sink: &S,
    pulse_rx: &Receiver<Pulse>,
) {
    debug!("damper started, waiting for activity");
    loop {
        // Idle: parked until something happens anywhere.
        let mut closing = match pulse_rx.recv() {
            Ok(Pulse::Activity) => false,
            Ok(Pulse::Shutdown) | Err(_) => true,
        };

        // Damping: every further arrival restarts the window.
        while !closing {
            match pulse_rx.recv_timeout(quiet) {
                Ok(Pulse::Activity) => {
                    trace!("more activity during quiet window, re-arming");
                }
                Ok(Pulse::Shutdown) | Err(RecvTimeoutError::Disconnected) => closing = true,
                Err(RecvTimeoutError::Timeout) => break,
            }
        }

        deliver(buffer, sink);
        if closing {
            break;
        }
        debug!("delivered, back to waiting for activity");
    }
    debug!("damper stopped");
}

/// Atomically drains the shared buffer and hands the result to the sink.
///
/// The swap happens under the buffer lock, so an append from a monitor
/// thread either lands in this delivery or stays buffered for the next
/// one; it can never be lost in between.
fn deliver<S: DamperSink>(buffer: &Mutex<Vec<ChangeEvent>>, sink: &S) {
    let events: Vec<ChangeEvent> = std::mem::take(&mut *buffer.lock());
    if events.is_empty() {
        return;
    }
    debug!(events = events.len(), "quiet window elapsed, delivering");
    let batch = EventBatch::from_events(events);
    if catch_unwind(AssertUnwindSafe(|| sink.on_quiescent(batch))).is_err() {
        error!("quiescent callback panicked, continuing");
    }
}
