//! Filesystem watching with buffering, retries, and cross-path damping.
//!
//! This crate turns the raw per-directory change notifications of the
//! `notify` crate into batches that are actually pleasant to consume:
//! events are buffered per path, flushed by size or idle time, merged
//! across paths, and only delivered once the whole watched set has gone
//! quiet.
//!
//! # Overview
//!
//! The dw-watcher crate is designed to:
//!
//! - Watch single directories non-recursively, retrying registration
//!   until a missing directory appears
//! - Buffer raw events per path and flush them by count or idle timeout
//! - Manage a dynamic set of watched paths that can grow and shrink at
//!   runtime
//! - Damp activity across all paths, delivering one coalesced batch per
//!   burst after a configurable quiet window
//! - Bridge the settled stream into async tokio code
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                 One per watched directory                      │
//! │  ┌────────────────┐     ┌───────────────┐    ┌─────────────┐   │
//! │  │ RawWatcher     │ ──► │ shared queue  │ ◄─ │ monitor     │   │
//! │  │ (notify +      │     │ (VecDeque)    │    │ thread      │   │
//! │  │  retry loop)   │     └───────────────┘    │ (flush gate)│   │
//! │  └────────────────┘                          └──────┬──────┘   │
//! └─────────────────────────────────────────────────────│──────────┘
//!                                              on_batch │
//!                                                       ▼
//! ┌────────────────────────────────────────────────────────────────┐
//! │                 Shared across all directories                  │
//! │  ┌───────────────┐    ┌───────────────┐    ┌───────────────┐   │
//! │  │ shared buffer │ ◄─ │ damper thread │ ─► │ DamperSink /  │   │
//! │  │ + pulses      │    │ (quiet window)│    │ ChangeStream  │   │
//! │  └───────────────┘    └───────────────┘    └───────────────┘   │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each layer is usable on its own: [`RawWatcher`] for unbuffered
//! per-event delivery, [`BufferedWatcher`] for a single batched path,
//! [`WatcherRegistry`] for a dynamic set with per-path batches, and
//! [`DampedRegistry`] / [`ChangeStream`] for the fully coalesced view.
//!
//! # Usage
//!
//! ## Async consumption
//!
//! ```no_run
//! use dw_core::{Config, DamperConfig};
//! use dw_watcher::ChangeStream;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), dw_watcher::WatchError> {
//!     let config = Config {
//!         damper: DamperConfig { quiet_ms: 2000 },
//!         ..Config::default()
//!     };
//!     let mut stream = ChangeStream::new(config);
//!     stream.add("/srv/uploads")?;
//!     stream.add("/srv/staging")?;
//!
//!     while let Some(batch) = stream.recv().await {
//!         for event in &batch {
//!             println!("{event}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Synchronous callback
//!
//! ```no_run
//! use std::sync::Arc;
//! use dw_core::Config;
//! use dw_watcher::{DampedRegistry, DamperSink, EventBatch};
//!
//! struct Deploy;
//!
//! impl DamperSink for Deploy {
//!     fn on_quiescent(&self, events: EventBatch) {
//!         println!("{} changes settled, redeploying", events.len());
//!     }
//! }
//!
//! # fn main() -> Result<(), dw_watcher::WatchError> {
//! let mut registry = DampedRegistry::new(Config::default(), Arc::new(Deploy));
//! registry.add("/etc/app/conf.d")?;
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! [`WatchError`] distinguishes recoverable conditions (a directory
//! that does not exist yet) from fatal ones:
//!
//! ```
//! use dw_watcher::WatchError;
//!
//! fn handle_watch_error(err: &WatchError) {
//!     if err.is_fatal() {
//!         eprintln!("giving up: {err}");
//!     } else {
//!         eprintln!("will retry: {err}");
//!     }
//! }
//! ```
//!
//! # Performance Considerations
//!
//! - **Buffering**: per-path batches are flushed by count or idle
//!   timeout, so a burst of saves costs one callback, not hundreds.
//!
//! - **Damping**: the quiet window trades latency for coalescing; a
//!   bulk operation across many paths yields a single delivery.
//!
//! - **Bounded channel**: [`ChangeStream`] buffers a fixed number of
//!   batches, so a slow consumer cannot grow memory without bound.
//!
//! - **UTF-8 paths**: paths are validated as UTF-8 at the boundary and
//!   carried as [`camino`] types throughout.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod buffer;
pub mod damper;
pub mod error;
pub mod events;
pub mod raw;
pub mod registry;
pub mod stream;

// Re-export error types
pub use error::WatchError;

// Re-export event types
pub use events::{BatchStats, ChangeEvent, ChangeKind, EventBatch, PathKind};

// Re-export the watching layers
pub use buffer::{BatchSink, BufferedWatcher};
pub use damper::{DampedRegistry, DamperSink};
pub use raw::{EventSink, RawWatcher};
pub use registry::WatcherRegistry;
pub use stream::ChangeStream;
