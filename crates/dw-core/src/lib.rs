//! Core configuration types and errors for driftwatch.
//!
//! This crate provides the foundational types used across the workspace:
//!
//! - Configuration structures for every layer of the watch pipeline
//!   (buffering, registration retry, damping)
//! - Error types for configuration loading and validation
//!
//! All configuration types implement [`Default`] with the documented
//! defaults and round-trip through serde, so partial configuration files
//! are filled in with sensible values.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;

pub use config::{BufferConfig, Config, DamperConfig, RetryConfig};
pub use error::ConfigError;
