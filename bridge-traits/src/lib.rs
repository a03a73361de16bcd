//! # Host Bridge Traits
//!
//! Contracts between the playback core and the host application.
//!
//! ## Overview
//!
//! The playback core coordinates user intent with a native audio engine it
//! does not own. Everything it needs from the outside world is expressed as a
//! trait in this crate and injected at startup:
//!
//! - [`AudioEngine`](engine::AudioEngine) - decode/output engine commands and
//!   its optional push stream of [`EngineSignal`](engine::EngineSignal)s
//! - [`LibraryStore`](library::LibraryStore) - removes tracks found to be corrupted
//! - [`VolumeNormalizer`](normalization::VolumeNormalizer) - per-track gain after load
//! - [`PlaybackStateStore`](storage::PlaybackStateStore) - last-played track and position
//! - [`LoggerSink`](logging::LoggerSink) - forwards structured logs to the host
//!
//! ## Fail-Fast Strategy
//!
//! The core refuses to start without an engine and reports the missing
//! capability with an actionable message:
//!
//! ```ignore
//! let engine = config.engine.clone().ok_or_else(|| Error::CapabilityMissing {
//!     capability: "AudioEngine".to_string(),
//!     message: "No audio engine injected. Desktop hosts must pass their \
//!               native engine to CoreConfig::builder().engine(..)".to_string(),
//! })?;
//! ```
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync` so implementations can be shared across
//! tokio tasks behind an `Arc`.

pub mod engine;
pub mod error;
pub mod library;
pub mod logging;
pub mod normalization;
pub mod storage;

pub use error::BridgeError;

pub use engine::{AudioEngine, EngineCapabilities, EngineSignal, EngineSignalStream, PlaybackTick};
pub use library::LibraryStore;
pub use logging::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
pub use normalization::VolumeNormalizer;
pub use storage::{LastPlayed, PlaybackStateStore};
