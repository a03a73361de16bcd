//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the playback core:
//! - Logging and tracing bootstrap
//! - Configuration assembly from injected host bridges
//! - Event bus carrying reconciled state to the UI layer

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder, FeatureFlags};
pub use error::{Error, Result};
pub use events::{CoreEvent, EngineEvent, EventBus, EventStream, LibraryEvent, PlaybackEvent};
