//! # Playback Orchestration Core
//!
//! Drives a native audio engine on behalf of a music player UI.
//!
//! ## Overview
//!
//! This crate handles:
//! - Timeout-bounded engine commands ([`transport`])
//! - Push or polled engine events and tick reconciliation ([`bridge`])
//! - Next/previous selection with queue, shuffle and repeat ([`sequencer`])
//! - Gapless preload and crossfade decisions and ramps ([`transition`])
//! - Latest-wins track loading with retries ([`loader`])
//! - Engine reinitialization after idle, device changes and hangs ([`recovery`])
//!
//! [`PlaybackOrchestrator`] ties these together and is the only type most
//! hosts need.

pub mod bridge;
pub mod config;
pub mod error;
pub mod handlers;
pub mod loader;
pub mod orchestrator;
pub mod recovery;
pub mod sequencer;
pub mod transition;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::PlaybackConfig;
pub use error::{LoadFailureKind, PlaybackError, Result};
pub use handlers::{AdvanceGate, HandlerTable, RemovalConfirmer};
pub use orchestrator::PlaybackOrchestrator;
pub use types::{
    ActivityState, EngineState, PlaybackIntent, PlaybackSnapshot, RepeatMode, Track,
    TransitionMode, TransitionState,
};
