//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux) that do not depend on the native audio engine
//! itself:
//! - [`PlaybackStateStore`](bridge_traits::PlaybackStateStore) as a JSON file
//!   in the user data directory
//! - [`VolumeNormalizer`](bridge_traits::VolumeNormalizer) driven by stored
//!   ReplayGain analysis
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{JsonPlaybackStateStore, ReplayGainNormalizer};
//! use std::sync::Arc;
//!
//! let engine: Arc<dyn AudioEngine> = Arc::new(NativeEngine::new()?);
//! let normalizer = ReplayGainNormalizer::new(engine.clone()).with_preamp(0.0);
//! let store = JsonPlaybackStateStore::default_location();
//! ```

mod replaygain;
mod state_store;

pub use replaygain::{
    gain_multiplier, ReplayGainInfo, ReplayGainNormalizer, MAX_GAIN_MULTIPLIER,
    MIN_GAIN_MULTIPLIER,
};
pub use state_store::JsonPlaybackStateStore;
