//! # Core Configuration Module
//!
//! Builds the [`CoreConfig`] handed to the playback orchestrator.
//!
//! ## Overview
//!
//! The builder collects the injected host bridges and user-facing feature
//! flags, and fails fast when a required capability is missing.
//!
//! ## Required Dependencies
//!
//! - `AudioEngine` - the native decode/output engine
//!
//! ## Optional Dependencies
//!
//! - `LibraryStore` - needed when corrupted-track removal is enabled
//! - `VolumeNormalizer` - per-track gain after each load
//! - `PlaybackStateStore` - last-played track persistence (desktop default:
//!   JSON file in the user data directory)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .engine(Arc::new(MyEngine::new()))
//!     .library_store(Arc::new(MyLibrary))
//!     .enable_crossfade(true)
//!     .crossfade_secs(6)
//!     .remove_corrupted_tracks(true)
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // No engine injected: fails with CapabilityMissing
//! let config = CoreConfig::builder()
//!     .build()
//!     .expect("Should fail - missing audio engine");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{AudioEngine, LibraryStore, PlaybackStateStore, VolumeNormalizer};
use std::path::PathBuf;
use std::sync::Arc;

/// Allowed crossfade durations in whole seconds.
pub const CROSSFADE_SECS_RANGE: std::ops::RangeInclusive<u32> = 1..=12;

pub const DEFAULT_CROSSFADE_SECS: u32 = 5;

pub const DEFAULT_VOLUME: f32 = 0.7;

/// Core configuration for the playback core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Native audio engine (required)
    pub engine: Arc<dyn AudioEngine>,

    /// Library mutation access for corrupted-track removal (optional)
    pub library_store: Option<Arc<dyn LibraryStore>>,

    /// Loudness normalization applied after each load (optional)
    pub normalizer: Option<Arc<dyn VolumeNormalizer>>,

    /// Last-played persistence (optional, desktop default available)
    pub state_store: Option<Arc<dyn PlaybackStateStore>>,

    pub features: FeatureFlags,

    /// Crossfade duration in seconds, within [`CROSSFADE_SECS_RANGE`]
    pub crossfade_secs: u32,

    /// Volume applied before the user changes it, in `[0, 1]`
    pub initial_volume: f32,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("engine", &"AudioEngine { ... }")
            .field(
                "library_store",
                &self.library_store.as_ref().map(|_| "LibraryStore { ... }"),
            )
            .field(
                "normalizer",
                &self.normalizer.as_ref().map(|_| "VolumeNormalizer { ... }"),
            )
            .field(
                "state_store",
                &self
                    .state_store
                    .as_ref()
                    .map(|_| "PlaybackStateStore { ... }"),
            )
            .field("features", &self.features)
            .field("crossfade_secs", &self.crossfade_secs)
            .field("initial_volume", &self.initial_volume)
            .finish()
    }
}

/// User-facing playback preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Preload the next track near the end of the current one
    pub gapless: bool,

    /// Crossfade between tracks; takes precedence over gapless preload
    pub crossfade: bool,

    /// Remove tracks that fail to decode from the library (requires LibraryStore)
    pub remove_corrupted_tracks: bool,

    /// Ask the user before removing a corrupted track
    pub confirm_removal: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            gapless: true,
            crossfade: false,
            remove_corrupted_tracks: false,
            confirm_removal: true,
        }
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates settings and their consistency with the injected bridges.
    pub fn validate(&self) -> Result<()> {
        if !CROSSFADE_SECS_RANGE.contains(&self.crossfade_secs) {
            return Err(Error::Config(format!(
                "Crossfade duration must be between {} and {} seconds, got {}",
                CROSSFADE_SECS_RANGE.start(),
                CROSSFADE_SECS_RANGE.end(),
                self.crossfade_secs
            )));
        }

        if !(0.0..=1.0).contains(&self.initial_volume) {
            return Err(Error::Config(format!(
                "Initial volume must be within 0.0..=1.0, got {}",
                self.initial_volume
            )));
        }

        if self.features.remove_corrupted_tracks && self.library_store.is_none() {
            return Err(Error::Config(
                "Corrupted-track removal enabled but no LibraryStore provided. \
                 Disable the feature or inject a LibraryStore implementation."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

fn engine_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "AudioEngine".to_string(),
        message: "An AudioEngine implementation is required for playback. \
                 Desktop: pass the native engine to CoreConfig::builder().engine(..). \
                 Tests: inject a scripted engine."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_state_store(data_dir: Option<PathBuf>) -> Option<Arc<dyn PlaybackStateStore>> {
    use bridge_desktop::JsonPlaybackStateStore;

    let store = match data_dir {
        Some(dir) => JsonPlaybackStateStore::in_dir(dir),
        None => JsonPlaybackStateStore::default_location()?,
    };
    let store: Arc<dyn PlaybackStateStore> = Arc::new(store);
    Some(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_state_store(_data_dir: Option<PathBuf>) -> Option<Arc<dyn PlaybackStateStore>> {
    None
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    engine: Option<Arc<dyn AudioEngine>>,
    library_store: Option<Arc<dyn LibraryStore>>,
    normalizer: Option<Arc<dyn VolumeNormalizer>>,
    state_store: Option<Arc<dyn PlaybackStateStore>>,
    data_dir: Option<PathBuf>,
    features: FeatureFlags,
    crossfade_secs: Option<u32>,
    initial_volume: Option<f32>,
}

impl CoreConfigBuilder {
    pub fn engine(mut self, engine: Arc<dyn AudioEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn library_store(mut self, store: Arc<dyn LibraryStore>) -> Self {
        self.library_store = Some(store);
        self
    }

    pub fn normalizer(mut self, normalizer: Arc<dyn VolumeNormalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn state_store(mut self, store: Arc<dyn PlaybackStateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Directory for the default desktop state store. Ignored when a state
    /// store is injected.
    pub fn data_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    pub fn enable_gapless(mut self, enable: bool) -> Self {
        self.features.gapless = enable;
        self
    }

    pub fn enable_crossfade(mut self, enable: bool) -> Self {
        self.features.crossfade = enable;
        self
    }

    pub fn remove_corrupted_tracks(mut self, enable: bool) -> Self {
        self.features.remove_corrupted_tracks = enable;
        self
    }

    pub fn confirm_removal(mut self, enable: bool) -> Self {
        self.features.confirm_removal = enable;
        self
    }

    pub fn crossfade_secs(mut self, secs: u32) -> Self {
        self.crossfade_secs = Some(secs);
        self
    }

    pub fn initial_volume(mut self, volume: f32) -> Self {
        self.initial_volume = Some(volume);
        self
    }

    /// Builds the final [`CoreConfig`].
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityMissing`] when no engine was injected
    /// - [`Error::Config`] when validation fails
    pub fn build(self) -> Result<CoreConfig> {
        let engine = self.engine.ok_or_else(engine_missing_error)?;

        let state_store = match self.state_store {
            Some(store) => Some(store),
            None => provide_default_state_store(self.data_dir),
        };

        let config = CoreConfig {
            engine,
            library_store: self.library_store,
            normalizer: self.normalizer,
            state_store,
            features: self.features,
            crossfade_secs: self.crossfade_secs.unwrap_or(DEFAULT_CROSSFADE_SECS),
            initial_volume: self.initial_volume.unwrap_or(DEFAULT_VOLUME),
        };

        config.validate()?;
        Ok(config)
    }
}
