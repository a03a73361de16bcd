//! Native audio engine contract.
//!
//! The engine owns decoding, mixing and the output device. The playback core
//! only sees it through the narrow command surface of [`AudioEngine`] plus an
//! optional push stream of [`EngineSignal`]s. Engines that cannot push events
//! are polled by the core instead, so the stream is optional.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Periodic position report from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaybackTick {
    /// Current position in seconds.
    pub position: f64,
    /// Duration of the loaded track in seconds, `0.0` when unknown.
    pub duration: f64,
    /// Whether the output stream is currently running.
    pub is_playing: bool,
    /// Whether the loaded track has been played to its end.
    pub is_finished: bool,
}

/// Signals an engine may push to the core.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineSignal {
    /// Position/state report.
    Tick(PlaybackTick),
    /// The loaded track reached its end. Emitted at most once per load.
    TrackEnded,
    /// The default output device changed or disappeared.
    DeviceChanged { device: Option<String> },
}

/// Stream of engine signals handed to the core's event bridge.
pub type EngineSignalStream = BoxStream<'static, EngineSignal>;

/// Optional features an engine implementation can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EngineCapabilities {
    /// Two streams can play at once, so crossfades overlap instead of
    /// degrading to a fade-out/fade-in pair.
    pub dual_stream: bool,
    /// `preload` / `swap_to_preloaded` are implemented.
    pub gapless_preload: bool,
    /// `subscribe` returns a live signal stream.
    pub push_events: bool,
}

/// Command surface of the native audio engine.
///
/// Every method may suspend for an unbounded amount of time; callers are
/// expected to wrap calls in their own timeouts. Methods with default bodies
/// are optional capabilities.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::engine::AudioEngine;
///
/// async fn resume(engine: &dyn AudioEngine) -> bridge_traits::error::Result<()> {
///     if !engine.is_device_available().await? {
///         return Ok(());
///     }
///     engine.play().await
/// }
/// ```
#[async_trait]
pub trait AudioEngine: Send + Sync {
    /// Load a track from a filesystem path, replacing the current one.
    async fn load(&self, path: &str) -> Result<()>;

    async fn play(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Seek to an absolute position in seconds.
    async fn seek(&self, seconds: f64) -> Result<()>;

    /// Set output volume in `[0.0, 1.0]`.
    async fn set_volume(&self, volume: f32) -> Result<()>;

    /// Duration of the loaded track in seconds. `0.0` means unknown.
    async fn get_duration(&self) -> Result<f64>;

    async fn get_position(&self) -> Result<f64>;

    async fn is_playing(&self) -> Result<bool>;

    async fn is_finished(&self) -> Result<bool>;

    async fn is_device_available(&self) -> Result<bool>;

    /// Whether the default output device differs from the one the engine
    /// opened its stream on.
    async fn has_device_changed(&self) -> Result<bool>;

    /// Time since the engine last produced audio. Zero while playing.
    async fn get_inactive_duration(&self) -> Result<Duration>;

    /// Tear down and reopen the output stream. Returns `false` when the
    /// engine could not reinitialize.
    async fn recover(&self) -> Result<bool>;

    /// Name of the output device in use, if the engine can tell.
    async fn current_device(&self) -> Result<Option<String>> {
        Ok(None)
    }

    /// Decode the next track ahead of time for a gapless switch.
    async fn preload(&self, _path: &str) -> Result<()> {
        Err(BridgeError::NotAvailable("gapless preload".to_string()))
    }

    /// Make the preloaded track the current one.
    async fn swap_to_preloaded(&self) -> Result<()> {
        Err(BridgeError::NotAvailable("gapless preload".to_string()))
    }

    async fn clear_preload(&self) -> Result<()> {
        Ok(())
    }

    async fn has_preloaded(&self) -> Result<bool> {
        Ok(false)
    }

    /// Apply a ReplayGain adjustment to the loaded track.
    async fn set_replaygain(&self, _gain_db: f64, _preamp_db: f64) -> Result<()> {
        Err(BridgeError::NotAvailable("replaygain".to_string()))
    }

    async fn clear_replaygain(&self) -> Result<()> {
        Ok(())
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities::default()
    }

    /// Subscribe to pushed engine signals. `None` means the engine must be
    /// polled.
    fn subscribe(&self) -> Option<EngineSignalStream> {
        None
    }
}
