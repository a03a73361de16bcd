//! # Transport Client
//!
//! Thin wrapper around the [`AudioEngine`] that puts a time budget on every
//! command and maps bridge failures into [`PlaybackError`]s.
//!
//! Nothing here retries or recovers; that is the job of the loader and the
//! recovery manager. The client only guarantees that no engine call can hang
//! the orchestrator.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bridge_traits::engine::{AudioEngine, EngineCapabilities, EngineSignalStream, PlaybackTick};
use bridge_traits::error::Result as BridgeResult;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::PlaybackConfig;
use crate::error::{PlaybackError, Result};

/// Timeout-enforcing command surface over the engine.
pub struct TransportClient {
    engine: Arc<dyn AudioEngine>,
    command_timeout: Duration,
    load_timeout: Duration,
}

impl TransportClient {
    pub fn new(engine: Arc<dyn AudioEngine>, config: &PlaybackConfig) -> Self {
        Self {
            engine,
            command_timeout: config.command_timeout,
            load_timeout: config.load_timeout,
        }
    }

    async fn call<T, F>(&self, operation: &'static str, budget: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = BridgeResult<T>>,
    {
        match timeout(budget, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                let err = PlaybackError::from_bridge(operation, e);
                debug!(operation, error = %err, "Engine command failed");
                Err(err)
            }
            Err(_) => {
                warn!(operation, ?budget, "Engine command timed out");
                Err(PlaybackError::Timeout {
                    operation,
                    after: budget,
                })
            }
        }
    }

    pub fn capabilities(&self) -> EngineCapabilities {
        self.engine.capabilities()
    }

    pub fn subscribe(&self) -> Option<EngineSignalStream> {
        self.engine.subscribe()
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    pub async fn load(&self, path: &str) -> Result<()> {
        self.call("load", self.load_timeout, self.engine.load(path))
            .await
    }

    pub async fn play(&self) -> Result<()> {
        self.call("play", self.command_timeout, self.engine.play())
            .await
    }

    pub async fn pause(&self) -> Result<()> {
        self.call("pause", self.command_timeout, self.engine.pause())
            .await
    }

    pub async fn stop(&self) -> Result<()> {
        self.call("stop", self.command_timeout, self.engine.stop())
            .await
    }

    /// Seek to `seconds`; negative targets are clamped to zero.
    pub async fn seek(&self, seconds: f64) -> Result<()> {
        let target = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        self.call("seek", self.command_timeout, self.engine.seek(target))
            .await
    }

    /// Set linear volume, clamped to `[0.0, 1.0]`.
    pub async fn set_volume(&self, volume: f32) -> Result<()> {
        let volume = clamp_volume(volume);
        self.call("set_volume", self.command_timeout, self.engine.set_volume(volume))
            .await
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    pub async fn duration(&self) -> Result<f64> {
        self.call("get_duration", self.command_timeout, self.engine.get_duration())
            .await
    }

    pub async fn position(&self) -> Result<f64> {
        self.call("get_position", self.command_timeout, self.engine.get_position())
            .await
    }

    pub async fn is_playing(&self) -> Result<bool> {
        self.call("is_playing", self.command_timeout, self.engine.is_playing())
            .await
    }

    pub async fn is_finished(&self) -> Result<bool> {
        self.call("is_finished", self.command_timeout, self.engine.is_finished())
            .await
    }

    /// Position, duration and flags in one report, for poll mode.
    pub async fn poll_tick(&self) -> Result<PlaybackTick> {
        let position = self.position().await?;
        let duration = self.duration().await?;
        let is_playing = self.is_playing().await?;
        let is_finished = self.is_finished().await?;
        Ok(PlaybackTick {
            position,
            duration,
            is_playing,
            is_finished,
        })
    }

    // ------------------------------------------------------------------
    // Device health
    // ------------------------------------------------------------------

    pub async fn is_device_available(&self) -> Result<bool> {
        self.call(
            "is_device_available",
            self.command_timeout,
            self.engine.is_device_available(),
        )
        .await
    }

    pub async fn has_device_changed(&self) -> Result<bool> {
        self.call(
            "has_device_changed",
            self.command_timeout,
            self.engine.has_device_changed(),
        )
        .await
    }

    pub async fn inactive_duration(&self) -> Result<Duration> {
        self.call(
            "get_inactive_duration",
            self.command_timeout,
            self.engine.get_inactive_duration(),
        )
        .await
    }

    pub async fn current_device(&self) -> Result<Option<String>> {
        self.call("current_device", self.command_timeout, self.engine.current_device())
            .await
    }

    /// Reinitialize the output stream. `Ok(false)` means the engine tried
    /// and could not recover.
    pub async fn recover(&self) -> Result<bool> {
        self.call("recover", self.load_timeout, self.engine.recover())
            .await
    }

    // ------------------------------------------------------------------
    // Gapless
    // ------------------------------------------------------------------

    pub async fn preload(&self, path: &str) -> Result<()> {
        self.call("preload", self.load_timeout, self.engine.preload(path))
            .await
    }

    pub async fn swap_to_preloaded(&self) -> Result<()> {
        self.call(
            "swap_to_preloaded",
            self.command_timeout,
            self.engine.swap_to_preloaded(),
        )
        .await
    }

    pub async fn clear_preload(&self) -> Result<()> {
        self.call("clear_preload", self.command_timeout, self.engine.clear_preload())
            .await
    }

    pub async fn has_preloaded(&self) -> Result<bool> {
        self.call("has_preloaded", self.command_timeout, self.engine.has_preloaded())
            .await
    }
}

pub(crate) fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}
