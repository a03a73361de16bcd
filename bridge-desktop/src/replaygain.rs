//! ReplayGain-driven volume normalization

use async_trait::async_trait;
use bridge_traits::{
    engine::AudioEngine,
    error::Result,
    normalization::VolumeNormalizer,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Bounds for the linear ReplayGain multiplier.
pub const MIN_GAIN_MULTIPLIER: f32 = 0.1;
pub const MAX_GAIN_MULTIPLIER: f32 = 3.0;

/// Stored loudness analysis for one track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplayGainInfo {
    /// Gain in dB that brings the track to the reference loudness.
    pub track_gain_db: f64,
    /// Peak sample amplitude in `[0, 1]`, `0.0` when unknown.
    pub track_peak: f64,
}

/// Linear multiplier for a gain plus preamp in dB, clamped to
/// `[MIN_GAIN_MULTIPLIER, MAX_GAIN_MULTIPLIER]`.
pub fn gain_multiplier(gain_db: f64, preamp_db: f64) -> f32 {
    let linear = 10_f64.powf((gain_db + preamp_db) / 20.0) as f32;
    linear.clamp(MIN_GAIN_MULTIPLIER, MAX_GAIN_MULTIPLIER)
}

/// Lower `gain_db` so that `peak` does not clip once preamp is added.
fn limit_to_peak(gain_db: f64, preamp_db: f64, peak: f64) -> f64 {
    if peak <= 0.0 {
        return gain_db;
    }
    let headroom_db = -20.0 * peak.log10();
    if gain_db + preamp_db > headroom_db {
        headroom_db - preamp_db
    } else {
        gain_db
    }
}

/// [`VolumeNormalizer`] that pushes ReplayGain values into the engine.
///
/// Gain data is supplied by the host (usually from its library database) via
/// [`ReplayGainNormalizer::set_track_gain`]. Tracks without data, or any
/// track while normalization is disabled, get their gain cleared.
pub struct ReplayGainNormalizer {
    engine: Arc<dyn AudioEngine>,
    gains: RwLock<HashMap<String, ReplayGainInfo>>,
    preamp_db: RwLock<f64>,
    enabled: AtomicBool,
    prevent_clipping: bool,
}

impl ReplayGainNormalizer {
    pub fn new(engine: Arc<dyn AudioEngine>) -> Self {
        Self {
            engine,
            gains: RwLock::new(HashMap::new()),
            preamp_db: RwLock::new(0.0),
            enabled: AtomicBool::new(true),
            prevent_clipping: true,
        }
    }

    pub fn with_preamp(self, preamp_db: f64) -> Self {
        *self.preamp_db.write() = preamp_db;
        self
    }

    pub fn with_clipping_prevention(mut self, enabled: bool) -> Self {
        self.prevent_clipping = enabled;
        self
    }

    pub fn set_track_gain(&self, track_id: impl Into<String>, info: ReplayGainInfo) {
        self.gains.write().insert(track_id.into(), info);
    }

    pub fn remove_track_gain(&self, track_id: &str) {
        self.gains.write().remove(track_id);
    }

    pub fn set_preamp(&self, preamp_db: f64) {
        *self.preamp_db.write() = preamp_db;
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Gain and preamp that would be applied to `track_id`, if any.
    pub fn resolve(&self, track_id: &str) -> Option<(f64, f64)> {
        if !self.is_enabled() {
            return None;
        }
        let info = *self.gains.read().get(track_id)?;
        let preamp = *self.preamp_db.read();
        let gain = if self.prevent_clipping {
            limit_to_peak(info.track_gain_db, preamp, info.track_peak)
        } else {
            info.track_gain_db
        };
        Some((gain, preamp))
    }
}

#[async_trait]
impl VolumeNormalizer for ReplayGainNormalizer {
    async fn apply_gain(&self, track_id: &str, _path: &str) -> Result<()> {
        match self.resolve(track_id) {
            Some((gain_db, preamp_db)) => {
                info!(
                    track_id,
                    gain_db,
                    preamp_db,
                    multiplier = gain_multiplier(gain_db, preamp_db),
                    "Applying ReplayGain"
                );
                self.engine.set_replaygain(gain_db, preamp_db).await
            }
            None => {
                debug!(track_id, "No ReplayGain data, clearing gain");
                self.engine.clear_replaygain().await
            }
        }
    }
}
