//! # Track Loader
//!
//! Loads one track into the engine with latest-wins semantics.
//!
//! Every request gets a new epoch. Before any side effect that would be
//! visible to the user (duration, gain, position restore, the caller's
//! now-playing update) the loader checks that its epoch is still the live
//! one and that the caller still targets the same track. A load that lost
//! that race reports [`LoadOutcome::Superseded`] and changes nothing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bridge_traits::normalization::VolumeNormalizer;
use bridge_traits::storage::LastPlayed;
use parking_lot::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::PlaybackConfig;
use crate::error::{LoadFailureKind, PlaybackError};
use crate::recovery::RecoveryManager;
use crate::transport::TransportClient;
use crate::types::{LoadAttempt, Track};

/// Successful load data for the caller to apply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadedTrack {
    pub epoch: u64,
    /// Engine-reported duration, or the library duration as a fallback.
    pub duration: f64,
    /// Position restored from the last session, if any.
    pub restored_position: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Loaded(LoadedTrack),
    Failed {
        kind: LoadFailureKind,
        error: PlaybackError,
    },
    /// A newer request took over; nothing was applied.
    Superseded,
}

/// Check the caller re-evaluates before each side effect.
pub type TargetGuard<'a> = &'a (dyn Fn() -> bool + Send + Sync);

pub struct TrackLoader {
    transport: Arc<TransportClient>,
    recovery: Arc<RecoveryManager>,
    normalizer: Option<Arc<dyn VolumeNormalizer>>,
    config: PlaybackConfig,
    epoch: AtomicU64,
    live: Mutex<Option<LoadAttempt>>,
    restore: Mutex<Option<LastPlayed>>,
}

impl TrackLoader {
    pub fn new(
        transport: Arc<TransportClient>,
        recovery: Arc<RecoveryManager>,
        normalizer: Option<Arc<dyn VolumeNormalizer>>,
        config: PlaybackConfig,
    ) -> Self {
        Self {
            transport,
            recovery,
            normalizer,
            config,
            epoch: AtomicU64::new(0),
            live: Mutex::new(None),
            restore: Mutex::new(None),
        }
    }

    /// Register a new attempt, superseding whatever was live.
    pub fn begin(&self, track: &Track, index: usize) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.live.lock().replace(LoadAttempt {
            epoch,
            track_id: track.id.clone(),
            track_index: index,
            started_at: Instant::now(),
            attempt_count: 0,
            aborted: false,
        });
        if let Some(previous) = previous {
            debug!(superseded = previous.epoch, epoch, "Load request superseded");
        }
        epoch
    }

    /// Abort the live attempt without starting another (stop()).
    pub fn abort_live(&self) {
        if let Some(attempt) = self.live.lock().as_mut() {
            attempt.aborted = true;
        }
    }

    pub fn is_live(&self, epoch: u64) -> bool {
        self.live
            .lock()
            .as_ref()
            .map_or(false, |attempt| attempt.epoch == epoch && !attempt.aborted)
    }

    pub fn live_attempt(&self) -> Option<LoadAttempt> {
        self.live.lock().clone()
    }

    /// Position to restore on the first successful load of the session.
    pub fn set_restore_target(&self, last_played: LastPlayed) {
        *self.restore.lock() = Some(last_played);
    }

    pub fn restore_target(&self) -> Option<LastPlayed> {
        self.restore.lock().clone()
    }

    fn note_attempt(&self, epoch: u64, count: u32) {
        if let Some(attempt) = self.live.lock().as_mut() {
            if attempt.epoch == epoch {
                attempt.attempt_count = count;
            }
        }
    }

    fn still_ours(&self, epoch: u64, guard: TargetGuard<'_>) -> bool {
        self.is_live(epoch) && guard()
    }

    /// Load `track` (at `index` of the caller's list).
    pub async fn load(&self, track: &Track, index: usize, guard: TargetGuard<'_>) -> LoadOutcome {
        let epoch = self.begin(track, index);
        self.load_as(epoch, track, guard).await
    }

    async fn load_as(&self, epoch: u64, track: &Track, guard: TargetGuard<'_>) -> LoadOutcome {
        let mut attempt: u32 = 0;
        let mut reinitialized = false;

        loop {
            if !self.is_live(epoch) {
                return LoadOutcome::Superseded;
            }
            self.note_attempt(epoch, attempt + 1);

            let err = match self.transport.load(&track.path).await {
                Ok(()) => break,
                Err(e) => classify(track, e),
            };

            if !self.is_live(epoch) {
                return LoadOutcome::Superseded;
            }

            if !err.is_transient() {
                warn!(track_id = %track.id, error = %err, "Track load failed");
                return self.fail(epoch, err);
            }

            if reinitialized {
                warn!(track_id = %track.id, attempts = attempt + 1, error = %err, "Track load failed after engine reinit");
                return self.fail(epoch, err);
            }

            // Out of retries: one recovery cycle, then a single last attempt.
            if attempt >= self.config.load_retries {
                warn!(track_id = %track.id, attempts = attempt + 1, error = %err, "Track load retries exhausted");
                if let Err(e) = self
                    .recovery
                    .reinitialize(&format!("load of {} kept failing", track.id))
                    .await
                {
                    debug!(error = %e, "Reinit after failed load did not succeed");
                    return self.fail(epoch, e);
                }
                reinitialized = true;
                attempt += 1;
                continue;
            }

            let delay = self.config.backoff_delay(attempt);
            warn!(track_id = %track.id, attempt = attempt + 1, ?delay, error = %err, "Track load failed, retrying");
            sleep(delay).await;
            attempt += 1;
        }

        if !self.still_ours(epoch, guard) {
            return LoadOutcome::Superseded;
        }

        let duration = self.resolve_duration(track).await;
        if !self.still_ours(epoch, guard) {
            return LoadOutcome::Superseded;
        }

        self.apply_gain(track).await;

        let restored_position = self.restore_position(track, duration, epoch, guard).await;
        if !self.still_ours(epoch, guard) {
            return LoadOutcome::Superseded;
        }

        info!(track_id = %track.id, duration, "Track loaded");
        LoadOutcome::Loaded(LoadedTrack {
            epoch,
            duration,
            restored_position,
        })
    }

    fn fail(&self, epoch: u64, error: PlaybackError) -> LoadOutcome {
        if self.is_live(epoch) {
            LoadOutcome::Failed {
                kind: error.failure_kind(),
                error,
            }
        } else {
            LoadOutcome::Superseded
        }
    }

    /// Engine duration when it knows one, the library value otherwise.
    pub async fn resolve_duration(&self, track: &Track) -> f64 {
        match self.transport.duration().await {
            Ok(duration) if duration.is_finite() && duration > 0.0 => duration,
            Ok(_) => {
                debug!(track_id = %track.id, fallback = track.duration, "Engine has no duration yet");
                track.duration.max(0.0)
            }
            Err(e) => {
                debug!(track_id = %track.id, error = %e, "Duration query failed");
                track.duration.max(0.0)
            }
        }
    }

    /// Push the track's normalization gain to the engine. Failures only log.
    pub async fn apply_gain(&self, track: &Track) {
        if let Some(normalizer) = &self.normalizer {
            if let Err(e) = normalizer.apply_gain(&track.id, &track.path).await {
                warn!(track_id = %track.id, error = %e, "Volume normalization failed");
            }
        }
    }

    async fn restore_position(
        &self,
        track: &Track,
        duration: f64,
        epoch: u64,
        guard: TargetGuard<'_>,
    ) -> Option<f64> {
        // Only the first completed load of the session may restore.
        let target = self.restore.lock().take()?;

        let position = target.position_secs;
        if target.track_id != track.id
            || position <= self.config.restore_min_position_secs
            || (duration > 0.0 && position >= duration)
        {
            return None;
        }

        if !self.still_ours(epoch, guard) {
            return None;
        }

        match self.transport.seek(position).await {
            Ok(()) => {
                info!(track_id = %track.id, position, "Restored last played position");
                Some(position)
            }
            Err(e) => {
                warn!(track_id = %track.id, error = %e, "Could not restore last played position");
                None
            }
        }
    }
}

/// Attach the track id to decode failures.
fn classify(track: &Track, err: PlaybackError) -> PlaybackError {
    if !err.is_decode_error() {
        return err;
    }
    match err {
        PlaybackError::Engine { message, .. } => PlaybackError::Corrupted {
            track_id: track.id.clone(),
            message,
        },
        other => other,
    }
}
