//! # Recovery Manager
//!
//! Keeps the engine usable across idle periods, device changes and command
//! failures.
//!
//! - Before every play: refuse when no device exists, reinitialize after a
//!   device change or long inactivity.
//! - Around load/play: one reinit-and-retry cycle on failure.
//! - Poll mode: a recovery cycle after too many consecutive status failures.
//!
//! A failed recovery cycle marks the backend unresponsive for the rest of the
//! session.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use core_runtime::events::{CoreEvent, EngineEvent, EventBus};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{LoadFailureKind, PlaybackError, Result};
use crate::transport::TransportClient;
use crate::types::{ActivityCell, RecoveryState};

/// Result of [`RecoveryManager::ensure_ready_for_play`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// The output was rebuilt; the engine no longer holds a loaded track.
    Reinitialized,
}

pub struct RecoveryManager {
    transport: Arc<TransportClient>,
    activity: Arc<ActivityCell>,
    events: EventBus,
    idle_threshold: Duration,
    max_poll_errors: u32,
    state: Mutex<RecoveryState>,
    generation: AtomicU64,
}

impl RecoveryManager {
    pub fn new(
        transport: Arc<TransportClient>,
        activity: Arc<ActivityCell>,
        events: EventBus,
        idle_threshold: Duration,
        max_poll_errors: u32,
    ) -> Self {
        Self {
            transport,
            activity,
            events,
            idle_threshold,
            max_poll_errors,
            state: Mutex::new(RecoveryState::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// Number of successful reinits. Anything loaded under an older
    /// generation is gone from the engine.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> RecoveryState {
        self.state.lock().clone()
    }

    pub fn is_unresponsive(&self) -> bool {
        self.state.lock().unresponsive
    }

    fn unresponsive_error(&self) -> PlaybackError {
        PlaybackError::Unresponsive("audio backend failed to recover".to_string())
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.emit(CoreEvent::Engine(event));
    }

    /// Gate every play command.
    pub async fn ensure_ready_for_play(&self) -> Result<Readiness> {
        if self.is_unresponsive() {
            return Err(self.unresponsive_error());
        }

        match self.transport.is_device_available().await {
            Ok(true) => {}
            Ok(false) => {
                warn!("No audio output device available");
                self.emit(EngineEvent::DeviceUnavailable {
                    message: PlaybackError::DeviceUnavailable.to_string(),
                });
                return Err(PlaybackError::DeviceUnavailable);
            }
            // The play call itself will surface a broken engine.
            Err(e) => debug!(error = %e, "Device availability check failed"),
        }

        let reason = if self.transport.has_device_changed().await.unwrap_or(false) {
            Some("output device changed".to_string())
        } else {
            let idle = match self.transport.inactive_duration().await {
                Ok(idle) => idle,
                Err(_) => self
                    .state
                    .lock()
                    .idle_since
                    .map_or(Duration::ZERO, |since| since.elapsed()),
            };
            (idle >= self.idle_threshold)
                .then(|| format!("engine idle for {}s", idle.as_secs()))
        };

        match reason {
            Some(reason) => {
                self.recover_cycle(&reason).await?;
                Ok(Readiness::Reinitialized)
            }
            None => Ok(Readiness::Ready),
        }
    }

    /// Run `op`; on a recoverable failure reinitialize once and retry once.
    pub async fn run_with_recovery<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.is_unresponsive() {
            return Err(self.unresponsive_error());
        }

        let err = match op().await {
            Ok(value) => {
                self.state.lock().consecutive_failures = 0;
                return Ok(value);
            }
            Err(e) => e,
        };

        if !Self::warrants_recovery(&err) {
            return Err(err);
        }

        warn!(operation, error = %err, "Engine command failed, attempting recovery");
        self.recover_cycle(&format!("{operation} failed: {err}"))
            .await?;

        match op().await {
            Ok(value) => Ok(value),
            Err(retry_err) => {
                error!(operation, error = %retry_err, "Command failed again after recovery");
                self.mark_unresponsive(&retry_err.to_string());
                Err(self.unresponsive_error())
            }
        }
    }

    fn warrants_recovery(err: &PlaybackError) -> bool {
        matches!(
            err.failure_kind(),
            LoadFailureKind::Timeout | LoadFailureKind::Engine
        ) && err.is_transient()
    }

    /// Count a failed status poll; runs a recovery cycle once the limit is
    /// reached and returns its result.
    pub async fn record_poll_failure(&self, err: &PlaybackError) -> Option<Result<()>> {
        let failures = {
            let mut state = self.state.lock();
            if state.unresponsive || state.is_recovering {
                return None;
            }
            state.consecutive_failures += 1;
            state.consecutive_failures
        };

        debug!(failures, error = %err, "Status poll failed");
        if failures < self.max_poll_errors {
            return None;
        }

        Some(
            self.recover_cycle(&format!("{failures} consecutive status failures"))
                .await,
        )
    }

    /// Playback went idle; keeps the first timestamp of an idle stretch.
    pub fn mark_idle(&self) {
        let mut state = self.state.lock();
        if state.idle_since.is_none() {
            state.idle_since = Some(Instant::now());
        }
    }

    pub fn mark_active(&self) {
        self.state.lock().idle_since = None;
    }

    pub fn record_poll_success(&self) {
        self.state.lock().consecutive_failures = 0;
    }

    /// Reinitialize without retrying anything: after a device change, or
    /// once load retries are exhausted.
    pub async fn reinitialize(&self, reason: &str) -> Result<()> {
        if self.is_unresponsive() {
            return Err(self.unresponsive_error());
        }
        self.recover_cycle(reason).await
    }

    async fn recover_cycle(&self, reason: &str) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.unresponsive {
                return Err(self.unresponsive_error());
            }
            state.is_recovering = true;
        }
        self.activity.begin_recovery();
        info!(reason, "Reinitializing audio engine");
        self.emit(EngineEvent::Reconnecting {
            reason: reason.to_string(),
        });

        let result = self.transport.recover().await;
        self.activity.end_recovery(Instant::now());

        match result {
            Ok(true) => {
                self.generation.fetch_add(1, Ordering::SeqCst);
                let device = self.transport.current_device().await.ok().flatten();
                {
                    let mut state = self.state.lock();
                    state.is_recovering = false;
                    state.consecutive_failures = 0;
                    state.last_device_signature = device;
                    state.idle_since = None;
                }
                info!("Audio engine recovered");
                self.emit(EngineEvent::Recovered);
                Ok(())
            }
            Ok(false) => {
                self.state.lock().is_recovering = false;
                self.mark_unresponsive("engine could not reinitialize its output");
                Err(self.unresponsive_error())
            }
            Err(e) => {
                self.state.lock().is_recovering = false;
                self.mark_unresponsive(&e.to_string());
                Err(self.unresponsive_error())
            }
        }
    }

    /// Sticky until the session ends. Emits the event once.
    pub fn mark_unresponsive(&self, message: &str) {
        let first = {
            let mut state = self.state.lock();
            let first = !state.unresponsive;
            state.unresponsive = true;
            first
        };
        if first {
            error!(message, "Audio engine marked unresponsive");
            self.emit(EngineEvent::Unresponsive {
                message: message.to_string(),
            });
        }
    }
}
