//! # Transition Controller
//!
//! Decides, tick by tick, whether the end of the current track should start
//! a gapless preload or a crossfade, and runs the crossfade volume ramp.
//!
//! ## Ramp shape
//!
//! The ramp is equal-power: the outgoing track fades with `cos` over the
//! first half, the engine switches tracks at the midpoint, and the incoming
//! track fades in with `sin` over the second half. Single-stream engines
//! therefore hear a fade-out/fade-in pair; dual-stream engines get the
//! incoming track preloaded so the switch itself is instant.

use std::f64::consts::FRAC_PI_2;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::{EngineState, TransitionState};

/// Position below which a track counts as freshly started, clearing the
/// "already handled this boundary" flag.
pub const BOUNDARY_RESET_SECS: f64 = 1.0;

/// Inputs to [`evaluate`] taken from the current feature flags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionSettings {
    pub gapless: bool,
    pub crossfade: bool,
    pub crossfade_secs: f64,
    pub preload_window_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionAction {
    None,
    Preload,
    Crossfade,
}

/// At most one action per tick, and nothing while a transition is active or
/// the boundary of this track was already handled.
pub fn evaluate(
    settings: &TransitionSettings,
    engine: &EngineState,
    state: &TransitionState,
    boundary_handled: bool,
) -> TransitionAction {
    if state.is_active() || boundary_handled || engine.duration <= 0.0 {
        return TransitionAction::None;
    }

    let remaining = engine.duration - engine.position;
    if remaining <= 0.0 {
        return TransitionAction::None;
    }

    if settings.crossfade {
        if remaining <= settings.crossfade_secs {
            return TransitionAction::Crossfade;
        }
        return TransitionAction::None;
    }

    if settings.gapless && remaining <= settings.preload_window_secs {
        return TransitionAction::Preload;
    }

    TransitionAction::None
}

/// Whether a new position means the track (re)started and the boundary flag
/// should be cleared.
pub fn is_boundary_reset(position: f64) -> bool {
    position < BOUNDARY_RESET_SECS
}

/// Ramp length for a crossfade starting with `remaining` seconds left.
///
/// Never longer than what is left of the outgoing track, so the midpoint
/// switch happens before it ends.
pub fn ramp_duration(crossfade_secs: f64, remaining: f64, step: Duration) -> Duration {
    let secs = crossfade_secs.min(remaining).max(step.as_secs_f64() * 2.0);
    Duration::from_secs_f64(secs)
}

/// Gain of the outgoing track at `progress` through the first half.
pub fn fade_out_gain(progress: f64) -> f64 {
    (progress.clamp(0.0, 1.0) * FRAC_PI_2).cos()
}

/// Gain of the incoming track at `progress` through the second half.
pub fn fade_in_gain(progress: f64) -> f64 {
    (progress.clamp(0.0, 1.0) * FRAC_PI_2).sin()
}

/// Volume to apply `elapsed` into a ramp of length `total`.
pub fn ramp_volume(base: f32, elapsed: Duration, total: Duration) -> f32 {
    let total = total.as_secs_f64();
    if total <= 0.0 {
        return base;
    }
    let half = total / 2.0;
    let t = elapsed.as_secs_f64().min(total);
    let gain = if t < half {
        fade_out_gain(t / half)
    } else {
        fade_in_gain((t - half) / half)
    };
    (base as f64 * gain) as f32
}

/// Side effects a crossfade needs from the orchestrator.
#[async_trait]
pub trait RampTarget: Send + Sync {
    async fn apply_volume(&self, volume: f32);

    /// Switch the engine to the incoming track. `false` aborts the ramp.
    async fn switch_track(&self) -> bool;

    /// Volume to leave the engine at when the ramp completes.
    fn restore_volume(&self) -> f32;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossfadeRamp {
    /// User volume captured when the ramp started.
    pub base_volume: f32,
    pub duration: Duration,
    pub step: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossfadeOutcome {
    Completed,
    Cancelled,
    SwitchFailed,
}

/// Drive one crossfade to completion or cancellation.
///
/// On cancellation the ramp stops where it is and returns; restoring the
/// volume is the canceller's job.
pub async fn run_crossfade(
    ramp: CrossfadeRamp,
    cancel: CancellationToken,
    target: &dyn RampTarget,
) -> CrossfadeOutcome {
    let start = Instant::now();
    let half = ramp.duration / 2;
    let mut switched = false;

    loop {
        if cancel.is_cancelled() {
            return CrossfadeOutcome::Cancelled;
        }

        let elapsed = start.elapsed();

        if !switched && elapsed >= half {
            target.apply_volume(0.0).await;
            let ok = tokio::select! {
                _ = cancel.cancelled() => return CrossfadeOutcome::Cancelled,
                ok = target.switch_track() => ok,
            };
            if !ok {
                debug!("Crossfade aborted: switch failed");
                return CrossfadeOutcome::SwitchFailed;
            }
            switched = true;
            continue;
        }

        if elapsed >= ramp.duration {
            break;
        }

        target
            .apply_volume(ramp_volume(ramp.base_volume, elapsed, ramp.duration))
            .await;

        tokio::select! {
            _ = cancel.cancelled() => return CrossfadeOutcome::Cancelled,
            _ = sleep(ramp.step) => {}
        }
    }

    target.apply_volume(target.restore_volume()).await;
    CrossfadeOutcome::Completed
}
