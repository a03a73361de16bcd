//! Playback data model
//!
//! The intent/engine split: [`PlaybackIntent`] is what the user asked for,
//! [`EngineState`] is what the engine last reported.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// An addressable entry of the current track list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub path: String,
    /// Duration in seconds from the library, `0.0` when unknown.
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
}

impl Track {
    pub fn new(id: impl Into<String>, path: impl Into<String>, duration: f64) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            duration,
            title: None,
            artist: None,
            album: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    #[default]
    Off,
    All,
    One,
}

/// What the user wants to happen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlaybackIntent {
    pub playing: bool,
    /// Linear volume in `[0.0, 1.0]`.
    pub volume: f32,
    pub current_index: Option<usize>,
}

/// What the engine last reported.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct EngineState {
    pub position: f64,
    pub duration: f64,
    pub is_playing: bool,
    pub is_finished: bool,
}

impl EngineState {
    pub fn for_track(duration: f64) -> Self {
        Self {
            duration: duration.max(0.0),
            ..Default::default()
        }
    }

    pub fn remaining(&self) -> f64 {
        (self.duration - self.position).max(0.0)
    }
}

/// One in-flight track load.
#[derive(Debug, Clone)]
pub struct LoadAttempt {
    /// Monotonic request number; only the newest epoch may apply results.
    pub epoch: u64,
    pub track_id: String,
    pub track_index: usize,
    pub started_at: Instant,
    pub attempt_count: u32,
    pub aborted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionMode {
    #[default]
    None,
    Preloading,
    Crossfading,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransitionState {
    pub mode: TransitionMode,
    pub target_index: Option<usize>,
    pub started_at: Option<Instant>,
}

impl TransitionState {
    pub fn begin(mode: TransitionMode, target_index: usize) -> Self {
        Self {
            mode,
            target_index: Some(target_index),
            started_at: Some(Instant::now()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.mode != TransitionMode::None
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryState {
    pub consecutive_failures: u32,
    pub is_recovering: bool,
    /// Sticky: set when a recovery cycle fails.
    pub unresponsive: bool,
    pub last_device_signature: Option<String>,
    /// When playback last went idle (pause/stop), cleared on play.
    pub idle_since: Option<Instant>,
}

/// Orchestrator activity that decides whether ticks are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivityState {
    #[default]
    Idle,
    /// A seek was issued; ticks are stale until `until`.
    Seeking { until: Instant },
    /// A recovery cycle is running (`until == None`) or just finished and
    /// its guard window ends at `until`.
    Recovering { until: Option<Instant> },
}

impl ActivityState {
    pub fn is_expired(&self, now: Instant) -> bool {
        match self {
            ActivityState::Idle => true,
            ActivityState::Seeking { until } => now >= *until,
            ActivityState::Recovering { until } => until.map_or(false, |until| now >= until),
        }
    }
}

/// Shared cell holding the orchestrator's [`ActivityState`].
///
/// The recovery manager and the orchestrator both write to it; every
/// transition goes through one of the methods below.
#[derive(Debug)]
pub struct ActivityCell {
    state: Mutex<ActivityState>,
    guard: Duration,
}

impl ActivityCell {
    pub fn new(guard: Duration) -> Self {
        Self {
            state: Mutex::new(ActivityState::Idle),
            guard,
        }
    }

    pub fn current(&self, now: Instant) -> ActivityState {
        let mut state = self.state.lock();
        if state.is_expired(now) {
            *state = ActivityState::Idle;
        }
        *state
    }

    /// Enter the seek guard. A running recovery keeps precedence.
    pub fn begin_seek(&self, now: Instant) {
        let mut state = self.state.lock();
        if matches!(*state, ActivityState::Recovering { .. }) && !state.is_expired(now) {
            return;
        }
        *state = ActivityState::Seeking {
            until: now + self.guard,
        };
    }

    pub fn begin_recovery(&self) {
        *self.state.lock() = ActivityState::Recovering { until: None };
    }

    pub fn end_recovery(&self, now: Instant) {
        *self.state.lock() = ActivityState::Recovering {
            until: Some(now + self.guard),
        };
    }

    /// Ticks arriving now must be dropped.
    pub fn is_suppressed(&self, now: Instant) -> bool {
        self.current(now) != ActivityState::Idle
    }

    pub fn is_recovering(&self, now: Instant) -> bool {
        matches!(self.current(now), ActivityState::Recovering { .. })
    }
}

/// Read-only view of the orchestrator for hosts and tests.
#[derive(Debug, Clone)]
pub struct PlaybackSnapshot {
    pub intent: PlaybackIntent,
    pub engine: EngineState,
    pub transition: TransitionState,
    pub recovery: RecoveryState,
    pub activity: ActivityState,
    pub current_track: Option<Track>,
    pub track_count: usize,
    pub queue: Vec<String>,
    pub shuffle: bool,
    pub repeat: RepeatMode,
    pub gapless: bool,
    pub crossfade: bool,
    pub crossfade_secs: u32,
    pub load_attempt: Option<LoadAttempt>,
}
