//! # Playback Configuration
//!
//! Timing and retry policy for the orchestration core.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Orchestration timing configuration.
///
/// User-facing preferences (gapless, crossfade, remediation) live in
/// `core_runtime::config::FeatureFlags`; this struct holds the engineering
/// knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Budget for every engine command except load/preload/recover.
    ///
    /// Default: 3 seconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout: Duration,

    /// Budget for load, preload and recover.
    ///
    /// Default: 5 seconds.
    #[serde(default = "default_load_timeout")]
    pub load_timeout: Duration,

    /// Retries after the first failed load attempt.
    ///
    /// Default: 1.
    #[serde(default = "default_load_retries")]
    pub load_retries: u32,

    /// Delay before the first retry.
    ///
    /// Default: 250 ms.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay: Duration,

    /// Factor applied to the delay after each retry.
    ///
    /// Default: 2.0.
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,

    /// Upper bound for any retry delay.
    ///
    /// Default: 2 seconds.
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay: Duration,

    /// Remaining time at which the next track is preloaded.
    ///
    /// Default: 5 seconds.
    #[serde(default = "default_preload_window_secs")]
    pub preload_window_secs: f64,

    /// Elapsed time after which "previous" restarts the current track.
    ///
    /// Default: 3 seconds.
    #[serde(default = "default_restart_threshold_secs")]
    pub restart_threshold_secs: f64,

    /// Ticks are ignored for this long after a seek or recovery.
    ///
    /// Default: 500 ms.
    #[serde(default = "default_seek_guard")]
    pub seek_guard: Duration,

    /// Engine inactivity after which play() reinitializes the output first.
    ///
    /// Default: 5 minutes.
    #[serde(default = "default_idle_reinit_threshold")]
    pub idle_reinit_threshold: Duration,

    /// Consecutive status-poll failures that trigger a recovery cycle.
    ///
    /// Default: 5.
    #[serde(default = "default_max_poll_errors")]
    pub max_poll_errors: u32,

    /// Status poll period for engines without push events.
    ///
    /// Default: 100 ms.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Volume update period during a crossfade ramp.
    ///
    /// Default: 50 ms.
    #[serde(default = "default_crossfade_step")]
    pub crossfade_step: Duration,

    /// Minimum time between last-played writes while playing.
    ///
    /// Default: 5 seconds.
    #[serde(default = "default_persist_interval")]
    pub persist_interval: Duration,

    /// Queue entries discarded at most while looking for a playable one.
    ///
    /// Default: 32.
    #[serde(default = "default_max_queue_skips")]
    pub max_queue_skips: usize,

    /// Remembered positions at or below this are not restored.
    ///
    /// Default: 0.5 seconds.
    #[serde(default = "default_restore_min_position_secs")]
    pub restore_min_position_secs: f64,

    /// Fixed shuffle seed for reproducible sequences.
    #[serde(default)]
    pub shuffle_seed: Option<u64>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            command_timeout: default_command_timeout(),
            load_timeout: default_load_timeout(),
            load_retries: default_load_retries(),
            retry_base_delay: default_retry_base_delay(),
            retry_multiplier: default_retry_multiplier(),
            retry_max_delay: default_retry_max_delay(),
            preload_window_secs: default_preload_window_secs(),
            restart_threshold_secs: default_restart_threshold_secs(),
            seek_guard: default_seek_guard(),
            idle_reinit_threshold: default_idle_reinit_threshold(),
            max_poll_errors: default_max_poll_errors(),
            poll_interval: default_poll_interval(),
            crossfade_step: default_crossfade_step(),
            persist_interval: default_persist_interval(),
            max_queue_skips: default_max_queue_skips(),
            restore_min_position_secs: default_restore_min_position_secs(),
            shuffle_seed: None,
        }
    }
}

impl PlaybackConfig {
    /// Delay before retry number `attempt` (0-based), capped at
    /// `retry_max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = self.retry_multiplier.powi(attempt as i32);
        let millis = self.retry_base_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.retry_max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.command_timeout.is_zero() {
            return Err("command_timeout must be > 0".to_string());
        }

        if self.load_timeout.is_zero() {
            return Err("load_timeout must be > 0".to_string());
        }

        if self.retry_multiplier < 1.0 {
            return Err("retry_multiplier must be >= 1.0".to_string());
        }

        if self.retry_max_delay < self.retry_base_delay {
            return Err("retry_max_delay cannot be shorter than retry_base_delay".to_string());
        }

        if !(self.preload_window_secs > 0.0) {
            return Err("preload_window_secs must be > 0".to_string());
        }

        if self.restart_threshold_secs < 0.0 {
            return Err("restart_threshold_secs cannot be negative".to_string());
        }

        if self.max_poll_errors == 0 {
            return Err("max_poll_errors must be > 0".to_string());
        }

        if self.poll_interval.is_zero() {
            return Err("poll_interval must be > 0".to_string());
        }

        if self.crossfade_step.is_zero() {
            return Err("crossfade_step must be > 0".to_string());
        }

        if self.max_queue_skips == 0 {
            return Err("max_queue_skips must be > 0".to_string());
        }

        Ok(())
    }
}

// Default value functions for serde

fn default_command_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_load_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_load_retries() -> u32 {
    1
}

fn default_retry_base_delay() -> Duration {
    Duration::from_millis(250)
}

fn default_retry_multiplier() -> f64 {
    2.0
}

fn default_retry_max_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_preload_window_secs() -> f64 {
    5.0
}

fn default_restart_threshold_secs() -> f64 {
    3.0
}

fn default_seek_guard() -> Duration {
    Duration::from_millis(500)
}

fn default_idle_reinit_threshold() -> Duration {
    Duration::from_secs(300)
}

fn default_max_poll_errors() -> u32 {
    5
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_crossfade_step() -> Duration {
    Duration::from_millis(50)
}

fn default_persist_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_queue_skips() -> usize {
    32
}

fn default_restore_min_position_secs() -> f64 {
    0.5
}
