//! # Engine Event Bridge
//!
//! Turns the engine into a single ordered stream of callbacks on an
//! [`EngineEventSink`], whether the engine pushes [`EngineSignal`]s or has to
//! be polled.
//!
//! In poll mode the bridge queries the engine every `poll_interval`, emits a
//! tick while playing (plus one on the playing-to-stopped edge), and
//! synthesizes `TrackEnded` when playback stops because the track finished.
//! A push stream that ends falls back to polling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_traits::engine::{EngineSignal, EngineSignalStream, PlaybackTick};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PlaybackError;
use crate::transport::TransportClient;
use crate::types::EngineState;

/// Receiver of bridged engine events. Calls are sequential, in arrival order.
#[async_trait]
pub trait EngineEventSink: Send + Sync {
    async fn on_tick(&self, tick: PlaybackTick);

    async fn on_track_ended(&self);

    async fn on_device_changed(&self, device: Option<String>);

    /// A status poll failed (poll mode only).
    async fn on_poll_failure(&self, error: PlaybackError);

    async fn on_poll_success(&self) {}
}

/// Running bridge task.
pub struct BridgeHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl BridgeHandle {
    /// Stop the bridge and wait for the task to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                warn!("Engine event bridge panicked");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub struct EngineEventBridge;

impl EngineEventBridge {
    /// Start bridging on the current Tokio runtime.
    pub fn spawn(
        transport: Arc<TransportClient>,
        sink: Arc<dyn EngineEventSink>,
        poll_interval: Duration,
    ) -> BridgeHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            if let Some(stream) = transport.subscribe() {
                info!("Engine event bridge using push events");
                if !run_push(stream, sink.as_ref(), &token).await {
                    return;
                }
                warn!("Engine event stream ended, falling back to polling");
            } else {
                info!(?poll_interval, "Engine event bridge polling");
            }
            run_poll(&transport, sink.as_ref(), poll_interval, &token).await;
        });

        BridgeHandle { cancel, task }
    }
}

/// Returns `false` when cancelled, `true` when the stream ended.
async fn run_push(
    mut stream: EngineSignalStream,
    sink: &dyn EngineEventSink,
    cancel: &CancellationToken,
) -> bool {
    loop {
        let signal = tokio::select! {
            _ = cancel.cancelled() => return false,
            signal = stream.next() => signal,
        };

        match signal {
            Some(EngineSignal::Tick(tick)) => sink.on_tick(tick).await,
            Some(EngineSignal::TrackEnded) => sink.on_track_ended().await,
            Some(EngineSignal::DeviceChanged { device }) => sink.on_device_changed(device).await,
            None => return true,
        }
    }
}

async fn run_poll(
    transport: &TransportClient,
    sink: &dyn EngineEventSink,
    poll_interval: Duration,
    cancel: &CancellationToken,
) {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut poller = PollState::default();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        match transport.poll_tick().await {
            Ok(tick) => {
                sink.on_poll_success().await;
                let step = poller.observe(&tick);
                if step.emit_tick {
                    sink.on_tick(tick).await;
                }
                if step.track_ended {
                    debug!("Synthesized track end from poll");
                    sink.on_track_ended().await;
                }
            }
            Err(e) => sink.on_poll_failure(e).await,
        }
    }
}

/// Edge detection for poll mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct PollState {
    was_playing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollStep {
    pub emit_tick: bool,
    pub track_ended: bool,
}

impl PollState {
    pub fn observe(&mut self, tick: &PlaybackTick) -> PollStep {
        let stopped = self.was_playing && !tick.is_playing;
        let step = PollStep {
            emit_tick: tick.is_playing || stopped,
            track_ended: stopped && tick.is_finished,
        };
        self.was_playing = tick.is_playing;
        step
    }
}

/// Orchestrator facts needed to judge a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickContext {
    /// Seek or recovery guard is active.
    pub suppressed: bool,
    /// A play/pause/load command is in flight.
    pub command_pending: bool,
    pub intent_playing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickVerdict {
    Suppressed,
    Accepted {
        state: EngineState,
        /// Engine-reported playing flag that overrides the intent.
        correct_intent: Option<bool>,
    },
}

/// Reconcile one tick against the orchestrator's view.
///
/// The engine is authoritative for position and for whether audio is
/// running, except while a command is in flight or the track just finished
/// (the end-of-track handler owns that decision).
pub fn reconcile_tick(tick: &PlaybackTick, known_duration: f64, ctx: TickContext) -> TickVerdict {
    if ctx.suppressed {
        return TickVerdict::Suppressed;
    }

    let duration = if tick.duration.is_finite() && tick.duration > 0.0 {
        tick.duration
    } else {
        known_duration.max(0.0)
    };

    let mut position = if tick.position.is_finite() {
        tick.position.max(0.0)
    } else {
        0.0
    };
    if duration > 0.0 {
        position = position.min(duration);
    }

    let correct_intent = (!ctx.command_pending
        && !tick.is_finished
        && tick.is_playing != ctx.intent_playing)
        .then_some(tick.is_playing);

    TickVerdict::Accepted {
        state: EngineState {
            position,
            duration,
            is_playing: tick.is_playing,
            is_finished: tick.is_finished,
        },
        correct_intent,
    }
}
