//! # Playback Orchestrator
//!
//! Owns the session (track list, queue, modes, intent) and drives the other
//! components from user commands and bridged engine events.
//!
//! ## Concurrency
//!
//! Commands and engine events may interleave freely. Session state lives
//! behind a `parking_lot` mutex that is never held across an `.await`; every
//! async step re-reads the session afterwards and checks that the world it
//! started from still holds (latest-wins loading, plan versions for
//! preloads, the live crossfade slot).
//!
//! ## Events
//!
//! Everything the UI needs is published on the [`EventBus`] as
//! [`CoreEvent::Playback`], [`CoreEvent::Engine`] (from recovery) and
//! [`CoreEvent::Library`] (corrupted-track removal).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bridge_traits::engine::PlaybackTick;
use bridge_traits::library::LibraryStore;
use bridge_traits::storage::{LastPlayed, PlaybackStateStore};
use core_runtime::config::{CoreConfig, FeatureFlags, CROSSFADE_SECS_RANGE};
use core_runtime::events::{
    CoreEvent, EngineEvent, EventBus, LibraryEvent, PlaybackEvent, Receiver, TransitionKind,
};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::bridge::{
    reconcile_tick, BridgeHandle, EngineEventBridge, EngineEventSink, TickContext, TickVerdict,
};
use crate::config::PlaybackConfig;
use crate::error::{LoadFailureKind, PlaybackError, Result};
use crate::handlers::HandlerTable;
use crate::loader::{LoadOutcome, LoadedTrack, TrackLoader};
use crate::recovery::RecoveryManager;
use crate::sequencer::{self, NextDecision, PreviousAction, SequenceContext};
use crate::transition::{
    self, CrossfadeOutcome, CrossfadeRamp, RampTarget, TransitionAction, TransitionSettings,
};
use crate::transport::{clamp_volume, TransportClient};
use crate::types::{
    ActivityCell, ActivityState, EngineState, PlaybackIntent, PlaybackSnapshot, RepeatMode,
    Track, TransitionMode, TransitionState,
};

const MAX_HISTORY: usize = 100;

// ============================================================================
// Session state
// ============================================================================

/// A next track sitting in the engine's secondary slot.
#[derive(Debug, Clone)]
struct Preloaded {
    index: usize,
    track_id: String,
    /// Queue entries to drop when the swap happens.
    consumed: usize,
    plan_version: u64,
}

#[derive(Debug)]
struct Session {
    tracks: Vec<Track>,
    intent: PlaybackIntent,
    engine: EngineState,
    /// Track the engine currently holds, if any.
    loaded_track_id: Option<String>,
    /// Recovery generation the loaded track belongs to.
    loaded_generation: u64,
    /// Recovery generation the engine volume was last pushed under.
    volume_generation: Option<u64>,
    shuffle: bool,
    repeat: RepeatMode,
    queue: Vec<String>,
    history: Vec<usize>,
    features: FeatureFlags,
    crossfade_secs: u32,
    transition: TransitionState,
    boundary_handled: bool,
    preloaded: Option<Preloaded>,
    /// The engine's secondary slot holds a track that is no longer next.
    preload_stale: bool,
    /// Bumped whenever the answer to "what plays next" may have changed.
    plan_version: u64,
    pending_seek: Option<f64>,
    seek_flush_scheduled: bool,
    last_persist: Option<Instant>,
}

impl Session {
    fn new(core: &CoreConfig) -> Self {
        Self {
            tracks: Vec::new(),
            intent: PlaybackIntent {
                playing: false,
                volume: clamp_volume(core.initial_volume),
                current_index: None,
            },
            engine: EngineState::default(),
            loaded_track_id: None,
            loaded_generation: 0,
            volume_generation: None,
            shuffle: false,
            repeat: RepeatMode::Off,
            queue: Vec::new(),
            history: Vec::new(),
            features: core.features,
            crossfade_secs: core.crossfade_secs,
            transition: TransitionState::default(),
            boundary_handled: false,
            preloaded: None,
            preload_stale: false,
            plan_version: 0,
            pending_seek: None,
            seek_flush_scheduled: false,
            last_persist: None,
        }
    }

    fn current_track(&self) -> Option<&Track> {
        self.intent.current_index.and_then(|i| self.tracks.get(i))
    }

    fn current_track_id(&self) -> Option<String> {
        self.current_track().map(|t| t.id.clone())
    }

    fn resolve(&self, track_id: &str) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == track_id)
    }

    fn sequence_context(&self) -> SequenceContext {
        SequenceContext {
            current: self.intent.current_index,
            total: self.tracks.len(),
            shuffle: self.shuffle,
            repeat: self.repeat,
        }
    }

    fn transition_settings(&self, config: &PlaybackConfig) -> TransitionSettings {
        TransitionSettings {
            gapless: self.features.gapless,
            crossfade: self.features.crossfade,
            crossfade_secs: f64::from(self.crossfade_secs),
            preload_window_secs: config.preload_window_secs,
        }
    }

    /// The user still wants `track_id`. Ids are unique within the list, so
    /// this survives index shifts from removals.
    fn is_targeting(&self, track_id: &str) -> bool {
        self.current_track().map_or(false, |t| t.id == track_id)
    }

    /// Drop any prepared next track; the next boundary re-plans.
    fn invalidate_plan(&mut self) {
        self.plan_version += 1;
        if self.preloaded.take().is_some() {
            self.preload_stale = true;
        }
        if self.transition.mode == TransitionMode::Preloading {
            self.transition = TransitionState::default();
            self.boundary_handled = false;
        }
    }

    fn push_history(&mut self) {
        if let Some(current) = self.intent.current_index {
            if self.history.last() != Some(&current) {
                self.history.push(current);
            }
            if self.history.len() > MAX_HISTORY {
                self.history.remove(0);
            }
        }
    }

    fn consume_queue(&mut self, count: usize) {
        let count = count.min(self.queue.len());
        self.queue.drain(..count);
    }
}

/// Counts engine commands in flight so ticks never override a fresh intent.
struct CommandGuard<'a>(&'a AtomicUsize);

impl<'a> CommandGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for CommandGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// What corrupted-track handling decided for a failed load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Remediation {
    /// The track was removed; try this index next.
    Advance(usize),
    /// The track stays; surface the load error.
    Kept,
    /// The user selected something else meanwhile; do nothing more.
    Superseded,
}

struct CrossfadeTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    config: PlaybackConfig,
    transport: Arc<TransportClient>,
    recovery: Arc<RecoveryManager>,
    loader: TrackLoader,
    activity: Arc<ActivityCell>,
    events: EventBus,
    library: Option<Arc<dyn LibraryStore>>,
    state_store: Option<Arc<dyn PlaybackStateStore>>,
    handlers: RwLock<HandlerTable>,
    session: Mutex<Session>,
    crossfade: Mutex<Option<CrossfadeTask>>,
    bridge: Mutex<Option<BridgeHandle>>,
    rng: Mutex<StdRng>,
    pending_commands: AtomicUsize,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Single owner of playback for one engine.
///
/// Cheap to clone; all clones drive the same session.
///
/// ```ignore
/// let orchestrator = PlaybackOrchestrator::new(core_config, PlaybackConfig::default(), bus)?;
/// orchestrator.set_tracks(tracks).await;
/// orchestrator.restore_session().await;
/// orchestrator.start_bridge();
/// orchestrator.play().await?;
/// ```
#[derive(Clone)]
pub struct PlaybackOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PlaybackOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackOrchestrator")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl PlaybackOrchestrator {
    pub fn new(core: CoreConfig, config: PlaybackConfig, events: EventBus) -> Result<Self> {
        core.validate()
            .map_err(|e| PlaybackError::Config(e.to_string()))?;
        config.validate().map_err(PlaybackError::Config)?;

        let transport = Arc::new(TransportClient::new(core.engine.clone(), &config));
        let activity = Arc::new(ActivityCell::new(config.seek_guard));
        let recovery = Arc::new(RecoveryManager::new(
            transport.clone(),
            activity.clone(),
            events.clone(),
            config.idle_reinit_threshold,
            config.max_poll_errors,
        ));
        let loader = TrackLoader::new(
            transport.clone(),
            recovery.clone(),
            core.normalizer.clone(),
            config.clone(),
        );
        let rng = match config.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        info!(
            gapless = core.features.gapless,
            crossfade = core.features.crossfade,
            crossfade_secs = core.crossfade_secs,
            "Playback orchestrator created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                session: Mutex::new(Session::new(&core)),
                config,
                transport,
                recovery,
                loader,
                activity,
                events,
                library: core.library_store,
                state_store: core.state_store,
                handlers: RwLock::new(HandlerTable::default()),
                crossfade: Mutex::new(None),
                bridge: Mutex::new(None),
                rng: Mutex::new(rng),
                pending_commands: AtomicUsize::new(0),
            }),
        })
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.inner.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    // ------------------------------------------------------------------
    // Session setup
    // ------------------------------------------------------------------

    /// Replace the track list. The current track keeps playing and stays
    /// current if its id is still in the new list.
    #[instrument(skip(self, tracks), fields(count = tracks.len()))]
    pub async fn set_tracks(&self, tracks: Vec<Track>) {
        self.cancel_crossfade(true).await;

        let mut session = self.inner.session.lock();
        let current_id = session.current_track_id();
        session.tracks = tracks;
        let current = current_id.and_then(|id| session.resolve(&id));
        session.intent.current_index = current;
        session.history.clear();
        let known: Vec<String> = session.tracks.iter().map(|t| t.id.clone()).collect();
        session.queue.retain(|id| known.contains(id));
        session.invalidate_plan();
        drop(session);
        debug!(current = ?current, "Track list replaced");
        self.clear_stale_preload();
    }

    /// Point the session at the last played track without loading it.
    ///
    /// Its saved position is applied by the first load that completes.
    /// Returns the restored index.
    #[instrument(skip(self))]
    pub async fn restore_session(&self) -> Option<usize> {
        let store = self.inner.state_store.clone()?;

        let last = match store.load_last_played().await {
            Ok(Some(last)) => last,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Could not read last played track");
                return None;
            }
        };

        let index = {
            let mut session = self.inner.session.lock();
            let index = session.resolve(&last.track_id)?;
            if session.intent.current_index.is_none() {
                session.intent.current_index = Some(index);
                let duration = session.tracks[index].duration;
                session.engine = EngineState {
                    position: last.position_secs,
                    ..EngineState::for_track(duration)
                };
            }
            index
        };

        info!(track_id = %last.track_id, position = last.position_secs, "Restored last session");
        self.inner.loader.set_restore_target(last);
        Some(index)
    }

    pub fn register_handlers(&self, handlers: HandlerTable) {
        debug!(?handlers, "Handlers registered");
        *self.inner.handlers.write() = handlers;
    }

    // ------------------------------------------------------------------
    // Transport commands
    // ------------------------------------------------------------------

    /// Load the track at `index` and start it.
    #[instrument(skip(self))]
    pub async fn select_track(&self, index: usize) -> Result<()> {
        self.cancel_crossfade(true).await;
        self.inner.session.lock().push_history();
        self.load_index(index, true).await
    }

    /// Start or resume playback. A second call while already playing does
    /// nothing.
    #[instrument(skip(self))]
    pub async fn play(&self) -> Result<()> {
        if self.inner.recovery.is_unresponsive() {
            let err = PlaybackError::Unresponsive("playback is disabled until restart".to_string());
            self.report_error(None, &err);
            return Err(err);
        }

        enum Step {
            Load(usize),
            Resume,
        }

        let step = {
            let mut session = self.inner.session.lock();
            if session.intent.playing {
                debug!("Already playing");
                return Ok(());
            }
            let loaded = session.loaded_track_id.clone();
            match session.intent.current_index {
                Some(index)
                    if loaded.is_some()
                        && session.tracks.get(index).map(|t| &t.id) == loaded.as_ref() =>
                {
                    session.intent.playing = true;
                    Step::Resume
                }
                Some(index) => Step::Load(index),
                None if !session.tracks.is_empty() => Step::Load(0),
                None => return Err(PlaybackError::NoTrackLoaded),
            }
        };

        match step {
            Step::Load(index) => self.load_index(index, true).await,
            Step::Resume => self.start_engine(true).await,
        }
    }

    #[instrument(skip(self))]
    pub async fn pause(&self) -> Result<()> {
        self.cancel_crossfade(true).await;

        let (track_id, was_playing) = {
            let mut session = self.inner.session.lock();
            let was_playing = session.intent.playing || session.engine.is_playing;
            session.intent.playing = false;
            (session.current_track_id(), was_playing)
        };
        if !was_playing {
            return Ok(());
        }

        let _command = self.command();
        if let Err(e) = self.inner.transport.pause().await {
            warn!(error = %e, "Pause failed");
            self.report_error(track_id, &e);
            return Err(e);
        }

        let position = {
            let mut session = self.inner.session.lock();
            session.engine.is_playing = false;
            session.engine.position
        };
        self.inner.recovery.mark_idle();
        if let Some(track_id) = track_id {
            self.emit(PlaybackEvent::Paused {
                track_id,
                position_ms: millis(position),
            });
        }
        self.persist_now().await;
        Ok(())
    }

    pub async fn toggle(&self) -> Result<()> {
        let playing = self.inner.session.lock().intent.playing;
        if playing {
            self.pause().await
        } else {
            self.play().await
        }
    }

    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        self.cancel_crossfade(true).await;
        self.inner.loader.abort_live();

        let track_id = {
            let mut session = self.inner.session.lock();
            session.intent.playing = false;
            session.invalidate_plan();
            session.current_track_id()
        };
        self.clear_stale_preload();

        let result = {
            let _command = self.command();
            self.inner.transport.stop().await
        };

        {
            let mut session = self.inner.session.lock();
            session.engine.position = 0.0;
            session.engine.is_playing = false;
            session.boundary_handled = false;
        }
        self.inner.recovery.mark_idle();
        self.persist_now().await;
        self.emit(PlaybackEvent::Stopped { track_id });

        result.map_err(|e| {
            warn!(error = %e, "Stop failed");
            e
        })
    }

    /// Skip to the next track. `Ok(None)` at the end of the list with
    /// repeat off.
    #[instrument(skip(self))]
    pub async fn next(&self) -> Result<Option<usize>> {
        self.cancel_crossfade(true).await;

        let index = {
            let mut session = self.inner.session.lock();
            let decision = self.plan_next(&session);
            session.consume_queue(decision.consumed);
            if decision.index.is_some() {
                session.push_history();
            }
            decision.index
        };

        let Some(index) = index else {
            debug!("No next track");
            return Ok(None);
        };
        self.load_index(index, true).await?;
        Ok(Some(index))
    }

    /// Go back a track, or restart the current one past the restart
    /// threshold.
    #[instrument(skip(self))]
    pub async fn previous(&self) -> Result<()> {
        self.cancel_crossfade(true).await;

        let action = {
            let session = self.inner.session.lock();
            let mut rng = self.inner.rng.lock();
            sequencer::previous_action(
                &session.sequence_context(),
                session.engine.position,
                self.inner.config.restart_threshold_secs,
                session.history.last().copied(),
                &mut *rng,
            )
        };

        match action {
            PreviousAction::Restart => self.seek_to(0.0).await,
            PreviousAction::Index(index) => {
                {
                    let mut session = self.inner.session.lock();
                    if session.history.last() == Some(&index) {
                        session.history.pop();
                    }
                }
                self.load_index(index, true).await
            }
            PreviousAction::None => Ok(()),
        }
    }

    /// Seek within the current track.
    ///
    /// While a recovery is running the target is held and applied once the
    /// guard window ends. Engine failures surface as a warning event.
    #[instrument(skip(self))]
    pub async fn seek(&self, seconds: f64) -> Result<()> {
        self.cancel_crossfade(true).await;
        self.seek_to(seconds).await
    }

    #[instrument(skip(self))]
    pub async fn set_volume(&self, volume: f32) -> Result<()> {
        let volume = clamp_volume(volume);
        let crossfading = {
            let mut session = self.inner.session.lock();
            session.intent.volume = volume;
            session.transition.mode == TransitionMode::Crossfading
        };

        self.emit(PlaybackEvent::VolumeChanged {
            volume_percent: (volume * 100.0).round() as u8,
        });

        if crossfading {
            debug!(volume, "Volume change deferred until crossfade ends");
            return Ok(());
        }

        match self.inner.transport.set_volume(volume).await {
            Ok(()) => {
                let generation = self.inner.recovery.generation();
                self.inner.session.lock().volume_generation = Some(generation);
            }
            Err(e) => {
                warn!(error = %e, "Volume change failed");
                self.emit(PlaybackEvent::Warning {
                    message: format!("Could not change volume: {e}"),
                });
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Modes
    // ------------------------------------------------------------------

    pub fn set_shuffle(&self, enabled: bool) {
        let mut session = self.inner.session.lock();
        if session.shuffle != enabled {
            session.shuffle = enabled;
            session.invalidate_plan();
            info!(enabled, "Shuffle changed");
        }
        drop(session);
        self.clear_stale_preload();
    }

    pub fn set_repeat(&self, mode: RepeatMode) {
        let mut session = self.inner.session.lock();
        if session.repeat != mode {
            session.repeat = mode;
            session.invalidate_plan();
            info!(?mode, "Repeat mode changed");
        }
        drop(session);
        self.clear_stale_preload();
    }

    /// Play `track_id` next, ahead of the regular order.
    pub fn enqueue(&self, track_id: &str) -> Result<()> {
        let mut session = self.inner.session.lock();
        if session.resolve(track_id).is_none() {
            return Err(PlaybackError::TrackNotFound(track_id.to_string()));
        }
        session.queue.push(track_id.to_string());
        session.invalidate_plan();
        debug!(track_id, queued = session.queue.len(), "Track enqueued");
        drop(session);
        self.clear_stale_preload();
        Ok(())
    }

    pub async fn set_crossfade(&self, enabled: bool, secs: u32) -> Result<()> {
        if !CROSSFADE_SECS_RANGE.contains(&secs) {
            return Err(PlaybackError::Config(format!(
                "crossfade duration must be between {} and {} seconds, got {secs}",
                CROSSFADE_SECS_RANGE.start(),
                CROSSFADE_SECS_RANGE.end()
            )));
        }

        {
            let mut session = self.inner.session.lock();
            session.features.crossfade = enabled;
            session.crossfade_secs = secs;
            session.invalidate_plan();
        }
        info!(enabled, secs, "Crossfade settings changed");
        self.clear_stale_preload();

        if !enabled {
            self.cancel_crossfade(true).await;
        }
        Ok(())
    }

    pub fn set_gapless(&self, enabled: bool) {
        let mut session = self.inner.session.lock();
        session.features.gapless = enabled;
        session.invalidate_plan();
        drop(session);
        info!(enabled, "Gapless playback changed");
        self.clear_stale_preload();
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let activity = self.inner.activity.current(Instant::now());
        let recovery = self.inner.recovery.state();
        let load_attempt = self.inner.loader.live_attempt();

        let session = self.inner.session.lock();
        PlaybackSnapshot {
            intent: session.intent,
            engine: session.engine,
            transition: session.transition,
            recovery,
            activity,
            current_track: session.current_track().cloned(),
            track_count: session.tracks.len(),
            queue: session.queue.clone(),
            shuffle: session.shuffle,
            repeat: session.repeat,
            gapless: session.features.gapless,
            crossfade: session.features.crossfade,
            crossfade_secs: session.crossfade_secs,
            load_attempt,
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start forwarding engine events into the orchestrator. Must be called
    /// inside a Tokio runtime. Calling it again while running is a no-op.
    pub fn start_bridge(&self) {
        let mut slot = self.inner.bridge.lock();
        if slot.as_ref().map_or(false, |handle| !handle.is_finished()) {
            return;
        }
        let sink: Arc<dyn EngineEventSink> = Arc::new(OrchestratorSink {
            inner: Arc::downgrade(&self.inner),
        });
        *slot = Some(EngineEventBridge::spawn(
            self.inner.transport.clone(),
            sink,
            self.inner.config.poll_interval,
        ));
    }

    /// Stop background work and save the session.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.cancel_crossfade(false).await;
        let bridge = self.inner.bridge.lock().take();
        if let Some(bridge) = bridge {
            bridge.shutdown().await;
        }
        self.persist_now().await;
        info!("Playback orchestrator shut down");
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    fn command(&self) -> CommandGuard<'_> {
        CommandGuard::new(&self.inner.pending_commands)
    }

    fn target_guard(&self, track_id: &str) -> impl Fn() -> bool + Send + Sync + '_ {
        let track_id = track_id.to_string();
        move || self.inner.session.lock().is_targeting(&track_id)
    }

    fn plan_next(&self, session: &Session) -> NextDecision {
        let mut rng = self.inner.rng.lock();
        sequencer::next_index(
            &session.sequence_context(),
            &session.queue,
            |id| session.resolve(id),
            &mut *rng,
            self.inner.config.max_queue_skips,
        )
    }

    /// Make `index` current and load it, skipping past corrupted tracks the
    /// library agreed to remove.
    async fn load_index(&self, index: usize, autoplay: bool) -> Result<()> {
        let mut index = index;
        let mut skips = 0;

        loop {
            let track = {
                let mut session = self.inner.session.lock();
                let Some(track) = session.tracks.get(index).cloned() else {
                    return Err(PlaybackError::InvalidIndex {
                        index,
                        len: session.tracks.len(),
                    });
                };
                session.intent.current_index = Some(index);
                if autoplay {
                    session.intent.playing = true;
                }
                session.engine = EngineState::for_track(track.duration);
                session.loaded_track_id = None;
                session.boundary_handled = false;
                session.invalidate_plan();
                track
            };
            self.clear_stale_preload();
            info!(track_id = %track.id, index, "Loading track");

            if autoplay {
                if let Err(e) = self.inner.recovery.ensure_ready_for_play().await {
                    self.fail_playback(Some(track.id.clone()), &e);
                    return Err(e);
                }
            }

            let outcome = {
                let _command = self.command();
                let guard = self.target_guard(&track.id);
                self.inner.loader.load(&track, index, &guard).await
            };

            match outcome {
                LoadOutcome::Superseded => {
                    debug!(track_id = %track.id, "Load superseded");
                    return Ok(());
                }
                LoadOutcome::Loaded(loaded) => {
                    if !self.apply_loaded(&track, loaded, true) {
                        return Ok(());
                    }
                    // A pause issued while the load ran wins over autoplay.
                    let wanted = self.inner.session.lock().intent.playing;
                    if autoplay && wanted {
                        return self.start_engine(false).await;
                    }
                    if autoplay {
                        debug!(track_id = %track.id, "Paused while loading, not starting");
                    }
                    return Ok(());
                }
                LoadOutcome::Failed { kind, error } => {
                    if kind == LoadFailureKind::Corrupted && skips < self.inner.config.max_queue_skips {
                        match self.remediate(&track, &error).await {
                            Remediation::Advance(next) => {
                                skips += 1;
                                index = next;
                                continue;
                            }
                            Remediation::Superseded => {
                                debug!(track_id = %track.id, "Selection changed during remediation");
                                self.clear_stale_preload();
                                return Ok(());
                            }
                            Remediation::Kept => {}
                        }
                    }
                    self.fail_playback(Some(track.id.clone()), &error);
                    return Err(error);
                }
            }
        }
    }

    /// Publish a finished load if it is still the one the user wants.
    fn apply_loaded(&self, track: &Track, loaded: LoadedTrack, announce: bool) -> bool {
        let generation = self.inner.recovery.generation();
        let index = {
            let mut session = self.inner.session.lock();
            if !self.inner.loader.is_live(loaded.epoch) || !session.is_targeting(&track.id) {
                return false;
            }
            let Some(index) = session.intent.current_index else {
                return false;
            };
            if let Some(entry) = session.tracks.get_mut(index) {
                entry.duration = loaded.duration;
            }
            session.engine = EngineState {
                position: loaded.restored_position.unwrap_or(0.0),
                ..EngineState::for_track(loaded.duration)
            };
            session.loaded_track_id = Some(track.id.clone());
            session.loaded_generation = generation;
            session.boundary_handled = false;
            index
        };

        if announce {
            self.emit(PlaybackEvent::NowPlaying {
                track_id: track.id.clone(),
                index,
                title: track.title.clone(),
                artist: track.artist.clone(),
                duration_ms: millis(loaded.duration),
            });
        }
        true
    }

    /// Play the current track, reloading it first when a reinit dropped it.
    async fn start_engine(&self, check_ready: bool) -> Result<()> {
        let result = {
            let _command = self.command();
            async {
                if check_ready {
                    self.inner.recovery.ensure_ready_for_play().await?;
                }
                self.inner
                    .recovery
                    .run_with_recovery("play", || self.play_op())
                    .await
            }
            .await
        };

        match result {
            Ok(()) => {
                let (track_id, paused) = {
                    let mut session = self.inner.session.lock();
                    let paused = !session.intent.playing;
                    if !paused {
                        session.engine.is_playing = true;
                        session.engine.is_finished = false;
                    }
                    (session.current_track_id(), paused)
                };
                if paused {
                    debug!("Paused while starting, stopping output again");
                    let _command = self.command();
                    if let Err(e) = self.inner.transport.pause().await {
                        warn!(error = %e, "Pause after start failed");
                    }
                    return Ok(());
                }
                self.inner.recovery.mark_active();
                if let Some(track_id) = track_id {
                    self.emit(PlaybackEvent::Started { track_id });
                }
                Ok(())
            }
            Err(PlaybackError::Superseded) => Ok(()),
            Err(e) => {
                let track_id = self.inner.session.lock().current_track_id();
                self.fail_playback(track_id, &e);
                Err(e)
            }
        }
    }

    async fn play_op(&self) -> Result<()> {
        let generation = self.inner.recovery.generation();
        let (needs_reload, volume) = {
            let session = self.inner.session.lock();
            let needs_reload = session.loaded_track_id.is_none()
                || session.loaded_generation != generation;
            let volume = (session.volume_generation != Some(generation)).then_some(session.intent.volume);
            (needs_reload, volume)
        };

        if needs_reload {
            self.reload_current().await?;
        }
        if let Some(volume) = volume {
            match self.inner.transport.set_volume(volume).await {
                Ok(()) => self.inner.session.lock().volume_generation = Some(generation),
                Err(e) => debug!(error = %e, "Initial volume not applied"),
            }
        }
        self.inner.transport.play().await
    }

    /// Load the current track again after the engine lost it, keeping the
    /// position.
    async fn reload_current(&self) -> Result<()> {
        let (track, index, position) = {
            let session = self.inner.session.lock();
            let index = session.intent.current_index.ok_or(PlaybackError::NoTrackLoaded)?;
            let track = session
                .tracks
                .get(index)
                .cloned()
                .ok_or(PlaybackError::NoTrackLoaded)?;
            (track, index, session.engine.position)
        };
        debug!(track_id = %track.id, position, "Reloading current track");

        let guard = self.target_guard(&track.id);
        let loaded = match self.inner.loader.load(&track, index, &guard).await {
            LoadOutcome::Loaded(loaded) => loaded,
            LoadOutcome::Superseded => return Err(PlaybackError::Superseded),
            LoadOutcome::Failed { error, .. } => return Err(error),
        };
        if !self.apply_loaded(&track, loaded, false) {
            return Err(PlaybackError::Superseded);
        }

        if loaded.restored_position.is_none() && position > self.inner.config.restore_min_position_secs {
            self.inner.session.lock().engine.position = position;
            self.inner.activity.begin_seek(Instant::now());
            if let Err(e) = self.inner.transport.seek(position).await {
                warn!(error = %e, "Could not return to previous position");
            }
        }
        Ok(())
    }

    /// Remove a corrupted track when the features and the user allow it.
    ///
    /// Confirmation and removal both await, so the user may have moved on
    /// by the time they finish. The track is still removed then, but the
    /// newer selection is left alone.
    async fn remediate(&self, track: &Track, error: &PlaybackError) -> Remediation {
        let features = self.inner.session.lock().features;
        if !features.remove_corrupted_tracks {
            return Remediation::Kept;
        }
        let Some(library) = self.inner.library.clone() else {
            return Remediation::Kept;
        };
        let reason = error.to_string();

        if features.confirm_removal {
            let confirmer = self.inner.handlers.read().removal_confirmer.clone();
            let Some(confirmer) = confirmer else {
                info!(track_id = %track.id, "No removal confirmer registered, keeping track");
                return Remediation::Kept;
            };
            if !confirmer.confirm_removal(track, &reason).await {
                info!(track_id = %track.id, "Removal declined");
                return self.kept_unless_superseded(track);
            }
        }

        if let Err(e) = library.remove_track(&track.id).await {
            warn!(track_id = %track.id, error = %e, "Could not remove corrupted track");
            self.emit(PlaybackEvent::Warning {
                message: format!("Could not remove {}: {e}", track.id),
            });
            return self.kept_unless_superseded(track);
        }
        warn!(track_id = %track.id, %reason, "Removed corrupted track from library");
        let _ = self.inner.events.emit(CoreEvent::Library(LibraryEvent::TrackRemoved {
            track_id: track.id.clone(),
            reason,
        }));

        let mut session = self.inner.session.lock();
        let still_current = session.is_targeting(&track.id);
        let current_id = session.current_track_id();
        let Some(position) = session.resolve(&track.id) else {
            return if still_current {
                Remediation::Kept
            } else {
                Remediation::Superseded
            };
        };
        session.tracks.remove(position);
        session.queue.retain(|id| id != &track.id);
        session.history.retain(|&i| i != position);
        for entry in session.history.iter_mut() {
            if *entry > position {
                *entry -= 1;
            }
        }
        session.invalidate_plan();

        if !still_current {
            let current = current_id.and_then(|id| session.resolve(&id));
            session.intent.current_index = current;
            return Remediation::Superseded;
        }
        session.intent.current_index = None;

        let ctx = SequenceContext {
            current: position.checked_sub(1),
            ..session.sequence_context()
        };
        let mut rng = self.inner.rng.lock();
        match sequencer::next_index(&ctx, &[], |_| None, &mut *rng, 0).index {
            Some(next) => Remediation::Advance(next),
            None => Remediation::Kept,
        }
    }

    fn kept_unless_superseded(&self, track: &Track) -> Remediation {
        if self.inner.session.lock().is_targeting(&track.id) {
            Remediation::Kept
        } else {
            Remediation::Superseded
        }
    }

    // ------------------------------------------------------------------
    // Seeking
    // ------------------------------------------------------------------

    async fn seek_to(&self, seconds: f64) -> Result<()> {
        let now = Instant::now();
        if self.inner.activity.is_recovering(now) {
            self.queue_seek(seconds);
            return Ok(());
        }

        let target = {
            let mut session = self.inner.session.lock();
            if session.loaded_track_id.is_none() {
                return Err(PlaybackError::NoTrackLoaded);
            }
            let mut target = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
            if session.engine.duration > 0.0 {
                target = target.min(session.engine.duration);
            }
            session.engine.position = target;
            session.engine.is_finished = false;
            if !session.transition.is_active()
                && session.engine.remaining() > self.inner.config.preload_window_secs
            {
                session.boundary_handled = false;
            }
            target
        };

        self.inner.activity.begin_seek(now);
        debug!(target, "Seeking");
        if let Err(e) = self.inner.transport.seek(target).await {
            warn!(error = %e, target, "Seek failed");
            self.emit(PlaybackEvent::Warning {
                message: format!("Seek failed: {e}"),
            });
        }
        Ok(())
    }

    /// Hold the newest seek target until the recovery guard lifts.
    fn queue_seek(&self, seconds: f64) {
        let schedule = {
            let mut session = self.inner.session.lock();
            session.pending_seek = Some(seconds);
            !std::mem::replace(&mut session.seek_flush_scheduled, true)
        };
        debug!(seconds, "Seek held until recovery finishes");

        if schedule {
            let this = self.clone();
            tokio::spawn(async move { this.flush_pending_seek().await });
        }
    }

    async fn flush_pending_seek(&self) {
        loop {
            match self.inner.activity.current(Instant::now()) {
                ActivityState::Recovering { until: Some(until) } => sleep_until(until).await,
                ActivityState::Recovering { until: None } => sleep(self.inner.config.seek_guard).await,
                _ => break,
            }
        }

        let pending = {
            let mut session = self.inner.session.lock();
            session.seek_flush_scheduled = false;
            session.pending_seek.take()
        };
        if let Some(seconds) = pending {
            if let Err(e) = self.seek_to(seconds).await {
                debug!(error = %e, "Held seek dropped");
            }
        }
    }

    // ------------------------------------------------------------------
    // Engine events
    // ------------------------------------------------------------------

    async fn handle_tick(&self, tick: PlaybackTick) {
        let now = Instant::now();
        let suppressed = self.inner.activity.is_suppressed(now);
        let command_pending = self.inner.pending_commands.load(Ordering::SeqCst) > 0;

        let (known_duration, intent_playing) = {
            let session = self.inner.session.lock();
            (session.engine.duration, session.intent.playing)
        };
        let verdict = reconcile_tick(
            &tick,
            known_duration,
            TickContext {
                suppressed,
                command_pending,
                intent_playing,
            },
        );
        let TickVerdict::Accepted { state, correct_intent } = verdict else {
            trace!(position = tick.position, "Tick suppressed");
            return;
        };

        let (track_id, action, persist) = {
            let mut session = self.inner.session.lock();
            session.engine = state;
            if let Some(playing) = correct_intent {
                info!(playing, "Engine state overrides playback intent");
                session.intent.playing = playing;
            }
            if transition::is_boundary_reset(state.position) && !session.transition.is_active() {
                session.boundary_handled = false;
            }

            let action = if session.intent.playing && state.is_playing && !command_pending {
                transition::evaluate(
                    &session.transition_settings(&self.inner.config),
                    &state,
                    &session.transition,
                    session.boundary_handled,
                )
            } else {
                TransitionAction::None
            };

            let persist = state.is_playing
                && session
                    .last_persist
                    .map_or(true, |at| now.duration_since(at) >= self.inner.config.persist_interval);
            if persist {
                session.last_persist = Some(now);
            }
            (session.current_track_id(), action, persist)
        };

        if let Some(track_id) = track_id.clone() {
            self.emit(PlaybackEvent::PositionChanged {
                track_id,
                position_ms: millis(state.position),
                duration_ms: millis(state.duration),
            });
        }
        match (correct_intent, track_id) {
            (Some(false), Some(track_id)) => {
                self.inner.recovery.mark_idle();
                self.emit(PlaybackEvent::Paused {
                    track_id,
                    position_ms: millis(state.position),
                });
            }
            (Some(true), Some(track_id)) => {
                self.inner.recovery.mark_active();
                self.emit(PlaybackEvent::Started { track_id });
            }
            _ => {}
        }

        if persist {
            let this = self.clone();
            tokio::spawn(async move { this.persist_now().await });
        }

        match action {
            TransitionAction::Preload => self.start_preload().await,
            TransitionAction::Crossfade => self.start_crossfade().await,
            TransitionAction::None => {}
        }
    }

    async fn handle_track_ended(&self) {
        let (finished, repeat) = {
            let mut session = self.inner.session.lock();
            if session.transition.mode == TransitionMode::Crossfading {
                debug!("Track end during crossfade ignored");
                return;
            }
            session.engine.is_playing = false;
            session.engine.is_finished = true;
            match session.current_track().cloned() {
                Some(track) => (track, session.repeat),
                None => return,
            }
        };
        info!(track_id = %finished.id, "Track ended");

        if repeat == RepeatMode::One {
            self.restart_current().await;
            return;
        }

        let gate = self.inner.handlers.read().advance_gate.clone();
        if let Some(gate) = gate {
            if !gate.allow_advance(&finished) {
                info!(track_id = %finished.id, "Advance held by host");
                self.halt_after(&finished).await;
                return;
            }
        }

        if self.try_swap_preloaded().await {
            return;
        }

        let index = {
            let mut session = self.inner.session.lock();
            let decision = self.plan_next(&session);
            session.consume_queue(decision.consumed);
            if decision.index.is_some() {
                session.push_history();
            }
            decision.index
        };

        match index {
            Some(index) => {
                if let Err(e) = self.load_index(index, true).await {
                    debug!(error = %e, "Auto-advance failed");
                }
            }
            None => self.halt_after(&finished).await,
        }
    }

    async fn restart_current(&self) {
        {
            let mut session = self.inner.session.lock();
            session.intent.playing = true;
            session.engine.position = 0.0;
            session.boundary_handled = false;
        }
        if let Err(e) = self.seek_to(0.0).await {
            debug!(error = %e, "Restart seek failed");
        }
        if let Err(e) = self.start_engine(false).await {
            debug!(error = %e, "Restart failed");
        }
    }

    /// End of playback: the list ran out or the host stopped the advance.
    async fn halt_after(&self, finished: &Track) {
        {
            let mut session = self.inner.session.lock();
            session.intent.playing = false;
            session.engine.position = 0.0;
            session.invalidate_plan();
        }
        self.clear_stale_preload();
        self.inner.recovery.mark_idle();
        self.persist_now().await;
        self.emit(PlaybackEvent::Completed {
            track_id: finished.id.clone(),
        });
    }

    /// Switch to the gapless-preloaded track if it is still the right one.
    async fn try_swap_preloaded(&self) -> bool {
        let (preloaded, track) = {
            let mut session = self.inner.session.lock();
            let preloaded = session.preloaded.take();
            if session.transition.mode == TransitionMode::Preloading {
                session.transition = TransitionState::default();
            }
            let Some(preloaded) = preloaded else {
                return false;
            };
            let track = session
                .tracks
                .get(preloaded.index)
                .filter(|t| t.id == preloaded.track_id)
                .cloned();
            let Some(track) = track.filter(|_| preloaded.plan_version == session.plan_version)
            else {
                session.preload_stale = true;
                return false;
            };

            session.consume_queue(preloaded.consumed);
            session.push_history();
            session.intent.current_index = Some(preloaded.index);
            session.intent.playing = true;
            session.engine = EngineState::for_track(track.duration);
            session.loaded_track_id = None;
            session.invalidate_plan();
            (preloaded, track)
        };
        let index = preloaded.index;

        let swapped = {
            let _command = self.command();
            self.inner.transport.swap_to_preloaded().await
        };
        if let Err(e) = swapped {
            warn!(track_id = %track.id, error = %e, "Gapless swap failed, loading normally");
            if let Err(e) = self.load_index(index, true).await {
                debug!(error = %e, "Fallback load failed");
            }
            return true;
        }

        let epoch = self.inner.loader.begin(&track, index);
        let duration = self.inner.loader.resolve_duration(&track).await;
        self.inner.loader.apply_gain(&track).await;
        let loaded = LoadedTrack {
            epoch,
            duration,
            restored_position: None,
        };
        if !self.apply_loaded(&track, loaded, true) {
            return true;
        }
        info!(track_id = %track.id, "Gapless transition");
        self.emit(PlaybackEvent::TransitionFinished {
            kind: TransitionKind::Preload,
            to_index: index,
            cancelled: false,
        });

        if let Err(e) = self.start_engine(false).await {
            debug!(error = %e, "Playback after gapless swap failed");
        }
        true
    }

    async fn handle_device_changed(&self, device: Option<String>) {
        info!(?device, "Output device changed");
        let _ = self
            .inner
            .events
            .emit(CoreEvent::Engine(EngineEvent::DeviceChanged { device }));

        let playing = self.inner.session.lock().intent.playing;
        if !playing {
            // The next play() notices the change and reinitializes.
            return;
        }

        match self.inner.recovery.reinitialize("output device changed").await {
            Ok(()) => {
                if let Err(e) = self.start_engine(false).await {
                    debug!(error = %e, "Resume after device change failed");
                }
            }
            Err(e) => {
                let track_id = self.inner.session.lock().current_track_id();
                self.fail_playback(track_id, &e);
            }
        }
    }

    async fn handle_poll_failure(&self, error: PlaybackError) {
        match self.inner.recovery.record_poll_failure(&error).await {
            None => {}
            Some(Ok(())) => {
                let playing = self.inner.session.lock().intent.playing;
                if playing {
                    if let Err(e) = self.start_engine(false).await {
                        debug!(error = %e, "Resume after poll recovery failed");
                    }
                }
            }
            Some(Err(e)) => {
                let track_id = self.inner.session.lock().current_track_id();
                self.fail_playback(track_id, &e);
            }
        }
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    async fn start_preload(&self) {
        let gapless_preload = self.inner.transport.capabilities().gapless_preload;

        let (from, plan, path) = {
            let mut session = self.inner.session.lock();
            session.boundary_handled = true;
            if !gapless_preload || session.repeat == RepeatMode::One {
                return;
            }
            let Some(from) = session.intent.current_index else {
                return;
            };
            let decision = self.plan_next(&session);
            let Some(target) = decision.index else {
                return;
            };
            let Some(track) = session.tracks.get(target).cloned() else {
                return;
            };
            session.transition = TransitionState::begin(TransitionMode::Preloading, target);
            session.preloaded = None;
            let plan = Preloaded {
                index: target,
                track_id: track.id,
                consumed: decision.consumed,
                plan_version: session.plan_version,
            };
            (from, plan, track.path)
        };

        self.emit(PlaybackEvent::TransitionStarted {
            kind: TransitionKind::Preload,
            from_index: from,
            to_index: plan.index,
        });

        let this = self.clone();
        tokio::spawn(async move {
            let result = this.inner.transport.preload(&path).await;
            let mut session = this.inner.session.lock();
            if session.plan_version != plan.plan_version
                || session.transition.mode != TransitionMode::Preloading
            {
                debug!("Preload result is stale");
                if result.is_ok() {
                    session.preload_stale = true;
                    drop(session);
                    this.clear_stale_preload();
                }
                return;
            }
            match result {
                Ok(()) => {
                    debug!(track_id = %plan.track_id, "Next track preloaded");
                    session.preloaded = Some(plan);
                }
                Err(e) => {
                    debug!(error = %e, "Preload failed, next track loads normally");
                    session.transition = TransitionState::default();
                }
            }
        });
    }

    async fn start_crossfade(&self) {
        let caps = self.inner.transport.capabilities();
        let step = self.inner.config.crossfade_step;

        let (driver, ramp) = {
            let mut session = self.inner.session.lock();
            session.boundary_handled = true;
            if session.repeat == RepeatMode::One {
                return;
            }
            let Some(from) = session.intent.current_index else {
                return;
            };
            let decision = self.plan_next(&session);
            let Some(target) = decision.index.filter(|&target| target != from) else {
                return;
            };
            let Some(track) = session.tracks.get(target).cloned() else {
                return;
            };
            session.transition = TransitionState::begin(TransitionMode::Crossfading, target);
            let ramp = CrossfadeRamp {
                base_volume: session.intent.volume,
                duration: transition::ramp_duration(
                    f64::from(session.crossfade_secs),
                    session.engine.remaining(),
                    step,
                ),
                step,
            };
            let driver = CrossfadeDriver {
                orchestrator: self.clone(),
                from,
                target,
                consumed: decision.consumed,
                track,
                dual_stream: caps.dual_stream && caps.gapless_preload,
                preloaded: AtomicBool::new(false),
            };
            (driver, ramp)
        };

        info!(from = driver.from, to = driver.target, duration = ?ramp.duration, "Crossfade started");
        self.emit(PlaybackEvent::TransitionStarted {
            kind: TransitionKind::Crossfade,
            from_index: driver.from,
            to_index: driver.target,
        });

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let this = self.clone();
        let handle = tokio::spawn(async move {
            if driver.dual_stream {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = driver.prepare() => {}
                }
            }
            let outcome = transition::run_crossfade(ramp, token, &driver).await;
            this.finish_crossfade(driver.target, outcome).await;
        });

        let previous = self
            .inner
            .crossfade
            .lock()
            .replace(CrossfadeTask { cancel, handle });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    async fn finish_crossfade(&self, target: usize, outcome: CrossfadeOutcome) {
        if outcome == CrossfadeOutcome::Cancelled {
            return;
        }

        let volume = {
            let mut session = self.inner.session.lock();
            session.transition = TransitionState::default();
            session.intent.volume
        };

        if outcome == CrossfadeOutcome::SwitchFailed {
            if let Err(e) = self.inner.transport.set_volume(volume).await {
                warn!(error = %e, "Could not restore volume after failed crossfade");
            }
        }
        info!(?outcome, "Crossfade finished");
        self.emit(PlaybackEvent::TransitionFinished {
            kind: TransitionKind::Crossfade,
            to_index: target,
            cancelled: outcome != CrossfadeOutcome::Completed,
        });
    }

    /// Stop a running crossfade. With `restore`, the engine goes back to the
    /// user volume.
    async fn cancel_crossfade(&self, restore: bool) {
        let task = self.inner.crossfade.lock().take();
        let Some(task) = task else {
            return;
        };
        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            if e.is_panic() {
                warn!("Crossfade task panicked");
            }
        }

        let cancelled = {
            let mut session = self.inner.session.lock();
            if session.transition.mode == TransitionMode::Crossfading {
                let target = session.transition.target_index;
                session.transition = TransitionState::default();
                Some((target, session.intent.volume))
            } else {
                None
            }
        };
        let Some((target, volume)) = cancelled else {
            return;
        };

        if restore {
            if let Err(e) = self.inner.transport.set_volume(volume).await {
                warn!(error = %e, "Could not restore volume after cancelled crossfade");
            }
        }
        info!("Crossfade cancelled");
        self.emit(PlaybackEvent::TransitionFinished {
            kind: TransitionKind::Crossfade,
            to_index: target.unwrap_or_default(),
            cancelled: true,
        });
    }

    /// Midpoint of a crossfade: make the incoming track current and start it.
    async fn crossfade_switch(&self, driver: &CrossfadeDriver) -> bool {
        let index = driver.target;
        {
            let mut session = self.inner.session.lock();
            if !session.tracks.get(index).map_or(false, |t| t.id == driver.track.id) {
                return false;
            }
            session.consume_queue(driver.consumed);
            session.push_history();
            session.intent.current_index = Some(index);
            session.engine = EngineState::for_track(driver.track.duration);
            session.loaded_track_id = None;
            session.preloaded = None;
        }

        let _command = self.command();

        if driver.preloaded.load(Ordering::SeqCst) {
            match self.inner.transport.swap_to_preloaded().await {
                Ok(()) => {
                    let epoch = self.inner.loader.begin(&driver.track, index);
                    let duration = self.inner.loader.resolve_duration(&driver.track).await;
                    self.inner.loader.apply_gain(&driver.track).await;
                    let loaded = LoadedTrack {
                        epoch,
                        duration,
                        restored_position: None,
                    };
                    return self.apply_loaded(&driver.track, loaded, true)
                        && self.play_switched(&driver.track).await;
                }
                Err(e) => debug!(error = %e, "Crossfade swap failed, loading instead"),
            }
        }

        let guard = self.target_guard(&driver.track.id);
        match self.inner.loader.load(&driver.track, index, &guard).await {
            LoadOutcome::Loaded(loaded) => {
                if !self.apply_loaded(&driver.track, loaded, true) {
                    return false;
                }
            }
            LoadOutcome::Superseded => return false,
            LoadOutcome::Failed { error, .. } => {
                self.fail_playback(Some(driver.track.id.clone()), &error);
                return false;
            }
        }
        self.play_switched(&driver.track).await
    }

    async fn play_switched(&self, track: &Track) -> bool {
        match self.inner.transport.play().await {
            Ok(()) => {
                self.inner.session.lock().engine.is_playing = true;
                self.emit(PlaybackEvent::Started {
                    track_id: track.id.clone(),
                });
                true
            }
            Err(e) => {
                self.fail_playback(Some(track.id.clone()), &e);
                false
            }
        }
    }

    /// Empty the engine's secondary slot after a prepared next track was
    /// dropped. Skipped when a newer preload is already planned.
    fn clear_stale_preload(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if !std::mem::take(&mut self.inner.session.lock().preload_stale) {
            return;
        }

        let this = self.clone();
        runtime.spawn(async move {
            let replanned = {
                let session = this.inner.session.lock();
                session.preloaded.is_some() || session.transition.is_active()
            };
            if replanned {
                return;
            }
            match this.inner.transport.clear_preload().await {
                Ok(()) => debug!("Stale preload cleared"),
                Err(e) => debug!(error = %e, "Could not clear stale preload"),
            }
        });
    }

    // ------------------------------------------------------------------
    // Persistence and reporting
    // ------------------------------------------------------------------

    async fn persist_now(&self) {
        let Some(store) = self.inner.state_store.clone() else {
            return;
        };
        let record = {
            let mut session = self.inner.session.lock();
            session.last_persist = Some(Instant::now());
            session
                .current_track()
                .map(|t| LastPlayed::new(t.id.clone(), session.engine.position))
        };
        let Some(record) = record else {
            return;
        };

        if let Err(e) = store.save_last_played(&record).await {
            warn!(error = %e, "Could not save last played track");
        }
    }

    fn emit(&self, event: PlaybackEvent) {
        let _ = self.inner.events.emit(CoreEvent::Playback(event));
    }

    fn report_error(&self, track_id: Option<String>, error: &PlaybackError) {
        self.emit(PlaybackEvent::Error {
            track_id,
            message: error.to_string(),
            recoverable: !error.is_fatal(),
            action: error.user_action().map(str::to_string),
        });
    }

    /// Playback could not continue: drop the play intent and tell the UI.
    fn fail_playback(&self, track_id: Option<String>, error: &PlaybackError) {
        if *error == PlaybackError::Superseded {
            return;
        }
        self.inner.session.lock().intent.playing = false;
        warn!(track_id = ?track_id, error = %error, "Playback failed");
        self.report_error(track_id, error);
    }
}

fn millis(seconds: f64) -> u64 {
    if seconds.is_finite() {
        (seconds.max(0.0) * 1000.0).round() as u64
    } else {
        0
    }
}

// ============================================================================
// Crossfade driver
// ============================================================================

struct CrossfadeDriver {
    orchestrator: PlaybackOrchestrator,
    from: usize,
    target: usize,
    consumed: usize,
    track: Track,
    dual_stream: bool,
    preloaded: AtomicBool,
}

impl CrossfadeDriver {
    /// Dual-stream engines get the incoming track ahead of the midpoint.
    async fn prepare(&self) {
        match self.orchestrator.inner.transport.preload(&self.track.path).await {
            Ok(()) => self.preloaded.store(true, Ordering::SeqCst),
            Err(e) => debug!(error = %e, "Crossfade preload failed"),
        }
    }
}

#[async_trait]
impl RampTarget for CrossfadeDriver {
    async fn apply_volume(&self, volume: f32) {
        if let Err(e) = self.orchestrator.inner.transport.set_volume(volume).await {
            debug!(error = %e, volume, "Ramp step dropped");
        }
    }

    async fn switch_track(&self) -> bool {
        self.orchestrator.crossfade_switch(self).await
    }

    fn restore_volume(&self) -> f32 {
        self.orchestrator.inner.session.lock().intent.volume
    }
}

// ============================================================================
// Bridge sink
// ============================================================================

struct OrchestratorSink {
    inner: Weak<Inner>,
}

impl OrchestratorSink {
    fn orchestrator(&self) -> Option<PlaybackOrchestrator> {
        self.inner.upgrade().map(|inner| PlaybackOrchestrator { inner })
    }
}

#[async_trait]
impl EngineEventSink for OrchestratorSink {
    async fn on_tick(&self, tick: PlaybackTick) {
        if let Some(orchestrator) = self.orchestrator() {
            orchestrator.handle_tick(tick).await;
        }
    }

    async fn on_track_ended(&self) {
        if let Some(orchestrator) = self.orchestrator() {
            orchestrator.handle_track_ended().await;
        }
    }

    async fn on_device_changed(&self, device: Option<String>) {
        if let Some(orchestrator) = self.orchestrator() {
            orchestrator.handle_device_changed(device).await;
        }
    }

    async fn on_poll_failure(&self, error: PlaybackError) {
        if let Some(orchestrator) = self.orchestrator() {
            orchestrator.handle_poll_failure(error).await;
        }
    }

    async fn on_poll_success(&self) {
        if let Some(orchestrator) = self.orchestrator() {
            orchestrator.inner.recovery.record_poll_success();
        }
    }
}
