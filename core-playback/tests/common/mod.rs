//! Scriptable in-memory engine shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_traits::engine::{
    AudioEngine, EngineCapabilities, EngineSignal, EngineSignalStream, PlaybackTick,
};
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::storage::PlaybackStateStore;
use core_playback::{PlaybackConfig, PlaybackOrchestrator, Track};
use core_runtime::config::{CoreConfig, FeatureFlags};
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent, Receiver};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Load(String),
    Play,
    Pause,
    Stop,
    Seek(f64),
    Volume(f32),
    Preload(String),
    Swap,
    ClearPreload,
    Recover,
}

#[derive(Debug)]
pub struct FakeState {
    pub calls: Vec<Call>,
    pub durations: HashMap<String, f64>,
    pub load_delays: HashMap<String, Duration>,
    pub corrupted: HashSet<String>,
    pub position: f64,
    pub playing: bool,
    pub finished: bool,
    pub loaded: Option<String>,
    pub preloaded: Option<String>,
    /// Number of upcoming status polls that fail.
    pub failing_polls: u32,
    pub inactive: Duration,
    pub device_changed: bool,
    pub recover_ok: bool,
    pub recover_delay: Duration,
    pub play_fails: bool,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            durations: HashMap::new(),
            load_delays: HashMap::new(),
            corrupted: HashSet::new(),
            position: 0.0,
            playing: false,
            finished: false,
            loaded: None,
            preloaded: None,
            failing_polls: 0,
            inactive: Duration::ZERO,
            device_changed: false,
            recover_ok: true,
            recover_delay: Duration::ZERO,
            play_fails: false,
        }
    }
}

pub struct FakeEngine {
    pub state: Mutex<FakeState>,
    capabilities: EngineCapabilities,
    sender: UnboundedSender<EngineSignal>,
    receiver: Mutex<Option<UnboundedReceiver<EngineSignal>>>,
}

impl FakeEngine {
    /// Poll-mode engine: `subscribe` returns `None`.
    pub fn polled() -> Arc<Self> {
        Arc::new(Self::build(EngineCapabilities::default()))
    }

    /// Engine that pushes whatever the test sends through [`FakeEngine::send`].
    pub fn pushing() -> Arc<Self> {
        Self::with_capabilities(EngineCapabilities {
            push_events: true,
            ..Default::default()
        })
    }

    pub fn with_capabilities(capabilities: EngineCapabilities) -> Arc<Self> {
        Arc::new(Self::build(capabilities))
    }

    fn build(capabilities: EngineCapabilities) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            state: Mutex::new(FakeState::default()),
            capabilities,
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub fn send(&self, signal: EngineSignal) {
        let _ = self.sender.unbounded_send(signal);
    }

    pub fn tick(&self, position: f64, duration: f64) {
        self.send(EngineSignal::Tick(PlaybackTick {
            position,
            duration,
            is_playing: true,
            is_finished: false,
        }));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, wanted: &Call) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == wanted).count()
    }

    pub fn count_loads(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Load(_)))
            .count()
    }

    pub fn volumes(&self) -> Vec<f32> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Volume(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    pub fn seeks(&self) -> Vec<f64> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Seek(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl AudioEngine for FakeEngine {
    async fn load(&self, path: &str) -> BridgeResult<()> {
        let delay = {
            let mut state = self.state.lock();
            state.calls.push(Call::Load(path.to_string()));
            if state.corrupted.contains(path) {
                return Err(BridgeError::OperationFailed(format!(
                    "decode error: invalid data in {path}"
                )));
            }
            state.load_delays.get(path).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        state.loaded = Some(path.to_string());
        state.position = 0.0;
        state.playing = false;
        state.finished = false;
        Ok(())
    }

    async fn play(&self) -> BridgeResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Play);
        if state.play_fails {
            return Err(BridgeError::OperationFailed("output stream stalled".into()));
        }
        state.playing = true;
        Ok(())
    }

    async fn pause(&self) -> BridgeResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Pause);
        state.playing = false;
        Ok(())
    }

    async fn stop(&self) -> BridgeResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Stop);
        state.playing = false;
        state.position = 0.0;
        Ok(())
    }

    async fn seek(&self, seconds: f64) -> BridgeResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Seek(seconds));
        state.position = seconds;
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> BridgeResult<()> {
        self.record(Call::Volume(volume));
        Ok(())
    }

    async fn get_duration(&self) -> BridgeResult<f64> {
        let state = self.state.lock();
        Ok(state
            .loaded
            .as_ref()
            .and_then(|path| state.durations.get(path).copied())
            .unwrap_or(0.0))
    }

    async fn get_position(&self) -> BridgeResult<f64> {
        let mut state = self.state.lock();
        if state.failing_polls > 0 {
            state.failing_polls -= 1;
            return Err(BridgeError::OperationFailed("status query failed".into()));
        }
        Ok(state.position)
    }

    async fn is_playing(&self) -> BridgeResult<bool> {
        Ok(self.state.lock().playing)
    }

    async fn is_finished(&self) -> BridgeResult<bool> {
        Ok(self.state.lock().finished)
    }

    async fn is_device_available(&self) -> BridgeResult<bool> {
        Ok(true)
    }

    async fn has_device_changed(&self) -> BridgeResult<bool> {
        Ok(self.state.lock().device_changed)
    }

    async fn get_inactive_duration(&self) -> BridgeResult<Duration> {
        Ok(self.state.lock().inactive)
    }

    async fn recover(&self) -> BridgeResult<bool> {
        let (delay, ok) = {
            let mut state = self.state.lock();
            state.calls.push(Call::Recover);
            (state.recover_delay, state.recover_ok)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        if ok {
            state.inactive = Duration::ZERO;
            state.device_changed = false;
            state.loaded = None;
            state.playing = false;
        }
        Ok(ok)
    }

    async fn preload(&self, path: &str) -> BridgeResult<()> {
        if !self.capabilities.gapless_preload {
            return Err(BridgeError::NotAvailable("preload".into()));
        }
        let mut state = self.state.lock();
        state.calls.push(Call::Preload(path.to_string()));
        state.preloaded = Some(path.to_string());
        Ok(())
    }

    async fn swap_to_preloaded(&self) -> BridgeResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Swap);
        match state.preloaded.take() {
            Some(path) => {
                state.loaded = Some(path);
                state.position = 0.0;
                state.finished = false;
                Ok(())
            }
            None => Err(BridgeError::OperationFailed("nothing preloaded".into())),
        }
    }

    async fn clear_preload(&self) -> BridgeResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::ClearPreload);
        state.preloaded = None;
        Ok(())
    }

    async fn has_preloaded(&self) -> BridgeResult<bool> {
        Ok(self.state.lock().preloaded.is_some())
    }

    fn capabilities(&self) -> EngineCapabilities {
        self.capabilities
    }

    fn subscribe(&self) -> Option<EngineSignalStream> {
        if !self.capabilities.push_events {
            return None;
        }
        self.receiver.lock().take().map(|rx| rx.boxed())
    }
}

pub fn tracks(durations: &[f64]) -> Vec<Track> {
    durations
        .iter()
        .enumerate()
        .map(|(i, &duration)| {
            Track::new(format!("t{i}"), format!("/music/t{i}.flac"), duration)
                .with_title(format!("Track {i}"))
        })
        .collect()
}

/// Register the library durations with the engine so loads report them.
pub fn register(engine: &FakeEngine, tracks: &[Track]) {
    let mut state = engine.state.lock();
    for track in tracks {
        state.durations.insert(track.path.clone(), track.duration);
    }
}

pub fn core_config(engine: Arc<FakeEngine>) -> CoreConfig {
    CoreConfig {
        engine,
        library_store: None,
        normalizer: None,
        state_store: None,
        features: FeatureFlags::default(),
        crossfade_secs: 5,
        initial_volume: 0.7,
    }
}

pub fn with_store(mut core: CoreConfig, store: Arc<dyn PlaybackStateStore>) -> CoreConfig {
    core.state_store = Some(store);
    core
}

pub fn orchestrator(core: CoreConfig) -> PlaybackOrchestrator {
    let config = PlaybackConfig {
        shuffle_seed: Some(7),
        ..PlaybackConfig::default()
    };
    PlaybackOrchestrator::new(core, config, EventBus::new(1024)).unwrap()
}

/// Let spawned tasks and bridged signals run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

pub fn drain(rx: &mut Receiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn now_playing(events: &[CoreEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            CoreEvent::Playback(PlaybackEvent::NowPlaying { track_id, .. }) => {
                Some(track_id.clone())
            }
            _ => None,
        })
        .collect()
}
