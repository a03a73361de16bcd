//! # Event Bus System
//!
//! Broadcasts reconciled playback state from the core to the UI layer using
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: [`CoreEvent`] wraps one enum per domain
//!   ([`PlaybackEvent`], [`EngineEvent`], [`LibraryEvent`])
//! - **EventBus**: cloneable publisher handle
//! - **EventStream**: receiver wrapper with optional filtering
//!
//! ```text
//! ┌──────────────┐    emit     ┌───────────┐   subscribe   ┌──────────┐
//! │ Orchestrator ├────────────>│           ├──────────────>│ UI layer │
//! └──────────────┘             │ EventBus  │               └──────────┘
//! ┌──────────────┐    emit     │           │   subscribe   ┌──────────┐
//! │ Event bridge ├────────────>│           ├──────────────>│ Host log │
//! └──────────────┘             └───────────┘               └──────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Playback(PlaybackEvent::Started {
//!     track_id: "track-1".to_string(),
//! }))
//! .ok();
//!
//! let event = rx.recv().await.unwrap();
//! assert_eq!(event.description(), "Playback started");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Emitting with no subscribers returns `SendError`; publishers ignore it with
//! `.ok()`. Slow subscribers receive `RecvError::Lagged(n)` and can keep
//! reading. `RecvError::Closed` means every publisher was dropped.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Position updates arrive every 100 ms, so this holds roughly 25 s of ticks
/// for a subscriber that stalls.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Playback(PlaybackEvent),
    Engine(EngineEvent),
    Library(LibraryEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Playback(e) => e.description(),
            CoreEvent::Engine(e) => e.description(),
            CoreEvent::Library(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Playback(PlaybackEvent::Error { .. }) => EventSeverity::Error,
            CoreEvent::Engine(EngineEvent::Unresponsive { .. }) => EventSeverity::Error,
            CoreEvent::Engine(EngineEvent::DeviceUnavailable { .. }) => EventSeverity::Error,
            CoreEvent::Playback(PlaybackEvent::Warning { .. }) => EventSeverity::Warning,
            CoreEvent::Engine(EngineEvent::Reconnecting { .. }) => EventSeverity::Warning,
            CoreEvent::Library(LibraryEvent::TrackRemoved { .. }) => EventSeverity::Warning,
            CoreEvent::Playback(PlaybackEvent::PositionChanged { .. }) => EventSeverity::Debug,
            _ => EventSeverity::Info,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Playback Events
// ============================================================================

/// Kind of track transition in progress.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransitionKind {
    Preload,
    Crossfade,
}

/// Events describing reconciled playback state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// A track finished loading and is now the current track.
    NowPlaying {
        track_id: String,
        index: usize,
        title: Option<String>,
        artist: Option<String>,
        /// Authoritative duration after load (milliseconds).
        duration_ms: u64,
    },
    Started {
        track_id: String,
    },
    Paused {
        track_id: String,
        /// Position when paused (milliseconds).
        position_ms: u64,
    },
    Stopped {
        track_id: Option<String>,
    },
    /// The last track ended and the sequencer has nothing to play next.
    Completed {
        track_id: String,
    },
    /// Accepted position tick (natural progression or seek).
    PositionChanged {
        track_id: String,
        position_ms: u64,
        duration_ms: u64,
    },
    VolumeChanged {
        /// User volume in percent (0-100).
        volume_percent: u8,
    },
    TransitionStarted {
        kind: TransitionKind,
        from_index: usize,
        to_index: usize,
    },
    TransitionFinished {
        kind: TransitionKind,
        to_index: usize,
        /// The transition was interrupted by navigation or a seek.
        cancelled: bool,
    },
    /// Non-fatal problem, e.g. a failed seek or volume change.
    Warning {
        message: String,
    },
    Error {
        track_id: Option<String>,
        message: String,
        /// Whether the user can retry.
        recoverable: bool,
        /// Next step the user can take.
        action: Option<String>,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::NowPlaying { .. } => "Now playing",
            PlaybackEvent::Started { .. } => "Playback started",
            PlaybackEvent::Paused { .. } => "Playback paused",
            PlaybackEvent::Stopped { .. } => "Playback stopped",
            PlaybackEvent::Completed { .. } => "Playback completed",
            PlaybackEvent::PositionChanged { .. } => "Playback position changed",
            PlaybackEvent::VolumeChanged { .. } => "Volume changed",
            PlaybackEvent::TransitionStarted { .. } => "Track transition started",
            PlaybackEvent::TransitionFinished { .. } => "Track transition finished",
            PlaybackEvent::Warning { .. } => "Playback warning",
            PlaybackEvent::Error { .. } => "Playback error",
        }
    }
}

// ============================================================================
// Engine Events
// ============================================================================

/// Health of the native audio engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum EngineEvent {
    /// The engine is being reinitialized before playback resumes.
    Reconnecting {
        reason: String,
    },
    Recovered,
    /// Recovery failed. Playback stays disabled until the app restarts.
    Unresponsive {
        message: String,
    },
    DeviceUnavailable {
        message: String,
    },
    DeviceChanged {
        device: Option<String>,
    },
}

impl EngineEvent {
    fn description(&self) -> &str {
        match self {
            EngineEvent::Reconnecting { .. } => "Reconnecting audio engine",
            EngineEvent::Recovered => "Audio engine recovered",
            EngineEvent::Unresponsive { .. } => "Audio engine unresponsive",
            EngineEvent::DeviceUnavailable { .. } => "Audio device unavailable",
            EngineEvent::DeviceChanged { .. } => "Audio device changed",
        }
    }
}

// ============================================================================
// Library Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    /// A corrupted track was removed from the library.
    TrackRemoved { track_id: String, reason: String },
}

impl LibraryEvent {
    fn description(&self) -> &str {
        match self {
            LibraryEvent::TrackRemoved { .. } => "Track removed from library",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus clones the sender, so every clone publishes to the same
/// subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if nobody is listening.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a receiver for all future events. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` that skips events not matching an optional filter.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventSeverity, EventStream};
///
/// let bus = EventBus::default();
/// let errors = EventStream::new(bus.subscribe())
///     .filter(|event| event.severity() >= EventSeverity::Warning);
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if the subscriber fell behind by `n` events,
    /// `RecvError::Closed` once all senders are dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Returns `None` if no matching event is currently buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
