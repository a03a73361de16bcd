//! Workspace facade crate.
//!
//! Re-exports the playback core, its runtime and the host bridge contracts so a
//! desktop shell can depend on `playback-workspace` alone. The default
//! `desktop-shims` feature also pulls in the desktop bridge implementations.

pub use bridge_traits;
pub use core_playback;
pub use core_runtime;

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop;

pub use core_playback::{PlaybackError, PlaybackOrchestrator, PlaybackSnapshot, RepeatMode, Track};
pub use core_runtime::{CoreConfig, CoreEvent, EventBus};
