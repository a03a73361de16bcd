//! Host callbacks
//!
//! Hosts register handlers as a [`HandlerTable`]. The orchestrator looks the
//! table up on every use, so replacing it takes effect on the next event
//! without restarting anything.

use std::sync::Arc;

use async_trait::async_trait;

use crate::types::Track;

/// Asks the user before a damaged track is removed from the library.
#[async_trait]
pub trait RemovalConfirmer: Send + Sync {
    /// `true` to remove the track.
    async fn confirm_removal(&self, track: &Track, reason: &str) -> bool;
}

/// Decides whether playback continues after a track ends.
///
/// Used for "stop after current track" style controls.
pub trait AdvanceGate: Send + Sync {
    fn allow_advance(&self, finished: &Track) -> bool;
}

#[derive(Clone, Default)]
pub struct HandlerTable {
    pub removal_confirmer: Option<Arc<dyn RemovalConfirmer>>,
    pub advance_gate: Option<Arc<dyn AdvanceGate>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_removal_confirmer(mut self, confirmer: Arc<dyn RemovalConfirmer>) -> Self {
        self.removal_confirmer = Some(confirmer);
        self
    }

    pub fn with_advance_gate(mut self, gate: Arc<dyn AdvanceGate>) -> Self {
        self.advance_gate = Some(gate);
        self
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("removal_confirmer", &self.removal_confirmer.is_some())
            .field("advance_gate", &self.advance_gate.is_some())
            .finish()
    }
}
