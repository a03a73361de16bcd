//! Volume normalization contract.

use async_trait::async_trait;

use crate::error::Result;

/// Applies per-track loudness normalization after a track is loaded.
///
/// Called once per successful load, before auto-play. Implementations push
/// the gain into the engine themselves; a track without gain information
/// should clear any previously applied gain.
#[async_trait]
pub trait VolumeNormalizer: Send + Sync {
    async fn apply_gain(&self, track_id: &str, path: &str) -> Result<()>;
}
