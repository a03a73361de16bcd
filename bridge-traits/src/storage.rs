//! Playback session persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Last track the user was listening to and where they stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastPlayed {
    pub track_id: String,
    /// Position in seconds.
    pub position_secs: f64,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

impl LastPlayed {
    pub fn new(track_id: impl Into<String>, position_secs: f64) -> Self {
        Self {
            track_id: track_id.into(),
            position_secs: position_secs.max(0.0),
            saved_at: Some(Utc::now()),
        }
    }
}

/// Persists the last-played track between sessions.
///
/// Read once at startup and written periodically while playing, so writes
/// should be cheap and idempotent.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::{LastPlayed, PlaybackStateStore};
///
/// async fn remember(store: &dyn PlaybackStateStore) -> Result<()> {
///     store.save_last_played(&LastPlayed::new("track-42", 81.5)).await
/// }
/// ```
#[async_trait]
pub trait PlaybackStateStore: Send + Sync {
    async fn load_last_played(&self) -> Result<Option<LastPlayed>>;

    async fn save_last_played(&self, state: &LastPlayed) -> Result<()>;

    /// Forget the stored session.
    async fn clear(&self) -> Result<()> {
        Ok(())
    }
}
