//! Last-played persistence using a JSON file

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{LastPlayed, PlaybackStateStore},
};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const FILE_NAME: &str = "last_played.json";
const APP_DIR: &str = "playback-core";

/// JSON-file backed [`PlaybackStateStore`].
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write never leaves a truncated state file behind. An unreadable
/// file is treated as "no saved session" rather than an error.
pub struct JsonPlaybackStateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonPlaybackStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store `last_played.json` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(FILE_NAME))
    }

    /// Store under the platform data directory, if one exists.
    pub fn default_location() -> Option<Self> {
        dirs::data_dir().map(|dir| Self::in_dir(dir.join(APP_DIR)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

#[async_trait]
impl PlaybackStateStore for JsonPlaybackStateStore {
    async fn load_last_played(&self) -> Result<Option<LastPlayed>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BridgeError::Io(e)),
        };

        match serde_json::from_slice::<LastPlayed>(&bytes) {
            Ok(state) => {
                debug!(track_id = %state.track_id, position = state.position_secs, "Loaded last played");
                Ok(Some(state))
            }
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Ignoring unreadable playback state");
                Ok(None)
            }
        }
    }

    async fn save_last_played(&self, state: &LastPlayed) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(BridgeError::Io)?;
        }

        let json = serde_json::to_vec_pretty(state)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, json).await.map_err(BridgeError::Io)?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(BridgeError::Io)?;

        debug!(track_id = %state.track_id, position = state.position_secs, "Saved last played");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }
}
