//! Library store contract used by corrupted-file remediation.

use async_trait::async_trait;

use crate::error::Result;

/// Mutating access to the host's track library.
///
/// The playback core never scans or queries the library; it only removes
/// tracks that turned out to be undecodable.
#[async_trait]
pub trait LibraryStore: Send + Sync {
    /// Remove a track from the library by id.
    async fn remove_track(&self, track_id: &str) -> Result<()>;
}
