//! # Playback Error Types
//!
//! Errors surfaced by the orchestration core, plus the classification used to
//! decide between retry, remediation and user-facing failure.

use bridge_traits::BridgeError;
use std::time::Duration;
use thiserror::Error;

/// Message fragments engines use for undecodable or damaged files.
///
/// Matched case-insensitively against engine error text.
pub const DECODE_ERROR_SIGNATURES: &[&str] = &[
    "decode",
    "corrupt",
    "unsupported format",
    "unrecognized format",
    "invalid data",
    "malformed",
    "end of stream",
    "no supported audio track",
];

const NOT_FOUND_SIGNATURES: &[&str] = &["no such file", "not found", "cannot find"];

/// Errors that can occur during playback operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    // ========================================================================
    // Engine Errors
    // ========================================================================
    /// An engine command did not complete within its time budget.
    #[error("Audio engine {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The engine reported a failure.
    #[error("Audio engine {operation} failed: {message}")]
    Engine {
        operation: &'static str,
        message: String,
    },

    /// The engine does not implement an optional capability.
    #[error("Audio engine does not support {0}")]
    Unsupported(&'static str),

    /// Recovery failed; the backend is disabled until restart.
    #[error("Audio engine is unresponsive: {0}")]
    Unresponsive(String),

    // ========================================================================
    // Device Errors
    // ========================================================================
    #[error("No audio output device available. Please connect an audio device.")]
    DeviceUnavailable,

    // ========================================================================
    // Track Errors
    // ========================================================================
    /// The track was loaded but cannot be decoded.
    #[error("Cannot decode track {track_id}: {message}")]
    Corrupted { track_id: String, message: String },

    #[error("Track not found: {0}")]
    TrackNotFound(String),

    #[error("Track index {index} out of range ({len} tracks)")]
    InvalidIndex { index: usize, len: usize },

    #[error("No track loaded")]
    NoTrackLoaded,

    /// A newer request replaced this load before it finished.
    #[error("Load superseded by a newer request")]
    Superseded,

    // ========================================================================
    // Collaborator Errors
    // ========================================================================
    #[error("Library update failed: {0}")]
    Library(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Outcome category of a failed track load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadFailureKind {
    /// Undecodable file, eligible for remediation.
    Corrupted,
    NotFound,
    Device,
    Timeout,
    Engine,
    Superseded,
}

impl PlaybackError {
    /// Map a bridge error from the engine into a playback error.
    pub fn from_bridge(operation: &'static str, err: BridgeError) -> Self {
        match err {
            BridgeError::NotAvailable(_) => PlaybackError::Unsupported(operation),
            BridgeError::DeviceUnavailable(_) => PlaybackError::DeviceUnavailable,
            BridgeError::OperationFailed(message) => PlaybackError::Engine { operation, message },
            other => PlaybackError::Engine {
                operation,
                message: other.to_string(),
            },
        }
    }

    fn engine_message(&self) -> Option<String> {
        match self {
            PlaybackError::Engine { message, .. } => Some(message.to_lowercase()),
            _ => None,
        }
    }

    /// Returns `true` for undecodable or damaged media.
    pub fn is_decode_error(&self) -> bool {
        match self {
            PlaybackError::Corrupted { .. } => true,
            _ => self.engine_message().map_or(false, |message| {
                DECODE_ERROR_SIGNATURES
                    .iter()
                    .any(|signature| message.contains(signature))
            }),
        }
    }

    fn is_not_found(&self) -> bool {
        match self {
            PlaybackError::TrackNotFound(_) => true,
            _ => self.engine_message().map_or(false, |message| {
                NOT_FOUND_SIGNATURES
                    .iter()
                    .any(|signature| message.contains(signature))
            }),
        }
    }

    pub fn is_device_error(&self) -> bool {
        matches!(self, PlaybackError::DeviceUnavailable)
    }

    /// Returns `true` if retrying the same command may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.failure_kind(),
            LoadFailureKind::Timeout | LoadFailureKind::Engine
        ) && !matches!(
            self,
            PlaybackError::Unsupported(_)
                | PlaybackError::Unresponsive(_)
                | PlaybackError::InvalidIndex { .. }
                | PlaybackError::NoTrackLoaded
                | PlaybackError::Config(_)
        )
    }

    /// Returns `true` once the backend must not be driven again this session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PlaybackError::Unresponsive(_))
    }

    pub fn failure_kind(&self) -> LoadFailureKind {
        if matches!(self, PlaybackError::Superseded) {
            LoadFailureKind::Superseded
        } else if self.is_decode_error() {
            LoadFailureKind::Corrupted
        } else if self.is_not_found() {
            LoadFailureKind::NotFound
        } else if self.is_device_error() {
            LoadFailureKind::Device
        } else if matches!(self, PlaybackError::Timeout { .. }) {
            LoadFailureKind::Timeout
        } else {
            LoadFailureKind::Engine
        }
    }

    /// Next step shown to the user alongside the error.
    pub fn user_action(&self) -> Option<&'static str> {
        match self {
            PlaybackError::Unresponsive(_) => {
                Some("Restart the application to reinitialize audio playback.")
            }
            PlaybackError::Superseded => None,
            _ => match self.failure_kind() {
                LoadFailureKind::Device => Some("Connect an audio output device, then press play."),
                LoadFailureKind::Corrupted => {
                    Some("The file appears to be damaged. Replace it or remove it from the library.")
                }
                LoadFailureKind::NotFound => {
                    Some("Check that the file still exists, then rescan the library.")
                }
                LoadFailureKind::Timeout | LoadFailureKind::Engine => {
                    Some("Try again in a moment.")
                }
                LoadFailureKind::Superseded => None,
            },
        }
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
