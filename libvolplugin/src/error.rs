//! Volume plugin error types.
//!
//! All errors in the `libvolplugin` crate are represented by the
//! [`VolumeError`] enum, which derives [`thiserror::Error`] for ergonomic error
//! handling and also implements [`Serialize`]/[`Deserialize`] so errors can be
//! reported back to the Docker daemon as plain messages.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for volume lifecycle operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum VolumeError {
    /// The volume name is malformed (missing marker, bad path component).
    #[error("invalid volume name {name:?}: {reason}")]
    InvalidName {
        /// Name as supplied by the client.
        name: String,
        /// Human-readable rejection reason.
        reason: String,
    },

    /// The requested volume is not known to the registry.
    #[error("volume {0} not found")]
    NotFound(String),

    /// Attaching the filesystem at the mount point failed.
    #[error("mount failed at {path}: {reason}")]
    MountFailed {
        /// Filesystem path where the mount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// Detaching the filesystem from the mount point failed.
    #[error("unmount failed at {path}: {reason}")]
    UnmountFailed {
        /// Filesystem path where the unmount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// Creating or removing a local mount-point directory failed.
    #[error("resource error at {path}: {reason}")]
    Resource {
        /// Directory involved.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// Removal was refused because the volume still has mount holders.
    #[error("volume {name} is busy ({holders} active mounts)")]
    Busy {
        /// Volume name.
        name: String,
        /// Outstanding holders at the time of the request.
        holders: usize,
    },

    /// A socket / HTTP level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request body could not be decoded.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The registry was shut down; no new volumes are attached.
    #[error("volume plugin is shutting down")]
    ShuttingDown,
}

impl VolumeError {
    /// Create a [`VolumeError::InvalidName`].
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a [`VolumeError::MountFailed`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn mount<E: std::fmt::Display>(path: &std::path::Path, e: E) -> Self {
        Self::MountFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
    }

    /// Create a [`VolumeError::UnmountFailed`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn unmount<E: std::fmt::Display>(path: &std::path::Path, e: E) -> Self {
        Self::UnmountFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
    }

    /// Create a [`VolumeError::Resource`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn resource<E: std::fmt::Display>(path: &std::path::Path, e: E) -> Self {
        Self::Resource {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
    }

    /// Create a [`VolumeError::Transport`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }
}
