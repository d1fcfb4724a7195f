//! Core volume plugin types: names, status snapshots, and policies.
//!
//! These types form the data model shared by the driver trait, the registry,
//! and the transport layer.  The ones that cross the socket are
//! [`Serialize`]/[`Deserialize`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::VolumeError;

/// Prefix every volume handled by this driver must carry.
pub const VOLUME_MARKER: char = '@';

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Client-supplied volume name, e.g. `@app/config`.
///
/// The part after [`VOLUME_MARKER`] names a subtree of the key-value store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct VolumeName(pub String);

impl VolumeName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return the store subtree this name refers to, with the marker stripped.
    ///
    /// The subtree must be a normalised relative path: non-empty, single `/`
    /// separators, no leading or trailing `/`, and no `.` / `..` components.
    /// Keeping the form canonical is what makes two distinct names map to two
    /// distinct mount points.
    pub fn subtree(&self) -> Result<&str, VolumeError> {
        let rest = self.0.strip_prefix(VOLUME_MARKER).ok_or_else(|| {
            VolumeError::invalid_name(&self.0, format!("must start with '{VOLUME_MARKER}'"))
        })?;

        if rest.is_empty() {
            return Err(VolumeError::invalid_name(&self.0, "empty store path"));
        }
        if rest.contains('\0') {
            return Err(VolumeError::invalid_name(&self.0, "contains a NUL byte"));
        }
        for component in rest.split('/') {
            match component {
                "" => {
                    return Err(VolumeError::invalid_name(
                        &self.0,
                        "empty path component (leading, trailing or doubled '/')",
                    ));
                }
                "." | ".." => {
                    return Err(VolumeError::invalid_name(
                        &self.0,
                        format!("path component {component:?} is not allowed"),
                    ));
                }
                _ => {}
            }
        }
        Ok(rest)
    }
}

impl fmt::Display for VolumeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Volume status
// ---------------------------------------------------------------------------

/// Mount state of a volume as seen by the registry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeStatus {
    /// Outstanding mount holders.
    pub refcount: usize,
    /// Whether a live mount session exists for the volume.
    pub mounted: bool,
}

/// Snapshot of a known volume, returned by `Get` and `List`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeInfo {
    pub name: VolumeName,
    pub mountpoint: String,
    pub status: VolumeStatus,
}

// ---------------------------------------------------------------------------
// Policies & capabilities
// ---------------------------------------------------------------------------

/// What `Unmount` does when the last holder releases a volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnmountPolicy {
    /// Keep the filesystem attached; `Remove` performs the physical unmount.
    #[default]
    Deferred,
    /// Detach the filesystem as soon as the holder count reaches zero.
    Eager,
}

/// Visibility scope advertised to the Docker daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Volumes are only meaningful on this host.
    Local,
}

/// Capabilities advertised through `VolumeDriver.Capabilities`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct DriverCapabilities {
    pub scope: Scope,
}

impl Default for DriverCapabilities {
    fn default() -> Self {
        Self {
            scope: Scope::Local,
        }
    }
}
