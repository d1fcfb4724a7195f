//! Volume driver trait.
//!
//! The lifecycle operations a Docker volume plugin must serve:
//!
//! 1. **Create**: register a volume and prepare its mount point.
//! 2. **Mount**: attach the volume (once) and count the new holder.
//! 3. **Unmount**: release one holder.
//! 4. **Remove**: detach and forget a volume with no holders.
//!
//! plus the read-only `Path`, `Get`, `List` and `Capabilities` queries.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::VolumeError;
use crate::types::{DriverCapabilities, VolumeInfo, VolumeName};

/// Volume lifecycle service.
#[async_trait]
pub trait VolumeDriver: Send + Sync {
    /// Register a volume.
    ///
    /// This is idempotent: creating an existing volume succeeds without
    /// changing it.
    async fn create(&self, name: &VolumeName) -> Result<(), VolumeError>;

    /// Forget a volume, unmounting it if it is still attached.
    ///
    /// Fails with [`VolumeError::Busy`] while holders remain.  Removing an
    /// unknown volume succeeds.
    async fn remove(&self, name: &VolumeName) -> Result<(), VolumeError>;

    /// Mount a created volume and return its mount point.
    ///
    /// Concurrent and repeated calls share one kernel mount.
    async fn mount(&self, name: &VolumeName) -> Result<PathBuf, VolumeError>;

    /// Release one holder of a volume.
    ///
    /// This is idempotent: unknown or unheld volumes are left untouched.
    async fn unmount(&self, name: &VolumeName) -> Result<(), VolumeError>;

    /// Return the mount point of a known volume.
    async fn path(&self, name: &VolumeName) -> Result<PathBuf, VolumeError>;

    /// Describe a known volume.
    async fn get(&self, name: &VolumeName) -> Result<VolumeInfo, VolumeError>;

    /// Describe every known volume.
    async fn list(&self) -> Result<Vec<VolumeInfo>, VolumeError>;

    /// Capabilities advertised to the Docker daemon.
    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities::default()
    }
}
