//! Mount-point derivation.
//!
//! Every volume is mounted at `<base>/<subtree>`, where `<subtree>` is the
//! volume name with its marker stripped.  The mapping is stable, so repeated
//! create/mount cycles of the same name reuse the same directory.
//!
//! ```text
//! <base>/
//!   vol/            # "@vol"
//!   app/config/     # "@app/config"
//! ```

use std::path::PathBuf;

use crate::error::VolumeError;
use crate::types::VolumeName;

/// Maps volume names to local mount points and store roots.
#[derive(Debug, Clone)]
pub struct PathDeriver {
    base: PathBuf,
}

impl PathDeriver {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Local directory at which `name` is mounted.
    pub fn mount_path(&self, name: &VolumeName) -> Result<PathBuf, VolumeError> {
        Ok(self.base.join(name.subtree()?))
    }

    /// Absolute key prefix in the store that scopes the volume's filesystem.
    pub fn store_root(&self, name: &VolumeName) -> Result<String, VolumeError> {
        Ok(format!("/{}", name.subtree()?))
    }
}
