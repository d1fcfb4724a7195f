//! Key-value store backend.
//!
//! [`KvBackend`] hands out [`KvFilesystem`] objects: prefix-scoped views of
//! the remote store that a FUSE helper serves as a directory tree.  The store
//! itself is never contacted from here; file operations belong to the helper.

use async_trait::async_trait;
use tracing::debug;

use crate::error::VolumeError;
use crate::mount::FsBackend;

/// A store subtree to be served as a filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvFilesystem {
    /// Client URL of the store, e.g. `http://localhost:4001`.
    pub endpoint: String,
    /// Absolute key prefix acting as the filesystem root, e.g. `/app/config`.
    pub root: String,
}

/// Backend for an etcd-style key-value store reachable over HTTP.
#[derive(Debug, Clone)]
pub struct KvBackend {
    endpoint: String,
}

impl KvBackend {
    /// Create a backend for `endpoint`, which must be an `http://` or
    /// `https://` URL with a host.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, VolumeError> {
        let endpoint = endpoint.into();
        let rest = endpoint
            .strip_prefix("http://")
            .or_else(|| endpoint.strip_prefix("https://"))
            .ok_or_else(|| {
                VolumeError::InvalidRequest(format!(
                    "store endpoint {endpoint:?} must start with http:// or https://"
                ))
            })?;
        if rest.trim_end_matches('/').is_empty() {
            return Err(VolumeError::InvalidRequest(format!(
                "store endpoint {endpoint:?} has no host"
            )));
        }
        Ok(Self { endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl FsBackend for KvBackend {
    type Filesystem = KvFilesystem;

    async fn filesystem(&self, root: &str) -> Result<KvFilesystem, VolumeError> {
        if !root.starts_with('/') {
            return Err(VolumeError::InvalidRequest(format!(
                "store root {root:?} must be absolute"
            )));
        }
        debug!(endpoint = %self.endpoint, %root, "scoped store filesystem");
        Ok(KvFilesystem {
            endpoint: self.endpoint.clone(),
            root: root.to_owned(),
        })
    }
}
