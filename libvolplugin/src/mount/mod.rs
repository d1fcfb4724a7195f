//! Contracts for the filesystem backend and the kernel mount interface.
//!
//! The registry never looks inside a filesystem object: it asks an
//! [`FsBackend`] for one scoped to a volume's subtree and hands it to a
//! [`MountInterface`], which attaches it at a local path.  The returned
//! [`Mounted`] carries both the [`MountHandle`] and the request-serving loop;
//! [`LiveMount`] runs that loop as a supervised task tied to the handle.

pub mod helper;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::VolumeError;

/// How long a serving loop may keep running after its filesystem was
/// unmounted before the task is aborted.
pub const SERVE_EXIT_GRACE: Duration = Duration::from_secs(5);

/// Request-serving loop of a mounted filesystem.  Resolves once the
/// filesystem is unmounted.
pub type ServeLoop = BoxFuture<'static, Result<(), VolumeError>>;

/// Result of a successful [`MountInterface::mount`].
pub struct Mounted<H> {
    pub handle: H,
    pub serve: ServeLoop,
}

/// Source of filesystem objects scoped to a subtree of the backing store.
#[async_trait]
pub trait FsBackend: Send + Sync {
    /// Opaque filesystem object handed to the mount interface.
    type Filesystem: Send + 'static;

    /// Return a filesystem rooted at `root` (an absolute key prefix).
    async fn filesystem(&self, root: &str) -> Result<Self::Filesystem, VolumeError>;
}

/// Attaches filesystem objects to local paths.
#[async_trait]
pub trait MountInterface<F: Send + 'static>: Send + Sync {
    type Handle: MountHandle;

    /// Mount `fs` at `mountpoint`.  The mountpoint directory already exists.
    async fn mount(&self, mountpoint: &Path, fs: F) -> Result<Mounted<Self::Handle>, VolumeError>;
}

/// A live attachment.  Dropping it does not unmount.
#[async_trait]
pub trait MountHandle: Send + 'static {
    /// Detach the filesystem.  May be retried after a failure.
    async fn unmount(&mut self) -> Result<(), VolumeError>;
}

/// A mount handle together with the task serving its filesystem.
pub struct LiveMount<H> {
    mountpoint: PathBuf,
    handle: H,
    serve_task: JoinHandle<()>,
    released: bool,
}

impl<H: MountHandle> LiveMount<H> {
    /// Take ownership of a fresh mount and start serving it in the background.
    pub fn spawn(mountpoint: &Path, mounted: Mounted<H>) -> Self {
        let Mounted { handle, serve } = mounted;
        let path = mountpoint.display().to_string();
        let serve_task = tokio::spawn(async move {
            match serve.await {
                Ok(()) => debug!(mountpoint = %path, "serving loop finished"),
                Err(e) => warn!(mountpoint = %path, error = %e, "serving loop failed"),
            }
        });
        Self {
            mountpoint: mountpoint.to_path_buf(),
            handle,
            serve_task,
            released: false,
        }
    }

    /// Whether the serving loop is still running.
    pub fn is_serving(&self) -> bool {
        !self.serve_task.is_finished()
    }

    /// Unmount and wait for the serving loop to end.
    ///
    /// On error the mount is left in place and `release` can be called again.
    /// After `Ok(())` further calls are no-ops.
    pub async fn release(&mut self) -> Result<(), VolumeError> {
        if self.released {
            return Ok(());
        }
        self.handle.unmount().await?;
        self.released = true;

        if tokio::time::timeout(SERVE_EXIT_GRACE, &mut self.serve_task)
            .await
            .is_err()
        {
            warn!(
                mountpoint = %self.mountpoint.display(),
                "serving loop still running after unmount, aborting",
            );
            self.serve_task.abort();
        }
        Ok(())
    }
}
