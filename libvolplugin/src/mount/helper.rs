//! Mount interface backed by an external FUSE helper process.
//!
//! Each mount runs one helper (by default `etcd-fs`) that serves a single
//! store subtree at a single mountpoint:
//!
//! ```text
//! <program> [extra args..] --endpoint <endpoint> --root <root> <mountpoint>
//! ```
//!
//! The helper's lifetime is the serving loop: it ends when the filesystem is
//! unmounted with `fusermount3 -u`.

use std::ffi::OsString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::backend::kv::KvFilesystem;
use crate::error::VolumeError;
use crate::mount::{MountHandle, MountInterface, Mounted};

/// Default FUSE unmount utility.
pub const FUSERMOUNT: &str = "fusermount3";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Return `true` if `path` is currently listed as a mount point in
/// `/proc/self/mounts`.  Relative paths are resolved against the current
/// directory first.
pub async fn is_mountpoint(path: &Path) -> bool {
    let Ok(path) = std::path::absolute(path) else {
        return false;
    };
    match tokio::fs::read("/proc/self/mounts").await {
        Ok(contents) => mount_table_lists(&contents, &path),
        Err(_) => false,
    }
}

/// Whether the mount table `contents` has an entry mounted at `path`.
///
/// Format: `<device> <mountpoint> <fstype> <options> <dump> <pass>`, with
/// space, tab, newline and backslash in fields written as `\ooo` octal.
fn mount_table_lists(contents: &[u8], path: &Path) -> bool {
    let target = path.as_os_str().as_bytes();
    contents
        .split(|&b| b == b'\n')
        .filter_map(|line| line.split(|&b| b == b' ').nth(1))
        .any(|field| unescape_mount_field(field) == target)
}

fn unescape_mount_field(field: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(field.len());
    let mut i = 0;
    while i < field.len() {
        if let [b'\\', a @ b'0'..=b'3', b @ b'0'..=b'7', c @ b'0'..=b'7', ..] = field[i..] {
            out.push(((a - b'0') << 6) | ((b - b'0') << 3) | (c - b'0'));
            i += 4;
        } else {
            out.push(field[i]);
            i += 1;
        }
    }
    out
}

/// Spawns one FUSE helper process per mount.
#[derive(Debug, Clone)]
pub struct HelperMounter {
    program: PathBuf,
    extra_args: Vec<OsString>,
    fusermount: PathBuf,
    mount_timeout: Duration,
}

impl HelperMounter {
    pub fn new(program: impl Into<PathBuf>, mount_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
            fusermount: PathBuf::from(FUSERMOUNT),
            mount_timeout,
        }
    }

    /// Arguments placed before the generated ones on every invocation.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.extra_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Override the unmount utility (`fusermount3` by default).
    pub fn with_fusermount(mut self, fusermount: impl Into<PathBuf>) -> Self {
        self.fusermount = fusermount.into();
        self
    }
}

#[async_trait]
impl MountInterface<KvFilesystem> for HelperMounter {
    type Handle = HelperHandle;

    #[instrument(skip(self, fs), fields(root = %fs.root))]
    async fn mount(
        &self,
        mountpoint: &Path,
        fs: KvFilesystem,
    ) -> Result<Mounted<HelperHandle>, VolumeError> {
        let mut child = Command::new(&self.program)
            .args(&self.extra_args)
            .arg("--endpoint")
            .arg(&fs.endpoint)
            .arg("--root")
            .arg(&fs.root)
            .arg(mountpoint)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                VolumeError::mount(mountpoint, format!("spawn {}: {e}", self.program.display()))
            })?;
        let pid = child.id();
        debug!(?pid, program = %self.program.display(), "FUSE helper spawned");

        // Wait until the helper has attached the filesystem, bounded by
        // `mount_timeout`.  An early exit means the helper gave up.
        let deadline = Instant::now() + self.mount_timeout;
        loop {
            if is_mountpoint(mountpoint).await {
                break;
            }
            if let Some(status) = child
                .try_wait()
                .map_err(|e| VolumeError::mount(mountpoint, e))?
            {
                return Err(VolumeError::mount(
                    mountpoint,
                    format!("FUSE helper exited before mounting: {status}"),
                ));
            }
            if Instant::now() >= deadline {
                let _ = child.kill().await;
                // A helper killed mid-mount can leave a dead attachment.
                if is_mountpoint(mountpoint).await {
                    let _ = Command::new(&self.fusermount)
                        .arg("-u")
                        .arg(mountpoint)
                        .status()
                        .await;
                }
                return Err(VolumeError::mount(
                    mountpoint,
                    format!(
                        "timed out after {:?} waiting for FUSE helper (pid={pid:?})",
                        self.mount_timeout
                    ),
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        info!(mountpoint = %mountpoint.display(), ?pid, "FUSE helper mounted");

        let exited = Arc::new(AtomicBool::new(false));
        let serve_exited = Arc::clone(&exited);
        let serve_path = mountpoint.to_path_buf();
        let serve = Box::pin(async move {
            let status = child.wait().await;
            serve_exited.store(true, Ordering::SeqCst);
            match status {
                Ok(status) if status.success() => Ok(()),
                Ok(status) => Err(VolumeError::mount(
                    &serve_path,
                    format!("FUSE helper exited with {status}"),
                )),
                Err(e) => Err(VolumeError::mount(&serve_path, e)),
            }
        });

        Ok(Mounted {
            handle: HelperHandle {
                mountpoint: mountpoint.to_path_buf(),
                fusermount: self.fusermount.clone(),
                pid,
                exited,
            },
            serve,
        })
    }
}

/// Handle to a mount served by a FUSE helper process.
#[derive(Debug)]
pub struct HelperHandle {
    mountpoint: PathBuf,
    fusermount: PathBuf,
    pid: Option<u32>,
    exited: Arc<AtomicBool>,
}

#[async_trait]
impl MountHandle for HelperHandle {
    #[instrument(skip(self), fields(mountpoint = %self.mountpoint.display()))]
    async fn unmount(&mut self) -> Result<(), VolumeError> {
        if is_mountpoint(&self.mountpoint).await {
            let status = Command::new(&self.fusermount)
                .arg("-u")
                .arg(&self.mountpoint)
                .status()
                .await
                .map_err(|e| VolumeError::unmount(&self.mountpoint, e))?;

            if !status.success() {
                // A non-zero exit is fine if the path got unmounted anyway.
                if is_mountpoint(&self.mountpoint).await {
                    return Err(VolumeError::unmount(
                        &self.mountpoint,
                        format!("{} -u returned {status}", self.fusermount.display()),
                    ));
                }
                warn!(code = ?status.code(), "fusermount returned non-zero (already unmounted)");
            }
        } else {
            debug!("mountpoint already detached");
        }

        // The helper normally exits on its own once detached; nudge it if not.
        if let Some(pid) = self.pid
            && !self.exited.load(Ordering::SeqCst)
        {
            match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => warn!(pid, error = %e, "failed to signal FUSE helper"),
            }
        }

        info!("volume unmounted");
        Ok(())
    }
}
