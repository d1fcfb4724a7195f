//! Volume registry and mount orchestration.
//!
//! [`VolumeRegistry`] owns the map from volume name to [`MountRecord`] and
//! implements [`VolumeDriver`] on top of it.  Every operation runs its whole
//! inspect-and-mutate step under one registry-wide async mutex, including the
//! mount/unmount and directory calls, so two requests never observe a
//! half-applied transition.  Serving loops run outside the lock.
//!
//! # Volume state machine
//!
//! ```text
//!            Create            Mount             Unmount (last)
//!  Absent ──────────▶ Created(0) ──────▶ Mounted(k) ──────────▶ Created(0)
//!     ▲                   │                 │  ▲                    │
//!     │      Remove       │                 └──┘ Mount / Unmount    │
//!     └───────────────────┴───────────────────────────────────────┘
//! ```
//!
//! With [`UnmountPolicy::Deferred`] a `Created(0)` volume that was mounted
//! before keeps its kernel mount until `Remove`; a later `Mount` reuses it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::driver::VolumeDriver;
use crate::error::VolumeError;
use crate::mount::{FsBackend, LiveMount, MountInterface};
use crate::path::PathDeriver;
use crate::types::{UnmountPolicy, VolumeInfo, VolumeName, VolumeStatus};

/// Mount state of one known volume.
pub struct MountRecord<H> {
    /// Derived once at creation, never changes.
    mount_path: PathBuf,
    /// Present only while the filesystem is attached.
    live: Option<LiveMount<H>>,
    /// Outstanding holders.  Non-zero implies `live.is_some()`.
    refcount: usize,
}

impl<H> MountRecord<H> {
    fn new(mount_path: PathBuf) -> Self {
        Self {
            mount_path,
            live: None,
            refcount: 0,
        }
    }

    fn info(&self, name: &VolumeName) -> VolumeInfo {
        VolumeInfo {
            name: name.clone(),
            mountpoint: self.mount_path.display().to_string(),
            status: VolumeStatus {
                refcount: self.refcount,
                mounted: self.live.is_some(),
            },
        }
    }
}

/// Owner of all volume mount state.
///
/// Create one at startup, share it behind an `Arc`, and call
/// [`Self::shutdown`] before exiting to detach whatever is still mounted.
pub struct VolumeRegistry<B, M>
where
    B: FsBackend,
    M: MountInterface<B::Filesystem>,
{
    paths: PathDeriver,
    backend: B,
    mounter: M,
    policy: UnmountPolicy,
    volumes: Mutex<HashMap<VolumeName, MountRecord<M::Handle>>>,
    /// Set by [`Self::shutdown`] while holding `volumes`.
    closed: AtomicBool,
}

impl<B, M> VolumeRegistry<B, M>
where
    B: FsBackend,
    M: MountInterface<B::Filesystem>,
{
    pub fn new(paths: PathDeriver, backend: B, mounter: M) -> Self {
        Self {
            paths,
            backend,
            mounter,
            policy: UnmountPolicy::default(),
            volumes: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_policy(mut self, policy: UnmountPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Detach every live mount and forget all volumes.
    ///
    /// Best-effort: failures are logged and the remaining volumes are still
    /// processed.  Mount-point directories are left in place.  Afterwards
    /// `create` and `mount` fail with [`VolumeError::ShuttingDown`], so a
    /// request still in flight cannot attach anything new.
    pub async fn shutdown(&self) {
        let mut volumes = self.volumes.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        for (name, mut record) in volumes.drain() {
            if let Some(live) = record.live.as_mut()
                && let Err(e) = live.release().await
            {
                warn!(volume = %name, error = %e, "failed to unmount volume during shutdown");
                continue;
            }
            debug!(volume = %name, holders = record.refcount, "volume released on shutdown");
        }
        info!("volume registry shut down");
    }

    fn ensure_open(&self) -> Result<(), VolumeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VolumeError::ShuttingDown);
        }
        Ok(())
    }
}

/// Wrap a collaborator failure as a mount failure at `path`.
fn mount_error(path: &std::path::Path, e: VolumeError) -> VolumeError {
    if matches!(e, VolumeError::MountFailed { .. }) {
        e
    } else {
        VolumeError::mount(path, e)
    }
}

#[async_trait]
impl<B, M> VolumeDriver for VolumeRegistry<B, M>
where
    B: FsBackend,
    M: MountInterface<B::Filesystem>,
{
    #[instrument(skip_all, fields(volume = %name))]
    async fn create(&self, name: &VolumeName) -> Result<(), VolumeError> {
        let mount_path = self.paths.mount_path(name)?;

        let mut volumes = self.volumes.lock().await;
        self.ensure_open()?;
        if volumes.contains_key(name) {
            debug!("volume already exists");
            return Ok(());
        }

        // Nested mount points would shadow each other and make the outer
        // directory impossible to remove.
        if let Some((other, _)) = volumes.iter().find(|(_, record)| {
            record.mount_path.starts_with(&mount_path) || mount_path.starts_with(&record.mount_path)
        }) {
            return Err(VolumeError::invalid_name(
                name.as_str(),
                format!("overlaps existing volume {other}"),
            ));
        }

        tokio::fs::create_dir_all(&mount_path)
            .await
            .map_err(|e| VolumeError::resource(&mount_path, e))?;
        volumes.insert(name.clone(), MountRecord::new(mount_path.clone()));

        info!(mountpoint = %mount_path.display(), "volume created");
        Ok(())
    }

    #[instrument(skip_all, fields(volume = %name))]
    async fn remove(&self, name: &VolumeName) -> Result<(), VolumeError> {
        let mut volumes = self.volumes.lock().await;
        let Some(record) = volumes.get_mut(name) else {
            debug!("unknown volume, nothing to remove");
            return Ok(());
        };

        if record.refcount > 0 {
            return Err(VolumeError::Busy {
                name: name.to_string(),
                holders: record.refcount,
            });
        }

        // Tear down before forgetting: on failure the record stays so the
        // caller can retry.
        if let Some(live) = record.live.as_mut() {
            live.release().await?;
            record.live = None;
        }

        match tokio::fs::remove_dir(&record.mount_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(VolumeError::resource(&record.mount_path, e)),
        }

        volumes.remove(name);
        info!("volume removed");
        Ok(())
    }

    #[instrument(skip_all, fields(volume = %name))]
    async fn mount(&self, name: &VolumeName) -> Result<PathBuf, VolumeError> {
        let mut volumes = self.volumes.lock().await;
        self.ensure_open()?;
        let record = volumes
            .get_mut(name)
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))?;

        if record.refcount > 0 {
            record.refcount += 1;
            debug!(holders = record.refcount, "volume already mounted");
            return Ok(record.mount_path.clone());
        }

        // Idle but still attached (deferred unmount): reuse the mount as long
        // as it is still being served.
        if let Some(live) = record.live.as_mut() {
            if live.is_serving() {
                record.refcount = 1;
                debug!("reusing idle mount");
                return Ok(record.mount_path.clone());
            }
            warn!("serving loop of idle mount has stopped, remounting");
            live.release()
                .await
                .map_err(|e| mount_error(&record.mount_path, e))?;
            record.live = None;
        }

        let mount_path = record.mount_path.clone();
        tokio::fs::create_dir_all(&mount_path)
            .await
            .map_err(|e| VolumeError::mount(&mount_path, e))?;

        let root = self.paths.store_root(name)?;
        let fs = self
            .backend
            .filesystem(&root)
            .await
            .map_err(|e| mount_error(&mount_path, e))?;
        let mounted = self
            .mounter
            .mount(&mount_path, fs)
            .await
            .map_err(|e| mount_error(&mount_path, e))?;

        record.live = Some(LiveMount::spawn(&mount_path, mounted));
        record.refcount = 1;

        info!(mountpoint = %mount_path.display(), %root, "volume mounted");
        Ok(mount_path)
    }

    #[instrument(skip_all, fields(volume = %name))]
    async fn unmount(&self, name: &VolumeName) -> Result<(), VolumeError> {
        let mut volumes = self.volumes.lock().await;
        let Some(record) = volumes.get_mut(name) else {
            debug!("unknown volume, nothing to unmount");
            return Ok(());
        };

        if record.refcount == 0 {
            debug!("volume has no holders");
            return Ok(());
        }
        record.refcount -= 1;
        debug!(holders = record.refcount, "holder released");

        if record.refcount == 0
            && self.policy == UnmountPolicy::Eager
            && let Some(live) = record.live.as_mut()
        {
            live.release().await?;
            record.live = None;
            info!("last holder released, volume unmounted");
        }
        Ok(())
    }

    async fn path(&self, name: &VolumeName) -> Result<PathBuf, VolumeError> {
        let volumes = self.volumes.lock().await;
        volumes
            .get(name)
            .map(|record| record.mount_path.clone())
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))
    }

    async fn get(&self, name: &VolumeName) -> Result<VolumeInfo, VolumeError> {
        let volumes = self.volumes.lock().await;
        volumes
            .get(name)
            .map(|record| record.info(name))
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))
    }

    async fn list(&self) -> Result<Vec<VolumeInfo>, VolumeError> {
        let volumes = self.volumes.lock().await;
        let mut infos: Vec<VolumeInfo> = volumes
            .iter()
            .map(|(name, record)| record.info(name))
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::oneshot;

    use crate::backend::kv::{KvBackend, KvFilesystem};
    use crate::mount::{MountHandle, Mounted};

    /// Counts mount/unmount calls instead of touching the kernel.
    #[derive(Default)]
    struct MockMounter {
        mounts: AtomicUsize,
        unmounts: Arc<AtomicUsize>,
        roots: StdMutex<Vec<String>>,
        fail_mount: AtomicBool,
        fail_unmount: Arc<AtomicBool>,
    }

    struct MockHandle {
        stop: Option<oneshot::Sender<()>>,
        unmounts: Arc<AtomicUsize>,
        fail_unmount: Arc<AtomicBool>,
    }

    #[async_trait]
    impl MountInterface<KvFilesystem> for MockMounter {
        type Handle = MockHandle;

        async fn mount(
            &self,
            mountpoint: &Path,
            fs: KvFilesystem,
        ) -> Result<Mounted<MockHandle>, VolumeError> {
            assert!(mountpoint.is_dir(), "mountpoint must exist before mounting");
            // Widen the window for racing callers.
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_mount.load(Ordering::SeqCst) {
                return Err(VolumeError::mount(mountpoint, "fuse: device not found"));
            }
            self.mounts.fetch_add(1, Ordering::SeqCst);
            self.roots.lock().unwrap().push(fs.root);

            let (tx, rx) = oneshot::channel();
            Ok(Mounted {
                handle: MockHandle {
                    stop: Some(tx),
                    unmounts: Arc::clone(&self.unmounts),
                    fail_unmount: Arc::clone(&self.fail_unmount),
                },
                serve: Box::pin(async move {
                    let _ = rx.await;
                    Ok(())
                }),
            })
        }
    }

    #[async_trait]
    impl MountHandle for MockHandle {
        async fn unmount(&mut self) -> Result<(), VolumeError> {
            if self.fail_unmount.load(Ordering::SeqCst) {
                return Err(VolumeError::unmount(Path::new("/mock"), "device busy"));
            }
            self.unmounts.fetch_add(1, Ordering::SeqCst);
            if let Some(stop) = self.stop.take() {
                let _ = stop.send(());
            }
            Ok(())
        }
    }

    type TestRegistry = VolumeRegistry<KvBackend, Arc<MockMounter>>;

    #[async_trait]
    impl MountInterface<KvFilesystem> for Arc<MockMounter> {
        type Handle = MockHandle;

        async fn mount(
            &self,
            mountpoint: &Path,
            fs: KvFilesystem,
        ) -> Result<Mounted<MockHandle>, VolumeError> {
            <MockMounter as MountInterface<KvFilesystem>>::mount(self, mountpoint, fs).await
        }
    }

    fn make_registry(base: &Path, policy: UnmountPolicy) -> (TestRegistry, Arc<MockMounter>) {
        let mounter = Arc::new(MockMounter::default());
        let registry = VolumeRegistry::new(
            PathDeriver::new(base),
            KvBackend::new("http://localhost:4001").unwrap(),
            Arc::clone(&mounter),
        )
        .with_policy(policy);
        (registry, mounter)
    }

    async fn refcount(registry: &TestRegistry, name: &VolumeName) -> usize {
        registry.get(name).await.unwrap().status.refcount
    }

    #[tokio::test]
    async fn full_lifecycle_scenario() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, mounter) = make_registry(tmp.path(), UnmountPolicy::Deferred);
        let vol = VolumeName::from("@vol");

        registry.create(&vol).await.unwrap();
        let p = registry.mount(&vol).await.unwrap();
        assert_eq!(p, tmp.path().join("vol"));
        assert_eq!(refcount(&registry, &vol).await, 1);

        let p2 = registry.mount(&vol).await.unwrap();
        assert_eq!(p, p2);
        assert_eq!(refcount(&registry, &vol).await, 2);
        assert_eq!(mounter.mounts.load(Ordering::SeqCst), 1);

        registry.unmount(&vol).await.unwrap();
        registry.unmount(&vol).await.unwrap();
        let info = registry.get(&vol).await.unwrap();
        assert_eq!(info.status.refcount, 0);
        // Deferred policy: still attached until Remove.
        assert!(info.status.mounted);
        assert_eq!(mounter.unmounts.load(Ordering::SeqCst), 0);

        registry.remove(&vol).await.unwrap();
        assert_eq!(mounter.unmounts.load(Ordering::SeqCst), 1);
        assert!(!p.exists());

        let err = registry.path(&vol).await.unwrap_err();
        assert_eq!(err, VolumeError::NotFound("@vol".into()));
    }

    #[tokio::test]
    async fn create_without_marker_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, _) = make_registry(tmp.path(), UnmountPolicy::Deferred);
        let bad = VolumeName::from("badname");

        let err = registry.create(&bad).await.unwrap_err();
        assert!(matches!(err, VolumeError::InvalidName { .. }));
        assert!(registry.list().await.unwrap().is_empty());
        assert!(matches!(
            registry.path(&bad).await,
            Err(VolumeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, _) = make_registry(tmp.path(), UnmountPolicy::Deferred);
        let vol = VolumeName::from("@vol");

        registry.create(&vol).await.unwrap();
        registry.mount(&vol).await.unwrap();
        registry.create(&vol).await.unwrap();

        // The second create must not reset the mounted record.
        assert_eq!(refcount(&registry, &vol).await, 1);
        assert_eq!(registry.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn path_after_create_returns_registered_path() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, mounter) = make_registry(tmp.path(), UnmountPolicy::Deferred);
        let vol = VolumeName::from("@app/config");

        registry.create(&vol).await.unwrap();
        let path = registry.path(&vol).await.unwrap();
        assert_eq!(path, tmp.path().join("app/config"));
        assert!(path.is_dir());
        assert_eq!(mounter.mounts.load(Ordering::SeqCst), 0);

        assert_eq!(registry.mount(&vol).await.unwrap(), path);
        assert_eq!(registry.path(&vol).await.unwrap(), path);
    }

    #[tokio::test]
    async fn mount_requires_create() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, mounter) = make_registry(tmp.path(), UnmountPolicy::Deferred);

        let err = registry.mount(&"@vol".into()).await.unwrap_err();
        assert_eq!(err, VolumeError::NotFound("@vol".into()));
        assert_eq!(mounter.mounts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mount_scopes_filesystem_to_subtree() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, mounter) = make_registry(tmp.path(), UnmountPolicy::Deferred);
        let vol = VolumeName::from("@app/config");

        registry.create(&vol).await.unwrap();
        registry.mount(&vol).await.unwrap();
        assert_eq!(*mounter.roots.lock().unwrap(), vec!["/app/config".to_owned()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_mounts_share_one_kernel_mount() {
        const CALLERS: usize = 16;
        let tmp = tempfile::tempdir().unwrap();
        let (registry, mounter) = make_registry(tmp.path(), UnmountPolicy::Deferred);
        let registry = Arc::new(registry);
        let vol = VolumeName::from("@vol");
        registry.create(&vol).await.unwrap();

        let tasks: Vec<_> = (0..CALLERS)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let vol = vol.clone();
                tokio::spawn(async move { registry.mount(&vol).await })
            })
            .collect();

        let mut paths = Vec::new();
        for task in tasks {
            paths.push(task.await.unwrap().unwrap());
        }

        assert!(paths.iter().all(|p| p == &paths[0]));
        assert_eq!(mounter.mounts.load(Ordering::SeqCst), 1);
        assert_eq!(refcount(&registry, &vol).await, CALLERS);
    }

    #[tokio::test]
    async fn failed_mount_leaves_no_partial_state() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, mounter) = make_registry(tmp.path(), UnmountPolicy::Deferred);
        let vol = VolumeName::from("@vol");
        registry.create(&vol).await.unwrap();

        mounter.fail_mount.store(true, Ordering::SeqCst);
        let err = registry.mount(&vol).await.unwrap_err();
        assert!(matches!(err, VolumeError::MountFailed { .. }));

        let info = registry.get(&vol).await.unwrap();
        assert_eq!(info.status.refcount, 0);
        assert!(!info.status.mounted);

        // The failure is not sticky: a retry mounts normally.
        mounter.fail_mount.store(false, Ordering::SeqCst);
        registry.mount(&vol).await.unwrap();
        assert_eq!(refcount(&registry, &vol).await, 1);
        assert_eq!(mounter.mounts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unmount_unknown_volume_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, mounter) = make_registry(tmp.path(), UnmountPolicy::Deferred);

        registry.unmount(&"@ghost".into()).await.unwrap();
        assert!(registry.list().await.unwrap().is_empty());
        assert_eq!(mounter.unmounts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refcount_never_goes_negative() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, _) = make_registry(tmp.path(), UnmountPolicy::Deferred);
        let vol = VolumeName::from("@vol");

        registry.create(&vol).await.unwrap();
        registry.unmount(&vol).await.unwrap();
        assert_eq!(refcount(&registry, &vol).await, 0);

        registry.mount(&vol).await.unwrap();
        for _ in 0..3 {
            registry.unmount(&vol).await.unwrap();
        }
        assert_eq!(refcount(&registry, &vol).await, 0);

        // A holder released into Created(0) can mount again.
        registry.mount(&vol).await.unwrap();
        assert_eq!(refcount(&registry, &vol).await, 1);
    }

    #[tokio::test]
    async fn remount_after_deferred_unmount_reuses_mount() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, mounter) = make_registry(tmp.path(), UnmountPolicy::Deferred);
        let vol = VolumeName::from("@vol");

        registry.create(&vol).await.unwrap();
        registry.mount(&vol).await.unwrap();
        registry.unmount(&vol).await.unwrap();
        registry.mount(&vol).await.unwrap();

        assert_eq!(mounter.mounts.load(Ordering::SeqCst), 1);
        assert_eq!(mounter.unmounts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn remove_with_holders_is_busy() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, mounter) = make_registry(tmp.path(), UnmountPolicy::Deferred);
        let vol = VolumeName::from("@vol");

        registry.create(&vol).await.unwrap();
        let path = registry.mount(&vol).await.unwrap();

        let err = registry.remove(&vol).await.unwrap_err();
        assert_eq!(
            err,
            VolumeError::Busy {
                name: "@vol".into(),
                holders: 1,
            }
        );
        assert_eq!(mounter.unmounts.load(Ordering::SeqCst), 0);
        assert!(path.is_dir());
        assert!(registry.get(&vol).await.unwrap().status.mounted);
    }

    #[tokio::test]
    async fn failed_remove_keeps_record_for_retry() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, mounter) = make_registry(tmp.path(), UnmountPolicy::Deferred);
        let vol = VolumeName::from("@vol");

        registry.create(&vol).await.unwrap();
        registry.mount(&vol).await.unwrap();
        registry.unmount(&vol).await.unwrap();

        mounter.fail_unmount.store(true, Ordering::SeqCst);
        let err = registry.remove(&vol).await.unwrap_err();
        assert!(matches!(err, VolumeError::UnmountFailed { .. }));
        let info = registry.get(&vol).await.unwrap();
        assert!(info.status.mounted);

        mounter.fail_unmount.store(false, Ordering::SeqCst);
        registry.remove(&vol).await.unwrap();
        assert_eq!(mounter.unmounts.load(Ordering::SeqCst), 1);
        assert!(registry.get(&vol).await.is_err());
    }

    #[tokio::test]
    async fn remove_never_mounted_volume() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, mounter) = make_registry(tmp.path(), UnmountPolicy::Deferred);
        let vol = VolumeName::from("@vol");

        registry.create(&vol).await.unwrap();
        registry.remove(&vol).await.unwrap();
        assert!(!tmp.path().join("vol").exists());
        assert_eq!(mounter.unmounts.load(Ordering::SeqCst), 0);

        // Removing again is a no-op.
        registry.remove(&vol).await.unwrap();
    }

    #[tokio::test]
    async fn eager_policy_unmounts_at_zero() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, mounter) = make_registry(tmp.path(), UnmountPolicy::Eager);
        let vol = VolumeName::from("@vol");

        registry.create(&vol).await.unwrap();
        registry.mount(&vol).await.unwrap();
        registry.mount(&vol).await.unwrap();
        registry.unmount(&vol).await.unwrap();
        assert_eq!(mounter.unmounts.load(Ordering::SeqCst), 0);

        registry.unmount(&vol).await.unwrap();
        assert_eq!(mounter.unmounts.load(Ordering::SeqCst), 1);
        let info = registry.get(&vol).await.unwrap();
        assert_eq!(info.status.refcount, 0);
        assert!(!info.status.mounted);

        // The next mount attaches afresh.
        registry.mount(&vol).await.unwrap();
        assert_eq!(mounter.mounts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn eager_unmount_failure_keeps_handle() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, mounter) = make_registry(tmp.path(), UnmountPolicy::Eager);
        let vol = VolumeName::from("@vol");

        registry.create(&vol).await.unwrap();
        registry.mount(&vol).await.unwrap();

        mounter.fail_unmount.store(true, Ordering::SeqCst);
        let err = registry.unmount(&vol).await.unwrap_err();
        assert!(matches!(err, VolumeError::UnmountFailed { .. }));
        let info = registry.get(&vol).await.unwrap();
        assert_eq!(info.status.refcount, 0);
        assert!(info.status.mounted);

        // Remove retries the teardown.
        mounter.fail_unmount.store(false, Ordering::SeqCst);
        registry.remove(&vol).await.unwrap();
        assert_eq!(mounter.unmounts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn list_is_sorted_by_name() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, _) = make_registry(tmp.path(), UnmountPolicy::Deferred);

        for name in ["@b", "@a", "@c"] {
            registry.create(&name.into()).await.unwrap();
        }
        registry.mount(&"@b".into()).await.unwrap();

        let list = registry.list().await.unwrap();
        let names: Vec<_> = list.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["@a", "@b", "@c"]);
        assert!(list[1].status.mounted);
        assert!(!list[0].status.mounted);
    }

    #[tokio::test]
    async fn shutdown_releases_live_mounts() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, mounter) = make_registry(tmp.path(), UnmountPolicy::Deferred);

        for name in ["@a", "@b"] {
            let vol = VolumeName::from(name);
            registry.create(&vol).await.unwrap();
            registry.mount(&vol).await.unwrap();
        }
        registry.create(&"@idle".into()).await.unwrap();

        registry.shutdown().await;
        assert_eq!(mounter.unmounts.load(Ordering::SeqCst), 2);
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_new_mounts_after_shutdown() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, mounter) = make_registry(tmp.path(), UnmountPolicy::Deferred);
        let vol = VolumeName::from("@vol");
        registry.create(&vol).await.unwrap();

        registry.shutdown().await;
        assert_eq!(registry.mount(&vol).await, Err(VolumeError::ShuttingDown));
        assert_eq!(registry.create(&vol).await, Err(VolumeError::ShuttingDown));
        assert_eq!(mounter.mounts.load(Ordering::SeqCst), 0);
        assert!(registry.list().await.unwrap().is_empty());

        // Releasing holders of forgotten volumes stays harmless.
        registry.unmount(&vol).await.unwrap();
    }

    #[tokio::test]
    async fn nested_volumes_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, _) = make_registry(tmp.path(), UnmountPolicy::Deferred);
        let outer = VolumeName::from("@app");
        let inner = VolumeName::from("@app/config");

        registry.create(&outer).await.unwrap();
        let err = registry.create(&inner).await.unwrap_err();
        assert!(matches!(err, VolumeError::InvalidName { .. }), "{err}");
        assert!(!tmp.path().join("app/config").exists());

        // The outer volume stays removable.
        registry.remove(&outer).await.unwrap();
        assert!(!tmp.path().join("app").exists());

        // And the other way round.
        registry.create(&inner).await.unwrap();
        let err = registry.create(&outer).await.unwrap_err();
        assert!(matches!(err, VolumeError::InvalidName { .. }), "{err}");

        // Siblings sharing a name prefix do not overlap.
        registry.create(&"@app/configs".into()).await.unwrap();
        registry.create(&"@application".into()).await.unwrap();
        assert_eq!(registry.list().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn create_under_unusable_base_is_resource_error() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("not-a-dir");
        std::fs::write(&base, b"").unwrap();
        let (registry, _) = make_registry(&base, UnmountPolicy::Deferred);
        let vol = VolumeName::from("@vol");

        let err = registry.create(&vol).await.unwrap_err();
        assert!(matches!(err, VolumeError::Resource { .. }), "{err}");
        assert!(matches!(
            registry.get(&vol).await,
            Err(VolumeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn remove_of_non_empty_mountpoint_keeps_record() {
        let tmp = tempfile::tempdir().unwrap();
        let (registry, mounter) = make_registry(tmp.path(), UnmountPolicy::Deferred);
        let vol = VolumeName::from("@vol");

        registry.create(&vol).await.unwrap();
        let path = registry.mount(&vol).await.unwrap();
        registry.unmount(&vol).await.unwrap();
        std::fs::write(path.join("leftover"), b"x").unwrap();

        let err = registry.remove(&vol).await.unwrap_err();
        assert!(matches!(err, VolumeError::Resource { .. }), "{err}");
        let info = registry.get(&vol).await.unwrap();
        assert!(!info.status.mounted);
        assert_eq!(mounter.unmounts.load(Ordering::SeqCst), 1);

        std::fs::remove_file(path.join("leftover")).unwrap();
        registry.remove(&vol).await.unwrap();
        assert_eq!(mounter.unmounts.load(Ordering::SeqCst), 1);
        assert!(!path.exists());
        assert!(registry.get(&vol).await.is_err());
    }
}
