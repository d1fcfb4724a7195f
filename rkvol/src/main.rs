//! `rkvol`: Docker volume plugin daemon.
//!
//! Serves the volume plugin protocol on a Unix socket and mounts each volume,
//! a subtree of the key-value store, through an external FUSE helper.

mod config;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use libvolplugin::backend::kv::KvBackend;
use libvolplugin::mount::helper::HelperMounter;
use libvolplugin::{PathDeriver, PluginServer, UnmountPolicy, VolumeRegistry};
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, LogFormat};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

/// Install SIGINT and SIGTERM handlers; the returned future resolves on the
/// first of either.
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    let mut interrupt = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("received SIGINT"),
            _ = terminate.recv() => info!("received SIGTERM"),
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.log_format);

    let policy = UnmountPolicy::from(config.unmount_policy);
    // Mount points are matched against the absolute paths the kernel reports.
    let base_path = std::path::absolute(&config.base_path)
        .with_context(|| format!("Invalid base path: {}", config.base_path.display()))?;
    let backend = KvBackend::new(config.endpoint.as_str())
        .with_context(|| format!("Invalid store endpoint: {}", config.endpoint))?;
    info!(
        socket = %config.socket.display(),
        base = %base_path.display(),
        endpoint = %backend.endpoint(),
        helper = %config.fuse_helper.display(),
        ?policy,
        "starting rkvol",
    );

    let mounter = HelperMounter::new(&config.fuse_helper, config.mount_timeout())
        .with_args(&config.fuse_helper_args);
    let registry = Arc::new(
        VolumeRegistry::new(PathDeriver::new(base_path), backend, mounter).with_policy(policy),
    );

    let server = PluginServer::bind(&config.socket, Arc::clone(&registry))
        .await
        .with_context(|| format!("Failed to bind plugin socket {}", config.socket.display()))?;

    let served = server.serve(shutdown_signal()?).await;

    registry.shutdown().await;
    served.context("Plugin server failed")?;
    info!("rkvol stopped");
    Ok(())
}
