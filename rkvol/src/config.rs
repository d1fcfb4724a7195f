//! rkvol daemon configuration.
//!
//! Every flag can also be set through the environment:
//! - `RKVOL_SOCKET`: plugin socket path the Docker daemon connects to.
//! - `RKVOL_BASE_PATH`: directory under which volumes are mounted.
//! - `RKVOL_ENDPOINT`: key-value store endpoint handed to the FUSE helper.
//! - `RKVOL_FUSE_HELPER`: FUSE helper program serving one subtree.
//! - `RKVOL_UNMOUNT_POLICY`: `deferred` (default) or `eager`.
//! - `RKVOL_MOUNT_TIMEOUT_SECS`: how long to wait for a mount to appear.
//! - `RKVOL_LOG_FORMAT`: `text` (default) or `json`.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use libvolplugin::UnmountPolicy;

pub const DEFAULT_SOCKET: &str = "/run/docker/plugins/etcdvol.sock";
pub const DEFAULT_BASE_PATH: &str = "/tmp/etcd";
pub const DEFAULT_ENDPOINT: &str = "http://localhost:4001";
pub const DEFAULT_FUSE_HELPER: &str = "etcd-fs";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum UnmountMode {
    /// Keep the filesystem attached after the last holder leaves
    #[default]
    Deferred,
    /// Unmount as soon as the last holder leaves
    Eager,
}

impl From<UnmountMode> for UnmountPolicy {
    fn from(mode: UnmountMode) -> Self {
        match mode {
            UnmountMode::Deferred => UnmountPolicy::Deferred,
            UnmountMode::Eager => UnmountPolicy::Eager,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Docker volume plugin backed by a key-value store mounted through FUSE
#[derive(Parser, Debug)]
#[command(name = "rkvol", version)]
pub struct Config {
    /// Unix socket the plugin listens on
    #[arg(long, env = "RKVOL_SOCKET", value_name = "PATH", default_value = DEFAULT_SOCKET)]
    pub socket: PathBuf,

    /// Directory under which volumes are mounted
    #[arg(long, env = "RKVOL_BASE_PATH", value_name = "DIR", default_value = DEFAULT_BASE_PATH)]
    pub base_path: PathBuf,

    /// Key-value store endpoint (http or https URL)
    #[arg(long, env = "RKVOL_ENDPOINT", value_name = "URL", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// FUSE helper program that serves one subtree
    #[arg(long, env = "RKVOL_FUSE_HELPER", value_name = "PROGRAM", default_value = DEFAULT_FUSE_HELPER)]
    pub fuse_helper: PathBuf,

    /// Extra argument passed to the FUSE helper, can be set multiple times
    #[arg(long = "fuse-helper-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub fuse_helper_args: Vec<String>,

    /// When to detach a volume whose last holder unmounted
    #[arg(long, env = "RKVOL_UNMOUNT_POLICY", value_enum, default_value = "deferred")]
    pub unmount_policy: UnmountMode,

    /// Seconds to wait for the helper to attach a volume
    #[arg(long, env = "RKVOL_MOUNT_TIMEOUT_SECS", value_name = "SECS", default_value_t = 30)]
    pub mount_timeout_secs: u64,

    /// Log output format
    #[arg(long, env = "RKVOL_LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

impl Config {
    pub fn mount_timeout(&self) -> Duration {
        Duration::from_secs(self.mount_timeout_secs)
    }
}
