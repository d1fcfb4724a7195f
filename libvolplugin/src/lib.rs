//! # libvolplugin: Docker volume plugin over a remote key-value tree
//!
//! `libvolplugin` implements a [Docker volume plugin][plugin] whose volumes
//! are subtrees of an etcd-style key-value store, mounted locally through
//! FUSE.  Everything runs on Tokio and reports through `tracing`.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `VolumeName`, `VolumeInfo`, policies. |
//! | [`error`] | [`VolumeError`] enum covering all failure modes. |
//! | [`path`] | [`PathDeriver`]: volume name to mount point. |
//! | [`mount`] | Backend / mount-interface traits and supervised mounts. |
//! | [`registry`] | [`VolumeRegistry`]: the reference-counted mount state machine. |
//! | [`driver`] | [`VolumeDriver`] trait for the volume lifecycle. |
//! | [`message`] | Plugin protocol requests and responses. |
//! | [`transport`] | HTTP server on a Unix socket built on `hyper`. |
//! | [`backend`] | Filesystem backends (key-value store). |
//!
//! [plugin]: https://docs.docker.com/engine/extend/plugins_volume/

pub mod backend;
pub mod driver;
pub mod error;
pub mod message;
pub mod mount;
pub mod path;
pub mod registry;
pub mod transport;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use driver::VolumeDriver;
pub use error::VolumeError;
pub use path::PathDeriver;
pub use registry::VolumeRegistry;
pub use transport::PluginServer;
pub use types::*;
