//! Docker plugin transport.
//!
//! [`server::PluginServer`] speaks the plugin protocol (HTTP/1, JSON bodies)
//! on a Unix socket and hands decoded requests to a
//! [`VolumeDriver`](crate::driver::VolumeDriver).

pub mod server;

pub use server::PluginServer;
