//! Pluggable filesystem backends.
//!
//! Each backend module provides a concrete type that implements
//! [`FsBackend`](crate::mount::FsBackend).

pub mod kv;
