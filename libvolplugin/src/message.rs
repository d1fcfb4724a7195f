//! Docker volume plugin protocol messages.
//!
//! The Docker daemon talks to the plugin with one JSON `POST` per operation.
//! [`Route`] identifies the operation from the URL path, [`VolumeRequest`] is
//! the common request body, and [`PluginResponse`] wraps every response body.
//! Field names follow the Docker plugin API (`PascalCase`, `Err` always
//! present and empty on success).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::VolumeError;
use crate::types::{DriverCapabilities, VolumeInfo, VolumeName};

/// Content type of every plugin response.
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1+json";

/// Plugin subsystems announced by `Plugin.Activate`.
pub const IMPLEMENTS: &[&str] = &["VolumeDriver"];

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// One plugin endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Activate,
    Create,
    Remove,
    Mount,
    Unmount,
    Path,
    Get,
    List,
    Capabilities,
}

impl Route {
    /// Resolve a request path; a trailing `/` is accepted.
    pub fn from_path(path: &str) -> Option<Self> {
        let route = match path.trim_end_matches('/') {
            "/Plugin.Activate" => Self::Activate,
            "/VolumeDriver.Create" => Self::Create,
            "/VolumeDriver.Remove" => Self::Remove,
            "/VolumeDriver.Mount" => Self::Mount,
            "/VolumeDriver.Unmount" => Self::Unmount,
            "/VolumeDriver.Path" => Self::Path,
            "/VolumeDriver.Get" => Self::Get,
            "/VolumeDriver.List" => Self::List,
            "/VolumeDriver.Capabilities" => Self::Capabilities,
            _ => return None,
        };
        Some(route)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Activate => "Plugin.Activate",
            Self::Create => "VolumeDriver.Create",
            Self::Remove => "VolumeDriver.Remove",
            Self::Mount => "VolumeDriver.Mount",
            Self::Unmount => "VolumeDriver.Unmount",
            Self::Path => "VolumeDriver.Path",
            Self::Get => "VolumeDriver.Get",
            Self::List => "VolumeDriver.List",
            Self::Capabilities => "VolumeDriver.Capabilities",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Body of every per-volume request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeRequest {
    pub name: VolumeName,
    /// Driver options from `docker volume create -o` (Create only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opts: Option<HashMap<String, String>>,
    /// Caller identifier (Mount / Unmount only).
    #[serde(default, rename = "ID", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// A decoded plugin request.
#[derive(Debug, Clone)]
pub enum PluginRequest {
    Activate,
    Create(VolumeRequest),
    Remove(VolumeRequest),
    Mount(VolumeRequest),
    Unmount(VolumeRequest),
    Path(VolumeRequest),
    Get(VolumeRequest),
    List,
    Capabilities,
}

impl PluginRequest {
    /// Decode the body of a request sent to `route`.
    ///
    /// Routes without a per-volume body ignore it entirely, so an empty body
    /// is fine for them.
    pub fn decode(route: Route, body: &[u8]) -> Result<Self, VolumeError> {
        let volume = || {
            serde_json::from_slice::<VolumeRequest>(body)
                .map_err(|e| VolumeError::InvalidRequest(e.to_string()))
        };
        let request = match route {
            Route::Activate => Self::Activate,
            Route::Create => Self::Create(volume()?),
            Route::Remove => Self::Remove(volume()?),
            Route::Mount => Self::Mount(volume()?),
            Route::Unmount => Self::Unmount(volume()?),
            Route::Path => Self::Path(volume()?),
            Route::Get => Self::Get(volume()?),
            Route::List => Self::List,
            Route::Capabilities => Self::Capabilities,
        };
        Ok(request)
    }
}

impl fmt::Display for PluginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Activate => f.write_str("Activate"),
            Self::Create(req) => write!(f, "Create({})", req.name),
            Self::Remove(req) => write!(f, "Remove({})", req.name),
            Self::Mount(req) => write!(f, "Mount({})", req.name),
            Self::Unmount(req) => write!(f, "Unmount({})", req.name),
            Self::Path(req) => write!(f, "Path({})", req.name),
            Self::Get(req) => write!(f, "Get({})", req.name),
            Self::List => f.write_str("List"),
            Self::Capabilities => f.write_str("Capabilities"),
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// `Plugin.Activate` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    pub implements: Vec<String>,
}

impl Default for ActivateResponse {
    fn default() -> Self {
        Self {
            implements: IMPLEMENTS.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

/// Response carrying only an error message (Create, Remove, Unmount).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ErrResponse {
    pub err: String,
}

/// Response carrying a mount point (Mount, Path).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct MountpointResponse {
    pub mountpoint: String,
    pub err: String,
}

/// `VolumeDriver.Get` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct GetResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeInfo>,
    pub err: String,
}

/// `VolumeDriver.List` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ListResponse {
    pub volumes: Vec<VolumeInfo>,
    pub err: String,
}

/// `VolumeDriver.Capabilities` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesResponse {
    pub capabilities: DriverCapabilities,
}

/// Any plugin response body.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PluginResponse {
    Activate(ActivateResponse),
    Err(ErrResponse),
    Mountpoint(MountpointResponse),
    Get(GetResponse),
    List(ListResponse),
    Capabilities(CapabilitiesResponse),
}

impl PluginResponse {
    /// Error-only response for `res`.
    pub fn from_unit(res: Result<(), VolumeError>) -> Self {
        Self::Err(ErrResponse {
            err: res.err().map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    /// Mount point response for `res`.
    pub fn from_mountpoint(res: Result<std::path::PathBuf, VolumeError>) -> Self {
        Self::Mountpoint(match res {
            Ok(path) => MountpointResponse {
                mountpoint: path.display().to_string(),
                err: String::new(),
            },
            Err(e) => MountpointResponse {
                mountpoint: String::new(),
                err: e.to_string(),
            },
        })
    }

    /// Error response shaped for `route`, used when the request itself is bad.
    pub fn error_for(route: Route, e: &VolumeError) -> Self {
        let err = e.to_string();
        match route {
            Route::Mount | Route::Path => Self::Mountpoint(MountpointResponse {
                mountpoint: String::new(),
                err,
            }),
            Route::Get => Self::Get(GetResponse { volume: None, err }),
            Route::List => Self::List(ListResponse {
                volumes: Vec::new(),
                err,
            }),
            _ => Self::Err(ErrResponse { err }),
        }
    }

    /// The error message carried by the response, if any.
    pub fn error(&self) -> Option<&str> {
        let err = match self {
            Self::Activate(_) | Self::Capabilities(_) => return None,
            Self::Err(r) => &r.err,
            Self::Mountpoint(r) => &r.err,
            Self::Get(r) => &r.err,
            Self::List(r) => &r.err,
        };
        (!err.is_empty()).then_some(err.as_str())
    }
}

impl fmt::Display for PluginResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(err) = self.error() {
            return write!(f, "Err({err})");
        }
        match self {
            Self::Activate(r) => write!(f, "Activate({})", r.implements.join(",")),
            Self::Err(_) => f.write_str("Ok"),
            Self::Mountpoint(r) => write!(f, "Mountpoint({})", r.mountpoint),
            Self::Get(r) => match &r.volume {
                Some(v) => write!(f, "Volume({})", v.name),
                None => f.write_str("Volume(none)"),
            },
            Self::List(r) => write!(f, "VolumeList(count={})", r.volumes.len()),
            Self::Capabilities(r) => write!(f, "Capabilities({:?})", r.capabilities.scope),
        }
    }
}
