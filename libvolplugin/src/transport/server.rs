//! Unix socket server that the Docker daemon connects to.  Dispatches plugin
//! requests to a [`VolumeDriver`] implementation.

use std::convert::Infallible;
use std::future::Future;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::{Body, Method, Request, Response, StatusCode};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, instrument, warn};

use crate::driver::VolumeDriver;
use crate::error::VolumeError;
use crate::message::*;

/// A volume plugin server that accepts HTTP/1 connections on a Unix socket
/// and dispatches [`PluginRequest`]s to a [`VolumeDriver`].
pub struct PluginServer<T> {
    listener: UnixListener,
    socket_path: PathBuf,
    handler: Arc<T>,
}

impl<T> PluginServer<T>
where
    T: VolumeDriver + 'static,
{
    /// Bind the plugin socket at `socket_path`.
    ///
    /// Missing parent directories are created and a stale socket left by a
    /// previous run is replaced.  Anything else at `socket_path`, including a
    /// socket another process still listens on, is left alone and reported.
    pub async fn bind(
        socket_path: impl Into<PathBuf>,
        handler: Arc<T>,
    ) -> Result<Self, VolumeError> {
        let socket_path = socket_path.into();
        if let Some(parent) = socket_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| VolumeError::resource(parent, e))?;
        }

        remove_stale_socket(&socket_path).await?;

        let listener = UnixListener::bind(&socket_path).map_err(VolumeError::transport)?;
        info!(path = %socket_path.display(), "volume plugin listening");
        Ok(Self {
            listener,
            socket_path,
            handler,
        })
    }

    /// Accept connections until `shutdown` resolves, then remove the socket.
    ///
    /// Each accepted connection is served on its own Tokio task; requests
    /// already in flight are not cancelled.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), VolumeError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let handler = Arc::clone(&self.handler);
                        tokio::spawn(Self::handle_connection(stream, handler));
                    }
                    Err(e) => warn!(error = %e, "plugin socket accept failed"),
                },
            }
        }

        drop(self.listener);
        match tokio::fs::remove_file(&self.socket_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(VolumeError::resource(&self.socket_path, e)),
        }
        info!(path = %self.socket_path.display(), "volume plugin stopped");
        Ok(())
    }

    /// Serve all HTTP requests on a single connection.
    async fn handle_connection(stream: UnixStream, handler: Arc<T>) {
        let service = service_fn(move |req| {
            let handler = Arc::clone(&handler);
            async move { Ok::<_, Infallible>(Self::handle_request(req, &handler).await) }
        });
        if let Err(e) = Http::new().serve_connection(stream, service).await {
            debug!(error = %e, "plugin connection closed with error");
        }
    }

    /// Process one HTTP request: route → decode → dispatch → encode.
    #[instrument(skip_all, fields(path = %req.uri().path()))]
    async fn handle_request(req: Request<Body>, handler: &T) -> Response<Body> {
        let started = Instant::now();
        let Some(route) = Route::from_path(req.uri().path()) else {
            warn!("unknown plugin route");
            return plain_response(StatusCode::NOT_FOUND, "404 page not found\n");
        };
        if req.method() != Method::POST {
            return plain_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n");
        }

        let response = match hyper::body::to_bytes(req.into_body()).await {
            Ok(body) => match PluginRequest::decode(route, &body) {
                Ok(request) => {
                    debug!(%request, "plugin request received");
                    Self::dispatch(handler, request).await
                }
                Err(e) => PluginResponse::error_for(route, &e),
            },
            Err(e) => PluginResponse::error_for(route, &VolumeError::transport(e)),
        };

        info!(
            %route,
            %response,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "plugin request handled",
        );
        json_response(&response)
    }

    /// Map a [`PluginRequest`] to the correct driver call and wrap the result
    /// in a [`PluginResponse`].
    pub async fn dispatch(handler: &T, request: PluginRequest) -> PluginResponse {
        match request {
            PluginRequest::Activate => PluginResponse::Activate(ActivateResponse::default()),
            PluginRequest::Capabilities => PluginResponse::Capabilities(CapabilitiesResponse {
                capabilities: handler.capabilities(),
            }),

            PluginRequest::Create(req) => PluginResponse::from_unit(handler.create(&req.name).await),
            PluginRequest::Remove(req) => PluginResponse::from_unit(handler.remove(&req.name).await),
            PluginRequest::Unmount(req) => {
                PluginResponse::from_unit(handler.unmount(&req.name).await)
            }
            PluginRequest::Mount(req) => {
                PluginResponse::from_mountpoint(handler.mount(&req.name).await)
            }
            PluginRequest::Path(req) => {
                PluginResponse::from_mountpoint(handler.path(&req.name).await)
            }

            PluginRequest::Get(req) => match handler.get(&req.name).await {
                Ok(volume) => PluginResponse::Get(GetResponse {
                    volume: Some(volume),
                    err: String::new(),
                }),
                Err(e) => PluginResponse::error_for(Route::Get, &e),
            },
            PluginRequest::List => match handler.list().await {
                Ok(volumes) => PluginResponse::List(ListResponse {
                    volumes,
                    err: String::new(),
                }),
                Err(e) => PluginResponse::error_for(Route::List, &e),
            },
        }
    }
}

/// Remove a socket file nobody listens on any more.
async fn remove_stale_socket(path: &Path) -> Result<(), VolumeError> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(VolumeError::resource(path, e)),
    };
    if !metadata.file_type().is_socket() {
        return Err(VolumeError::resource(path, "exists and is not a socket"));
    }
    if UnixStream::connect(path).await.is_ok() {
        return Err(VolumeError::resource(
            path,
            "socket is in use by another plugin instance",
        ));
    }

    tokio::fs::remove_file(path)
        .await
        .map_err(|e| VolumeError::resource(path, e))?;
    debug!(path = %path.display(), "removed stale plugin socket");
    Ok(())
}

fn json_response(response: &PluginResponse) -> Response<Body> {
    match serde_json::to_vec(response) {
        Ok(payload) => {
            let mut resp = Response::new(Body::from(payload));
            resp.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(PLUGIN_CONTENT_TYPE));
            resp
        }
        Err(e) => plain_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode response: {e}\n"),
        ),
    }
}

fn plain_response(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut resp = Response::new(body.into());
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    resp
}
