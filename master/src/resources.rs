//! HTTP bulk channel
//!
//! Players fetch the whole document from `/data.json` and the images it
//! references from their campaign-relative paths. The document comes from
//! the session loop so it always reflects the live state, not the file on
//! disk.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, error, info, warn};
use shared::resources::{sanitize_path, DATA_FILE};
use shared::SessionMessage;
use std::convert::Infallible;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

pub struct ResourceServer {
    root: PathBuf,
    session_tx: mpsc::UnboundedSender<SessionMessage>,
}

impl ResourceServer {
    pub fn new(root: impl Into<PathBuf>, session_tx: mpsc::UnboundedSender<SessionMessage>) -> Self {
        Self {
            root: root.into(),
            session_tx,
        }
    }

    pub async fn handle<B>(&self, request: Request<B>) -> Result<Response<Full<Bytes>>, Infallible> {
        if request.method() != Method::GET {
            return Ok(status_response(StatusCode::METHOD_NOT_ALLOWED));
        }

        let path = request.uri().path();
        debug!("GET {}", path);
        if path.trim_start_matches('/') == DATA_FILE {
            Ok(self.snapshot().await)
        } else {
            Ok(self.static_file(path).await)
        }
    }

    async fn snapshot(&self) -> Response<Full<Bytes>> {
        let (reply, response) = oneshot::channel();
        if self
            .session_tx
            .send(SessionMessage::SnapshotRequested { reply })
            .is_err()
        {
            warn!("Snapshot requested after the session ended");
            return status_response(StatusCode::SERVICE_UNAVAILABLE);
        }

        let Ok(data) = response.await else {
            return status_response(StatusCode::SERVICE_UNAVAILABLE);
        };
        match serde_json::to_vec(&data) {
            Ok(body) => body_response(body, "application/json"),
            Err(e) => {
                error!("Failed to encode snapshot: {}", e);
                status_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    async fn static_file(&self, request_path: &str) -> Response<Full<Bytes>> {
        let Some(path) = sanitize_path(&self.root, request_path) else {
            warn!("Refusing path {}", request_path);
            return status_response(StatusCode::NOT_FOUND);
        };
        match tokio::fs::read(&path).await {
            Ok(body) => body_response(body, content_type(&path)),
            Err(e) => {
                debug!("{}: {}", path.display(), e);
                status_response(StatusCode::NOT_FOUND)
            }
        }
    }
}

fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

fn body_response(body: Vec<u8>, content_type: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Accepts HTTP/1 connections until the listener fails.
pub async fn serve(listener: TcpListener, server: Arc<ResourceServer>) -> io::Result<()> {
    info!("Serving campaign resources on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let server = Arc::clone(&server);

        tokio::spawn(async move {
            let service = service_fn(move |request| {
                let server = Arc::clone(&server);
                async move { server.handle(request).await }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Connection from {} ended: {}", peer, e);
            }
        });
    }
}
