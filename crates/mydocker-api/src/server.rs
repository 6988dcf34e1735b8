//! Unix-socket API server.
//!
//! Each accepted connection has its request head sniffed before anything
//! touches the HTTP stack: attached creates (marked by upgrade headers)
//! stop being HTTP after a single response, so they are handled by the
//! hijack path; everything else is replayed into hyper and served by the
//! axum router.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use mydocker_core::Daemon;
use mydocker_error::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::Service;
use tower_http::trace::TraceLayer;

use crate::api::create_router;
use crate::hijack;

/// Default unix socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/mydocker.sock";

/// Upper bound on a sniffed request head.
const MAX_HEAD_SIZE: usize = 8 * 1024;

/// How long in-flight connections get to finish during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Unix socket path.
    pub socket_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
        }
    }
}

/// The daemon's request surface.
pub struct ApiServer {
    config: ServerConfig,
    daemon: Arc<Daemon>,
}

impl ApiServer {
    /// Creates a new API server.
    #[must_use]
    pub fn new(config: ServerConfig, daemon: Arc<Daemon>) -> Self {
        Self { config, daemon }
    }

    /// Returns the socket path.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Runs the server until `shutdown` fires, then drains in-flight
    /// connections with a 5 s deadline.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound or configured.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let socket_path = &self.config.socket_path;

        // Stale socket from a previous daemon.
        let _ = std::fs::remove_file(socket_path);
        if let Some(parent) = socket_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let listener = UnixListener::bind(socket_path)
            .map_err(|e| Error::internal(format!("failed to bind unix socket: {e}")))?;

        // The filesystem is the trust boundary.
        set_socket_permissions(socket_path)?;

        tracing::info!("daemon listening on {}", socket_path.display());

        let app = create_router(Arc::clone(&self.daemon)).layer(TraceLayer::new_for_http());
        let mut connections: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let app = app.clone();
                            let daemon = Arc::clone(&self.daemon);
                            connections.spawn(handle_connection(app, daemon, stream));
                        }
                        Err(e) => {
                            tracing::error!("failed to accept connection: {e}");
                        }
                    }
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(listener);

        let drain = async {
            while connections.join_next().await.is_some() {}
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            tracing::warn!("aborting in-flight connections after shutdown grace period");
            connections.shutdown().await;
        }

        Ok(())
    }
}

fn set_socket_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))
        .map_err(|e| Error::internal(format!("failed to set socket permissions: {e}")))
}

/// Sniffs the request head and dispatches the connection.
async fn handle_connection(
    app: Router<()>,
    daemon: Arc<Daemon>,
    mut stream: UnixStream,
) {
    let mut head = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    while !contains_head_end(&head) {
        if head.len() > MAX_HEAD_SIZE {
            tracing::warn!("dropping connection with oversized request head");
            return;
        }
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => head.extend_from_slice(&chunk[..n]),
            Err(e) => {
                tracing::debug!("failed to read request head: {e}");
                return;
            }
        }
    }
    if head.is_empty() {
        return;
    }

    if hijack::wants_attach(&head) {
        hijack::serve_attached(daemon, stream, head).await;
    } else {
        serve_plain(app, RewindStream::new(head, stream)).await;
    }
}

fn contains_head_end(buf: &[u8]) -> bool {
    buf.windows(4).any(|w| w == b"\r\n\r\n")
}

/// Serves one plain HTTP connection through the router.
async fn serve_plain(app: Router<()>, stream: RewindStream) {
    let tower_service = app;
    let hyper_service = hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
        tower_service.clone().call(request)
    });

    if let Err(err) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), hyper_service)
        .await
    {
        let err_str = err.to_string().to_lowercase();
        if !err_str.contains("shutting down")
            && !err_str.contains("connection reset")
            && !err_str.contains("broken pipe")
        {
            tracing::error!("error serving connection: {err}");
        }
    }
}

/// A unix stream with the sniffed head bytes replayed in front.
struct RewindStream {
    prefix: Vec<u8>,
    offset: usize,
    inner: UnixStream,
}

impl RewindStream {
    fn new(prefix: Vec<u8>, inner: UnixStream) -> Self {
        Self {
            prefix,
            offset: 0,
            inner,
        }
    }
}

impl AsyncRead for RewindStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.offset < this.prefix.len() {
            let remaining = &this.prefix[this.offset..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            this.offset += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for RewindStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
