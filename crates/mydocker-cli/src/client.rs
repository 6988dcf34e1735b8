//! Daemon client.
//!
//! Detached creates, listing, and stops are single HTTP round-trips over
//! the unix socket. Attached creates open the socket directly: the request
//! is framed as HTTP by hand, the response head is parsed up to the blank
//! line, and afterwards the connection carries the raw terminal byte
//! stream — so the HTTP client machinery has to stay out of the way.

use anyhow::{bail, Context, Result};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use mydocker_api::types::{
    ContainerCreateRequest, ContainerCreateResponse, ContainerInfo, ContainerListResponse,
    ContainerStopRequest, ContainerStopResponse,
};

use crate::terminal;

/// Default socket path for the mydocker daemon.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/mydocker.sock";

/// Client for the daemon's unix-socket API.
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    /// Creates a client using the default socket path.
    #[must_use]
    pub fn new() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
        }
    }

    /// Creates a client with a custom socket path.
    pub fn with_socket(path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: path.as_ref().to_path_buf(),
        }
    }

    /// Creates a container and returns its id.
    ///
    /// In attached mode the local terminal is put into raw mode and
    /// bridged to the container until either side hangs up.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon is unreachable or rejects the
    /// request.
    pub async fn create_container(&self, request: ContainerCreateRequest) -> Result<String> {
        if request.detach {
            self.create_detached(request).await
        } else {
            self.create_attached(request).await
        }
    }

    async fn create_detached(&self, request: ContainerCreateRequest) -> Result<String> {
        let body = serde_json::to_vec(&request).context("failed to encode request")?;
        let response = self
            .request(Method::POST, "/containers/create", Some(body))
            .await?;
        let response: ContainerCreateResponse =
            serde_json::from_slice(&response).context("failed to decode response")?;
        Ok(response.id)
    }

    async fn create_attached(&self, request: ContainerCreateRequest) -> Result<String> {
        let body = serde_json::to_vec(&request).context("failed to encode request")?;

        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .with_context(|| {
                format!(
                    "failed to connect to daemon at {}",
                    self.socket_path.display()
                )
            })?;

        // Hand-framed request: after the response this connection stops
        // being HTTP, so no HTTP client library can own it. The upgrade
        // headers tell the daemon to route the connection around its
        // router.
        let head = format!(
            "POST /containers/create HTTP/1.1\r\n\
             Host: localhost\r\n\
             Content-Type: application/json\r\n\
             Content-Length: {}\r\n\
             Connection: Upgrade\r\n\
             Upgrade: tcp\r\n\
             \r\n",
            body.len()
        );
        stream.write_all(head.as_bytes()).await?;
        stream.write_all(&body).await?;

        let (status, response_body) = read_response(&mut stream).await?;
        if status != 200 {
            bail!(
                "daemon returned error {status}: {}",
                error_message(&response_body)
            );
        }
        let response: ContainerCreateResponse =
            serde_json::from_slice(&response_body).context("failed to decode response")?;

        // Raw mode lasts for the bridge only; the guard restores the
        // terminal on drop, including on error paths.
        {
            let _raw = terminal::RawModeGuard::new()?;
            terminal::bridge(stream).await?;
        }

        Ok(response.id)
    }

    /// Lists all containers.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon is unreachable or responds with an
    /// error status.
    pub async fn list_containers(&self) -> Result<Vec<ContainerInfo>> {
        let body = self.request(Method::GET, "/containers/list", None).await?;
        let response: ContainerListResponse =
            serde_json::from_slice(&body).context("failed to decode response")?;
        Ok(response.containers)
    }

    /// Stops a running container.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon rejects the stop.
    pub async fn stop_container(&self, id: &str) -> Result<()> {
        let request = ContainerStopRequest { id: id.to_string() };
        let body = serde_json::to_vec(&request).context("failed to encode request")?;
        let response = self
            .request(Method::POST, "/containers/stop", Some(body))
            .await?;
        let response: ContainerStopResponse =
            serde_json::from_slice(&response).context("failed to decode response")?;
        if !response.success {
            bail!("failed to stop container");
        }
        Ok(())
    }

    /// Performs one HTTP round-trip over the socket.
    async fn request(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<Bytes> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .with_context(|| {
                format!(
                    "failed to connect to daemon at {}",
                    self.socket_path.display()
                )
            })?;
        let io = TokioIo::new(stream);

        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .context("HTTP handshake failed")?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!("connection closed: {e}");
            }
        });

        let body = body.unwrap_or_default();
        let request = Request::builder()
            .method(method)
            .uri(format!("http://localhost{path}"))
            .header("Host", "localhost")
            .header("Content-Type", "application/json")
            .header("Content-Length", body.len())
            .body(Full::new(Bytes::from(body)))
            .context("failed to build request")?;

        let response = sender
            .send_request(request)
            .await
            .context("failed to send request")?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .context("failed to read response")?
            .to_bytes();

        if !status.is_success() {
            bail!("daemon returned error {status}: {}", error_message(&body));
        }
        Ok(body)
    }
}

impl Default for DaemonClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Extracts the `{message}` body of an error response, falling back to the
/// raw bytes.
fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message")?.as_str().map(String::from))
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}

/// Reads an HTTP response off the raw socket: status line, headers up to
/// the blank line, then a content-length body.
async fn read_response(stream: &mut UnixStream) -> Result<(u16, Vec<u8>)> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if buf.len() > 64 * 1024 {
            bail!("response head too large");
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            bail!("connection closed while reading response");
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = std::str::from_utf8(&buf[..head_end - 4]).context("invalid response head")?;
    let mut lines = head.split("\r\n");
    let status_line = lines.next().context("empty response")?;
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .context("invalid status line")?;

    let mut content_length = 0usize;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    while buf.len() < head_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            bail!("connection closed while reading response body");
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Ok((status, buf[head_end..head_end + content_length].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_json_body() {
        assert_eq!(
            error_message(br#"{"message": "no such container"}"#),
            "no such container"
        );
        assert_eq!(error_message(b"plain text"), "plain text");
    }

    #[tokio::test]
    async fn read_response_parses_status_and_body() {
        let (mut client, mut server) = UnixStream::pair().unwrap();
        tokio::spawn(async move {
            server
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 21\r\n\r\n{\"id\":\"ab12cd34ef56\"}",
                )
                .await
                .unwrap();
        });

        let (status, body) = read_response(&mut client).await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, br#"{"id":"ab12cd34ef56"}"#);
    }
}
