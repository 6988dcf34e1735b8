//! Attached-mode connection hijack.
//!
//! An attached create stops being HTTP after a single response: once the
//! daemon has decided the container started, it writes one `200 OK` with
//! the JSON id body and from then on the connection carries opaque raw
//! bytes between the client and the container's PTY master. The listener
//! detects such requests by their upgrade headers and hands the whole
//! connection here without involving the router.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use mydocker_container::Runner;
use mydocker_core::Daemon;
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::UnixStream;

use crate::error::ApiError;
use crate::handlers::create_options;
use crate::types::{ContainerCreateRequest, ContainerCreateResponse};

/// Upper bound on an attached create body.
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Parsed request head.
pub(crate) struct RequestHead {
    pub method: String,
    pub path: String,
    headers: Vec<(String, String)>,
    pub body_start: usize,
}

impl RequestHead {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length")?.parse().ok()
    }
}

/// Parses an HTTP/1.1 request head out of `buf`.
///
/// Returns `None` until the blank line has arrived or if the head is
/// malformed.
pub(crate) fn parse_head(buf: &[u8]) -> Option<RequestHead> {
    let end = buf.windows(4).position(|w| w == b"\r\n\r\n")?;
    let text = std::str::from_utf8(&buf[..end]).ok()?;

    let mut lines = text.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line.split_once(':')?;
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }

    Some(RequestHead {
        method,
        path,
        headers,
        body_start: end + 4,
    })
}

/// Whether a sniffed head is an attached create (upgrade-marked POST to
/// the create endpoint).
pub(crate) fn wants_attach(buf: &[u8]) -> bool {
    let Some(head) = parse_head(buf) else {
        return false;
    };
    head.method == "POST"
        && head.path == "/containers/create"
        && head
            .header("upgrade")
            .is_some_and(|v| v.to_ascii_lowercase().contains("tcp"))
}

/// Serves one attached create connection end to end.
pub(crate) async fn serve_attached(daemon: Arc<Daemon>, mut stream: UnixStream, mut buf: Vec<u8>) {
    let Some(head) = parse_head(&buf) else {
        write_error(&mut stream, 400, "Bad Request", "malformed request").await;
        return;
    };

    let Some(length) = head.content_length().filter(|len| *len <= MAX_BODY_SIZE) else {
        write_error(&mut stream, 400, "Bad Request", "missing or oversized body").await;
        return;
    };

    // The sniffed bytes may already hold part of the body.
    while buf.len() < head.body_start + length {
        let mut chunk = [0u8; 4096];
        match stream.read(&mut chunk).await {
            Ok(0) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) => {
                tracing::debug!("failed to read attach request body: {e}");
                return;
            }
        }
    }

    let body = &buf[head.body_start..head.body_start + length];
    let request: ContainerCreateRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => {
            write_error(&mut stream, 400, "Bad Request", &format!("invalid request: {e}")).await;
            return;
        }
    };

    let opts = match create_options(&request) {
        Ok(opts) => opts,
        Err(e) => {
            write_api_error(&mut stream, &e).await;
            return;
        }
    };

    match daemon.create_container(opts).await {
        Err(e) => write_api_error(&mut stream, &ApiError::from(e)).await,
        Ok((id, runner)) => {
            let response = ContainerCreateResponse { id: id.to_string() };
            let body = serde_json::to_vec(&response).unwrap_or_default();
            if write_response(&mut stream, 200, "OK", "application/json", &body)
                .await
                .is_err()
            {
                return;
            }

            // A detached create can arrive with upgrade headers; there is
            // nothing to bridge, the response is the whole exchange.
            if let Some(runner) = runner {
                bridge_session(stream, runner).await;
            }
        }
    }
}

/// Pumps raw bytes between the client socket and the PTY master.
///
/// Two unidirectional copies run concurrently; the first to return (EOF or
/// error, in either direction) ends the session. The PTY master is then
/// closed — a disconnecting client hangs up the child's terminal, which is
/// the deliberate teardown signal — and the handler waits for the monitor
/// to observe the exit.
async fn bridge_session(stream: UnixStream, runner: Arc<Runner>) {
    let Some(master) = runner.pty_master() else {
        tracing::error!(container = %runner.id(), "no PTY available for attached session");
        return;
    };
    let pty = match PtyStream::new(master) {
        Ok(pty) => pty,
        Err(e) => {
            tracing::error!(container = %runner.id(), "failed to register PTY: {e}");
            return;
        }
    };

    let (mut pty_read, mut pty_write) = tokio::io::split(pty);
    let (mut sock_read, mut sock_write) = stream.into_split();

    let mut inbound = tokio::spawn(async move {
        let _ = tokio::io::copy(&mut sock_read, &mut pty_write).await;
    });
    let mut outbound = tokio::spawn(async move {
        let _ = tokio::io::copy(&mut pty_read, &mut sock_write).await;
        let _ = sock_write.shutdown().await;
    });

    tokio::select! {
        _ = &mut inbound => {
            outbound.abort();
            let _ = outbound.await;
        }
        _ = &mut outbound => {
            inbound.abort();
            let _ = inbound.await;
        }
    }

    // Both halves are dropped now; releasing the runner's handle closes
    // the master and delivers SIGHUP to the child's session.
    runner.close_pty();
    runner.wait_exited().await;
}

async fn write_api_error(stream: &mut UnixStream, err: &ApiError) {
    let status = err.status_code();
    let reason = status.canonical_reason().unwrap_or("Error");
    let body = serde_json::json!({ "message": err.message() }).to_string();
    let _ = write_response(
        stream,
        status.as_u16(),
        reason,
        "application/json",
        body.as_bytes(),
    )
    .await;
}

async fn write_error(stream: &mut UnixStream, code: u16, reason: &str, message: &str) {
    let body = serde_json::json!({ "message": message }).to_string();
    let _ = write_response(stream, code, reason, "application/json", body.as_bytes()).await;
}

async fn write_response(
    stream: &mut UnixStream,
    code: u16,
    reason: &str,
    content_type: &str,
    body: &[u8],
) -> io::Result<()> {
    let head = format!(
        "HTTP/1.1 {code} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

/// Shared handle on the PTY master, registered with the reactor.
struct SharedFd(Arc<OwnedFd>);

impl AsRawFd for SharedFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

/// Async adapter over the (non-blocking) PTY master.
struct PtyStream {
    inner: AsyncFd<SharedFd>,
}

impl PtyStream {
    fn new(fd: Arc<OwnedFd>) -> io::Result<Self> {
        Ok(Self {
            inner: AsyncFd::new(SharedFd(fd))?,
        })
    }
}

impl AsyncRead for PtyStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.inner.poll_read_ready(cx))?;
            match guard.try_io(|inner| {
                let fd = inner.get_ref().as_raw_fd();
                let slice = buf.initialize_unfilled();
                let n = unsafe { libc::read(fd, slice.as_mut_ptr().cast(), slice.len()) };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    #[allow(clippy::cast_sign_loss)]
                    Ok(n as usize)
                }
            }) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for PtyStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.inner.poll_write_ready(cx))?;
            match guard.try_io(|inner| {
                let fd = inner.get_ref().as_raw_fd();
                let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    #[allow(clippy::cast_sign_loss)]
                    Ok(n as usize)
                }
            }) {
                Ok(Ok(n)) => return Poll::Ready(Ok(n)),
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // A PTY has no write side to shut down; closing happens by
        // dropping the last handle on the master.
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATTACH_HEAD: &[u8] = b"POST /containers/create HTTP/1.1\r\n\
        Host: localhost\r\n\
        Content-Type: application/json\r\n\
        Content-Length: 42\r\n\
        Connection: Upgrade\r\n\
        Upgrade: tcp\r\n\
        \r\n";

    #[test]
    fn parses_request_line_and_headers() {
        let head = parse_head(ATTACH_HEAD).unwrap();
        assert_eq!(head.method, "POST");
        assert_eq!(head.path, "/containers/create");
        assert_eq!(head.content_length(), Some(42));
        assert_eq!(head.header("upgrade"), Some("tcp"));
        assert_eq!(head.header("UPGRADE"), Some("tcp"));
    }

    #[test]
    fn incomplete_head_does_not_parse() {
        assert!(parse_head(b"POST /containers/create HTTP/1.1\r\nHost: x\r\n").is_none());
    }

    #[test]
    fn attach_detection_requires_upgrade_header() {
        assert!(wants_attach(ATTACH_HEAD));
        assert!(!wants_attach(
            b"POST /containers/create HTTP/1.1\r\nContent-Length: 2\r\n\r\n"
        ));
        assert!(!wants_attach(
            b"GET /containers/list HTTP/1.1\r\nUpgrade: tcp\r\n\r\n"
        ));
    }

    #[test]
    fn body_start_points_past_blank_line() {
        let mut buf = ATTACH_HEAD.to_vec();
        buf.extend_from_slice(b"{\"command\":[\"/bin/sh\"]}");
        let head = parse_head(&buf).unwrap();
        assert_eq!(&buf[head.body_start..head.body_start + 1], b"{");
    }
}
