//! # mydocker-api
//!
//! Request surface for the mydocker daemon: an HTTP/1.1 API served over a
//! local unix socket, plus the attached-mode connection hijack.
//!
//! ```text
//! mydocker CLI ──► unix socket ──► ApiServer
//!                                    │  plain requests: axum router
//!                                    │    POST /containers/create
//!                                    │    GET  /containers/list
//!                                    │    POST /containers/stop
//!                                    └─ attached create (Upgrade: tcp):
//!                                       routed around the HTTP stack,
//!                                       socket ⟷ PTY master byte pump
//! ```
//!
//! The socket node carries mode 0666; the filesystem is the trust boundary.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod error;
pub mod handlers;
mod hijack;
pub mod server;
pub mod types;

pub use api::create_router;
pub use error::ApiError;
pub use server::{ApiServer, ServerConfig};
