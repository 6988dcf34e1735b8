//! Request handlers for the container endpoints.

use std::path::PathBuf;

use axum::extract::State;
use axum::Json;
use mydocker_core::CreateOptions;
use mydocker_error::Error;

use crate::api::AppState;
use crate::error::{ApiError, Result};
use crate::types::{
    ContainerCreateRequest, ContainerCreateResponse, ContainerInfo, ContainerListResponse,
    ContainerStopRequest, ContainerStopResponse,
};

/// Validates a create request and projects it onto daemon options.
pub(crate) fn create_options(body: &ContainerCreateRequest) -> Result<CreateOptions> {
    if body.command.is_empty() {
        return Err(ApiError(Error::validation("no command specified")));
    }
    let rootfs = PathBuf::from(&body.rootfs);
    if body.rootfs.is_empty() || !rootfs.is_absolute() {
        return Err(ApiError(Error::validation(
            "rootfs must be an absolute path",
        )));
    }

    Ok(CreateOptions {
        command: body.command.clone(),
        rootfs,
        limits: body.limits(),
        detach: body.detach,
    })
}

/// Create (and start) a container.
///
/// This route only carries detached creates; an attached create arrives
/// with upgrade headers and is routed around the HTTP stack before it
/// reaches the router.
pub async fn create_container(
    State(state): State<AppState>,
    Json(body): Json<ContainerCreateRequest>,
) -> Result<Json<ContainerCreateResponse>> {
    let opts = create_options(&body)?;
    if !opts.detach {
        return Err(ApiError(Error::validation(
            "attached create requires a connection upgrade",
        )));
    }

    let (id, _) = state.daemon.create_container(opts).await?;
    Ok(Json(ContainerCreateResponse { id: id.to_string() }))
}

/// List all containers.
pub async fn list_containers(State(state): State<AppState>) -> Json<ContainerListResponse> {
    let containers = state
        .daemon
        .list_containers()
        .iter()
        .map(ContainerInfo::from_record)
        .collect();
    Json(ContainerListResponse { containers })
}

/// Stop a running container.
pub async fn stop_container(
    State(state): State<AppState>,
    Json(body): Json<ContainerStopRequest>,
) -> Result<Json<ContainerStopResponse>> {
    state.daemon.stop_container(&body.id).await?;
    Ok(Json(ContainerStopResponse { success: true }))
}
