//! HTTP control surface: the object-bus transport's replacement. Thin
//! handlers that translate JSON bodies into `TetheringEngine`/
//! `PrivateNetworkManager` calls and map `tether_core::Error` to a status
//! code plus an `ErrorResponse` body.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use tether_core::wire::{
    DisableRequest, EnableRequest, ErrorResponse, HeartbeatRequest, PrivateNetworkRequest, ReleaseRequest,
    StatusResponse,
};
use tether_core::Error;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/tether/enable", post(enable))
        .route("/tether/disable", post(disable))
        .route("/tether/status", get(status))
        .route("/private-network/request", post(request_private_network))
        .route("/private-network/release", post(release_private_network))
        .route("/private-network/heartbeat", post(heartbeat))
        .with_state(state)
}

fn error_response(err: Error) -> (StatusCode, Json<ErrorResponse>) {
    let code = match &err {
        Error::NotFound(_) | Error::UpstreamNotFound(_) | Error::BridgeNotFound(_) => StatusCode::NOT_FOUND,
        Error::AlreadyExists(_) => StatusCode::CONFLICT,
        Error::ModeCrossingNotSupported(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, Json(ErrorResponse { error: err.to_string() }))
}

async fn enable(State(state): State<Arc<AppState>>, Json(body): Json<EnableRequest>) -> impl IntoResponse {
    match state.engine.enable(body.mode, &body.upstream_ifname) {
        Ok(_) => {
            let (status, enable_count) = state.engine.status();
            (StatusCode::OK, Json(StatusResponse { status, enable_count })).into_response()
        }
        Err(err) => error_response(err).into_response(),
    }
}

async fn disable(State(state): State<Arc<AppState>>, Json(body): Json<DisableRequest>) -> impl IntoResponse {
    state.engine.disable(body.mode);
    let (status, enable_count) = state.engine.status();
    (StatusCode::OK, Json(StatusResponse { status, enable_count }))
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, enable_count) = state.engine.status();
    Json(StatusResponse { status, enable_count })
}

/// Blocks (via a short poll) until the reply is ready or a fixed timeout
/// elapses.
async fn request_private_network(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PrivateNetworkRequest>,
) -> impl IntoResponse {
    state.liveness.touch(&body.owner_id);

    let path = match state.private_networks.request(&body.owner_id) {
        Ok(path) => path,
        Err(err) => return error_response(err).into_response(),
    };

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        match state.private_networks.poll_reply(&path) {
            Ok(Some(reply)) => return (StatusCode::OK, Json(reply)).into_response(),
            Ok(None) if std::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Ok(None) => {
                return (
                    StatusCode::GATEWAY_TIMEOUT,
                    Json(ErrorResponse {
                        error: format!("{} did not come up before the timeout", path),
                    }),
                )
                    .into_response();
            }
            Err(err) => return error_response(err).into_response(),
        }
    }
}

async fn release_private_network(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ReleaseRequest>,
) -> impl IntoResponse {
    match state.private_networks.release(&body.path) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err).into_response(),
    }
}

async fn heartbeat(State(state): State<Arc<AppState>>, Json(body): Json<HeartbeatRequest>) -> impl IntoResponse {
    state.liveness.touch(&body.owner_id);
    StatusCode::NO_CONTENT
}
