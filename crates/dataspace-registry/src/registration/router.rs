use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::domain::{ParticipantId, ParticipantState};
use super::service::RegistrationService;
use super::store::ParticipantStore;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub(crate) struct SubmitRequest {
    pub(crate) did: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListQuery {
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DidQuery {
    did: String,
}

/// Router exposing submission and status endpoints.
pub fn registry_router<S>(service: Arc<RegistrationService<S>>) -> Router
where
    S: ParticipantStore + 'static,
{
    Router::new()
        .route(
            "/api/v1/registry/participants",
            get(list_handler::<S>).post(submit_handler::<S>),
        )
        .route(
            "/api/v1/registry/participants/:participant_id",
            get(status_handler::<S>),
        )
        .route("/api/v1/registry/participant", get(did_handler::<S>))
        .route("/api/v1/registry/stalled", get(stalled_handler::<S>))
        .with_state(service)
}

pub(crate) async fn submit_handler<S>(
    State(service): State<Arc<RegistrationService<S>>>,
    axum::Json(request): axum::Json<SubmitRequest>,
) -> Result<Response, AppError>
where
    S: ParticipantStore + 'static,
{
    let record = service.submit_registration(&request.did).await?;
    Ok((StatusCode::ACCEPTED, axum::Json(record.status_view())).into_response())
}

pub(crate) async fn status_handler<S>(
    State(service): State<Arc<RegistrationService<S>>>,
    Path(participant_id): Path<String>,
) -> Result<Response, AppError>
where
    S: ParticipantStore + 'static,
{
    let view = service.get_status(&ParticipantId(participant_id)).await?;
    Ok((StatusCode::OK, axum::Json(view)).into_response())
}

pub(crate) async fn did_handler<S>(
    State(service): State<Arc<RegistrationService<S>>>,
    Query(query): Query<DidQuery>,
) -> Result<Response, AppError>
where
    S: ParticipantStore + 'static,
{
    let view = service.find_by_did(&query.did).await?;
    Ok((StatusCode::OK, axum::Json(view)).into_response())
}

pub(crate) async fn list_handler<S>(
    State(service): State<Arc<RegistrationService<S>>>,
    Query(query): Query<ListQuery>,
) -> Result<Response, AppError>
where
    S: ParticipantStore + 'static,
{
    let state = match query.state.as_deref() {
        None => None,
        Some(raw) => match ParticipantState::from_label(raw) {
            Some(state) => Some(state),
            None => {
                let payload = json!({ "error": format!("unknown state '{raw}'") });
                return Ok((StatusCode::BAD_REQUEST, axum::Json(payload)).into_response());
            }
        },
    };

    let views = service.list(state).await?;
    Ok((StatusCode::OK, axum::Json(views)).into_response())
}

pub(crate) async fn stalled_handler<S>(
    State(service): State<Arc<RegistrationService<S>>>,
) -> Result<Response, AppError>
where
    S: ParticipantStore + 'static,
{
    let views = service.stalled(Utc::now()).await?;
    Ok((StatusCode::OK, axum::Json(views)).into_response())
}
