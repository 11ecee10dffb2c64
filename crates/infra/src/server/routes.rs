//! Route handlers.

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use orgsync_core::{CallbackParams, IntakeOutcome, WebhookRequest};
use orgsync_domain::{OrgSyncError, Provider};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info_span, Instrument};

use super::error::ApiError;
use super::AppState;

fn parse_provider(raw: &str) -> Result<Provider, ApiError> {
    raw.parse::<Provider>()
        .map_err(|_| ApiError(OrgSyncError::NotFound(format!("unknown provider {raw}"))))
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}

/// `POST /webhooks/{provider}`
pub(super) async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let provider = parse_provider(&provider)?;
    let request = WebhookRequest {
        headers: headers
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect(),
        query,
        body: body.to_vec(),
    };

    let outcome = state
        .intake
        .handle(provider, request)
        .instrument(info_span!("webhook", %provider))
        .await?;
    Ok(match outcome {
        IntakeOutcome::Handshake(handshake) => {
            let status = StatusCode::from_u16(handshake.status).unwrap_or(StatusCode::OK);
            (status, [(CONTENT_TYPE, handshake.content_type)], handshake.body).into_response()
        }
        IntakeOutcome::Accepted { enqueued } => {
            (StatusCode::ACCEPTED, Json(json!({ "enqueued": enqueued }))).into_response()
        }
    })
}

#[derive(Debug, Deserialize)]
pub(super) struct AuthorizeQuery {
    organization_id: Option<String>,
    redirect_url: Option<String>,
}

/// `GET /oauth/{provider}/authorize`
pub(super) async fn authorize(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Response, ApiError> {
    let provider = parse_provider(&provider)?;
    let organization_id = query.organization_id.unwrap_or_default();
    let url = state
        .oauth
        .authorize(provider, &organization_id, query.redirect_url.as_deref())
        .map_err(|err| match err {
            OrgSyncError::Config(_) => OrgSyncError::NotFound(format!("provider {provider} is not available")),
            other => other,
        })?;
    debug!(%provider, "redirecting to provider consent");
    Ok(found(&url))
}

#[derive(Debug, Deserialize)]
pub(super) struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// `GET /oauth/{provider}/callback`
pub(super) async fn callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, ApiError> {
    let provider = parse_provider(&provider)?;
    let params = CallbackParams { code: query.code, state: query.state, error: query.error };
    let outcome = state.oauth.callback(provider, params).await;
    Ok(found(&outcome.redirect_url))
}

/// `GET /healthz`
pub(super) async fn health(State(state): State<AppState>) -> Response {
    let database = state.db.health_check();
    let queue = state.queue.stats().await;
    let healthy = database.healthy && queue.is_ok();
    let body = json!({
        "status": if healthy { "ok" } else { "degraded" },
        "database": database,
        "queue": queue.as_ref().ok(),
        "queue_error": queue.as_ref().err().map(ToString::to_string),
    });
    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body)).into_response()
}
