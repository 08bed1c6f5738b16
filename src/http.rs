use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    api::{Error, REDIRECT_PREFIX, ShortenPayload, UrlResponse},
    request_ctx::RequestContext,
    url_repo::UrlMapping,
    url_service::{LookupError, ShortenError, UrlMappingService},
};

type ErrorResponse = (StatusCode, Json<Error>);

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn UrlMappingService>,
    pub public_base_url: Option<Url>,
    pub request_timeout: Duration,
    /// Cancelled on shutdown; every request context is a child of it.
    pub shutdown: CancellationToken,
}

impl AppState {
    fn request_ctx(&self) -> RequestContext {
        RequestContext::with_cancellation(self.shutdown.child_token())
            .with_timeout(self.request_timeout)
    }

    fn base_url(&self, headers: &HeaderMap) -> String {
        if let Some(base) = &self.public_base_url {
            return base.as_str().to_owned();
        }

        headers
            .get(header::HOST)
            .and_then(|host| host.to_str().ok())
            .and_then(|host| Url::parse(&format!("http://{host}")).ok())
            .map_or_else(|| "http://localhost".to_owned(), |url| url.as_str().to_owned())
    }
}

/// Builds the API and redirect routes; any origin may call them.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/shorten", routing::post(shorten))
        .route("/api/v1/url/{code}", routing::get(get_info))
        .route(&format!("{REDIRECT_PREFIX}/{{code}}"), routing::get(redirect))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

#[instrument(skip(state, headers, payload))]
async fn shorten(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ShortenPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<UrlResponse>), ErrorResponse> {
    let Json(ShortenPayload { url }) = payload.map_err(|rejection| {
        let err_uuid = Uuid::new_v4();
        info!(?err_uuid, %rejection, "User submitted a malformed request body");
        error_body(StatusCode::BAD_REQUEST, rejection.body_text(), err_uuid)
    })?;

    let mapping = state
        .service
        .shorten(&state.request_ctx(), &url)
        .await
        .map_err(|error: ShortenError| {
            let err_uuid = Uuid::new_v4();
            match error {
                ShortenError::InvalidUrl(_) => {
                    info!(?err_uuid, ?error, "User submitted a bad request");
                    error_body(StatusCode::BAD_REQUEST, error.to_string(), err_uuid)
                }
                ShortenError::Cancelled(_) => {
                    warn!(?err_uuid, ?error, "Request was cancelled");
                    error_body(
                        StatusCode::SERVICE_UNAVAILABLE,
                        error.to_string(),
                        err_uuid,
                    )
                }
                ShortenError::ExhaustedRetries { .. }
                | ShortenError::AllocationConflict { .. }
                | ShortenError::Internal(_) => {
                    error!(?err_uuid, ?error, "Encountered an error during a request");
                    internal_error(err_uuid)
                }
            }
        })?;

    url_response(mapping, &state.base_url(&headers)).map(|body| (StatusCode::CREATED, body))
}

#[instrument(skip(state, headers))]
async fn get_info(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<UrlResponse>, ErrorResponse> {
    let mapping = state
        .service
        .get_info(&state.request_ctx(), &code)
        .await
        .map_err(lookup_error)?;

    url_response(mapping, &state.base_url(&headers))
}

#[instrument(skip(state))]
async fn redirect(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Response, ErrorResponse> {
    let original_url = state
        .service
        .resolve_and_record_hit(&state.request_ctx(), &code)
        .await
        .map_err(lookup_error)?;

    let location = HeaderValue::try_from(original_url).map_err(|err| {
        let err_uuid = Uuid::new_v4();
        error!(?err_uuid, ?err, "Stored URL is not a valid Location header");
        internal_error(err_uuid)
    })?;

    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

fn url_response(mapping: UrlMapping, base_url: &str) -> Result<Json<UrlResponse>, ErrorResponse> {
    UrlResponse::from_mapping(mapping, base_url)
        .map(Json)
        .map_err(|format_error| {
            let err_uuid = Uuid::new_v4();
            error!(
                ?err_uuid,
                ?format_error,
                "Encountered Format error while formatting timestamp from db"
            );
            internal_error(err_uuid)
        })
}

fn lookup_error(error: LookupError) -> ErrorResponse {
    let err_uuid = Uuid::new_v4();
    match error {
        LookupError::NotFound(_) => {
            info!(?err_uuid, ?error, "Short code not found");
            error_body(StatusCode::NOT_FOUND, "Not found".to_owned(), err_uuid)
        }
        LookupError::Cancelled(_) => {
            warn!(?err_uuid, ?error, "Request was cancelled");
            error_body(
                StatusCode::SERVICE_UNAVAILABLE,
                error.to_string(),
                err_uuid,
            )
        }
        LookupError::Internal(_) => {
            error!(?err_uuid, ?error, "Encountered an error during a request");
            internal_error(err_uuid)
        }
    }
}

fn internal_error(err_uuid: Uuid) -> ErrorResponse {
    error_body(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_owned(),
        err_uuid,
    )
}

fn error_body(status: StatusCode, error: String, err_uuid: Uuid) -> ErrorResponse {
    (
        status,
        Json(Error {
            error,
            error_id: err_uuid.to_string(),
        }),
    )
}
