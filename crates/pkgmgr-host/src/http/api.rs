use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use pkgmgr_runtime::RenderError;

use crate::http::HttpState;

pub fn router() -> Router<HttpState> {
    Router::new()
        .route("/dump", get(dump))
        .route("/queues/dump", get(queues_dump))
        .route("/scheduler/dump", get(scheduler_dump))
        .route("/render", get(render_missing_name))
        .route("/render/{name}", get(render))
}

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<serde_yaml::Error> for ApiError {
    fn from(err: serde_yaml::Error) -> Self {
        ApiError::Internal(format!("encode dump: {err}"))
    }
}

impl From<RenderError> for ApiError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::NotFound(_) => ApiError::NotFound(err.to_string()),
            RenderError::NotHelm(_) => ApiError::BadRequest(err.to_string()),
            RenderError::Failed(_) => ApiError::Internal(format!("{:#}", anyhow::Error::new(err))),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, message).into_response()
    }
}

fn yaml(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/yaml")], body).into_response()
}

async fn dump(State(state): State<HttpState>) -> Result<Response, ApiError> {
    Ok(yaml(state.runtime.dump()?))
}

async fn queues_dump(State(state): State<HttpState>) -> Result<Response, ApiError> {
    Ok(yaml(state.runtime.queues_dump()?))
}

async fn scheduler_dump(State(state): State<HttpState>) -> Result<Response, ApiError> {
    Ok(yaml(state.runtime.scheduler_dump()?))
}

async fn render_missing_name() -> ApiError {
    ApiError::BadRequest("package name is required".into())
}

async fn render(
    State(state): State<HttpState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let manifest = state.runtime.render(&name).await?;
    Ok(yaml(manifest))
}
