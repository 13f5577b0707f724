use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;

use filetide_core::PipelineExecutor;

use crate::response::{error_response, pipeline_response, token_not_found_response};
use crate::token::TokenSource;

#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<PipelineExecutor>,
    pub tokens: Arc<dyn TokenSource>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/pipeline/{token_id}", get(run_pipeline))
        .route("/healthcheck", get(healthcheck))
        .with_state(state)
}

async fn healthcheck() -> Response {
    axum::Json(serde_json::json!({ "status": "ok" })).into_response()
}

async fn run_pipeline(State(state): State<AppState>, Path(token_id): Path<String>) -> Response {
    let request = match state.tokens.take(&token_id).await {
        Ok(Some(request)) => request,
        Ok(None) => return token_not_found_response(),
        Err(error) => {
            tracing::error!(error = %error, "token lookup failed");
            return error_response(&error);
        },
    };

    tracing::info!(
        token = token_id.as_str(),
        steps = request.pipeline_steps.len(),
        "executing pipeline"
    );
    match state.executor.run(request.pipeline_steps).await {
        Ok(run) => pipeline_response(run).await,
        Err(error) => {
            tracing::warn!(token = token_id.as_str(), error = %error, "pipeline failed");
            error_response(&error)
        },
    }
}
