//! Publish endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;

use super::AppState;
use crate::application::services::PublishError;
use crate::domain::market::MarketEvent;

/// Body of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishResponse {
    /// Always `"Market event sent"`.
    pub message: String,
    /// Subscribers registered when the event was published.
    pub recipients: usize,
}

/// Publish endpoint errors, rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The event failed validation.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// The body was not a market event.
    #[error("{}", .0.body_text())]
    Body(#[from] JsonRejection),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Publish(PublishError::Validation(_)) => StatusCode::BAD_REQUEST,
            Self::Body(rejection) => rejection.status(),
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// `POST /api/market/update`
pub(super) async fn publish_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<MarketEvent>, JsonRejection>,
) -> Result<Json<PublishResponse>, ApiError> {
    let Json(event) = payload?;
    let report = state.publisher.publish(event)?;

    Ok(Json(PublishResponse {
        message: "Market event sent".to_string(),
        recipients: report.recipients,
    }))
}
